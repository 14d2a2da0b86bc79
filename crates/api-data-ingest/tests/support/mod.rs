//! Fixed-response HTTP source served by axum on an ephemeral port.

use std::io;
use std::net::TcpListener as StdTcpListener;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::Router;
use tokio::runtime::Builder;
use tokio::sync::oneshot;

/// Method and path of one request the stub answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub method: Method,
    pub path: String,
}

#[derive(Clone)]
struct StubState {
    status: StatusCode,
    body: String,
    requests: Arc<Mutex<Vec<SeenRequest>>>,
}

/// Running stub; shuts the server down when dropped.
pub struct SourceStub {
    url: String,
    requests: Arc<Mutex<Vec<SeenRequest>>>,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl SourceStub {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        match self.requests.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Drop for SourceStub {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Serve `body` with `status` for every request until the stub is dropped.
pub fn spawn_source_stub(status: StatusCode, body: impl Into<String>) -> io::Result<SourceStub> {
    let listener = StdTcpListener::bind("127.0.0.1:0")?;
    listener.set_nonblocking(true)?;
    let url = format!("http://{}/mock_api", listener.local_addr()?);

    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = StubState { status, body: body.into(), requests: Arc::clone(&requests) };
    let app = Router::new().fallback(respond).with_state(state);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let join = thread::spawn(move || {
        let Ok(runtime) = Builder::new_current_thread().enable_all().build() else {
            return;
        };
        runtime.block_on(async move {
            let Ok(listener) = tokio::net::TcpListener::from_std(listener) else {
                return;
            };
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = server.await;
        });
    });

    Ok(SourceStub { url, requests, shutdown: Some(shutdown_tx), join: Some(join) })
}

async fn respond(State(state): State<StubState>, method: Method, uri: Uri) -> impl IntoResponse {
    if let Ok(mut requests) = state.requests.lock() {
        requests.push(SeenRequest { method, path: uri.path().to_string() });
    }
    (
        state.status,
        [(header::CONTENT_TYPE, "application/json"), (header::CONNECTION, "close")],
        state.body,
    )
}
