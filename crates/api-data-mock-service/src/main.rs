use std::net::SocketAddr;

use anyhow::Result;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use rand::Rng;
use serde::Serialize;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "mock.v1";

/// Random record served by `GET /mock_api`.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
struct MockRecord {
    id: i64,
    name: String,
    timestamp: String,
    value: i64,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    service_contract_version: &'static str,
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "api-data-mock-service")]
#[command(about = "Mock endpoint serving random API data records")]
struct Args {
    #[arg(long, env = "MOCK_API_BIND", default_value = "127.0.0.1:5001")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

impl ServiceError {
    fn new(message: impl Into<String>) -> Self {
        Self { service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }
}

/// Build one random record stamped with `now`.
///
/// The served endpoint passes the current UTC wall-clock time, not local time.
fn generate_mock_record<R>(
    rng: &mut R,
    now: PrimitiveDateTime,
) -> Result<MockRecord, time::error::Format>
where
    R: Rng + ?Sized,
{
    Ok(MockRecord {
        id: rng.gen_range(1..=1000),
        name: format!("Item {}", rng.gen_range(1..=100)),
        timestamp: now.format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]"
        ))?,
        value: rng.gen_range(1..=100),
    })
}

/// Current UTC time without its offset.
fn now_naive() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

fn app() -> Router {
    Router::new().route("/v1/health", get(health)).route("/mock_api", get(mock_api))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "mock api listening");
    axum::serve(listener, app()).await?;
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { service_contract_version: SERVICE_CONTRACT_VERSION, status: "ok" })
}

async fn mock_api() -> Result<Json<MockRecord>, ServiceError> {
    let record = generate_mock_record(&mut rand::thread_rng(), now_naive())
        .map_err(|err| ServiceError::new(err.to_string()))?;
    tracing::debug!(id = record.id, name = %record.name, "served mock record");
    Ok(Json(record))
}
