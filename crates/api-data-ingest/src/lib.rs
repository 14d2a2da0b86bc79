use std::time::Duration;

use api_data_core::{
    transform, validate_record, StoredRecord, TransformError, ValidateError, ValidationError,
};
use api_data_store_sqlite::SqliteStore;
use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where an ingestion call stopped.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Fetching,
    Validating,
    Transforming,
    Persisting,
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum FetchError {
    #[error("{url} responded with HTTP {code}")]
    Status { url: String, code: u16 },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("response from {url} is not valid JSON: {message}")]
    MalformedJson { url: String, message: String },
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("{message}")]
pub struct StorageError {
    pub message: String,
}

impl StorageError {
    fn from_display(err: impl std::fmt::Display) -> Self {
        Self { message: err.to_string() }
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum IngestError {
    #[error("error fetching data from API: {0}")]
    Fetch(#[from] FetchError),
    #[error("error transforming record: {0}")]
    Transform(#[from] TransformError),
    #[error("database error: {0}")]
    Storage(#[from] StorageError),
}

/// Terminal state of one ingestion call.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Succeeded { raw: Value, record: StoredRecord },
    Rejected { raw: Value, reason: ValidationError },
    Failed { stage: IngestStage, raw: Option<Value>, error: IngestError },
}

impl IngestOutcome {
    #[must_use]
    pub fn raw(&self) -> Option<&Value> {
        match self {
            Self::Succeeded { raw, .. } | Self::Rejected { raw, .. } => Some(raw),
            Self::Failed { raw, .. } => raw.as_ref(),
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Supplier of one raw record per call.
pub trait RecordSource {
    /// Fetch the next raw record.
    ///
    /// # Errors
    /// Returns [`FetchError`] when the record cannot be retrieved or decoded.
    fn fetch(&self) -> Result<Value, FetchError>;
}

/// Blocking HTTP GET source.
#[derive(Debug, Clone)]
pub struct HttpSource {
    url: String,
    agent: ureq::Agent,
}

impl HttpSource {
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { url: url.into(), agent }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RecordSource for HttpSource {
    fn fetch(&self) -> Result<Value, FetchError> {
        tracing::debug!(url = %self.url, "fetching record");
        let response = match self.agent.get(&self.url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                return Err(FetchError::Status { url: self.url.clone(), code });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(FetchError::Transport {
                    url: self.url.clone(),
                    message: transport.to_string(),
                });
            }
        };

        let code = response.status();
        if !(200..300).contains(&code) {
            return Err(FetchError::Status { url: self.url.clone(), code });
        }

        response.into_json::<Value>().map_err(|err| FetchError::MalformedJson {
            url: self.url.clone(),
            message: err.to_string(),
        })
    }
}

/// Fetch one record over HTTP and store it.
#[must_use]
pub fn ingest(endpoint_url: &str, store: &mut SqliteStore) -> IngestOutcome {
    ingest_from(&HttpSource::new(endpoint_url, DEFAULT_TIMEOUT), store)
}

/// Fetch, validate, transform and persist one record.
///
/// Never fails outright: rejections and infrastructure errors are folded into
/// the returned outcome and the store is left unchanged for both.
pub fn ingest_from<S>(source: &S, store: &mut SqliteStore) -> IngestOutcome
where
    S: RecordSource + ?Sized,
{
    let raw = match source.fetch() {
        Ok(raw) => raw,
        Err(err) => return failed(IngestStage::Fetching, None, err.into()),
    };
    tracing::debug!(payload = %raw, "fetched raw record");

    let validated = match validate_record(&raw, &*store) {
        Ok(validated) => validated,
        Err(ValidateError::Rejected(reason)) => {
            tracing::warn!(kind = reason.kind().as_str(), %reason, "record rejected");
            return IngestOutcome::Rejected { raw, reason };
        }
        Err(ValidateError::Lookup(err)) => {
            return failed(
                IngestStage::Validating,
                Some(raw),
                StorageError::from_display(err).into(),
            );
        }
    };

    let transformed = match transform(&validated) {
        Ok(transformed) => transformed,
        Err(err) => return failed(IngestStage::Transforming, Some(raw), err.into()),
    };

    let record = StoredRecord::from_parts(validated.id, transformed);
    if let Err(err) = store.insert_record(&record) {
        return failed(
            IngestStage::Persisting,
            Some(raw),
            StorageError::from_display(format!("{err:#}")).into(),
        );
    }

    tracing::info!(id = record.id, name = %record.name, value = record.value, "record stored");
    IngestOutcome::Succeeded { raw, record }
}

fn failed(stage: IngestStage, raw: Option<Value>, error: IngestError) -> IngestOutcome {
    tracing::error!(?stage, %error, "ingestion failed");
    IngestOutcome::Failed { stage, raw, error }
}
