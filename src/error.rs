use thiserror::Error;

/// Failure to obtain a raw payload from the remote source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unknown data source: {0}")]
    UnknownSource(String),

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("http {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("malformed payload from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

impl FetchError {
    /// The URL that was attempted, if a request was made.
    pub fn url(&self) -> Option<&str> {
        match self {
            FetchError::UnknownSource(_) => None,
            FetchError::Network { url, .. }
            | FetchError::Status { url, .. }
            | FetchError::Malformed { url, .. } => Some(url),
        }
    }
}

/// The cleaner could not map the raw columns onto the target schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("required field `{field}` has no matching column (columns: {available})")]
    MissingField { field: String, available: String },

    #[error("schema declares field `{0}` more than once")]
    DuplicateField(String),

    #[error("schema role `{role}` points at undeclared field `{field}`")]
    UndeclaredRole { role: &'static str, field: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputeError {
    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("metric `{0}` is not numeric")]
    NonNumericMetric(String),

    #[error("schema has no {0} field")]
    MissingRole(&'static str),
}
