use std::io;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T, E = RequestError> = std::result::Result<T, E>;

/// The error every task of a request settles with.
///
/// Errors are cheap to clone: a settled task hands the identical value to
/// every waiter, so any foreign source is kept behind an `Arc`.
#[derive(Error, Debug, Clone)]
pub enum RequestError {
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid request body: {reason}")]
    Body { reason: String },

    #[error("transport error: {source}")]
    Transport { source: Arc<dyn std::error::Error + Send + Sync> },

    #[error("stopped after {max_hops} redirects")]
    TooManyRedirects { max_hops: usize },

    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out")]
    TimedOut,

    #[error("response body has already been consumed")]
    BodyConsumed,

    #[error("unsupported charset: {label}")]
    Charset { label: String },

    #[error("json decode error: {source}")]
    Json { source: Arc<serde_json::Error> },

    #[error("markup parse error: {reason}")]
    Markup { reason: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    #[error("io error: {source}")]
    Io { source: Arc<io::Error> },

    #[error("task aborted: {reason}")]
    Aborted { reason: String },
}

impl RequestError {
    pub fn invalid_url<U: ToString, S: ToString>(url: U, reason: S) -> Self {
        Self::InvalidUrl { url: url.to_string(), reason: reason.to_string() }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn body<S: ToString>(str: S) -> Self {
        Self::Body { reason: str.to_string() }
    }

    pub fn transport<E>(e: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Transport { source: Arc::from(e.into()) }
    }

    pub fn charset<S: ToString>(label: S) -> Self {
        Self::Charset { label: label.to_string() }
    }

    pub fn markup<S: ToString>(str: S) -> Self {
        Self::Markup { reason: str.to_string() }
    }

    pub fn serialization<S: ToString>(str: S) -> Self {
        Self::Serialization { reason: str.to_string() }
    }

    pub fn aborted<S: ToString>(str: S) -> Self {
        Self::Aborted { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: Arc::new(e.into()) }
    }

    /// Returns true if the exchange was stopped by cancellation or by its deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::TimedOut)
    }
}

impl From<io::Error> for RequestError {
    fn from(e: io::Error) -> Self {
        Self::io(e)
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { source: Arc::new(e) }
    }
}
