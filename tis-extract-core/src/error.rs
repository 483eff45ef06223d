//! Error taxonomy for fetching and traversal.
//!
//! Only the network layer and the run as a whole can fail. Extraction and
//! validation degrade to unset fields or a non-committal classification and
//! therefore have no error type here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single node fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Connection refused, reset, DNS failure and similar transport faults.
    #[error("network error: {0}")]
    Network(String),
    /// Connect or read timeout exceeded.
    #[error("timeout: {0}")]
    Timeout(String),
    /// The remote answered with a well-formed error response.
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },
    /// The response body could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),
    /// The run was cancelled before the request was issued.
    #[error("cancelled before request was issued")]
    Cancelled,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Network(_) => ErrorKind::Network,
            FetchError::Timeout(_) => ErrorKind::Timeout,
            FetchError::Api { .. } => ErrorKind::Api,
            FetchError::Parse(_) => ErrorKind::Parse,
            FetchError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Serialisable discriminant of [`FetchError`], recorded in the branch failure manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Network,
    Timeout,
    Api,
    Parse,
    Cancelled,
    /// The expansion task itself died, e.g. by panicking.
    Internal,
}

/// Failure to construct an HTTP tree API client.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("API token variable {0} is not set")]
    MissingToken(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// A configured regular expression failed to compile.
#[derive(Debug, Error)]
#[error("invalid pattern for {context}: {source}")]
pub struct PatternError {
    pub context: String,
    #[source]
    pub source: regex::Error,
}

impl PatternError {
    pub fn new(context: impl Into<String>, source: regex::Error) -> Self {
        PatternError {
            context: context.into(),
            source,
        }
    }
}

/// Failure to write or read a persisted result snapshot.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid snapshot json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fatal outcomes of a traversal run.
#[derive(Debug, Error)]
pub enum TraversalError {
    #[error("traversal failed: {0}")]
    Fatal(String),
    #[error("traversal run has already been started")]
    AlreadyStarted,
}
