use std::fmt;

use folio_core::{NamingError, PredictError};
use url::Url;

use crate::extract::ExtractError;
use crate::persist::PersistError;

/// Identifies one concurrently rendered progress cell. Allocated from 1 upwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Lane(pub u32);

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub lane: Lane,
    pub sofar: u64,
    /// `None` when the server did not announce a length.
    pub total: Option<u64>,
}

/// A fetched and decoded HTML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Final location after redirects; relative links resolve against it.
    pub url: Url,
    pub html: String,
    pub encoding: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("GET {location}: {kind}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub location: String,
    pub message: String,
}

impl FetchError {
    pub(crate) fn new(kind: FailureKind, location: &Url, message: impl Into<String>) -> Self {
        Self {
            kind,
            location: location.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn cancelled(location: &Url) -> Self {
        Self::new(FailureKind::Cancelled, location, "cancelled")
    }

    pub fn status(&self) -> Option<u16> {
        match self.kind {
            FailureKind::HttpStatus(code) => Some(code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    RedirectLimitExceeded,
    Decode,
    Cancelled,
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::Decode => write!(f, "undecodable document"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

/// Anything that can end a crawl unit.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Naming(#[from] NamingError),
    #[error(transparent)]
    Predict(#[from] PredictError),
    #[error("crawl task aborted: {0}")]
    Task(String),
}

impl CrawlError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CrawlError::Fetch(err) if err.is_cancelled())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CrawlError::Fetch(err) if err.is_not_found())
    }
}
