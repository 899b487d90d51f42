//! Error values surfaced through load states.
//!
//! Load failures are data, not control flow: every failure a page source
//! reports (or returns) ends up as a `LoadState::Failure` carried by the
//! event stream, never as a stream error. `LoadError` is therefore cheap
//! to clone and to compare in tests.

use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a page load.
#[derive(Error, Debug, Clone)]
pub enum LoadError {
    /// A typed error from the injected page source.
    #[error("page source failed: {0}")]
    Source(Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// An ad-hoc failure message from a source without a typed error.
    #[error("{0}")]
    Message(Arc<str>),

    /// The source returned an empty page with a next key while automatic
    /// key advancement is disabled, or kept returning empty pages past
    /// the advancement cap.
    #[error("page source returned an invalid result")]
    InvalidResult,
}

impl LoadError {
    /// Wraps a collaborator error.
    pub fn source(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        LoadError::Source(Arc::new(err))
    }

    /// Builds a message-only failure.
    pub fn message(msg: impl Into<String>) -> Self {
        LoadError::Message(msg.into().into())
    }
}

// Equality compares variant and rendered message so `LoadState` stays
// comparable in assertions even when sources report boxed errors.
impl PartialEq for LoadError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LoadError::Source(a), LoadError::Source(b)) => a.to_string() == b.to_string(),
            (LoadError::Message(a), LoadError::Message(b)) => a == b,
            (LoadError::InvalidResult, LoadError::InvalidResult) => true,
            _ => false,
        }
    }
}

impl Eq for LoadError {}
