//! Error types for the MR registry

use crate::registry::MrRegistry;
use crate::types::MrKey;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MrError {
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("Registration not found: key {key:#x}")]
    NotFound { key: MrKey },

    #[error("Registration already exists: key {key:#x}")]
    AlreadyExists { key: MrKey },

    #[error("Permission denied for key {key:#x}: {reason}")]
    PermissionDenied { key: MrKey, reason: String },

    #[error("Key space exhausted: no further keys can be assigned by this registry")]
    ResourceExhausted,

    #[error("Invalid registry state: {reason}")]
    State { reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl MrError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn state(reason: impl Into<String>) -> Self {
        Self::State {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MrError>;

/// A failed insert. The native handle is handed back untouched so the
/// caller can still release it.
#[derive(Error)]
#[error("{error}")]
pub struct InsertError<H> {
    pub error: MrError,
    pub handle: H,
}

impl<H> InsertError<H> {
    pub(crate) fn new(error: MrError, handle: H) -> Self {
        Self { error, handle }
    }

    pub fn into_handle(self) -> H {
        self.handle
    }
}

impl<H> fmt::Debug for InsertError<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsertError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<H> From<InsertError<H>> for MrError {
    fn from(err: InsertError<H>) -> Self {
        err.error
    }
}

/// A close refused under [`ClosePolicy::Reject`](crate::ClosePolicy::Reject).
/// Carries the still-open registry back to the caller.
#[derive(Error)]
#[error("registry still holds {live} live registration(s)")]
pub struct CloseError<H, S> {
    live: usize,
    registry: MrRegistry<H, S>,
}

impl<H, S> CloseError<H, S> {
    pub(crate) fn new(live: usize, registry: MrRegistry<H, S>) -> Self {
        Self { live, registry }
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn into_registry(self) -> MrRegistry<H, S> {
        self.registry
    }
}

impl<H, S> fmt::Debug for CloseError<H, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseError")
            .field("live", &self.live)
            .finish_non_exhaustive()
    }
}

impl<H, S> From<CloseError<H, S>> for MrError {
    fn from(err: CloseError<H, S>) -> Self {
        Self::state(err.to_string())
    }
}
