use thiserror::Error;

use crate::history::StoreError;

/// Errors raised while handling one session's event.
///
/// These are always scoped to the originating session: the transport reports
/// them back to that client and keeps serving everybody else.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("{0}")]
    Protocol(String),

    #[error("history store: {0}")]
    Store(#[from] StoreError),

    #[error("transport: {0}")]
    Transport(String),
}

impl ChatError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation { field, reason: reason.into() }
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol(reason.into())
    }

    /// Stable code sent to clients in `error` events.
    pub fn code(&self) -> &'static str {
        use ChatError::*;
        match self {
            Validation { .. } => "validation",
            Protocol(_) => "protocol",
            Store(_) => "store",
            Transport(_) => "transport",
        }
    }
}
