use crate::protocol::CloseStatus;
use thiserror::Error;

/// Outcomes that end a session before a normal close.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("user {user_id} has no active subscription")]
    NoSubscription { user_id: i64 },

    #[error("user {user_id} exceeded monthly quota ({used} used)")]
    QuotaExceeded { user_id: i64, used: i64 },

    #[error("quota lookup failed: {0}")]
    QuotaLookup(#[source] anyhow::Error),

    #[error("restoring thread {thread_id} failed: {reason}")]
    Restore { thread_id: String, reason: String },

    #[error("generation backend failed: {0}")]
    Backend(#[source] anyhow::Error),

    #[error("device transport failed: {0}")]
    Transport(#[source] anyhow::Error),

    #[error("persisting thread failed: {0}")]
    Persist(#[source] anyhow::Error),
}

impl SessionError {
    pub fn close_status(&self) -> CloseStatus {
        match self {
            SessionError::Unauthorized(_) => CloseStatus::Unauthorized,
            SessionError::NoSubscription { .. } | SessionError::QuotaExceeded { .. } => {
                CloseStatus::PolicyViolation
            }
            SessionError::QuotaLookup(_)
            | SessionError::Restore { .. }
            | SessionError::Backend(_)
            | SessionError::Transport(_)
            | SessionError::Persist(_) => CloseStatus::InternalError,
        }
    }

    /// Short reason shown to the user when the connection is closed.
    pub fn close_reason(&self) -> &'static str {
        match self {
            SessionError::Unauthorized(_) => "get user info failed",
            SessionError::NoSubscription { .. } => {
                "You need an active Rebble subscription to use Bobby."
            }
            SessionError::QuotaExceeded { .. } => "You have exceeded your quota for this month.",
            SessionError::QuotaLookup(_) => "Quota lookup failed.",
            SessionError::Restore { .. } => "Error restoring thread.",
            SessionError::Backend(_) | SessionError::Transport(_) => {
                "Bobby is unavailable right now. Please try again in a few moments."
            }
            SessionError::Persist(_) => "store thread failed",
        }
    }
}
