use affitto_core::Error as WireError;
use thiserror::Error;

/// Failure taxonomy for the messaging core. Absent receiver connections are
/// not represented here: they are a normal branch, not an error.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Bad send request: empty body or self-addressed message.
    #[error("validation error: {0}")]
    Validation(String),

    /// Storage failure. Not retried; the client may resubmit.
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl ChatError {
    /// Wire body for an error event, scoped to the requesting party.
    /// Persistence details stay in the server log.
    pub fn to_wire(&self) -> WireError {
        match self {
            ChatError::Validation(msg) => WireError::new("validation_error", msg.clone()),
            ChatError::Persistence(_) => {
                WireError::new("persistence_error", "storage operation failed")
            }
        }
    }
}
