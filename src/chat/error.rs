//! Error types for the chat session.

use thiserror::Error;

/// Errors raised by the streaming chat session.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A previous question is still being answered.
    #[error("a response is already in progress")]
    Busy,

    /// The question is empty after trimming.
    #[error("question is empty")]
    EmptyQuestion,

    /// Timers were requested outside of a tokio runtime.
    #[error("no async runtime available to schedule timers")]
    RuntimeUnavailable,

    /// The session was unmounted.
    #[error("chat session has been torn down")]
    TornDown,

    /// The chat endpoint answered with a non-success status.
    #[error("chat endpoint returned HTTP {0}")]
    HttpStatus(u16),

    /// Transport failure (connect, read, decode of the HTTP layer).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ChatError {
    /// Whether the failure came from the remote endpoint or the network.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::HttpStatus(_) | Self::Http(_))
    }
}

/// Convenience result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;
