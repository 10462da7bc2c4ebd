//! Message and state types of the chat widget.

use core::fmt;

use serde::{Deserialize, Serialize};

/// First message of every session.
pub const WELCOME_MESSAGE: &str = "Bonjour ! Je suis l'assistant IA de Berthoni. Posez-moi des questions sur son parcours, ses projets ou ses compétences en Data & IA !";

/// Reply to questions below the minimum length.
pub const CLARIFICATION_MESSAGE: &str = "😊 Posez-moi une vraie question sur Berthoni !";

/// Reply appended when the exchange fails on the network or the server side.
pub const TRANSPORT_ERROR_MESSAGE: &str = "Oups, une erreur réseau s'est produite lors de la communication avec l'IA. Veuillez réessayer.";

/// Text of the greeting bubble.
pub const GREETING_MESSAGE: &str = "👋 Une question sur Berthoni ? Je suis là !";

/// Message identifier, strictly increasing within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    /// Wrap a raw counter value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw counter value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The visitor.
    User,
    /// The assistant (welcome, canned replies, streamed answers).
    Assistant,
}

/// One entry of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Identifier.
    pub id: MessageId,
    /// Author.
    pub role: Role,
    /// Text; grows while an answer is streaming.
    pub content: String,
}

impl ChatMessage {
    /// Build a message.
    #[must_use]
    pub fn new(id: MessageId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
        }
    }
}

/// Lifecycle of a single question/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    /// Ready to accept a question.
    #[default]
    Idle,
    /// Request sent, no response body yet.
    AwaitingFirstByte,
    /// Response body is being read.
    Streaming,
}

/// Visibility of the chat panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanelState {
    /// Only the launcher button is shown.
    #[default]
    Closed,
    /// The conversation panel is shown.
    Open,
}

/// Notifications for whoever renders the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A message was added to the conversation.
    MessageAppended(ChatMessage),
    /// The content of a message changed (one per decoded chunk).
    MessageUpdated {
        /// Message that changed.
        id: MessageId,
        /// Full content after the update.
        content: String,
    },
    /// Loading indicator toggled.
    LoadingChanged(bool),
    /// Greeting bubble toggled.
    GreetingChanged(bool),
    /// Chat panel opened or closed.
    PanelChanged(PanelState),
    /// The draft input was cleared.
    InputCleared,
}

/// How a call to `submit` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Too short; a clarification was appended and nothing was sent.
    Rejected,
    /// The answer streamed to completion.
    Answered {
        /// Assistant message holding the answer.
        reply: MessageId,
        /// Number of decoded fragments applied.
        fragments: usize,
    },
    /// The exchange failed and the apology message was appended.
    Failed,
    /// The exchange was aborted by `unmount`.
    Cancelled,
}
