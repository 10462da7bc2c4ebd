//! Chat widget backed by the streaming RAG endpoint.
//!
//! Provides:
//! - Incremental decoding of the raw answer body
//! - The question/answer exchange state machine
//! - The greeting bubble schedule

pub mod decoder;
pub mod error;
pub mod greeting;
pub mod session;
pub mod transport;
pub mod types;

pub use decoder::Utf8ChunkDecoder;
pub use error::{ChatError, ChatResult};
pub use greeting::GreetingSchedule;
pub use session::StreamingChatSession;
pub use transport::{ChatTransport, ChunkStream, HttpChatTransport, TextFragments, TransportFuture};
pub use types::{ChatEvent, ChatMessage, ExchangeState, MessageId, PanelState, Role, SubmitOutcome};
