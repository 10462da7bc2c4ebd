//! Streaming chat session: one question at a time, answer rendered as it arrives.
//!
//! Exchange lifecycle: `Idle -> AwaitingFirstByte -> Streaming -> Idle`. The
//! loading flag only covers `AwaitingFirstByte`. The panel and the greeting
//! bubble are independent of the exchange.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use futures::future::{AbortHandle, Abortable, Aborted};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use super::error::{ChatError, ChatResult};
use super::greeting::GreetingSchedule;
use super::transport::{ChatTransport, TextFragments};
use super::types::{
    CLARIFICATION_MESSAGE, ChatEvent, ChatMessage, ExchangeState, MessageId, PanelState, Role,
    SubmitOutcome, TRANSPORT_ERROR_MESSAGE, WELCOME_MESSAGE,
};
use crate::config::ChatConfig;

/// Mutable state of a chat session.
#[derive(Debug)]
struct ChatState {
    messages: Vec<ChatMessage>,
    input: String,
    exchange: ExchangeState,
    loading: bool,
    panel: PanelState,
    greeting_visible: bool,
    next_id: u64,
    in_flight: Option<AbortHandle>,
    torn_down: bool,
    events: Option<UnboundedSender<ChatEvent>>,
}

impl ChatState {
    fn new() -> Self {
        let mut state = Self {
            messages: Vec::new(),
            input: String::new(),
            exchange: ExchangeState::Idle,
            loading: false,
            panel: PanelState::Closed,
            greeting_visible: false,
            next_id: 0,
            in_flight: None,
            torn_down: false,
            events: None,
        };
        state.push_message(Role::Assistant, WELCOME_MESSAGE);
        state
    }

    fn emit(&self, event: ChatEvent) {
        if self.torn_down {
            return;
        }
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody renders anymore.
            let _ = events.send(event);
        }
    }

    fn push_message(&mut self, role: Role, content: impl Into<String>) -> MessageId {
        let id = MessageId::new(self.next_id);
        self.next_id += 1;
        if self.torn_down {
            return id;
        }
        let message = ChatMessage::new(id, role, content);
        self.emit(ChatEvent::MessageAppended(message.clone()));
        self.messages.push(message);
        id
    }

    fn append_to(&mut self, id: MessageId, text: &str) {
        if self.torn_down {
            return;
        }
        let Some(message) = self.messages.iter_mut().rev().find(|m| m.id == id) else {
            return;
        };
        message.content.push_str(text);
        let event = ChatEvent::MessageUpdated {
            id,
            content: message.content.clone(),
        };
        self.emit(event);
    }

    fn set_loading(&mut self, loading: bool) {
        if self.loading != loading {
            self.loading = loading;
            self.emit(ChatEvent::LoadingChanged(loading));
        }
    }

    fn clear_input(&mut self) {
        self.input.clear();
        self.emit(ChatEvent::InputCleared);
    }

    fn set_greeting(&mut self, visible: bool) -> bool {
        if self.greeting_visible == visible {
            return false;
        }
        self.greeting_visible = visible;
        self.emit(ChatEvent::GreetingChanged(visible));
        true
    }

    fn set_panel(&mut self, panel: PanelState) {
        if self.panel != panel {
            self.panel = panel;
            self.emit(ChatEvent::PanelChanged(panel));
        }
        if panel == PanelState::Open {
            self.set_greeting(false);
        }
    }

    fn begin_reply(&mut self) -> MessageId {
        self.exchange = ExchangeState::Streaming;
        self.set_loading(false);
        self.push_message(Role::Assistant, String::new())
    }

    fn finish_exchange(&mut self) {
        self.exchange = ExchangeState::Idle;
        self.in_flight = None;
        self.set_loading(false);
    }
}

/// State shared between the session and its timer tasks.
#[derive(Debug)]
pub(crate) struct ChatShared {
    state: Mutex<ChatState>,
}

impl ChatShared {
    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Show the bubble unless the panel is open. Returns whether it became visible.
    pub(crate) fn show_greeting_if_closed(&self) -> bool {
        let mut state = self.lock();
        if state.torn_down || state.panel == PanelState::Open {
            return false;
        }
        state.set_greeting(true)
    }

    /// Hide the bubble. Returns whether it was visible.
    pub(crate) fn hide_greeting(&self) -> bool {
        let mut state = self.lock();
        if state.torn_down {
            return false;
        }
        state.set_greeting(false)
    }
}

/// Returns the session to `Idle` once the exchange is over, including when the
/// `submit` future is dropped before the answer completes.
struct ExchangeGuard<'a> {
    shared: &'a ChatShared,
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        self.shared.lock().finish_exchange();
    }
}

/// Chat widget session against a streaming answer endpoint.
pub struct StreamingChatSession {
    transport: Arc<dyn ChatTransport>,
    config: ChatConfig,
    shared: Arc<ChatShared>,
    greetings: Mutex<Option<GreetingSchedule>>,
}

impl StreamingChatSession {
    /// Create a session seeded with the welcome message.
    #[must_use]
    pub fn new(transport: Arc<dyn ChatTransport>, config: ChatConfig) -> Self {
        Self {
            transport,
            config,
            shared: Arc::new(ChatShared {
                state: Mutex::new(ChatState::new()),
            }),
            greetings: Mutex::new(None),
        }
    }

    /// Receive every subsequent [`ChatEvent`]. Replaces any earlier subscriber.
    #[must_use]
    pub fn subscribe(&self) -> UnboundedReceiver<ChatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.lock().events = Some(tx);
        rx
    }

    /// Snapshot of the conversation.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.shared.lock().messages.clone()
    }

    /// Look up one message.
    #[must_use]
    pub fn message(&self, id: MessageId) -> Option<ChatMessage> {
        self.shared.lock().messages.iter().find(|m| m.id == id).cloned()
    }

    /// Current exchange state.
    #[must_use]
    pub fn exchange_state(&self) -> ExchangeState {
        self.shared.lock().exchange
    }

    /// Whether the loading indicator is shown.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.shared.lock().loading
    }

    /// Whether the send affordance is enabled.
    #[must_use]
    pub fn can_send(&self) -> bool {
        let state = self.shared.lock();
        !state.torn_down && state.exchange == ExchangeState::Idle && !state.input.trim().is_empty()
    }

    /// Current draft input.
    #[must_use]
    pub fn input(&self) -> String {
        self.shared.lock().input.clone()
    }

    /// Replace the draft input.
    pub fn set_input(&self, text: impl Into<String>) {
        self.shared.lock().input = text.into();
    }

    /// Panel visibility.
    #[must_use]
    pub fn panel(&self) -> PanelState {
        self.shared.lock().panel
    }

    /// Whether the greeting bubble is shown.
    #[must_use]
    pub fn is_greeting_visible(&self) -> bool {
        self.shared.lock().greeting_visible
    }

    /// Open the panel; hides the greeting bubble immediately.
    pub fn open_panel(&self) {
        let mut state = self.shared.lock();
        if !state.torn_down {
            state.set_panel(PanelState::Open);
        }
    }

    /// Close the panel. Elapsed greeting timers are not restarted.
    pub fn close_panel(&self) {
        let mut state = self.shared.lock();
        if !state.torn_down {
            state.set_panel(PanelState::Closed);
        }
    }

    /// Flip the panel and return its new state.
    #[must_use]
    pub fn toggle_panel(&self) -> PanelState {
        let mut state = self.shared.lock();
        if state.torn_down {
            return state.panel;
        }
        let next = match state.panel {
            PanelState::Open => PanelState::Closed,
            PanelState::Closed => PanelState::Open,
        };
        state.set_panel(next);
        next
    }

    /// Clicking the greeting bubble opens the panel.
    pub fn click_greeting(&self) {
        self.open_panel();
    }

    /// Schedule the two greeting appearances. Only the first call per session
    /// schedules anything; later calls return `Ok(false)`.
    ///
    /// # Errors
    /// Returns an error if the session was unmounted or no tokio runtime is running.
    pub fn schedule_greetings(&self) -> ChatResult<bool> {
        if self.shared.lock().torn_down {
            return Err(ChatError::TornDown);
        }

        let mut greetings = self.greetings.lock().unwrap_or_else(PoisonError::into_inner);
        if greetings.is_some() {
            return Ok(false);
        }

        let runtime = Handle::try_current().map_err(|_| ChatError::RuntimeUnavailable)?;
        *greetings = Some(GreetingSchedule::spawn(
            &runtime,
            &self.shared,
            &self.config.greeting,
        ));
        Ok(true)
    }

    /// Greeting timers that have not fired yet.
    #[must_use]
    pub fn pending_greeting_timers(&self) -> usize {
        self.greetings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, GreetingSchedule::pending)
    }

    /// Submit the current draft input.
    ///
    /// # Errors
    /// Same as [`Self::submit`].
    pub async fn send_input(&self) -> ChatResult<SubmitOutcome> {
        let draft = self.input();
        self.submit(&draft).await
    }

    /// Ask `question` and stream the answer into a new assistant message.
    ///
    /// Questions shorter than the configured minimum get a local clarification
    /// reply and never reach the network. Transport failures are not errors of
    /// this call: they append the apology message and return
    /// [`SubmitOutcome::Failed`].
    ///
    /// # Errors
    /// Returns [`ChatError::Busy`] while another exchange runs,
    /// [`ChatError::EmptyQuestion`] for blank input and [`ChatError::TornDown`]
    /// after unmount.
    pub async fn submit(&self, question: &str) -> ChatResult<SubmitOutcome> {
        let registration = {
            let mut state = self.shared.lock();
            if state.torn_down {
                return Err(ChatError::TornDown);
            }
            if state.exchange != ExchangeState::Idle {
                return Err(ChatError::Busy);
            }
            let trimmed = question.trim();
            if trimmed.is_empty() {
                return Err(ChatError::EmptyQuestion);
            }

            state.clear_input();

            let length = trimmed.chars().count();
            if length < self.config.min_question_chars {
                debug!(length, "Question too short, answering locally");
                state.push_message(Role::Assistant, CLARIFICATION_MESSAGE);
                return Ok(SubmitOutcome::Rejected);
            }

            // The question is shown and sent exactly as typed.
            state.push_message(Role::User, question);
            state.exchange = ExchangeState::AwaitingFirstByte;
            state.set_loading(true);

            let (handle, registration) = AbortHandle::new_pair();
            state.in_flight = Some(handle);
            registration
        };
        let _exchange = ExchangeGuard {
            shared: &self.shared,
        };

        let outcome = match Abortable::new(self.run_exchange(question), registration).await {
            Ok(outcome) => outcome,
            Err(Aborted) => {
                debug!("Chat exchange aborted");
                SubmitOutcome::Cancelled
            }
        };
        Ok(outcome)
    }

    async fn run_exchange(&self, question: &str) -> SubmitOutcome {
        let chunks = match self.transport.open_stream(question).await {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(%err, "Chat request failed before the answer started");
                self.shared.lock().push_message(Role::Assistant, TRANSPORT_ERROR_MESSAGE);
                return SubmitOutcome::Failed;
            }
        };

        let reply = self.shared.lock().begin_reply();
        let mut fragments = TextFragments::new(chunks);
        let mut applied = 0_usize;

        while let Some(item) = fragments.next().await {
            match item {
                Ok(text) => {
                    self.shared.lock().append_to(reply, &text);
                    applied += 1;
                }
                Err(err) => {
                    warn!(%err, applied, "Chat stream interrupted");
                    self.shared.lock().push_message(Role::Assistant, TRANSPORT_ERROR_MESSAGE);
                    return SubmitOutcome::Failed;
                }
            }
        }

        debug!(%reply, fragments = applied, "Chat answer complete");
        SubmitOutcome::Answered {
            reply,
            fragments: applied,
        }
    }

    /// Tear the session down: abort the in-flight exchange, cancel greeting
    /// timers and stop all further state updates. Idempotent.
    pub fn unmount(&self) {
        if let Some(schedule) = self
            .greetings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            schedule.cancel();
        }

        let mut state = self.shared.lock();
        if state.torn_down {
            return;
        }
        state.torn_down = true;
        if let Some(handle) = state.in_flight.take() {
            handle.abort();
        }
        state.events = None;
        info!("Chat session unmounted");
    }

    /// Whether [`Self::unmount`] has run.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.shared.lock().torn_down
    }
}

impl Drop for StreamingChatSession {
    fn drop(&mut self) {
        self.unmount();
    }
}
