//! Terminal chat against the portfolio RAG endpoint.
//! Run with: cargo run --bin portfolio-chat
//!
//! Type a question and press Enter; `/quit` or end of input leaves.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use portfolio_client::chat::types::GREETING_MESSAGE;
use portfolio_client::chat::{ChatEvent, ChatMessage, ExchangeState, MessageId, Role};
use portfolio_client::start_portfolio_client::{self, PortfolioClient};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Prints messages as they grow.
#[derive(Default)]
struct Renderer {
    current: Option<MessageId>,
    printed: usize,
}

impl Renderer {
    fn appended(&mut self, message: &ChatMessage) {
        self.close_line();
        if message.role == Role::User {
            return;
        }
        print!("assistant> {}", message.content);
        self.current = Some(message.id);
        self.printed = message.content.len();
        flush();
    }

    fn updated(&mut self, id: MessageId, content: &str) {
        if self.current != Some(id) {
            return;
        }
        if let Some(delta) = content.get(self.printed..) {
            print!("{delta}");
            self.printed = content.len();
            flush();
        }
    }

    fn close_line(&mut self) {
        if self.current.take().is_some() {
            println!();
        }
        self.printed = 0;
    }

    fn render(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::MessageAppended(message) => self.appended(&message),
            ChatEvent::MessageUpdated { id, content } => self.updated(id, &content),
            ChatEvent::LoadingChanged(true) => {
                self.close_line();
                println!("...");
            }
            ChatEvent::GreetingChanged(true) => {
                self.close_line();
                println!("{GREETING_MESSAGE}");
            }
            ChatEvent::LoadingChanged(false)
            | ChatEvent::GreetingChanged(false)
            | ChatEvent::PanelChanged(_)
            | ChatEvent::InputCleared => {}
        }
    }
}

fn flush() {
    let _ = io::stdout().flush();
}

async fn chat_loop(client: PortfolioClient) -> io::Result<()> {
    let session = Arc::new(client.chat_session());
    let mut events = session.subscribe();
    let _ = client.page_views().track("page_view", None);
    if let Err(err) = session.schedule_greetings() {
        tracing::warn!("Greetings disabled: {err}");
    }

    let mut renderer = Renderer::default();
    for message in session.messages() {
        renderer.appended(&message);
    }
    renderer.close_line();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending = None;
    let mut stdin_open = true;

    loop {
        tokio::select! {
            Some(event) = events.recv() => renderer.render(event),
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) if line.trim() == "/quit" => break,
                Some(line) => {
                    if session.exchange_state() != ExchangeState::Idle {
                        println!("(réponse en cours, patientez)");
                        continue;
                    }
                    session.open_panel();
                    session.set_input(line);
                    let submitting = Arc::clone(&session);
                    pending = Some(tokio::spawn(async move { submitting.send_input().await }));
                }
                None => stdin_open = false,
            },
            else => break,
        }

        if !stdin_open {
            if let Some(handle) = pending.take() {
                let _ = handle.await;
            }
            while let Ok(event) = events.try_recv() {
                renderer.render(event);
            }
            break;
        }
    }

    renderer.close_line();
    session.unmount();
    Ok(())
}

fn main() -> ExitCode {
    start_portfolio_client::init_tracing();

    let client = match start_portfolio_client::load_config().map(PortfolioClient::new) {
        Ok(Ok(client)) => client,
        Ok(Err(e)) => {
            tracing::error!("Failed to start chat: {e}");
            return ExitCode::from(1);
        }
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(chat_loop(client)) {
        tracing::error!("Chat error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
