//! Console adapter for development/testing

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use crate::application::errors::BotError;
use crate::application::messaging::{Dispatcher, MessageParser};
use crate::domain::traits::{Client, ClientContext};

/// Console client for local development
///
/// Messages are read from stdin and replies printed to stdout.
pub struct ConsoleClient {
    context: ClientContext,
    dispatcher: Dispatcher,
    running: AtomicBool,
}

impl ConsoleClient {
    pub fn new(context: ClientContext) -> Self {
        Self {
            context,
            dispatcher: Dispatcher::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Parse one input line and run it through this client's handlers
    pub async fn handle_line(&self, parser: &MessageParser, line: &str) -> Vec<String> {
        if !self.is_running() {
            return Vec::new();
        }

        let message = parser.parse("console", line, Some("console".to_string()));
        let replies = self.dispatcher.dispatch(&message).await;
        for reply in &replies {
            if let Err(e) = self.send_message(&message.chat_id, reply).await {
                tracing::warn!("Failed to send reply: {}", e);
            }
        }
        replies
    }
}

#[async_trait]
impl Client for ConsoleClient {
    fn context(&self) -> ClientContext {
        self.context
    }

    async fn start(&self) -> Result<(), BotError> {
        tracing::info!("Starting console {} client (dev mode)", self.context);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), BotError> {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Stopped console {} client", self.context);
        }
        Ok(())
    }

    async fn send_message(&self, _chat_id: &str, text: &str) -> Result<(), BotError> {
        println!("[{}] {}", self.context, text);
        Ok(())
    }

    fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

/// Feed stdin lines to every client until EOF or shutdown
pub async fn run_console(
    clients: Vec<Arc<ConsoleClient>>,
    parser: MessageParser,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BotError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.map_err(|e| BotError::Client(format!("Failed to read stdin: {}", e)))?;
                let Some(line) = line else {
                    tracing::info!("Console input closed");
                    return Ok(());
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                for client in &clients {
                    client.handle_line(&parser, line).await;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}
