use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

use crate::application::errors::BotError;
use crate::application::messaging::dispatcher::{Dispatcher, RegisteredHandler};

/// Which account a client instance runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientContext {
    /// The primary user account
    User,
    /// The assistant bot account
    Assistant,
}

impl fmt::Display for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientContext::User => f.write_str("user"),
            ClientContext::Assistant => f.write_str("assistant"),
        }
    }
}

/// Client trait - the messaging client as seen by the plugin engine
///
/// Transport, sessions and authentication live behind implementations of
/// this trait. The engine only needs lifecycle control and the dispatcher.
#[async_trait]
pub trait Client: Send + Sync {
    fn context(&self) -> ClientContext;

    /// Start receiving updates
    async fn start(&self) -> Result<(), BotError>;

    /// Stop receiving updates
    async fn stop(&self) -> Result<(), BotError>;

    /// Send a message to a chat
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), BotError>;

    /// Handler groups of this client
    fn dispatcher(&self) -> &Dispatcher;

    fn add_handler(&self, handler: RegisteredHandler, group: i32) {
        self.dispatcher().add_handler(handler, group);
    }

    fn remove_handler(&self, id: Uuid, group: i32) -> bool {
        self.dispatcher().remove_handler(id, group)
    }
}
