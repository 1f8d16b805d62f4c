use async_trait::async_trait;

use crate::application::errors::BotError;
use crate::domain::entities::Message;

/// Result of handling a message: an optional reply
pub type HandlerResult = Result<Option<String>, BotError>;

/// A message handler registered in a client's dispatcher
#[async_trait]
pub trait Handler: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Whether this handler wants the message
    fn matches(&self, message: &Message) -> bool;

    async fn handle(&self, message: &Message) -> HandlerResult;
}
