//! Message parser - Parses raw text into structured messages

use crate::domain::entities::{Content, Message, MessageType};

/// Parses incoming text into structured Message objects
pub struct MessageParser {
    command_prefix: String,
}

impl MessageParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
        }
    }

    /// Parse a text message
    pub fn parse(&self, chat_id: impl Into<String>, text: impl Into<String>, sender: Option<String>) -> Message {
        let text = text.into();
        let chat_id = chat_id.into();

        let message = if !self.command_prefix.is_empty() && text.starts_with(&self.command_prefix) {
            self.parse_command(chat_id, &text)
        } else {
            Message::new(chat_id, Content::Text(text)).with_message_type(MessageType::Text)
        };

        match sender {
            Some(sender) => message.with_sender(sender),
            None => message,
        }
    }

    /// Parse a command message
    fn parse_command(&self, chat_id: String, text: &str) -> Message {
        let cmd_text = &text[self.command_prefix.len()..];

        // Split command and arguments
        let mut parts = cmd_text.split_whitespace();
        let name = parts.next().unwrap_or("").to_string();
        let args = parts.map(str::to_string).collect();

        Message::from_command(chat_id, name, args)
    }

    pub fn prefix(&self) -> &str {
        &self.command_prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        let parser = MessageParser::new(".");
        let msg = parser.parse("chat", ".kibe 👍 extra", Some("me".to_string()));
        assert_eq!(
            msg.content,
            Content::Command {
                name: "kibe".to_string(),
                args: vec!["👍".to_string(), "extra".to_string()],
            }
        );
        assert_eq!(msg.message_type, MessageType::Command);
        assert_eq!(msg.sender.as_deref(), Some("me"));
    }

    #[test]
    fn test_parse_text() {
        let parser = MessageParser::new("/");
        let msg = parser.parse("chat", "hello", None);
        assert_eq!(msg.content.text(), Some("hello"));
    }
}
