//! Message handling - Parsing and dispatching to handler groups

pub mod dispatcher;
pub mod parser;

pub use dispatcher::{Dispatcher, RegisteredHandler};
pub use parser::MessageParser;
