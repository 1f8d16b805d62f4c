//! Domain traits - Abstractions for infrastructure implementations

pub mod client;
pub mod handler;
pub mod store;

pub use client::{Client, ClientContext};
pub use handler::{Handler, HandlerResult};
pub use store::Store;
