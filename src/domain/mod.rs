//! Domain layer - Core business objects and collaborator contracts
//! 
//! This layer contains:
//! - Entities: Messages, plugin descriptors, settings
//! - Traits: Abstractions for infrastructure (Client, Handler, Store)

pub mod entities;
pub mod traits;
