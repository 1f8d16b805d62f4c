//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: Configuration loading
//! - Database: Settings persistence
//! - Plugins: Plugin folders, environments and code loading
//! - Adapters: Client implementations

pub mod adapters;
pub mod config;
pub mod database;
pub mod plugins;
