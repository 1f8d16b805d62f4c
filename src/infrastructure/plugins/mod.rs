//! Plugin infrastructure
//!
//! Plugins live in folders under the plugins root. Each folder holds a
//! `plugin.toml` manifest, a shared-library entry point and a private
//! dependency environment.

pub mod archive;
pub mod environment;
pub mod layout;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod requirements;

pub use archive::{ArchiveInstaller, ArchivePlugin, InstalledFolder};
pub use environment::{EnvironmentMarker, Provisioner};
pub use layout::PluginLayout;
pub use loader::{BuiltinLoader, CodeLoader, LoadedUnit, NativeLoader, PluginElementCollection};
pub use registry::{PluginEntry, PluginRegistry};
pub use requirements::{DependencySpecifier, ResolvedDependencies};
