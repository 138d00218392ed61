//! Extension discovery, loading and installation.
//!
//! ```text
//! require(name)
//!     │
//!     ▼
//! ┌───────────┐   path    ┌──────────────┐  metadata, channel  ┌─────────────┐
//! │ resolver  │ ────────▶ │ ModuleLoader │ ──────────────────▶ │ Multiplexer │
//! └───────────┘           │ native/static│                     └──────┬──────┘
//!                         └──────────────┘                            │
//!                                                                     ▼
//!                                                          ┌───────────────────┐
//!                                                          │ ExtensionExports  │
//!                                                          │ (declared surface)│
//!                                                          └───────────────────┘
//! ```
//!
//! The [`ExtensionRegistry`] loads each resolved path at most once and hands
//! the same [`ExtensionExports`] to every caller.

pub mod exports;
pub mod loader;
pub mod registry;
pub mod resolver;

use std::path::PathBuf;
use std::sync::Arc;

use nativebridge_extension_sdk::ExtensionMetadata;
use serde::Serialize;

pub use exports::ExtensionExports;
pub use loader::{ModuleLoader, NativeChannel, NativeModuleLoader, StaticModuleLoader};
pub use registry::ExtensionRegistry;

/// What the registry learned about one loadable module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionDescriptor {
    /// Name the extension was first required by.
    pub name: String,
    /// Canonical path of the loaded module.
    pub loadable_path: PathBuf,
    /// Identifier from the module's metadata.
    pub extension_id: String,
    pub metadata: ExtensionMetadata,
}

/// A live, installed extension.
#[derive(Debug)]
pub struct ExtensionInstance {
    pub descriptor: Arc<ExtensionDescriptor>,
    pub instance_id: uuid::Uuid,
    pub exports: Arc<ExtensionExports>,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}
