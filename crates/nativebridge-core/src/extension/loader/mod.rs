//! Module loaders turn a resolved path into metadata and live instances.

mod native;
mod static_loader;

use std::path::Path;
use std::sync::Arc;

use nativebridge_extension_sdk::ExtensionMetadata;

use crate::channel::Channel;
use crate::error::Result;

pub use native::{NativeChannel, NativeModuleLoader};
pub use static_loader::StaticModuleLoader;

/// Source of extension metadata and instances.
pub trait ModuleLoader: Send + Sync {
    /// Read the metadata of the module at `path`.
    fn metadata(&self, path: &Path) -> Result<ExtensionMetadata>;

    /// Create an instance bound to `extension_id` and return its channel.
    ///
    /// Dropping the last reference to the channel destroys the instance.
    fn instantiate(&self, path: &Path, extension_id: &str) -> Result<Arc<dyn Channel>>;
}
