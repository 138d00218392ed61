//! Extension registry.
//!
//! The registry provides:
//! - Name resolution against the configured search directories
//! - Loading at most once per resolved path, serialized per path
//! - The shared [`ExtensionExports`] for every loaded extension

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::exports::ExtensionExports;
use super::loader::ModuleLoader;
use super::resolver;
use super::{ExtensionDescriptor, ExtensionInstance};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::mux::Multiplexer;

type Slot = Arc<OnceCell<Arc<ExtensionInstance>>>;

/// Registry of loaded extensions.
///
/// Construct one per process (or per test) and pass it to whatever needs
/// extensions; instances live as long as the registry.
pub struct ExtensionRegistry {
    config: BridgeConfig,
    loader: Arc<dyn ModuleLoader>,
    slots: Mutex<HashMap<PathBuf, Slot>>,
}

impl ExtensionRegistry {
    pub fn new(config: BridgeConfig, loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            config,
            loader,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Resolve `name` to a canonical module path.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        resolver::resolve(name, self.config.candidate_dirs()).map_err(|e| {
            warn!(name, error = %e, "Extension resolution failed");
            e
        })
    }

    /// Return the exports for `name`, loading the extension on first use.
    ///
    /// Concurrent calls for the same path wait for a single load. A failed
    /// load is not remembered; a later call tries again.
    pub fn require(&self, name: &str) -> Result<Arc<ExtensionExports>> {
        Ok(self.require_instance(name)?.exports.clone())
    }

    /// Like [`require`](Self::require), returning the whole instance.
    pub fn require_instance(&self, name: &str) -> Result<Arc<ExtensionInstance>> {
        let path = self.resolve(name)?;
        let slot = self.slots.lock().entry(path.clone()).or_default().clone();

        if let Some(instance) = slot.get() {
            debug!(name, path = %path.display(), "Extension already loaded");
            return Ok(instance.clone());
        }

        let instance = slot.get_or_try_init(|| {
            panic::catch_unwind(AssertUnwindSafe(|| self.load(name, &path))).unwrap_or_else(
                |_| Err(BridgeError::load_failed(&path, "extension panicked while loading")),
            )
        });

        match instance {
            Ok(instance) => {
                // A waiter may have filled a slot that a failed attempt just dropped.
                self.slots.lock().entry(path).or_insert_with(|| slot.clone());
                Ok(instance.clone())
            }
            Err(e) => {
                error!(name, path = %path.display(), error = %e, "Failed to load extension");
                self.forget_empty(&path, &slot);
                Err(e)
            }
        }
    }

    /// Drop the slot for `path` if no load has filled it.
    fn forget_empty(&self, path: &Path, slot: &Slot) {
        let mut slots = self.slots.lock();
        let stale = slots
            .get(path)
            .map_or(false, |current| Arc::ptr_eq(current, slot) && current.get().is_none());
        if stale {
            slots.remove(path);
        }
    }

    /// Number of paths with a loaded or loading extension.
    pub fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    fn load(&self, name: &str, path: &Path) -> Result<Arc<ExtensionInstance>> {
        let metadata = self.loader.metadata(path)?;
        if metadata.id.is_empty() {
            return Err(BridgeError::load_failed(path, "metadata has an empty extension id"));
        }

        let channel = self.loader.instantiate(path, &metadata.id)?;
        let mux = Multiplexer::attach(channel, metadata.id.clone())?;
        let exports = ExtensionExports::install(&metadata, mux, self.config.call_timeout())?;

        let instance = ExtensionInstance {
            descriptor: Arc::new(ExtensionDescriptor {
                name: name.to_string(),
                loadable_path: path.to_path_buf(),
                extension_id: metadata.id.clone(),
                metadata,
            }),
            instance_id: uuid::Uuid::new_v4(),
            exports: Arc::new(exports),
            loaded_at: chrono::Utc::now(),
        };
        info!(
            name,
            path = %path.display(),
            extension_id = %instance.descriptor.extension_id,
            instance_id = %instance.instance_id,
            "Extension loaded"
        );
        Ok(Arc::new(instance))
    }

    fn loaded_instance(&self, name: &str) -> Option<Arc<ExtensionInstance>> {
        let path = resolver::resolve(name, self.config.candidate_dirs()).ok()?;
        self.slots.lock().get(&path)?.get().cloned()
    }

    /// Descriptor of `name` if it is loaded.
    pub fn descriptor(&self, name: &str) -> Option<Arc<ExtensionDescriptor>> {
        self.loaded_instance(name).map(|i| i.descriptor.clone())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded_instance(name).is_some()
    }

    /// Descriptors of every loaded extension, ordered by path.
    pub fn loaded(&self) -> Vec<Arc<ExtensionDescriptor>> {
        let mut loaded: Vec<_> = self
            .slots
            .lock()
            .values()
            .filter_map(|slot| slot.get().map(|i| i.descriptor.clone()))
            .collect();
        loaded.sort_by(|a, b| a.loadable_path.cmp(&b.loadable_path));
        loaded
    }

    /// Library files present in the search directories.
    pub fn discover(&self) -> Vec<PathBuf> {
        resolver::discover(self.config.candidate_dirs())
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("config", &self.config)
            .field("loaded", &self.loaded().len())
            .finish()
    }
}
