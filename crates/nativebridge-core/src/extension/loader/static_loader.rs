//! In-process loader for extensions linked into the host.
//!
//! Each registered extension type is bound to the path the resolver yields
//! for it. Instances run behind the same entry points a `cdylib` exports, so
//! panics are caught and replies flow through the extension context exactly
//! as they would across the C boundary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nativebridge_extension_sdk::ffi::{self, Instance};
use nativebridge_extension_sdk::{ExtensionMetadata, NativeExtension};
use parking_lot::RwLock;
use tracing::debug;

use super::ModuleLoader;
use crate::channel::{Channel, InboundHandler};
use crate::error::{BridgeError, Result};
use crate::extension::resolver::canonical;

type Factory = Arc<dyn Fn(&str) -> Result<Arc<dyn Channel>> + Send + Sync>;

struct StaticModule {
    metadata: ExtensionMetadata,
    factory: Factory,
}

/// Loader for statically linked extensions.
#[derive(Default)]
pub struct StaticModuleLoader {
    modules: RwLock<HashMap<PathBuf, StaticModule>>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind extension type `E` to `path`.
    ///
    /// The path must still resolve (a placeholder file is enough); it is
    /// canonicalized the same way the resolver does.
    pub fn register<E: NativeExtension>(&self, path: impl AsRef<Path>) {
        let path = canonical(path.as_ref());
        let factory: Factory = Arc::new(|extension_id: &str| {
            let channel = LocalChannel::<E>::create(extension_id)?;
            Ok(Arc::new(channel) as Arc<dyn Channel>)
        });
        debug!(path = %path.display(), extension_id = %E::metadata().id, "Registered static extension");
        self.modules.write().insert(
            path,
            StaticModule {
                metadata: E::metadata(),
                factory,
            },
        );
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<E: NativeExtension>(self, path: impl AsRef<Path>) -> Self {
        self.register::<E>(path);
        self
    }

    pub fn is_registered(&self, path: &Path) -> bool {
        self.modules.read().contains_key(&canonical(path))
    }

    fn not_registered(path: &Path) -> BridgeError {
        BridgeError::load_failed(path, "No extension registered for this path")
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn metadata(&self, path: &Path) -> Result<ExtensionMetadata> {
        self.modules
            .read()
            .get(&canonical(path))
            .map(|m| m.metadata.clone())
            .ok_or_else(|| Self::not_registered(path))
    }

    fn instantiate(&self, path: &Path, extension_id: &str) -> Result<Arc<dyn Channel>> {
        let factory = self
            .modules
            .read()
            .get(&canonical(path))
            .map(|m| m.factory.clone())
            .ok_or_else(|| Self::not_registered(path))?;
        factory(extension_id)
    }
}

/// In-process channel to one instance of `E`.
struct LocalChannel<E: NativeExtension> {
    instance: Instance<E>,
    handler: Arc<RwLock<Option<InboundHandler>>>,
}

impl<E: NativeExtension> LocalChannel<E> {
    fn create(extension_id: &str) -> Result<Self> {
        let instance = Instance::<E>::create(extension_id).map_err(|e| BridgeError::LoadFailed {
            path: PathBuf::from(format!("<static:{}>", extension_id)),
            reason: e.to_string(),
        })?;

        let handler: Arc<RwLock<Option<InboundHandler>>> = Arc::new(RwLock::new(None));
        let slot = handler.clone();
        instance.context().attach_local(move |message| {
            let current = slot.read().clone();
            if let Some(handler) = current {
                handler(&message);
            }
        });

        Ok(Self { instance, handler })
    }
}

impl<E: NativeExtension> Channel for LocalChannel<E> {
    fn post(&self, payload: &str) -> Result<()> {
        ffi::deliver_post(self.instance.extension(), self.instance.context(), payload);
        Ok(())
    }

    fn send_blocking(&self, payload: &str) -> Result<String> {
        Ok(ffi::deliver_sync(self.instance.extension(), payload).encode()?)
    }

    fn set_inbound_handler(&self, handler: InboundHandler) {
        *self.handler.write() = Some(handler);
    }
}
