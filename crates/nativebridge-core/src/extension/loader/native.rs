//! Loader for native extensions (.so, .dylib, .dll).

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CString};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use nativebridge_extension_sdk::abi::{
    c_str_to_string, symbols, AbiVersionFn, CreateFn, DestroyFn, FreeStringFn, MetadataFn, PostFn,
    SendSyncFn, SetReplyCallbackFn,
};
use nativebridge_extension_sdk::{ExtensionMetadata, NB_EXT_ABI_VERSION};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::ModuleLoader;
use crate::channel::{Channel, InboundHandler};
use crate::error::{BridgeError, Result};

/// An opened library and its resolved entry points.
struct NativeLibrary {
    path: PathBuf,
    metadata: ExtensionMetadata,
    create: CreateFn,
    destroy: DestroyFn,
    post: PostFn,
    send_sync: SendSyncFn,
    set_reply_callback: SetReplyCallbackFn,
    free_string: FreeStringFn,
    // Dropped last; the function pointers above point into it.
    _library: Library,
}

impl NativeLibrary {
    fn open(path: &Path) -> Result<Self> {
        // SAFETY: loading runs the library's initializers; extensions are
        // trusted code by the time they sit in a search directory.
        let library = unsafe { Library::new(path) }
            .map_err(|e| BridgeError::load_failed(path, format!("Failed to load library: {}", e)))?;

        let abi_version: AbiVersionFn = unsafe { symbol(&library, path, symbols::ABI_VERSION)? };
        let got = unsafe { abi_version() };
        if got != NB_EXT_ABI_VERSION {
            return Err(BridgeError::IncompatibleAbi {
                expected: NB_EXT_ABI_VERSION,
                got,
            });
        }

        let metadata_fn: MetadataFn = unsafe { symbol(&library, path, symbols::METADATA)? };
        let free_string: FreeStringFn = unsafe { symbol(&library, path, symbols::FREE_STRING)? };

        let raw = unsafe { metadata_fn() };
        if raw.is_null() {
            return Err(BridgeError::load_failed(path, "Extension returned no metadata"));
        }
        let text = unsafe { c_str_to_string(raw) };
        unsafe { free_string(raw) };
        let text =
            text.ok_or_else(|| BridgeError::load_failed(path, "Metadata is not valid UTF-8"))?;
        let metadata: ExtensionMetadata = serde_json::from_str(&text)
            .map_err(|e| BridgeError::load_failed(path, format!("Invalid metadata: {}", e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            metadata,
            create: unsafe { symbol(&library, path, symbols::CREATE)? },
            destroy: unsafe { symbol(&library, path, symbols::DESTROY)? },
            post: unsafe { symbol(&library, path, symbols::POST)? },
            send_sync: unsafe { symbol(&library, path, symbols::SEND_SYNC)? },
            set_reply_callback: unsafe { symbol(&library, path, symbols::SET_REPLY_CALLBACK)? },
            free_string,
            _library: library,
        })
    }
}

/// # Safety
/// `T` must be the function pointer type of the exported symbol.
unsafe fn symbol<T: Copy>(library: &Library, path: &Path, name: &[u8]) -> Result<T> {
    unsafe { library.get::<T>(name) }
        .map(|s| *s)
        .map_err(|_| BridgeError::SymbolNotFound {
            path: path.to_path_buf(),
            symbol: symbols::display(name).to_string(),
        })
}

/// Loads each library at most once per loader and keeps it open.
#[derive(Default)]
pub struct NativeModuleLoader {
    libraries: Mutex<HashMap<PathBuf, Arc<NativeLibrary>>>,
}

impl NativeModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of libraries opened so far.
    pub fn library_count(&self) -> usize {
        self.libraries.lock().len()
    }

    fn library(&self, path: &Path) -> Result<Arc<NativeLibrary>> {
        let mut libraries = self.libraries.lock();
        if let Some(library) = libraries.get(path) {
            return Ok(library.clone());
        }
        let library = Arc::new(NativeLibrary::open(path)?);
        info!(
            path = %path.display(),
            extension_id = %library.metadata.id,
            version = %library.metadata.version,
            "Opened native extension library"
        );
        libraries.insert(path.to_path_buf(), library.clone());
        Ok(library)
    }
}

impl ModuleLoader for NativeModuleLoader {
    fn metadata(&self, path: &Path) -> Result<ExtensionMetadata> {
        Ok(self.library(path)?.metadata.clone())
    }

    fn instantiate(&self, path: &Path, extension_id: &str) -> Result<Arc<dyn Channel>> {
        let library = self.library(path)?;
        Ok(Arc::new(NativeChannel::create(library, extension_id)?))
    }
}

/// Where the reply trampoline finds the current inbound handler.
#[derive(Default)]
struct HandlerSlot {
    handler: RwLock<Option<InboundHandler>>,
}

unsafe extern "C" fn on_native_message(user_data: *mut c_void, message: *const c_char) {
    // SAFETY: user_data is the HandlerSlot registered by NativeChannel::create,
    // which outlives the registration.
    let Some(slot) = (unsafe { (user_data as *const HandlerSlot).as_ref() }) else {
        return;
    };
    let Some(text) = (unsafe { c_str_to_string(message) }) else {
        warn!("Dropping non UTF-8 message from extension");
        return;
    };
    let handler = slot.handler.read().clone();
    match handler {
        Some(handler) => {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(&text))).is_err() {
                warn!("Inbound handler panicked");
            }
        }
        None => debug!("Dropping message, no inbound handler installed"),
    }
}

/// Channel to one native extension instance.
///
/// Dropping it unregisters the reply callback and destroys the instance.
pub struct NativeChannel {
    library: Arc<NativeLibrary>,
    instance: *mut c_void,
    slot: Box<HandlerSlot>,
}

// SAFETY: the instance pointer is only passed to the extension's entry
// points, which accept calls from any thread (NativeExtension: Send + Sync).
unsafe impl Send for NativeChannel {}
unsafe impl Sync for NativeChannel {}

impl NativeChannel {
    fn create(library: Arc<NativeLibrary>, extension_id: &str) -> Result<Self> {
        let id = CString::new(extension_id)
            .map_err(|_| BridgeError::load_failed(&library.path, "Extension id contains NUL"))?;
        let instance = unsafe { (library.create)(id.as_ptr()) };
        if instance.is_null() {
            return Err(BridgeError::load_failed(
                &library.path,
                format!("Extension refused to create an instance for '{}'", extension_id),
            ));
        }

        let slot = Box::new(HandlerSlot::default());
        let user_data = &*slot as *const HandlerSlot as *mut c_void;
        unsafe { (library.set_reply_callback)(instance, Some(on_native_message), user_data) };

        debug!(extension_id, path = %library.path.display(), "Created native instance");
        Ok(Self {
            library,
            instance,
            slot,
        })
    }

    pub fn path(&self) -> &Path {
        &self.library.path
    }
}

impl Channel for NativeChannel {
    fn post(&self, payload: &str) -> Result<()> {
        let message = CString::new(payload)
            .map_err(|_| BridgeError::Channel("payload contains NUL".to_string()))?;
        unsafe { (self.library.post)(self.instance, message.as_ptr()) };
        Ok(())
    }

    fn send_blocking(&self, payload: &str) -> Result<String> {
        let message = CString::new(payload)
            .map_err(|_| BridgeError::Channel("payload contains NUL".to_string()))?;
        let raw = unsafe { (self.library.send_sync)(self.instance, message.as_ptr()) };
        if raw.is_null() {
            return Err(BridgeError::Channel("extension returned no reply".to_string()));
        }
        let reply = unsafe { c_str_to_string(raw) };
        unsafe { (self.library.free_string)(raw) };
        reply.ok_or_else(|| BridgeError::Protocol("reply is not valid UTF-8".to_string()))
    }

    fn set_inbound_handler(&self, handler: InboundHandler) {
        *self.slot.handler.write() = Some(handler);
    }
}

impl Drop for NativeChannel {
    fn drop(&mut self) {
        unsafe {
            (self.library.set_reply_callback)(self.instance, None, std::ptr::null_mut());
            (self.library.destroy)(self.instance);
        }
        debug!(path = %self.library.path.display(), "Destroyed native instance");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_non_libraries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.so");
        std::fs::write(&path, b"not a library").unwrap();

        let loader = NativeModuleLoader::new();
        let err = loader.metadata(&path).unwrap_err();
        assert!(matches!(err, BridgeError::LoadFailed { .. }));
        assert_eq!(loader.library_count(), 0);
    }
}
