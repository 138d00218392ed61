//! Shared test doubles.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nativebridge_core::sdk::{Envelope, ExtensionMetadata, ExtensionSurface};
use nativebridge_core::{BridgeError, Channel, InboundHandler, ModuleLoader, Result};
use parking_lot::{Mutex, RwLock};

/// Channel that records outbound traffic and lets the test inject inbound
/// messages.
#[derive(Default)]
pub struct RecordingChannel {
    posted: Mutex<Vec<Envelope>>,
    blocking: Mutex<Vec<Envelope>>,
    scripted: Mutex<VecDeque<String>>,
    handler: RwLock<Option<InboundHandler>>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the reply returned by the next blocking send.
    pub fn script_blocking_reply(&self, reply: &str) {
        self.scripted.lock().push_back(reply.to_string());
    }

    /// Simulate an inbound message from the extension.
    pub fn deliver(&self, payload: &str) {
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(payload);
        }
    }

    pub fn posted(&self) -> Vec<Envelope> {
        self.posted.lock().clone()
    }

    pub fn posted_commands(&self) -> Vec<String> {
        self.posted
            .lock()
            .iter()
            .filter_map(|e| e.command_name().map(str::to_string))
            .collect()
    }

    pub fn blocking_requests(&self) -> Vec<Envelope> {
        self.blocking.lock().clone()
    }

    pub fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }
}

impl Channel for RecordingChannel {
    fn post(&self, payload: &str) -> Result<()> {
        self.posted.lock().push(Envelope::decode(payload)?);
        Ok(())
    }

    fn send_blocking(&self, payload: &str) -> Result<String> {
        self.blocking.lock().push(Envelope::decode(payload)?);
        Ok(self
            .scripted
            .lock()
            .pop_front()
            .unwrap_or_else(|| r#"{"result":"OK"}"#.to_string()))
    }

    fn set_inbound_handler(&self, handler: InboundHandler) {
        *self.handler.write() = Some(handler);
    }
}

/// Loader handing out recording channels, counting instantiations.
pub struct CountingLoader {
    pub metadata: ExtensionMetadata,
    pub delay: Duration,
    pub fail_metadata: bool,
    instantiated: AtomicUsize,
    channels: Mutex<Vec<Arc<RecordingChannel>>>,
}

impl CountingLoader {
    pub fn new(surface: ExtensionSurface) -> Arc<Self> {
        Arc::new(Self::with_metadata(
            ExtensionMetadata::new("org.test.counting", "Counting", semver::Version::new(1, 0, 0))
                .with_surface(surface),
        ))
    }

    pub fn with_metadata(metadata: ExtensionMetadata) -> Self {
        Self {
            metadata,
            delay: Duration::ZERO,
            fail_metadata: false,
            instantiated: AtomicUsize::new(0),
            channels: Mutex::new(Vec::new()),
        }
    }

    pub fn instantiated(&self) -> usize {
        self.instantiated.load(Ordering::SeqCst)
    }

    pub fn channel(&self, index: usize) -> Arc<RecordingChannel> {
        self.channels.lock()[index].clone()
    }
}

impl ModuleLoader for CountingLoader {
    fn metadata(&self, path: &Path) -> Result<ExtensionMetadata> {
        if self.fail_metadata {
            return Err(BridgeError::LoadFailed {
                path: path.to_path_buf(),
                reason: "no metadata".to_string(),
            });
        }
        Ok(self.metadata.clone())
    }

    fn instantiate(&self, _path: &Path, _extension_id: &str) -> Result<Arc<dyn Channel>> {
        std::thread::sleep(self.delay);
        self.instantiated.fetch_add(1, Ordering::SeqCst);
        let channel = RecordingChannel::new();
        self.channels.lock().push(channel.clone());
        Ok(channel)
    }
}

/// Create an empty placeholder file named like a library for `name`.
pub fn placeholder_library(dir: &Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(format!(
        "{}{}{}",
        std::env::consts::DLL_PREFIX,
        name,
        std::env::consts::DLL_SUFFIX
    ));
    std::fs::write(&path, b"").expect("write placeholder");
    path
}
