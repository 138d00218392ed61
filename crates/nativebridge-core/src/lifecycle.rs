//! Native handle lifecycle.
//!
//! A [`ManagedProxy`] is the sole owner of one native handle. When it is
//! closed, or dropped without being closed, its teardown command is posted to
//! the extension with the handle id attached. Each [`Reaper`] tracks the
//! handles that are still live for one extension instance, so a teardown is
//! sent at most once per handle id no matter how it is triggered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashSet;
use nativebridge_extension_sdk::{fields, Envelope};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::args::ArgValue;
use crate::error::{BridgeError, Result};
use crate::extension::ExtensionExports;
use crate::mux::{Multiplexer, ReplyCallback};

/// Fire-and-forget message releasing a native handle.
#[derive(Debug, Clone, PartialEq)]
pub struct TeardownMessage {
    command: String,
    fields: Map<String, Value>,
}

impl TeardownMessage {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            fields: Map::new(),
        }
    }

    /// Extra field sent alongside the handle id.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

/// Tracks live handles of one extension instance and sends their teardown.
pub struct Reaper {
    extension_id: String,
    mux: Weak<Multiplexer>,
    live: DashSet<u64>,
    teardowns_sent: AtomicU64,
}

impl Reaper {
    pub fn new(mux: &Arc<Multiplexer>) -> Arc<Self> {
        Arc::new(Self {
            extension_id: mux.extension_id().to_string(),
            mux: Arc::downgrade(mux),
            live: DashSet::new(),
            teardowns_sent: AtomicU64::new(0),
        })
    }

    /// Start tracking `handle_id`. Fails if the handle is already live.
    pub fn register(
        self: &Arc<Self>,
        handle_id: u64,
        teardown: TeardownMessage,
    ) -> Result<ProxyRegistration> {
        if !self.live.insert(handle_id) {
            return Err(BridgeError::DuplicateHandle(handle_id));
        }
        debug!(extension_id = %self.extension_id, handle_id, "Registered native handle");
        Ok(ProxyRegistration {
            reaper: self.clone(),
            handle_id,
            teardown: Some(teardown),
        })
    }

    pub fn is_live(&self, handle_id: u64) -> bool {
        self.live.contains(&handle_id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn teardowns_sent(&self) -> u64 {
        self.teardowns_sent.load(Ordering::Relaxed)
    }

    /// Post the teardown for `handle_id` if it is still live.
    fn teardown(&self, handle_id: u64, message: TeardownMessage) -> Result<()> {
        if self.live.remove(&handle_id).is_none() {
            return Ok(());
        }
        let Some(mux) = self.mux.upgrade() else {
            debug!(
                extension_id = %self.extension_id,
                handle_id,
                "Instance already gone, skipping teardown"
            );
            return Ok(());
        };

        let mut payload = message.fields;
        payload.insert(fields::HANDLE_ID.to_string(), Value::from(handle_id));
        mux.post(&message.command, payload)?;
        self.teardowns_sent.fetch_add(1, Ordering::Relaxed);
        debug!(
            extension_id = %self.extension_id,
            handle_id,
            command = %message.command,
            "Sent teardown"
        );
        Ok(())
    }

    fn forget(&self, handle_id: u64) {
        self.live.remove(&handle_id);
    }
}

impl std::fmt::Debug for Reaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaper")
            .field("extension_id", &self.extension_id)
            .field("live", &self.live.len())
            .finish()
    }
}

/// Ties one native handle to an owner. Dropping an armed registration sends
/// the teardown.
#[derive(Debug)]
pub struct ProxyRegistration {
    reaper: Arc<Reaper>,
    handle_id: u64,
    teardown: Option<TeardownMessage>,
}

impl ProxyRegistration {
    pub fn handle_id(&self) -> u64 {
        self.handle_id
    }

    pub fn is_armed(&self) -> bool {
        self.teardown.is_some()
    }

    /// Send the teardown now and disarm the drop path.
    pub fn release(mut self) -> Result<()> {
        match self.teardown.take() {
            Some(message) => self.reaper.teardown(self.handle_id, message),
            None => Ok(()),
        }
    }

    /// Stop tracking the handle without sending anything.
    pub fn disarm(mut self) {
        self.teardown = None;
        self.reaper.forget(self.handle_id);
    }
}

impl Drop for ProxyRegistration {
    fn drop(&mut self) {
        if let Some(message) = self.teardown.take() {
            if let Err(e) = self.reaper.teardown(self.handle_id, message) {
                warn!(
                    extension_id = %self.reaper.extension_id,
                    handle_id = self.handle_id,
                    error = %e,
                    "Teardown failed"
                );
            }
        }
    }
}

/// Application-side stand-in for a native handle.
///
/// Calls made through the proxy carry the handle id. Share it with `Arc` if
/// several owners need it; the teardown is sent when the last one lets go.
#[derive(Debug)]
pub struct ManagedProxy {
    exports: Arc<ExtensionExports>,
    registration: ProxyRegistration,
}

impl ManagedProxy {
    pub(crate) fn new(exports: Arc<ExtensionExports>, registration: ProxyRegistration) -> Self {
        Self {
            exports,
            registration,
        }
    }

    pub fn handle_id(&self) -> u64 {
        self.registration.handle_id()
    }

    pub fn exports(&self) -> &Arc<ExtensionExports> {
        &self.exports
    }

    pub fn call_sync(&self, command: &str, args: &[ArgValue]) -> Result<Envelope> {
        self.exports.call_sync_with(command, args, self.handle_fields())
    }

    pub fn call(&self, command: &str, args: &[ArgValue], callback: ReplyCallback) -> Result<u64> {
        self.exports
            .call_with(command, args, self.handle_fields(), callback)
    }

    pub async fn call_async(&self, command: &str, args: &[ArgValue]) -> Result<Envelope> {
        let timeout = self.exports.call_timeout();
        self.exports
            .call_async_with(command, args, self.handle_fields(), timeout)
            .await
    }

    pub fn post(&self, command: &str, args: &[ArgValue]) -> Result<()> {
        self.exports.post_with(command, args, self.handle_fields())
    }

    /// Release the native handle now.
    pub fn close(self) -> Result<()> {
        self.registration.release()
    }

    /// Give up ownership without releasing the native handle. Returns the
    /// handle id.
    pub fn into_raw(self) -> u64 {
        let handle_id = self.registration.handle_id();
        self.registration.disarm();
        handle_id
    }

    fn handle_fields(&self) -> Map<String, Value> {
        let mut fields_map = Map::new();
        fields_map.insert(fields::HANDLE_ID.to_string(), Value::from(self.handle_id()));
        fields_map
    }
}
