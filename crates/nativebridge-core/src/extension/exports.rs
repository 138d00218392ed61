//! The installed call surface of one extension instance.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use nativebridge_extension_sdk::{fields, CallMode, Envelope, ExtensionMetadata, ExtensionSurface};
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::args::{self, ArgValue, ArgumentSchema, Coerced, CoercedArgs};
use crate::error::{BridgeError, Result};
use crate::lifecycle::{ManagedProxy, Reaper, TeardownMessage};
use crate::mux::{Multiplexer, MultiplexerStats, ReplyCallback, SubscriptionId};

/// What application code gets back from `require`.
///
/// Every call looks up the command in the declared surface, checks that it
/// is being issued in its declared mode, coerces the arguments and only then
/// touches the channel. Argument errors therefore never produce traffic.
pub struct ExtensionExports {
    extension_id: String,
    surface: ExtensionSurface,
    schemas: RwLock<HashMap<String, ArgumentSchema>>,
    mux: Arc<Multiplexer>,
    reaper: Arc<Reaper>,
    call_timeout: Option<Duration>,
}

impl ExtensionExports {
    /// Validate the declared surface and bind it to `mux`.
    pub fn install(
        metadata: &ExtensionMetadata,
        mux: Arc<Multiplexer>,
        call_timeout: Option<Duration>,
    ) -> Result<Self> {
        let install_failed = |reason: String| BridgeError::InstallFailed {
            extension_id: metadata.id.clone(),
            reason,
        };

        let surface = &metadata.surface;
        let mut schemas = HashMap::with_capacity(surface.commands.len());
        for command in &surface.commands {
            if command.name.is_empty() {
                return Err(install_failed("command with an empty name".to_string()));
            }
            let schema = ArgumentSchema::from(command.args.as_slice());
            schema
                .validate()
                .map_err(|e| install_failed(format!("command '{}': {}", command.name, e)))?;
            if schemas.insert(command.name.clone(), schema).is_some() {
                return Err(install_failed(format!("duplicate command '{}'", command.name)));
            }
        }

        let mut events = HashSet::new();
        for event in &surface.events {
            if event.is_empty() {
                return Err(install_failed("event with an empty name".to_string()));
            }
            if !events.insert(event.as_str()) {
                return Err(install_failed(format!("duplicate event '{}'", event)));
            }
        }

        let reaper = Reaper::new(&mux);
        Ok(Self {
            extension_id: metadata.id.clone(),
            surface: surface.clone(),
            schemas: RwLock::new(schemas),
            mux,
            reaper,
            call_timeout,
        })
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    pub fn surface(&self) -> &ExtensionSurface {
        &self.surface
    }

    pub fn has_command(&self, command: &str) -> bool {
        self.surface.command(command).is_some()
    }

    /// Add a custom check to one argument of `command`.
    pub fn constrain<F>(&self, command: &str, argument: &str, predicate: F) -> Result<()>
    where
        F: Fn(&Coerced) -> bool + Send + Sync + 'static,
    {
        let mut schemas = self.schemas.write();
        let schema = schemas
            .get_mut(command)
            .ok_or_else(|| BridgeError::UnknownCommand(command.to_string()))?;
        if schema.set_predicate(argument, Arc::new(predicate)) {
            Ok(())
        } else {
            Err(BridgeError::UnknownCommand(format!("{}({})", command, argument)))
        }
    }

    /// Coerce `args` for `command` without sending anything.
    pub fn coerce(&self, command: &str, args: &[ArgValue]) -> Result<CoercedArgs> {
        let schemas = self.schemas.read();
        let schema = schemas
            .get(command)
            .ok_or_else(|| BridgeError::UnknownCommand(command.to_string()))?;
        Ok(args::coerce(args, schema)?)
    }

    /// Blocking call; returns the extension's direct reply.
    pub fn call_sync(&self, command: &str, args: &[ArgValue]) -> Result<Envelope> {
        self.call_sync_with(command, args, Map::new())
    }

    /// Non-blocking call; `callback` runs when the reply arrives.
    pub fn call(&self, command: &str, args: &[ArgValue], callback: ReplyCallback) -> Result<u64> {
        self.call_with(command, args, Map::new(), callback)
    }

    /// Non-blocking call as a future, bounded by the configured call
    /// timeout if there is one.
    pub async fn call_async(&self, command: &str, args: &[ArgValue]) -> Result<Envelope> {
        self.call_async_with(command, args, Map::new(), self.call_timeout)
            .await
    }

    /// Non-blocking call with an explicit timeout.
    pub async fn call_with_timeout(
        &self,
        command: &str,
        args: &[ArgValue],
        timeout: Duration,
    ) -> Result<Envelope> {
        self.call_async_with(command, args, Map::new(), Some(timeout))
            .await
    }

    /// Fire-and-forget.
    pub fn post(&self, command: &str, args: &[ArgValue]) -> Result<()> {
        self.post_with(command, args, Map::new())
    }

    /// Withdraw a pending non-blocking call.
    pub fn cancel(&self, correlation_id: u64) -> bool {
        self.mux.cancel(correlation_id)
    }

    /// Subscribe to an event. If the surface declares events, `event` must
    /// be one of them.
    pub fn on<F>(&self, event: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        if !self.surface.events.is_empty() && !self.surface.declares_event(event) {
            return Err(BridgeError::UnknownEvent(event.to_string()));
        }
        Ok(self.mux.subscribe(event, callback))
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.mux.unsubscribe(id)
    }

    /// Wrap a native handle so that `teardown_command` is posted once the
    /// proxy is closed or dropped.
    pub fn proxy(self: &Arc<Self>, handle_id: u64, teardown_command: &str) -> Result<ManagedProxy> {
        let spec = self
            .surface
            .command(teardown_command)
            .ok_or_else(|| BridgeError::UnknownCommand(teardown_command.to_string()))?;
        if spec.mode != CallMode::Post {
            return Err(BridgeError::WrongCallMode {
                command: teardown_command.to_string(),
                declared: spec.mode.as_str(),
                requested: CallMode::Post.as_str(),
            });
        }
        let registration = self
            .reaper
            .register(handle_id, TeardownMessage::new(teardown_command))?;
        Ok(ManagedProxy::new(self.clone(), registration))
    }

    /// Wait until every inbound message received so far has been
    /// dispatched.
    pub fn flush(&self) {
        self.mux.flush()
    }

    pub(crate) fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    pub fn multiplexer(&self) -> &Arc<Multiplexer> {
        &self.mux
    }

    pub fn reaper(&self) -> &Arc<Reaper> {
        &self.reaper
    }

    pub fn pending_count(&self) -> usize {
        self.mux.pending_count()
    }

    pub fn stats(&self) -> MultiplexerStats {
        self.mux.stats()
    }

    pub(crate) fn call_sync_with(
        &self,
        command: &str,
        args: &[ArgValue],
        extra: Map<String, Value>,
    ) -> Result<Envelope> {
        let payload = self.prepare(command, CallMode::Blocking, args, extra)?;
        self.mux.call_blocking(command, payload)
    }

    pub(crate) fn call_with(
        &self,
        command: &str,
        args: &[ArgValue],
        extra: Map<String, Value>,
        callback: ReplyCallback,
    ) -> Result<u64> {
        let payload = self.prepare(command, CallMode::Async, args, extra)?;
        self.mux.call(command, payload, callback)
    }

    pub(crate) async fn call_async_with(
        &self,
        command: &str,
        args: &[ArgValue],
        extra: Map<String, Value>,
        timeout: Option<Duration>,
    ) -> Result<Envelope> {
        let payload = self.prepare(command, CallMode::Async, args, extra)?;
        match timeout {
            Some(timeout) => self.mux.call_with_timeout(command, payload, timeout).await,
            None => self.mux.call_async(command, payload).await,
        }
    }

    pub(crate) fn post_with(
        &self,
        command: &str,
        args: &[ArgValue],
        extra: Map<String, Value>,
    ) -> Result<()> {
        let payload = self.prepare(command, CallMode::Post, args, extra)?;
        self.mux.post(command, payload)
    }

    fn prepare(
        &self,
        command: &str,
        requested: CallMode,
        args: &[ArgValue],
        extra: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let spec = self
            .surface
            .command(command)
            .ok_or_else(|| BridgeError::UnknownCommand(command.to_string()))?;
        if spec.mode != requested {
            return Err(BridgeError::WrongCallMode {
                command: command.to_string(),
                declared: spec.mode.as_str(),
                requested: requested.as_str(),
            });
        }
        let mut payload = self.coerce(command, args)?.to_wire_fields();
        payload.extend(extra);
        payload.remove(fields::CORRELATION_ID);
        Ok(payload)
    }
}

impl std::fmt::Debug for ExtensionExports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionExports")
            .field("extension_id", &self.extension_id)
            .field("commands", &self.surface.commands.len())
            .field("events", &self.surface.events)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, InboundHandler};
    use nativebridge_extension_sdk::{ArgKind, ArgSpec, CommandSpec};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Sink {
        sent: Mutex<Vec<String>>,
    }

    impl Channel for Sink {
        fn post(&self, payload: &str) -> Result<()> {
            self.sent.lock().push(payload.to_string());
            Ok(())
        }

        fn send_blocking(&self, payload: &str) -> Result<String> {
            self.sent.lock().push(payload.to_string());
            Ok("{}".to_string())
        }

        fn set_inbound_handler(&self, _handler: InboundHandler) {}
    }

    fn metadata(surface: ExtensionSurface) -> ExtensionMetadata {
        ExtensionMetadata::new("org.test", "Test", semver::Version::new(1, 0, 0))
            .with_surface(surface)
    }

    fn install(surface: ExtensionSurface) -> (Arc<Sink>, Result<ExtensionExports>) {
        let sink = Arc::new(Sink::default());
        let mux = Multiplexer::attach(sink.clone(), "org.test").unwrap();
        (sink, ExtensionExports::install(&metadata(surface), mux, None))
    }

    #[test]
    fn test_install_rejects_duplicates() {
        let surface = ExtensionSurface::new()
            .with_command(CommandSpec::post("a"))
            .with_command(CommandSpec::blocking("a"));
        assert!(matches!(install(surface).1, Err(BridgeError::InstallFailed { .. })));

        let surface = ExtensionSurface::new().with_event("x").with_event("x");
        assert!(matches!(install(surface).1, Err(BridgeError::InstallFailed { .. })));

        let surface = ExtensionSurface::new().with_command(
            CommandSpec::post("a")
                .arg(ArgSpec::new("v", ArgKind::Long))
                .arg(ArgSpec::new("v", ArgKind::Long)),
        );
        assert!(matches!(install(surface).1, Err(BridgeError::InstallFailed { .. })));
    }

    #[test]
    fn test_argument_errors_send_nothing() {
        let surface = ExtensionSurface::new()
            .with_command(CommandSpec::blocking("set").arg(ArgSpec::new("x", ArgKind::Double)));
        let (sink, exports) = install(surface);
        let exports = exports.unwrap();

        let err = exports.call_sync("set", &["abc".into()]).unwrap_err();
        assert!(matches!(err, BridgeError::Argument(_)));
        assert!(sink.sent.lock().is_empty());

        exports.call_sync("set", &["3.5".into()]).unwrap();
        let sent = Envelope::decode(&sink.sent.lock()[0]).unwrap();
        assert_eq!(sent.command_name(), Some("set"));
        assert_eq!(sent.get("x"), Some(&serde_json::json!(3.5)));
    }

    #[test]
    fn test_mode_and_command_checks() {
        let surface = ExtensionSurface::new()
            .with_command(CommandSpec::post("close"))
            .with_event("changed");
        let (_sink, exports) = install(surface);
        let exports = exports.unwrap();

        assert!(matches!(
            exports.call_sync("close", &[]),
            Err(BridgeError::WrongCallMode { .. })
        ));
        assert!(matches!(
            exports.post("open", &[]),
            Err(BridgeError::UnknownCommand(_))
        ));
        assert!(exports.post("close", &[]).is_ok());
        assert!(exports.on("changed", |_| {}).is_ok());
        assert!(matches!(
            exports.on("other", |_| {}),
            Err(BridgeError::UnknownEvent(_))
        ));
    }

    #[test]
    fn test_constrain_adds_predicate() {
        let surface = ExtensionSurface::new()
            .with_command(CommandSpec::post("level").arg(ArgSpec::new("v", ArgKind::Octet)));
        let (sink, exports) = install(surface);
        let exports = exports.unwrap();
        exports
            .constrain("level", "v", |v| v.as_u64().map(|n| n <= 100).unwrap_or(false))
            .unwrap();

        assert!(exports.post("level", &[150.into()]).is_err());
        assert!(exports.post("level", &[50.into()]).is_ok());
        assert_eq!(sink.sent.lock().len(), 1);
        assert!(exports.constrain("level", "missing", |_| true).is_err());
    }
}
