//! Echo Extension
//!
//! A small extension covering every call mode of the bridge. Used by the
//! core integration tests and handy for poking at the CLI.
//!
//! | Command            | Mode     | Behavior                                     |
//! |--------------------|----------|----------------------------------------------|
//! | `echo`             | blocking | replies with `msg`                           |
//! | `echoAsync`        | async    | replies with `msg` from a worker thread      |
//! | `fail`             | blocking | replies FAIL with `reason`                   |
//! | `failAsync`        | async    | replies FAIL with `reason`                   |
//! | `silent`           | async    | never replies                                |
//! | `openCounter`      | blocking | allocates a counter, replies with `handleId` |
//! | `counterIncrement` | blocking | increments the counter named by `handleId`   |
//! | `closeCounter`     | post     | frees the counter, emits `counterClosed`     |
//! | `ping`             | post     | emits `pong`                                 |

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use nativebridge_extension_sdk::prelude::*;
use parking_lot::Mutex;

pub const EXTENSION_ID: &str = "org.nativebridge.echo";

/// Echo extension state.
pub struct EchoExtension {
    ctx: ExtensionContext,
    next_handle: AtomicU64,
    counters: Mutex<HashMap<u64, i64>>,
}

impl EchoExtension {
    fn open_counter(&self, request: &Envelope) -> Envelope {
        let start = request
            .get("start")
            .and_then(Value::as_i64)
            .unwrap_or_default();
        let handle_id = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters.lock().insert(handle_id, start);
        Envelope::reply_to(request).with(fields::HANDLE_ID, handle_id)
    }

    fn increment(&self, request: &Envelope) -> Envelope {
        let Some(handle_id) = request.handle_id() else {
            return ExtensionError::InvalidArguments("missing handleId".into()).to_reply(request);
        };
        let by = request.get("by").and_then(Value::as_i64).unwrap_or(1);
        let mut counters = self.counters.lock();
        match counters.get_mut(&handle_id) {
            Some(value) => {
                *value += by;
                Envelope::reply_to(request).with("value", *value)
            }
            None => ExtensionError::UnknownHandle(handle_id).to_reply(request),
        }
    }

    fn close_counter(&self, request: &Envelope) {
        let Some(handle_id) = request.handle_id() else {
            tracing::warn!("closeCounter without handleId");
            return;
        };
        let final_value = self.counters.lock().remove(&handle_id);
        let mut payload = Map::new();
        payload.insert(fields::HANDLE_ID.to_string(), json!(handle_id));
        payload.insert("known".to_string(), json!(final_value.is_some()));
        if let Some(value) = final_value {
            payload.insert("value".to_string(), json!(value));
        }
        let _ = self.ctx.emit("counterClosed", payload);
    }

    fn echo_later(&self, request: Envelope) {
        let delay = request.get_u64("delay_ms").unwrap_or(0);
        let msg = request.get("msg").cloned().unwrap_or(Value::Null);
        let ctx = self.ctx.clone();
        std::thread::spawn(move || {
            if delay > 0 {
                std::thread::sleep(Duration::from_millis(delay));
            }
            let _ = ctx.reply(&request, Envelope::ok().with("msg", msg));
        });
    }
}

fn reason_of(request: &Envelope) -> String {
    request
        .get_str("reason")
        .unwrap_or("requested failure")
        .to_string()
}

impl NativeExtension for EchoExtension {
    fn metadata() -> ExtensionMetadata {
        ExtensionMetadata::new(EXTENSION_ID, "Echo", semver::Version::new(0, 3, 0))
            .with_description("Echoes requests back, one command per call mode")
            .with_author("NativeBridge Contributors")
            .with_surface(
                ExtensionSurface::new()
                    .with_command(command!(blocking "echo", [ArgSpec::new("msg", ArgKind::String)]))
                    .with_command(command!(async "echoAsync", [
                        ArgSpec::new("msg", ArgKind::String),
                        ArgSpec::new("delay_ms", ArgKind::UnsignedLong).optional(),
                    ]))
                    .with_command(command!(blocking "fail", [
                        ArgSpec::new("reason", ArgKind::String).optional(),
                    ]))
                    .with_command(command!(async "failAsync", [
                        ArgSpec::new("reason", ArgKind::String).optional(),
                    ]))
                    .with_command(command!(async "silent"))
                    .with_command(command!(blocking "openCounter", [
                        ArgSpec::new("start", ArgKind::LongLong).optional(),
                    ]))
                    .with_command(command!(blocking "counterIncrement", [
                        ArgSpec::new("by", ArgKind::Long).optional(),
                    ]))
                    .with_command(command!(post "closeCounter"))
                    .with_command(command!(post "ping", [
                        ArgSpec::new("tag", ArgKind::String).optional().nullable(),
                    ]))
                    .with_event("pong")
                    .with_event("counterClosed"),
            )
    }

    fn create(ctx: ExtensionContext) -> ExtensionResult<Self> {
        tracing::debug!(extension_id = ctx.extension_id(), "Echo extension created");
        Ok(Self {
            ctx,
            next_handle: AtomicU64::new(0),
            counters: Mutex::new(HashMap::new()),
        })
    }

    fn handle_message(&self, message: Envelope) {
        match message.command_name() {
            Some("echoAsync") => self.echo_later(message),
            Some("failAsync") => {
                let reply = Envelope::fail(reason_of(&message));
                let _ = self.ctx.reply(&message, reply);
            }
            Some("silent") => {}
            Some("closeCounter") => self.close_counter(&message),
            Some("ping") => {
                let mut payload = Map::new();
                if let Some(tag) = message.get("tag") {
                    payload.insert("tag".to_string(), tag.clone());
                }
                let _ = self.ctx.emit("pong", payload);
            }
            other => {
                let command = other.unwrap_or_default().to_string();
                if message.has_correlation_field() {
                    let _ = self.ctx.post(
                        &ExtensionError::UnsupportedCommand { command }.to_reply(&message),
                    );
                } else {
                    tracing::warn!(command = %command, "Ignoring unsupported post");
                }
            }
        }
    }

    fn handle_sync_message(&self, message: Envelope) -> Envelope {
        match message.command_name() {
            Some("echo") => {
                let msg = message.get("msg").cloned().unwrap_or(Value::Null);
                Envelope::reply_to(&message).with("msg", msg)
            }
            Some("fail") => Envelope::fail(reason_of(&message)).with(fields::CODE, "Requested"),
            Some("openCounter") => self.open_counter(&message),
            Some("counterIncrement") => self.increment(&message),
            other => ExtensionError::UnsupportedCommand {
                command: other.unwrap_or_default().to_string(),
            }
            .to_reply(&message),
        }
    }
}

export_extension!(EchoExtension);
