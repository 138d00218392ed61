//! Drives the exported C entry points in-process.

use std::ffi::{c_char, c_void, CString};
use std::sync::Mutex;

use nativebridge_extension_sdk::abi::{c_str_to_string, free_c_string};
use nativebridge_extension_sdk::ffi;
use nativebridge_extension_sdk::NB_EXT_ABI_VERSION;
use nativebridge_extension_sdk::prelude::*;

struct Greeter {
    ctx: ExtensionContext,
}

impl NativeExtension for Greeter {
    fn metadata() -> ExtensionMetadata {
        ExtensionMetadata::new("org.test.greeter", "Greeter", semver::Version::new(0, 1, 0))
            .with_surface(
                ExtensionSurface::new()
                    .with_command(command!(blocking "greet", [ArgSpec::new("name", ArgKind::String)]))
                    .with_command(command!(async "greetLater"))
                    .with_command(command!(blocking "explode")),
            )
    }

    fn create(ctx: ExtensionContext) -> ExtensionResult<Self> {
        Ok(Greeter { ctx })
    }

    fn handle_message(&self, message: Envelope) {
        match message.command_name() {
            Some("greetLater") => {
                let _ = self
                    .ctx
                    .reply(&message, Envelope::ok().with("greeting", "later"));
            }
            Some("explode") => panic!("boom"),
            _ => {}
        }
    }

    fn handle_sync_message(&self, message: Envelope) -> Envelope {
        match message.command_name() {
            Some("greet") => {
                let name = message.get_str("name").unwrap_or("nobody");
                Envelope::reply_to(&message).with("greeting", format!("hello {}", name))
            }
            Some("explode") => panic!("boom"),
            other => ExtensionError::UnsupportedCommand {
                command: other.unwrap_or_default().to_string(),
            }
            .to_reply(&message),
        }
    }
}

static RECEIVED: Mutex<Vec<String>> = Mutex::new(Vec::new());

unsafe extern "C" fn collect(_user_data: *mut c_void, message: *const c_char) {
    if let Some(text) = unsafe { c_str_to_string(message) } {
        RECEIVED.lock().unwrap().push(text);
    }
}

fn c(s: &str) -> CString {
    CString::new(s).unwrap()
}

fn send_sync(instance: *mut c_void, payload: &str) -> Envelope {
    let msg = c(payload);
    let raw = unsafe { ffi::send_sync::<Greeter>(instance, msg.as_ptr()) };
    assert!(!raw.is_null());
    let text = unsafe { c_str_to_string(raw) }.unwrap();
    unsafe { free_c_string(raw) };
    Envelope::decode(&text).unwrap()
}

#[test]
fn test_metadata_export() {
    let raw = ffi::metadata_json::<Greeter>();
    let text = unsafe { c_str_to_string(raw) }.unwrap();
    unsafe { ffi::free_string(raw) };

    let meta: ExtensionMetadata = serde_json::from_str(&text).unwrap();
    assert_eq!(meta.id, "org.test.greeter");
    assert_eq!(meta.surface.commands.len(), 3);
    assert_eq!(ffi::abi_version(), NB_EXT_ABI_VERSION);
}

#[test]
fn test_create_rejects_foreign_id() {
    let id = c("org.test.other");
    let instance = unsafe { ffi::create::<Greeter>(id.as_ptr()) };
    assert!(instance.is_null());

    let instance = unsafe { ffi::create::<Greeter>(std::ptr::null()) };
    assert!(instance.is_null());
}

#[test]
fn test_blocking_and_async_paths() {
    let id = c("org.test.greeter");
    let instance = unsafe { ffi::create::<Greeter>(id.as_ptr()) };
    assert!(!instance.is_null());

    let reply = send_sync(instance, r#"{"cmd":"greet","name":"ada"}"#);
    assert_eq!(reply.status(), Some(Status::Ok));
    assert_eq!(reply.get_str("greeting"), Some("hello ada"));

    let reply = send_sync(instance, r#"{"cmd":"unknown"}"#);
    assert!(reply.is_failure());
    assert_eq!(reply.code(), Some("UnsupportedCommand"));

    let reply = send_sync(instance, "not json");
    assert_eq!(reply.code(), Some("MalformedEnvelope"));

    let reply = send_sync(instance, r#"{"cmd":"explode"}"#);
    assert!(reply.is_failure());

    unsafe { ffi::set_reply_callback::<Greeter>(instance, Some(collect), std::ptr::null_mut()) };
    let msg = c(r#"{"cmd":"greetLater","callbackId":11}"#);
    unsafe { ffi::post::<Greeter>(instance, msg.as_ptr()) };
    let msg = c(r#"{"cmd":"explode","callbackId":12}"#);
    unsafe { ffi::post::<Greeter>(instance, msg.as_ptr()) };

    let received: Vec<Envelope> = RECEIVED
        .lock()
        .unwrap()
        .iter()
        .map(|m| Envelope::decode(m).unwrap())
        .collect();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].correlation_id(), Some(11));
    assert_eq!(received[0].get_str("greeting"), Some("later"));
    assert_eq!(received[1].correlation_id(), Some(12));
    assert!(received[1].is_failure());

    unsafe { ffi::destroy::<Greeter>(instance) };
}
