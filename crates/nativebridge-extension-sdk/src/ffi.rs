//! Plumbing behind [`export_extension!`](crate::export_extension).
//!
//! Every entry point catches panics so a misbehaving extension never unwinds
//! across the C boundary into the host. The `deliver_*` functions are also
//! used by hosts that link extensions in-process.

use std::ffi::{c_char, c_void};
use std::panic::{self, AssertUnwindSafe};

use tracing::{error, warn};

use crate::abi::{c_str_to_string, free_c_string, into_c_string, ReplyCallback};
use crate::context::ExtensionContext;
use crate::envelope::{fields, Envelope};
use crate::error::ExtensionError;
use crate::extension::NativeExtension;
use crate::types::NB_EXT_ABI_VERSION;

/// Heap state behind the opaque instance pointer handed to the host.
pub struct Instance<E> {
    extension: E,
    ctx: ExtensionContext,
}

impl<E: NativeExtension> Instance<E> {
    /// Create an instance for `extension_id`, which must match the metadata.
    pub fn create(extension_id: &str) -> Result<Self, ExtensionError> {
        let expected = E::metadata().id;
        if extension_id != expected {
            return Err(ExtensionError::InitializationFailed(format!(
                "instance requested for '{}' but this library provides '{}'",
                extension_id, expected
            )));
        }
        let ctx = ExtensionContext::new(extension_id);
        let extension = E::create(ctx.clone())?;
        Ok(Self { extension, ctx })
    }

    pub fn extension(&self) -> &E {
        &self.extension
    }

    pub fn context(&self) -> &ExtensionContext {
        &self.ctx
    }
}

impl<E> Drop for Instance<E> {
    fn drop(&mut self) {
        self.ctx.detach();
    }
}

pub fn abi_version() -> u32 {
    NB_EXT_ABI_VERSION
}

/// Serialize `E::metadata()` onto the C heap.
pub fn metadata_json<E: NativeExtension>() -> *mut c_char {
    match panic::catch_unwind(|| serde_json::to_string(&E::metadata())) {
        Ok(Ok(json)) => into_c_string(json),
        Ok(Err(e)) => {
            error!(error = %e, "Failed to serialize extension metadata");
            std::ptr::null_mut()
        }
        Err(_) => {
            error!("Extension panicked while producing metadata");
            std::ptr::null_mut()
        }
    }
}

/// # Safety
/// `extension_id` must be null or a valid C string.
pub unsafe fn create<E: NativeExtension>(extension_id: *const c_char) -> *mut c_void {
    // SAFETY: forwarded caller contract
    let Some(id) = (unsafe { c_str_to_string(extension_id) }) else {
        return std::ptr::null_mut();
    };
    match panic::catch_unwind(|| Instance::<E>::create(&id)) {
        Ok(Ok(instance)) => Box::into_raw(Box::new(instance)) as *mut c_void,
        Ok(Err(e)) => {
            error!(extension_id = %id, error = %e, "Extension instantiation failed");
            std::ptr::null_mut()
        }
        Err(_) => {
            error!(extension_id = %id, "Extension panicked during instantiation");
            std::ptr::null_mut()
        }
    }
}

/// # Safety
/// `instance` must be null or a pointer returned by [`create`] for the same
/// `E`, not yet destroyed.
pub unsafe fn destroy<E: NativeExtension>(instance: *mut c_void) {
    if instance.is_null() {
        return;
    }
    // SAFETY: pointer came from Box::into_raw in create::<E>
    let boxed = unsafe { Box::from_raw(instance as *mut Instance<E>) };
    boxed.ctx.detach();
    if panic::catch_unwind(AssertUnwindSafe(move || drop(boxed))).is_err() {
        error!("Extension panicked while being destroyed");
    }
}

/// # Safety
/// `instance` as for [`destroy`]; `message` must be null or a valid C string.
pub unsafe fn post<E: NativeExtension>(instance: *mut c_void, message: *const c_char) {
    // SAFETY: forwarded caller contract
    let Some(instance) = (unsafe { (instance as *const Instance<E>).as_ref() }) else {
        return;
    };
    let Some(text) = (unsafe { c_str_to_string(message) }) else {
        warn!(extension_id = instance.ctx.extension_id(), "Dropping non UTF-8 message");
        return;
    };
    deliver_post(&instance.extension, &instance.ctx, &text);
}

/// # Safety
/// As for [`post`]. The returned string must be released with [`free_string`].
pub unsafe fn send_sync<E: NativeExtension>(
    instance: *mut c_void,
    message: *const c_char,
) -> *mut c_char {
    // SAFETY: forwarded caller contract
    let reply = match unsafe { (instance as *const Instance<E>).as_ref() } {
        None => Envelope::fail("Null extension instance"),
        Some(instance) => match unsafe { c_str_to_string(message) } {
            Some(text) => deliver_sync(&instance.extension, &text),
            None => malformed("message is not valid UTF-8"),
        },
    };
    match reply.encode() {
        Ok(json) => into_c_string(json),
        Err(e) => {
            error!(error = %e, "Failed to encode blocking reply");
            std::ptr::null_mut()
        }
    }
}

/// # Safety
/// As for [`destroy`]; `user_data` must outlive the registration.
pub unsafe fn set_reply_callback<E: NativeExtension>(
    instance: *mut c_void,
    callback: Option<ReplyCallback>,
    user_data: *mut c_void,
) {
    // SAFETY: forwarded caller contract
    if let Some(instance) = unsafe { (instance as *const Instance<E>).as_ref() } {
        unsafe { instance.ctx.attach_ffi(callback, user_data) };
    }
}

/// # Safety
/// `ptr` must be null or a string returned by this SDK.
pub unsafe fn free_string(ptr: *mut c_char) {
    unsafe { free_c_string(ptr) }
}

/// Decode and hand a post/non-blocking payload to the extension.
///
/// If the extension panics on a correlated request, a FAIL reply is posted
/// so the waiting host caller is released.
pub fn deliver_post<E: NativeExtension>(extension: &E, ctx: &ExtensionContext, payload: &str) {
    let request = match Envelope::decode(payload) {
        Ok(request) => request,
        Err(e) => {
            warn!(extension_id = ctx.extension_id(), error = %e, "Dropping malformed message");
            return;
        }
    };
    let probe = Envelope::new().correlated_with(&request);
    if panic::catch_unwind(AssertUnwindSafe(|| extension.handle_message(request))).is_err() {
        error!(extension_id = ctx.extension_id(), "Extension panicked handling message");
        if probe.has_correlation_field() {
            let reply = ExtensionError::ExecutionFailed("extension panicked".into()).to_reply(&probe);
            let _ = ctx.post(&reply);
        }
    }
}

/// Decode and hand a blocking payload to the extension, returning its reply.
pub fn deliver_sync<E: NativeExtension>(extension: &E, payload: &str) -> Envelope {
    let request = match Envelope::decode(payload) {
        Ok(request) => request,
        Err(e) => return malformed(&e.to_string()),
    };
    panic::catch_unwind(AssertUnwindSafe(|| extension.handle_sync_message(request)))
        .unwrap_or_else(|_| {
            error!("Extension panicked handling blocking message");
            ExtensionError::ExecutionFailed("extension panicked".into()).to_reply(&Envelope::new())
        })
}

fn malformed(detail: &str) -> Envelope {
    Envelope::fail(format!("Malformed request: {}", detail)).with(fields::CODE, "MalformedEnvelope")
}
