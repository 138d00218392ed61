//! C ABI shared by the host loader and exported by every native extension.
//!
//! All strings crossing the boundary are NUL-terminated UTF-8. Strings
//! returned by the extension are owned by the extension and must be handed
//! back through `nativebridge_extension_free_string`.

use std::ffi::{c_char, c_void, CStr, CString};

/// Exported symbol names, NUL-terminated for `libloading`.
pub mod symbols {
    pub const ABI_VERSION: &[u8] = b"nativebridge_extension_abi_version\0";
    pub const METADATA: &[u8] = b"nativebridge_extension_metadata\0";
    pub const CREATE: &[u8] = b"nativebridge_extension_create\0";
    pub const DESTROY: &[u8] = b"nativebridge_extension_destroy\0";
    pub const POST: &[u8] = b"nativebridge_extension_post\0";
    pub const SEND_SYNC: &[u8] = b"nativebridge_extension_send_sync\0";
    pub const SET_REPLY_CALLBACK: &[u8] = b"nativebridge_extension_set_reply_callback\0";
    pub const FREE_STRING: &[u8] = b"nativebridge_extension_free_string\0";

    /// Printable form of a symbol name for diagnostics.
    pub fn display(symbol: &[u8]) -> &str {
        std::str::from_utf8(symbol.strip_suffix(b"\0").unwrap_or(symbol)).unwrap_or("<invalid>")
    }
}

/// `u32 nativebridge_extension_abi_version(void)`
pub type AbiVersionFn = unsafe extern "C" fn() -> u32;
/// `char *nativebridge_extension_metadata(void)`; JSON-encoded metadata.
pub type MetadataFn = unsafe extern "C" fn() -> *mut c_char;
/// `void *nativebridge_extension_create(const char *extension_id)`
pub type CreateFn = unsafe extern "C" fn(extension_id: *const c_char) -> *mut c_void;
/// `void nativebridge_extension_destroy(void *instance)`
pub type DestroyFn = unsafe extern "C" fn(instance: *mut c_void);
/// `void nativebridge_extension_post(void *instance, const char *message)`
pub type PostFn = unsafe extern "C" fn(instance: *mut c_void, message: *const c_char);
/// `char *nativebridge_extension_send_sync(void *instance, const char *message)`
pub type SendSyncFn =
    unsafe extern "C" fn(instance: *mut c_void, message: *const c_char) -> *mut c_char;
/// Host callback receiving every message the extension emits asynchronously.
pub type ReplyCallback = unsafe extern "C" fn(user_data: *mut c_void, message: *const c_char);
/// `void nativebridge_extension_set_reply_callback(void *instance, cb, void *user_data)`
pub type SetReplyCallbackFn = unsafe extern "C" fn(
    instance: *mut c_void,
    callback: Option<ReplyCallback>,
    user_data: *mut c_void,
);
/// `void nativebridge_extension_free_string(char *s)`
pub type FreeStringFn = unsafe extern "C" fn(s: *mut c_char);

/// Move a Rust string onto the C heap. Returns null if it contains a NUL byte.
pub fn into_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(c) => c.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Copy a borrowed C string into an owned `String`.
///
/// # Safety
/// `ptr` must be null or point to a valid NUL-terminated string.
pub unsafe fn c_str_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: caller guarantees ptr is a valid C string
    let c = unsafe { CStr::from_ptr(ptr) };
    c.to_str().ok().map(str::to_owned)
}

/// Release a string produced by [`into_c_string`].
///
/// # Safety
/// `ptr` must be null or have been returned by `into_c_string` and not freed.
pub unsafe fn free_c_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        // SAFETY: ptr came from CString::into_raw
        drop(unsafe { CString::from_raw(ptr) });
    }
}
