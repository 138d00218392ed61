//! Declarative macros for extension development.

/// Export the C entry points for a [`NativeExtension`](crate::NativeExtension).
///
/// Invoke once at the crate root of a `cdylib`.
///
/// # Example
///
/// ```rust,ignore
/// use nativebridge_extension_sdk::prelude::*;
///
/// struct Battery { ctx: ExtensionContext }
///
/// impl NativeExtension for Battery {
///     fn metadata() -> ExtensionMetadata {
///         ExtensionMetadata::new("org.example.battery", "Battery", semver::Version::new(1, 0, 0))
///     }
///     fn create(ctx: ExtensionContext) -> ExtensionResult<Self> {
///         Ok(Battery { ctx })
///     }
///     fn handle_message(&self, _message: Envelope) {}
/// }
///
/// export_extension!(Battery);
/// ```
#[macro_export]
macro_rules! export_extension {
    ($ty:ty) => {
        #[no_mangle]
        pub extern "C" fn nativebridge_extension_abi_version() -> u32 {
            $crate::ffi::abi_version()
        }

        #[no_mangle]
        pub extern "C" fn nativebridge_extension_metadata() -> *mut ::std::ffi::c_char {
            $crate::ffi::metadata_json::<$ty>()
        }

        /// # Safety
        /// See [`nativebridge_extension_sdk::ffi::create`].
        #[no_mangle]
        pub unsafe extern "C" fn nativebridge_extension_create(
            extension_id: *const ::std::ffi::c_char,
        ) -> *mut ::std::ffi::c_void {
            unsafe { $crate::ffi::create::<$ty>(extension_id) }
        }

        /// # Safety
        /// See [`nativebridge_extension_sdk::ffi::destroy`].
        #[no_mangle]
        pub unsafe extern "C" fn nativebridge_extension_destroy(instance: *mut ::std::ffi::c_void) {
            unsafe { $crate::ffi::destroy::<$ty>(instance) }
        }

        /// # Safety
        /// See [`nativebridge_extension_sdk::ffi::post`].
        #[no_mangle]
        pub unsafe extern "C" fn nativebridge_extension_post(
            instance: *mut ::std::ffi::c_void,
            message: *const ::std::ffi::c_char,
        ) {
            unsafe { $crate::ffi::post::<$ty>(instance, message) }
        }

        /// # Safety
        /// See [`nativebridge_extension_sdk::ffi::send_sync`].
        #[no_mangle]
        pub unsafe extern "C" fn nativebridge_extension_send_sync(
            instance: *mut ::std::ffi::c_void,
            message: *const ::std::ffi::c_char,
        ) -> *mut ::std::ffi::c_char {
            unsafe { $crate::ffi::send_sync::<$ty>(instance, message) }
        }

        /// # Safety
        /// See [`nativebridge_extension_sdk::ffi::set_reply_callback`].
        #[no_mangle]
        pub unsafe extern "C" fn nativebridge_extension_set_reply_callback(
            instance: *mut ::std::ffi::c_void,
            callback: ::std::option::Option<$crate::abi::ReplyCallback>,
            user_data: *mut ::std::ffi::c_void,
        ) {
            unsafe { $crate::ffi::set_reply_callback::<$ty>(instance, callback, user_data) }
        }

        /// # Safety
        /// See [`nativebridge_extension_sdk::ffi::free_string`].
        #[no_mangle]
        pub unsafe extern "C" fn nativebridge_extension_free_string(s: *mut ::std::ffi::c_char) {
            unsafe { $crate::ffi::free_string(s) }
        }
    };
}

/// Build a [`CommandSpec`](crate::CommandSpec) with positional argument specs.
///
/// ```rust
/// use nativebridge_extension_sdk::{command, ArgKind, ArgSpec, CallMode};
///
/// let spec = command!(blocking "getLevel", [ArgSpec::new("precision", ArgKind::Octet).optional()]);
/// assert_eq!(spec.mode, CallMode::Blocking);
/// assert_eq!(spec.args.len(), 1);
/// ```
#[macro_export]
macro_rules! command {
    (post $name:expr $(, [$($arg:expr),* $(,)?])?) => {
        $crate::command!(@build $crate::CallMode::Post, $name $(, [$($arg),*])?)
    };
    (blocking $name:expr $(, [$($arg:expr),* $(,)?])?) => {
        $crate::command!(@build $crate::CallMode::Blocking, $name $(, [$($arg),*])?)
    };
    (async $name:expr $(, [$($arg:expr),* $(,)?])?) => {
        $crate::command!(@build $crate::CallMode::Async, $name $(, [$($arg),*])?)
    };
    (@build $mode:expr, $name:expr $(, [$($arg:expr),*])?) => {{
        #[allow(unused_mut)]
        let mut spec = $crate::CommandSpec::new($name, $mode);
        $($(spec = spec.arg($arg);)*)?
        spec
    }};
}
