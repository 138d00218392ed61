//! NativeBridge Extension SDK
//!
//! Everything a native extension and its host must agree on: the exported C
//! symbols, the JSON envelope exchanged over the channel, and the metadata
//! that declares an extension's call surface.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use nativebridge_extension_sdk::prelude::*;
//!
//! struct Clock { ctx: ExtensionContext }
//!
//! impl NativeExtension for Clock {
//!     fn metadata() -> ExtensionMetadata {
//!         ExtensionMetadata::new("org.example.clock", "Clock", semver::Version::new(1, 0, 0))
//!             .with_surface(
//!                 ExtensionSurface::new()
//!                     .with_command(command!(blocking "now"))
//!                     .with_event("tick"),
//!             )
//!     }
//!
//!     fn create(ctx: ExtensionContext) -> ExtensionResult<Self> {
//!         Ok(Clock { ctx })
//!     }
//!
//!     fn handle_message(&self, _message: Envelope) {}
//!
//!     fn handle_sync_message(&self, message: Envelope) -> Envelope {
//!         Envelope::reply_to(&message).with("now", 0)
//!     }
//! }
//!
//! export_extension!(Clock);
//! ```

#[macro_use]
pub mod macros;

pub mod abi;
pub mod context;
pub mod envelope;
pub mod error;
pub mod extension;
pub mod ffi;
pub mod types;

pub use context::ExtensionContext;
pub use envelope::{fields, Envelope, Status};
pub use error::{ExtensionError, ExtensionResult};
pub use extension::NativeExtension;
pub use types::{
    ArgKind, ArgSpec, CallMode, CommandSpec, ExtensionMetadata, ExtensionSurface,
    NB_EXT_ABI_VERSION,
};

/// Re-exported so extension crates need not depend on these directly.
pub use semver;
pub use serde_json;

/// Prelude module with common imports
pub mod prelude {
    pub use crate::context::ExtensionContext;
    pub use crate::envelope::{fields, Envelope, Status};
    pub use crate::error::{ExtensionError, ExtensionResult};
    pub use crate::extension::NativeExtension;
    pub use crate::types::{
        ArgKind, ArgSpec, CallMode, CommandSpec, ExtensionMetadata, ExtensionSurface,
    };
    pub use crate::{command, export_extension};
    pub use serde_json::{json, Map, Value};
    pub use ::semver;
}
