//! Core of the NativeBridge extension bridge.
//!
//! Application code calls into native extensions as if they were ordinary
//! objects; underneath, every call crosses a narrow JSON message channel.
//! This crate provides the pieces in between:
//!
//! - [`args`]: schema-driven coercion of call arguments into wire-safe values
//! - [`wire`]: envelope construction and reply classification
//! - [`channel`]: the per-instance duplex transport abstraction
//! - [`mux`]: request/reply correlation and event fan-out over one channel
//! - [`extension`]: resolution, loading and the installed call surface
//! - [`lifecycle`]: at-most-once teardown of native handles
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nativebridge_core::prelude::*;
//!
//! let registry = ExtensionRegistry::new(BridgeConfig::from_env(), Arc::new(NativeModuleLoader::new()));
//! let battery = registry.require("battery")?;
//! let reply = battery.call_sync("getLevel", &[ArgValue::from(2)])?;
//! ```

pub mod args;
pub mod channel;
pub mod config;
pub mod error;
pub mod extension;
pub mod lifecycle;
pub mod mux;
pub mod wire;

pub use args::{ArgValue, ArgumentError, ArgumentSchema, Coerced, CoercedArgs, Function};
pub use channel::{Channel, InboundHandler};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use extension::{
    ExtensionDescriptor, ExtensionExports, ExtensionInstance, ExtensionRegistry, ModuleLoader,
    NativeModuleLoader, StaticModuleLoader,
};
pub use lifecycle::{ManagedProxy, ProxyRegistration, Reaper, TeardownMessage};
pub use mux::{Multiplexer, MultiplexerStats, ReplyCallback, SubscriptionId};

pub use nativebridge_extension_sdk as sdk;

/// Re-exports commonly used types.
pub mod prelude {
    // Configuration
    pub use crate::config::{env_vars, BridgeConfig};

    // Error handling
    pub use crate::error::{BridgeError, Result};

    // Arguments
    pub use crate::args::{coerce, ArgValue, ArgumentError, ArgumentSchema, Coerced, Function};

    // Extension system
    pub use crate::extension::{
        ExtensionExports, ExtensionRegistry, ModuleLoader, NativeModuleLoader,
        StaticModuleLoader,
    };
    pub use crate::lifecycle::ManagedProxy;
    pub use crate::mux::SubscriptionId;

    // Wire types
    pub use nativebridge_extension_sdk::{
        ArgKind, ArgSpec, CallMode, CommandSpec, Envelope, ExtensionMetadata, ExtensionSurface,
    };
}
