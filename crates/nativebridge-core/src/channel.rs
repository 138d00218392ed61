//! Raw duplex transport to one extension instance.

use std::sync::Arc;

use crate::error::Result;

/// Receives every inbound payload, in the order the extension emits them.
pub type InboundHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// One extension instance's transport.
///
/// Implementations must deliver every inbound message to the installed
/// handler exactly once and in order, and `send_blocking` must not return
/// before the extension's direct reply is available.
pub trait Channel: Send + Sync {
    /// Fire-and-forget send.
    fn post(&self, payload: &str) -> Result<()>;

    /// Send and wait for the direct reply.
    fn send_blocking(&self, payload: &str) -> Result<String>;

    /// Install the single inbound handler, replacing any previous one.
    fn set_inbound_handler(&self, handler: InboundHandler);
}
