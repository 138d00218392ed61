//! The trait every native extension implements.

use crate::context::ExtensionContext;
use crate::envelope::Envelope;
use crate::error::{ExtensionError, ExtensionResult};
use crate::types::ExtensionMetadata;

/// A native extension.
///
/// One value is created per host instance. Requests arrive on whatever
/// thread the host issues them from, so implementations must be `Sync`.
///
/// # Message flow
///
/// - Post and non-blocking requests go to [`handle_message`]. Non-blocking
///   requests carry a correlation id; answer them with
///   [`ExtensionContext::reply`], from any thread, at any later time.
/// - Blocking requests go to [`handle_sync_message`]; the returned envelope
///   is delivered to the caller as the direct reply.
/// - Unsolicited events are pushed with [`ExtensionContext::emit`].
///
/// [`handle_message`]: NativeExtension::handle_message
/// [`handle_sync_message`]: NativeExtension::handle_sync_message
pub trait NativeExtension: Send + Sync + Sized + 'static {
    /// Static metadata, including the declared call surface.
    fn metadata() -> ExtensionMetadata;

    /// Create an instance bound to `ctx`.
    fn create(ctx: ExtensionContext) -> ExtensionResult<Self>;

    /// Handle a post or non-blocking request.
    fn handle_message(&self, message: Envelope);

    /// Handle a blocking request and return its reply.
    fn handle_sync_message(&self, message: Envelope) -> Envelope {
        let command = message.command_name().unwrap_or_default().to_string();
        ExtensionError::UnsupportedCommand { command }.to_reply(&message)
    }
}
