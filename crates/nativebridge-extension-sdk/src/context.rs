//! Native-to-host message sink handed to every extension instance.

use std::ffi::{c_void, CString};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::abi::ReplyCallback;
use crate::envelope::Envelope;
use crate::error::ExtensionResult;

type LocalSink = Arc<dyn Fn(String) + Send + Sync>;

enum Sink {
    Detached,
    Ffi {
        callback: ReplyCallback,
        // Opaque host pointer, stored as an integer so the context stays Send.
        user_data: usize,
    },
    Local(LocalSink),
}

/// Handle an extension uses to push replies and events to the host.
///
/// Cloning is cheap; all clones share one sink. Until the host attaches a
/// sink, posted messages are dropped.
#[derive(Clone)]
pub struct ExtensionContext {
    extension_id: Arc<str>,
    sink: Arc<RwLock<Sink>>,
}

impl ExtensionContext {
    pub fn new(extension_id: impl Into<Arc<str>>) -> Self {
        Self {
            extension_id: extension_id.into(),
            sink: Arc::new(RwLock::new(Sink::Detached)),
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Route outgoing messages to a C callback. `None` detaches.
    ///
    /// # Safety
    /// `user_data` must stay valid until the callback is replaced or the
    /// instance is destroyed.
    pub unsafe fn attach_ffi(&self, callback: Option<ReplyCallback>, user_data: *mut c_void) {
        let mut sink = self.sink.write();
        *sink = match callback {
            Some(callback) => Sink::Ffi {
                callback,
                user_data: user_data as usize,
            },
            None => Sink::Detached,
        };
    }

    /// Route outgoing messages to an in-process closure.
    pub fn attach_local<F>(&self, sink: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        *self.sink.write() = Sink::Local(Arc::new(sink));
    }

    pub fn detach(&self) {
        *self.sink.write() = Sink::Detached;
    }

    pub fn is_attached(&self) -> bool {
        !matches!(*self.sink.read(), Sink::Detached)
    }

    /// Send an envelope to the host. Returns `false` if no sink is attached.
    ///
    /// The sink lock is held (recursively) for the duration of delivery so a
    /// concurrent detach waits for in-flight messages.
    pub fn post(&self, envelope: &Envelope) -> ExtensionResult<bool> {
        let payload = envelope.encode()?;
        let sink = self.sink.read_recursive();
        match &*sink {
            Sink::Detached => {
                tracing::debug!(extension_id = %self.extension_id, "Dropping message, no host sink attached");
                Ok(false)
            }
            Sink::Ffi {
                callback,
                user_data,
            } => {
                let Ok(c_payload) = CString::new(payload) else {
                    return Ok(false);
                };
                // SAFETY: host guaranteed user_data validity in attach_ffi
                unsafe { (*callback)(*user_data as *mut c_void, c_payload.as_ptr()) };
                Ok(true)
            }
            Sink::Local(f) => {
                f(payload);
                Ok(true)
            }
        }
    }

    /// Answer a non-blocking request. The reply inherits its correlation id.
    pub fn reply(&self, request: &Envelope, reply: Envelope) -> ExtensionResult<bool> {
        self.post(&reply.correlated_with(request))
    }

    /// Emit an unsolicited event.
    pub fn emit(&self, event: &str, payload: Map<String, Value>) -> ExtensionResult<bool> {
        self.post(&Envelope::event(event).with_fields(payload))
    }
}

impl std::fmt::Debug for ExtensionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionContext")
            .field("extension_id", &self.extension_id)
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_detached_context_drops_messages() {
        let ctx = ExtensionContext::new("org.test");
        assert!(!ctx.is_attached());
        assert!(!ctx.post(&Envelope::event("tick")).unwrap());
    }

    #[test]
    fn test_local_sink_receives_replies() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ctx = ExtensionContext::new("org.test");
        let sink = seen.clone();
        ctx.attach_local(move |msg| sink.lock().push(msg));

        let request = Envelope::command("read").with_correlation_id(9);
        assert!(ctx.reply(&request, Envelope::ok().with("v", 1)).unwrap());
        assert!(ctx.emit("changed", Map::new()).unwrap());

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        let reply = Envelope::decode(&seen[0]).unwrap();
        assert_eq!(reply.correlation_id(), Some(9));
        let event = Envelope::decode(&seen[1]).unwrap();
        assert_eq!(event.event_name(), Some("changed"));

        drop(seen);
        ctx.detach();
        assert!(!ctx.is_attached());
    }
}
