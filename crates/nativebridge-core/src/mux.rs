//! Correlation multiplexer.
//!
//! One multiplexer sits on top of each extension instance's [`Channel`]. It
//! numbers outbound non-blocking requests, keeps the table of calls still
//! waiting for a reply, and sorts every inbound message into either a reply
//! (known correlation id) or an event (anything else), fanning events out to
//! every subscriber of the event name.
//!
//! Inbound messages are queued and dispatched on a per-multiplexer thread,
//! never on the thread that handed them over. A reply callback therefore
//! never runs inside the `call` that issued the request, even when the
//! channel answers inline.
//!
//! Delivery is serialized: callbacks for one instance never run concurrently
//! with each other, and they run in the order the extension emitted the
//! messages. A callback may issue further calls on the same multiplexer,
//! including blocking ones.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use nativebridge_extension_sdk::Envelope;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex, ReentrantMutex};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::channel::Channel;
use crate::error::{BridgeError, Result};
use crate::wire::{self, Inbound};

/// Continuation of a non-blocking call. Invoked exactly once.
pub type ReplyCallback = Box<dyn FnOnce(Result<Envelope>) + Send>;

/// Event subscriber. Invoked once per matching event.
pub type EventCallback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Token returned by [`Multiplexer::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct PendingCall {
    command: String,
    callback: ReplyCallback,
}

struct Subscriber {
    id: SubscriptionId,
    event: String,
    callback: EventCallback,
}

/// Traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MultiplexerStats {
    pub posted: u64,
    pub blocking_calls: u64,
    pub async_calls: u64,
    pub replies_matched: u64,
    pub events_dispatched: u64,
    pub unparseable: u64,
}

#[derive(Default)]
struct Counters {
    posted: AtomicU64,
    blocking_calls: AtomicU64,
    async_calls: AtomicU64,
    replies_matched: AtomicU64,
    events_dispatched: AtomicU64,
    unparseable: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

enum Delivery {
    Payload(String),
    Shutdown,
}

/// Inbound messages handed over versus dispatched.
#[derive(Default)]
struct Backlog {
    queued: AtomicU64,
    dispatched: Mutex<u64>,
    idle: Condvar,
}

impl Backlog {
    fn finish(&self) {
        let mut dispatched = self.dispatched.lock();
        *dispatched += 1;
        self.idle.notify_all();
    }

    fn wait_for(&self, target: u64) {
        let mut dispatched = self.dispatched.lock();
        while *dispatched < target {
            self.idle.wait(&mut dispatched);
        }
    }
}

fn run_dispatcher(inbound: mpsc::Receiver<Delivery>, weak: Weak<Multiplexer>) {
    while let Ok(Delivery::Payload(payload)) = inbound.recv() {
        let Some(mux) = weak.upgrade() else {
            break;
        };
        mux.dispatch(&payload);
        mux.backlog.finish();
    }
}

/// Withdraws a non-blocking call when the future awaiting it is dropped
/// before the reply arrives.
struct CancelOnDrop<'a> {
    mux: &'a Multiplexer,
    id: u64,
    armed: bool,
}

impl CancelOnDrop<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.mux.cancel(self.id);
        }
    }
}

/// Request/reply correlation over one channel.
pub struct Multiplexer {
    extension_id: String,
    channel: Arc<dyn Channel>,
    next_id: AtomicU64,
    next_subscription: AtomicU64,
    pending: Mutex<HashMap<u64, PendingCall>>,
    subscribers: Mutex<Vec<Subscriber>>,
    dispatch_lock: ReentrantMutex<()>,
    inbound: mpsc::Sender<Delivery>,
    backlog: Backlog,
    dispatcher: OnceCell<ThreadId>,
    counters: Counters,
}

impl Multiplexer {
    /// Build a multiplexer, start its dispatch thread and install it as the
    /// channel's inbound handler.
    pub fn attach(channel: Arc<dyn Channel>, extension_id: impl Into<String>) -> Result<Arc<Self>> {
        let (tx, rx) = mpsc::channel();
        let mux = Arc::new(Self {
            extension_id: extension_id.into(),
            channel,
            next_id: AtomicU64::new(0),
            next_subscription: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            dispatch_lock: ReentrantMutex::new(()),
            inbound: tx,
            backlog: Backlog::default(),
            dispatcher: OnceCell::new(),
            counters: Counters::default(),
        });

        let weak = Arc::downgrade(&mux);
        let handle = thread::Builder::new()
            .name(format!("nativebridge-dispatch-{}", mux.extension_id))
            .spawn(move || run_dispatcher(rx, weak))?;
        let _ = mux.dispatcher.set(handle.thread().id());

        let weak = Arc::downgrade(&mux);
        mux.channel.set_inbound_handler(Arc::new(move |payload: &str| {
            if let Some(mux) = weak.upgrade() {
                mux.deliver(payload);
            }
        }));
        Ok(mux)
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Fire-and-forget. No correlation id is attached and nothing is tracked.
    pub fn post(&self, command: &str, fields: Map<String, Value>) -> Result<()> {
        let payload = wire::request(command, fields).encode()?;
        trace!(extension_id = %self.extension_id, command, "post");
        self.channel.post(&payload)?;
        bump(&self.counters.posted);
        Ok(())
    }

    /// Send and wait for the direct reply on the calling thread.
    pub fn call_blocking(&self, command: &str, fields: Map<String, Value>) -> Result<Envelope> {
        let payload = wire::request(command, fields).encode()?;
        trace!(extension_id = %self.extension_id, command, "blocking call");
        bump(&self.counters.blocking_calls);
        let reply = self.channel.send_blocking(&payload)?;
        wire::parse_reply(command, &reply)
    }

    /// Issue a non-blocking call. `callback` runs later, from inbound
    /// dispatch, with the reply or the call error.
    ///
    /// Returns the correlation id, usable with [`cancel`](Self::cancel).
    pub fn call(
        &self,
        command: &str,
        fields: Map<String, Value>,
        callback: ReplyCallback,
    ) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let payload = wire::request(command, fields)
            .with_correlation_id(id)
            .encode()?;

        // Registered before sending: the reply may arrive before post returns.
        self.pending.lock().insert(
            id,
            PendingCall {
                command: command.to_string(),
                callback,
            },
        );
        bump(&self.counters.async_calls);
        debug!(extension_id = %self.extension_id, command, correlation_id = id, "async call");

        if let Err(e) = self.channel.post(&payload) {
            self.pending.lock().remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Non-blocking call as a future.
    ///
    /// Dropping the future before it resolves cancels the call.
    pub async fn call_async(&self, command: &str, fields: Map<String, Value>) -> Result<Envelope> {
        let (tx, rx) = oneshot::channel();
        let id = self.call(
            command,
            fields,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )?;
        let mut guard = CancelOnDrop {
            mux: self,
            id,
            armed: true,
        };
        let result = rx.await.unwrap_or_else(|_| Err(BridgeError::Cancelled));
        guard.disarm();
        result
    }

    /// Non-blocking call that gives up after `timeout`.
    ///
    /// On expiry the pending entry is removed, so a late reply is treated as
    /// an unmatched message.
    pub async fn call_with_timeout(
        &self,
        command: &str,
        fields: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Envelope> {
        let (tx, rx) = oneshot::channel();
        let id = self.call(
            command,
            fields,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )?;
        let mut guard = CancelOnDrop {
            mux: self,
            id,
            armed: true,
        };
        let outcome = tokio::time::timeout(timeout, rx).await;
        guard.disarm();
        match outcome {
            Ok(result) => result.unwrap_or_else(|_| Err(BridgeError::Cancelled)),
            Err(_) => {
                if self.pending.lock().remove(&id).is_some() {
                    warn!(
                        extension_id = %self.extension_id,
                        command,
                        correlation_id = id,
                        "Call timed out"
                    );
                }
                Err(BridgeError::Timeout)
            }
        }
    }

    /// Withdraw a pending call. Its callback receives
    /// [`BridgeError::Cancelled`]. Returns `false` if the call had already
    /// been resolved or cancelled.
    pub fn cancel(&self, correlation_id: u64) -> bool {
        let _serial = self.dispatch_lock.lock();
        let pending = self.pending.lock().remove(&correlation_id);
        match pending {
            Some(call) => {
                debug!(
                    extension_id = %self.extension_id,
                    command = %call.command,
                    correlation_id,
                    "Call cancelled"
                );
                (call.callback)(Err(BridgeError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Subscribe to events named `event`.
    pub fn subscribe<F>(&self, event: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed) + 1);
        self.subscribers.lock().push(Subscriber {
            id,
            event: event.into(),
            callback: Arc::new(callback),
        });
        id
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Hand over one inbound payload for dispatch.
    ///
    /// Installed as the channel's inbound handler by [`attach`](Self::attach);
    /// exposed for transports that deliver messages themselves. Returns
    /// without running any callback.
    pub fn deliver(&self, payload: &str) {
        self.backlog.queued.fetch_add(1, Ordering::SeqCst);
        if self
            .inbound
            .send(Delivery::Payload(payload.to_string()))
            .is_err()
        {
            warn!(extension_id = %self.extension_id, "Dispatch thread gone, dropping inbound message");
            self.backlog.finish();
        }
    }

    /// Block until every payload delivered so far has been dispatched.
    ///
    /// Returns at once when called from a callback, which already runs on
    /// the dispatch thread.
    pub fn flush(&self) {
        if self.dispatcher.get() == Some(&thread::current().id()) {
            return;
        }
        let target = self.backlog.queued.load(Ordering::SeqCst);
        self.backlog.wait_for(target);
    }

    fn dispatch(&self, payload: &str) {
        let _serial = self.dispatch_lock.lock();

        match wire::classify(payload) {
            Ok(Inbound::Reply { id, envelope }) => {
                let pending = self.pending.lock().remove(&id);
                match pending {
                    Some(call) => {
                        bump(&self.counters.replies_matched);
                        debug!(
                            extension_id = %self.extension_id,
                            command = %call.command,
                            correlation_id = id,
                            "reply"
                        );
                        let result = wire::reply_into_result(&call.command, envelope);
                        (call.callback)(result);
                    }
                    None => {
                        debug!(
                            extension_id = %self.extension_id,
                            correlation_id = id,
                            "Unmatched correlation id, dispatching as event"
                        );
                        let name = envelope.event_name().unwrap_or_default().to_string();
                        self.deliver_event(&name, &envelope);
                    }
                }
            }
            Ok(Inbound::Event { name, envelope }) => self.deliver_event(&name, &envelope),
            Err(e) => {
                bump(&self.counters.unparseable);
                warn!(extension_id = %self.extension_id, error = %e, "Dropping inbound message");
            }
        }
    }

    fn deliver_event(&self, name: &str, envelope: &Envelope) {
        let targets: Vec<EventCallback> = self
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.event == name)
            .map(|s| s.callback.clone())
            .collect();

        bump(&self.counters.events_dispatched);
        if targets.is_empty() {
            trace!(extension_id = %self.extension_id, event = name, "Event with no subscribers");
        }
        for callback in targets {
            callback(envelope);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn stats(&self) -> MultiplexerStats {
        let c = &self.counters;
        MultiplexerStats {
            posted: c.posted.load(Ordering::Relaxed),
            blocking_calls: c.blocking_calls.load(Ordering::Relaxed),
            async_calls: c.async_calls.load(Ordering::Relaxed),
            replies_matched: c.replies_matched.load(Ordering::Relaxed),
            events_dispatched: c.events_dispatched.load(Ordering::Relaxed),
            unparseable: c.unparseable.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        let _ = self.inbound.send(Delivery::Shutdown);
        let pending: Vec<_> = self.pending.get_mut().drain().collect();
        let _serial = self.dispatch_lock.lock();
        if !pending.is_empty() {
            debug!(
                extension_id = %self.extension_id,
                count = pending.len(),
                "Cancelling calls still pending at shutdown"
            );
        }
        for (_, call) in pending {
            (call.callback)(Err(BridgeError::Cancelled));
        }
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("extension_id", &self.extension_id)
            .field("pending", &self.pending_count())
            .finish()
    }
}
