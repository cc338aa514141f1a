//! Publish/subscribe registry keyed by event name.
//!
//! # Responsibility
//! - Decouple extensions from the editor and from each other.
//! - Dispatch each publish either onto the owner thread (default) or onto a
//!   dedicated worker thread (`threaded` listeners).
//!
//! # Invariants
//! - `publish` never blocks on listeners and never surfaces their failures.
//! - A failing or panicking listener stays registered and does not prevent
//!   other listeners from running.
//! - Non-threaded listeners run on the owner thread in registration order.
//! - Unsubscribe removes an entry iff every supplied filter matches it; with
//!   no filter, every listener of the event is removed.

use crate::host::EditorHost;
use crate::logging::{panic_message, EXTENSION_LOG_TARGET};
use crate::HookResult;
use log::{debug, error, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

/// Published after a file is loaded into the buffer; args: `[path]`.
pub const EVENT_FILE_OPENED: &str = "file_opened";
/// Published after the buffer is written to disk; args: `[path]`.
pub const EVENT_FILE_SAVED: &str = "file_saved";
/// Published after the buffer content changes; args: `[text]`.
pub const EVENT_TEXT_CHANGED: &str = "text_changed";

/// Positional event payload.
pub type EventArgs = Vec<Value>;

/// Listener callback; identity is the `Arc` allocation.
pub type EventCallback = Arc<dyn Fn(&EventArgs) -> HookResult + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    callback: EventCallback,
    owner: Option<String>,
    threaded: bool,
}

impl Subscription {
    fn matches(&self, callback: Option<&EventCallback>, owner: Option<&str>) -> bool {
        let callback_matches = callback.map_or(true, |cb| Arc::ptr_eq(cb, &self.callback));
        let owner_matches = owner.map_or(true, |o| self.owner.as_deref() == Some(o));
        callback_matches && owner_matches
    }
}

/// Event registry shared by the host and all extensions.
pub struct EventBus {
    host: Arc<dyn EditorHost>,
    listeners: Mutex<BTreeMap<String, Vec<Subscription>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.lock();
        f.debug_struct("EventBus")
            .field("events", &listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EventBus {
    pub fn new(host: Arc<dyn EditorHost>) -> Self {
        Self {
            host,
            listeners: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers a listener. Registering the same callback twice makes it
    /// fire twice.
    pub fn subscribe(
        &self,
        event: &str,
        callback: EventCallback,
        owner: Option<&str>,
        threaded: bool,
    ) {
        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(Subscription {
                callback,
                owner: owner.map(str::to_string),
                threaded,
            });
    }

    /// Removes listeners of `event` matching every supplied filter.
    ///
    /// Returns the number of removed entries.
    pub fn unsubscribe(
        &self,
        event: &str,
        callback: Option<&EventCallback>,
        owner: Option<&str>,
    ) -> usize {
        let mut listeners = self.listeners.lock();
        let Some(entries) = listeners.get_mut(event) else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|sub| !sub.matches(callback, owner));
        let removed = before - entries.len();
        if entries.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Removes every listener tagged with `owner`, across all events.
    pub fn remove_owner(&self, owner: &str) -> usize {
        let mut listeners = self.listeners.lock();
        let mut removed = 0;
        listeners.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|sub| sub.owner.as_deref() != Some(owner));
            removed += before - entries.len();
            !entries.is_empty()
        });
        removed
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.lock().get(event).map_or(0, Vec::len)
    }

    /// Fire-and-forget dispatch of `args` to every listener of `event`.
    pub fn publish(&self, event: &str, args: EventArgs) {
        let snapshot = match self.listeners.lock().get(event) {
            Some(entries) if !entries.is_empty() => entries.clone(),
            _ => return,
        };
        debug!(
            "event=publish module=events status=ok name={} listeners={}",
            event,
            snapshot.len()
        );
        let args = Arc::new(args);
        for sub in snapshot {
            let event_name = event.to_string();
            let args = Arc::clone(&args);
            if sub.threaded {
                let spawned = thread::Builder::new()
                    .name(format!("sedit-event-{event}"))
                    .spawn(move || invoke(&event_name, &sub, &args));
                if let Err(err) = spawned {
                    warn!(
                        "event=publish module=events status=spawn_failed name={event} error={err}"
                    );
                }
            } else {
                self.host
                    .schedule_on_owner_thread(Box::new(move || invoke(&event_name, &sub, &args)));
            }
        }
    }
}

fn invoke(event: &str, sub: &Subscription, args: &EventArgs) {
    let owner = sub.owner.as_deref().unwrap_or("host");
    match catch_unwind(AssertUnwindSafe(|| (sub.callback)(args))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(
                target: EXTENSION_LOG_TARGET,
                "[{owner}] Extension callback error: event={event} error={err}"
            );
        }
        Err(payload) => {
            error!(
                target: EXTENSION_LOG_TARGET,
                "[{owner}] Extension callback panicked: event={event} payload={}",
                panic_message(payload.as_ref())
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EventBus, EventCallback};
    use crate::host::HeadlessHost;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn bus() -> (Arc<HeadlessHost>, EventBus) {
        let host = Arc::new(HeadlessHost::new());
        let bus = EventBus::new(host.clone());
        (host, bus)
    }

    fn counter(hits: &Arc<AtomicUsize>) -> EventCallback {
        let hits = Arc::clone(hits);
        Arc::new(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn publish_without_listeners_queues_nothing() {
        let (host, bus) = bus();
        bus.publish("nobody_listens", vec![json!(1)]);
        assert_eq!(host.queue().pending(), 0);
    }

    #[test]
    fn owner_thread_listeners_run_only_when_queue_is_drained() {
        let (host, bus) = bus();
        let hits = Arc::new(AtomicUsize::new(0));
        let cb = counter(&hits);
        bus.subscribe("file_opened", cb.clone(), None, false);
        bus.subscribe("file_opened", cb, None, false);

        bus.publish("file_opened", vec![json!("/tmp/a.sed")]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(host.run_pending(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_and_panicking_listeners_do_not_block_others() {
        let (host, bus) = bus();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe("x", Arc::new(|_| Err("nope".into())), Some("bad"), false);
        bus.subscribe("x", Arc::new(|_| panic!("listener blew up")), Some("worse"), false);
        bus.subscribe("x", counter(&hits), Some("good"), false);

        bus.publish("x", vec![]);
        host.run_pending();
        bus.publish("x", vec![]);
        host.run_pending();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(bus.listener_count("x"), 3);
    }

    #[test]
    fn threaded_listeners_run_off_the_publishing_thread() {
        let (host, bus) = bus();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let publisher = std::thread::current().id();
        bus.subscribe(
            "text_changed",
            Arc::new(move |args| {
                let _ = tx.send((std::thread::current().id(), args.clone()));
                Ok(())
            }),
            None,
            true,
        );
        bus.publish("text_changed", vec![json!("hello")]);
        assert_eq!(host.queue().pending(), 0);
        let (worker, args) = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("threaded listener should run");
        assert_ne!(worker, publisher);
        assert_eq!(args, vec![json!("hello")]);
    }

    #[test]
    fn unsubscribe_requires_all_supplied_filters_to_match() {
        let (_host, bus) = bus();
        let hits = Arc::new(AtomicUsize::new(0));
        let shared = counter(&hits);
        bus.subscribe("e", shared.clone(), Some("a"), false);
        bus.subscribe("e", shared.clone(), Some("b"), false);
        bus.subscribe("e", counter(&hits), Some("a"), false);

        assert_eq!(bus.unsubscribe("e", Some(&shared), Some("a")), 1);
        assert_eq!(bus.listener_count("e"), 2);
        assert_eq!(bus.unsubscribe("e", None, Some("a")), 1);
        assert_eq!(bus.listener_count("e"), 1);
        assert_eq!(bus.unsubscribe("e", Some(&shared), None), 1);
        assert_eq!(bus.listener_count("e"), 0);
    }

    #[test]
    fn unsubscribe_without_filters_clears_the_event_only() {
        let (_host, bus) = bus();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe("e", counter(&hits), Some("a"), false);
        bus.subscribe("e", counter(&hits), None, true);
        bus.subscribe("other", counter(&hits), Some("a"), false);
        assert_eq!(bus.unsubscribe("e", None, None), 2);
        assert_eq!(bus.listener_count("other"), 1);
    }

    #[test]
    fn remove_owner_spans_all_events() {
        let (_host, bus) = bus();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe("e1", counter(&hits), Some("ext"), false);
        bus.subscribe("e2", counter(&hits), Some("ext"), true);
        bus.subscribe("e2", counter(&hits), Some("other"), false);
        assert_eq!(bus.remove_owner("ext"), 2);
        assert_eq!(bus.listener_count("e1"), 0);
        assert_eq!(bus.listener_count("e2"), 1);
    }
}
