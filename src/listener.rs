//! Listener capability surface and fan-out dispatch.
//!
//! Delivery is isolated per listener: a panicking handler never prevents
//! delivery to the remaining listeners. The failure is instead reported to
//! every listener's `on_error`, and panics from those secondary calls are
//! swallowed so dispatch always makes forward progress.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::{Event, ResponseInfo, StreamError};

/// Listener for events and lifecycle notifications of an
/// [`EventStreamClient`](crate::EventStreamClient).
///
/// All methods default to no-ops, so implementors only override what they
/// care about.
#[allow(unused_variables)]
pub trait EventStreamListener: Send + Sync {
    /// Called once per parsed event block.
    fn on_event(&self, event: &Event) {}

    /// Called for every recoverable parse error, transport failure, or
    /// listener-handler failure.
    fn on_error(&self, error: &StreamError) {}

    /// Called before a reconnect attempt starts.
    ///
    /// `last_response` is the most recent terminal response, if any;
    /// `received_events` says whether the previous attempt dispatched at
    /// least one event; `last_event_id` is the current resume cursor.
    fn on_reconnect(
        &self,
        last_response: Option<&ResponseInfo>,
        received_events: bool,
        last_event_id: i64,
    ) {
    }

    /// Called once the client has permanently stopped.
    fn on_close(&self, last_response: Option<&ResponseInfo>) {}
}

/// Registered listeners with set semantics: no duplicates (by pointer
/// identity), no guaranteed order.
#[derive(Default)]
pub(crate) struct ListenerSet {
    entries: Vec<Arc<dyn EventStreamListener>>,
}

impl ListenerSet {
    pub(crate) fn add(&mut self, listener: Arc<dyn EventStreamListener>) {
        if !self.entries.iter().any(|entry| Arc::ptr_eq(entry, &listener)) {
            self.entries.push(listener);
        }
    }

    pub(crate) fn remove(&mut self, listener: &Arc<dyn EventStreamListener>) {
        self.entries.retain(|entry| !Arc::ptr_eq(entry, listener));
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn EventStreamListener>> {
        self.entries.clone()
    }
}

pub(crate) fn dispatch_event(listeners: &[Arc<dyn EventStreamListener>], event: &Event) {
    for listener in listeners {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
            report_handler_failure(listeners, panic.as_ref());
        }
    }
}

pub(crate) fn dispatch_error(listeners: &[Arc<dyn EventStreamListener>], error: &StreamError) {
    for listener in listeners {
        // A failure inside on_error itself is swallowed to avoid error loops.
        let _ = catch_unwind(AssertUnwindSafe(|| listener.on_error(error)));
    }
}

pub(crate) fn dispatch_reconnect(
    listeners: &[Arc<dyn EventStreamListener>],
    last_response: Option<&ResponseInfo>,
    received_events: bool,
    last_event_id: i64,
) {
    for listener in listeners {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| {
            listener.on_reconnect(last_response, received_events, last_event_id);
        })) {
            report_handler_failure(listeners, panic.as_ref());
        }
    }
}

pub(crate) fn dispatch_close(
    listeners: &[Arc<dyn EventStreamListener>],
    last_response: Option<&ResponseInfo>,
) {
    for listener in listeners {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener.on_close(last_response))) {
            report_handler_failure(listeners, panic.as_ref());
        }
    }
}

fn report_handler_failure(listeners: &[Arc<dyn EventStreamListener>], panic: &(dyn Any + Send)) {
    let error = StreamError::Listener(panic_message(panic));
    warn!(error = %error, "listener handler failed");
    dispatch_error(listeners, &error);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "listener panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        events: AtomicUsize,
        errors: AtomicUsize,
    }

    impl EventStreamListener for Recorder {
        fn on_event(&self, _event: &Event) {
            self.events.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _error: &StreamError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicker;

    impl EventStreamListener for Panicker {
        fn on_event(&self, _event: &Event) {
            panic!("boom");
        }

        fn on_error(&self, _error: &StreamError) {
            panic!("boom in on_error");
        }
    }

    #[test]
    fn test_panicking_listener_does_not_block_delivery() {
        let recorder = Arc::new(Recorder::default());
        let listeners: Vec<Arc<dyn EventStreamListener>> =
            vec![Arc::new(Panicker), Arc::clone(&recorder) as _];

        dispatch_event(&listeners, &Event::new("x"));

        assert_eq!(recorder.events.load(Ordering::SeqCst), 1);
        // The panic was rerouted to on_error of every listener, and the
        // Panicker's own on_error panic was swallowed.
        assert_eq!(recorder.errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_set_deduplicates() {
        let recorder: Arc<dyn EventStreamListener> = Arc::new(Recorder::default());
        let mut set = ListenerSet::default();
        set.add(Arc::clone(&recorder));
        set.add(Arc::clone(&recorder));
        assert_eq!(set.snapshot().len(), 1);

        set.remove(&recorder);
        assert!(set.snapshot().is_empty());
    }
}
