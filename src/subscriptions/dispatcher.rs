//! Routes incoming events to their subscriptions.

use super::table::{EventCallback, SubscriptionTable};
use crate::config::CallbackPolicy;
use crate::error::{AsebaError, Result};
use crate::types::{EventId, IncomingEvent};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

/// What happened to a dispatched event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DispatchOutcome {
    /// No subscription for the event ID.
    Dropped,
    /// The callback ran. Carries the new frequency if a window completed.
    Delivered { frequency: Option<f64> },
}

/// Owns the subscription table and feeds it incoming events.
pub struct Dispatcher {
    table: SubscriptionTable,
    policy: CallbackPolicy,
}

impl Dispatcher {
    pub fn new(window_size: usize, policy: CallbackPolicy) -> Self {
        Self {
            table: SubscriptionTable::new(window_size),
            policy,
        }
    }

    /// Register `callback` for `id`, replacing any earlier one.
    pub fn subscribe(&mut self, id: EventId, callback: EventCallback, now: Instant) {
        if self.table.subscribe(id, callback, now) {
            tracing::debug!(event_id = %id, "replaced event callback");
        }
    }

    /// Deliver one event.
    ///
    /// Under [`CallbackPolicy::Abort`] a panicking callback yields
    /// [`AsebaError::CallbackPanicked`] and the arrival is not recorded.
    pub fn dispatch(&mut self, event: &IncomingEvent, now: Instant) -> Result<DispatchOutcome> {
        let Some(callback) = self.table.callback_mut(event.id) else {
            tracing::trace!(event_id = %event.id, name = %event.name, "dropped unsubscribed event");
            return Ok(DispatchOutcome::Dropped);
        };

        let values = event.values.as_slice();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(values))) {
            let message = panic_message(payload.as_ref());
            match self.policy {
                CallbackPolicy::Isolate => {
                    tracing::warn!(event_id = %event.id, %message, "event callback panicked");
                }
                CallbackPolicy::Abort => {
                    return Err(AsebaError::CallbackPanicked {
                        event_id: event.id,
                        message,
                    });
                }
            }
        }

        let frequency = self.table.record_arrival(event.id, now);
        if let Some(hz) = frequency {
            tracing::debug!(event_id = %event.id, frequency = hz, "event frequency updated");
        }
        Ok(DispatchOutcome::Delivered { frequency })
    }

    pub fn frequency_of(&self, id: EventId) -> f64 {
        self.table.frequency_of(id)
    }

    pub fn frequencies(&self) -> BTreeMap<EventId, f64> {
        self.table.frequencies()
    }

    pub fn is_subscribed(&self, id: EventId) -> bool {
        self.table.contains(id)
    }

    pub fn subscription_count(&self) -> usize {
        self.table.len()
    }

    /// Drop every subscription.
    pub fn clear(&mut self) {
        self.table.clear();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn event(id: u16, values: &[i16]) -> IncomingEvent {
        IncomingEvent {
            id: EventId(id),
            name: format!("event{}", id),
            values: values.to_vec(),
        }
    }

    fn recording() -> (Arc<Mutex<Vec<Vec<i16>>>>, EventCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, Box::new(move |values| sink.lock().push(values.to_vec())))
    }

    #[test]
    fn test_dispatch_to_subscriber() {
        let mut dispatcher = Dispatcher::new(10, CallbackPolicy::Isolate);
        let (seen, callback) = recording();
        dispatcher.subscribe(EventId(2), callback, Instant::now());

        let outcome = dispatcher.dispatch(&event(2, &[7, -3]), Instant::now()).unwrap();

        assert_eq!(outcome, DispatchOutcome::Delivered { frequency: None });
        assert_eq!(*seen.lock(), vec![vec![7, -3]]);
    }

    #[test]
    fn test_unsubscribed_event_is_noop() {
        let mut dispatcher = Dispatcher::new(10, CallbackPolicy::Isolate);
        let (seen, callback) = recording();
        let start = Instant::now();
        dispatcher.subscribe(EventId(1), callback, start);

        let outcome = dispatcher.dispatch(&event(9, &[1]), start).unwrap();

        assert_eq!(outcome, DispatchOutcome::Dropped);
        assert!(seen.lock().is_empty());
        assert!(!dispatcher.is_subscribed(EventId(9)));
        assert_eq!(dispatcher.subscription_count(), 1);
        assert_eq!(dispatcher.frequency_of(EventId(9)), 0.0);
    }

    #[test]
    fn test_last_subscriber_wins() {
        let mut dispatcher = Dispatcher::new(10, CallbackPolicy::Isolate);
        let (first, first_cb) = recording();
        let (second, second_cb) = recording();
        dispatcher.subscribe(EventId(0), first_cb, Instant::now());
        dispatcher.subscribe(EventId(0), second_cb, Instant::now());

        dispatcher.dispatch(&event(0, &[1]), Instant::now()).unwrap();

        assert!(first.lock().is_empty());
        assert_eq!(second.lock().len(), 1);
    }

    #[test]
    fn test_window_completes_through_dispatch() {
        let start = Instant::now();
        let mut dispatcher = Dispatcher::new(4, CallbackPolicy::Isolate);
        dispatcher.subscribe(EventId(0), Box::new(|_| {}), start);

        let mut outcome = DispatchOutcome::Dropped;
        for i in 1..=4 {
            outcome = dispatcher
                .dispatch(&event(0, &[]), start + Duration::from_millis(250 * i))
                .unwrap();
        }

        assert_eq!(outcome, DispatchOutcome::Delivered { frequency: Some(4.0) });
        assert_eq!(dispatcher.frequencies().get(&EventId(0)), Some(&4.0));
    }

    #[test]
    fn test_isolated_panic_still_counts_arrival() {
        let start = Instant::now();
        let mut dispatcher = Dispatcher::new(1, CallbackPolicy::Isolate);
        dispatcher.subscribe(EventId(0), Box::new(|_| panic!("bad callback")), start);

        let outcome = dispatcher
            .dispatch(&event(0, &[]), start + Duration::from_millis(500))
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Delivered { frequency: Some(2.0) });
    }

    #[test]
    fn test_abort_policy_reports_panic() {
        let mut dispatcher = Dispatcher::new(1, CallbackPolicy::Abort);
        dispatcher.subscribe(EventId(3), Box::new(|_| panic!("bad callback")), Instant::now());

        let result = dispatcher.dispatch(&event(3, &[]), Instant::now());

        match result {
            Err(AsebaError::CallbackPanicked { event_id, message }) => {
                assert_eq!(event_id, EventId(3));
                assert_eq!(message, "bad callback");
            }
            other => panic!("Expected CallbackPanicked, got {:?}", other),
        }
        assert_eq!(dispatcher.frequency_of(EventId(3)), 0.0);
    }
}
