//! Per-event subscription state.

use crate::types::EventId;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Callback invoked with the values carried by an event.
pub type EventCallback = Box<dyn FnMut(&[i16]) + Send>;

/// Inter-arrival samples for one event and the last estimate made from them.
///
/// Windows do not overlap: once `size` samples are collected the estimate
/// is recomputed and the samples are discarded.
#[derive(Clone, Debug)]
pub struct FrequencyWindow {
    size: usize,
    last_arrival: Instant,
    samples: Vec<Duration>,
    /// Events per second; 0 until the first window completes.
    estimate: f64,
}

impl FrequencyWindow {
    pub fn new(size: usize, now: Instant) -> Self {
        Self {
            size,
            last_arrival: now,
            samples: Vec::with_capacity(size),
            estimate: 0.0,
        }
    }

    /// Record an arrival. Returns the new estimate when this arrival
    /// completes a window.
    ///
    /// A `now` earlier than the previous arrival counts as a zero delta and
    /// does not move the window's clock back.
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        self.samples
            .push(now.saturating_duration_since(self.last_arrival));
        self.last_arrival = self.last_arrival.max(now);

        if self.samples.len() < self.size {
            return None;
        }

        let total: Duration = self.samples.drain(..).sum();
        if total.is_zero() {
            // All arrivals at the same instant; there is no rate to report.
            tracing::debug!("frequency window with zero total duration skipped");
            return None;
        }
        self.estimate = self.size as f64 / total.as_secs_f64();
        Some(self.estimate)
    }

    pub fn estimate(&self) -> f64 {
        self.estimate
    }

    pub fn pending_samples(&self) -> usize {
        self.samples.len()
    }
}

struct Subscription {
    callback: EventCallback,
    window: FrequencyWindow,
}

/// Subscriptions keyed by event ID.
pub struct SubscriptionTable {
    entries: HashMap<EventId, Subscription>,
    window_size: usize,
}

impl SubscriptionTable {
    pub fn new(window_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            window_size,
        }
    }

    /// Insert or replace the subscription for `id`, starting a fresh
    /// frequency window at `now`. Returns true if an older callback was
    /// replaced.
    pub fn subscribe(&mut self, id: EventId, callback: EventCallback, now: Instant) -> bool {
        let subscription = Subscription {
            callback,
            window: FrequencyWindow::new(self.window_size, now),
        };
        self.entries.insert(id, subscription).is_some()
    }

    /// The callback for `id`, if subscribed.
    pub(crate) fn callback_mut(&mut self, id: EventId) -> Option<&mut EventCallback> {
        self.entries.get_mut(&id).map(|sub| &mut sub.callback)
    }

    /// Record an arrival for `id`. Returns the new estimate when a window
    /// completes.
    pub(crate) fn record_arrival(&mut self, id: EventId, now: Instant) -> Option<f64> {
        self.entries.get_mut(&id)?.window.record(now)
    }

    /// Last computed frequency for `id`, 0 if not subscribed.
    pub fn frequency_of(&self, id: EventId) -> f64 {
        self.entries
            .get(&id)
            .map_or(0.0, |sub| sub.window.estimate())
    }

    /// Frequencies of all subscribed events.
    pub fn frequencies(&self) -> BTreeMap<EventId, f64> {
        self.entries
            .iter()
            .map(|(id, sub)| (*id, sub.window.estimate()))
            .collect()
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
