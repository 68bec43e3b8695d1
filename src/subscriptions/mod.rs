//! Event subscriptions and dispatch.
//!
//! Each subscribed event ID has exactly one callback and a frequency
//! window. The [`Dispatcher`] is the only thing that touches them once
//! events start arriving:
//! - Events for IDs with no subscription are dropped silently
//! - The callback runs first, then the arrival is recorded
//! - Every N arrivals the frequency estimate is recomputed from those N
//!   inter-arrival times and the window starts over
//!
//! # Example
//!
//! ```ignore
//! let mut dispatcher = Dispatcher::new(10, CallbackPolicy::Isolate);
//! dispatcher.subscribe(EventId(0), Box::new(|values| println!("{:?}", values)), Instant::now());
//!
//! dispatcher.dispatch(&event, Instant::now())?;
//! println!("{} Hz", dispatcher.frequency_of(EventId(0)));
//! ```

mod dispatcher;
mod table;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use table::{EventCallback, FrequencyWindow, SubscriptionTable};
