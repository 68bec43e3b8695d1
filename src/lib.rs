//! # Aseba Bus Client
//!
//! Client for the Aseba network service exposed on a message bus: subscribe
//! to events broadcast by robot nodes, track how often they arrive, send
//! events, and read or write node variables.
//!
//! ## Core Concepts
//!
//! - **Session**: one bus connection owning one event filter and one event loop
//! - **Event registry**: event names to numeric IDs, loaded from an event list
//! - **Event filter**: service-side object forwarding the event IDs we listen to
//! - **Dispatcher**: routes incoming events to callbacks and estimates their frequency
//!
//! ## Example
//!
//! ```ignore
//! use aseba_bus::{InMemoryBus, Session, SessionConfig};
//!
//! let bus = InMemoryBus::new();
//! let mut session = Session::connect(&bus, SessionConfig::default())?;
//! session.load_events_list("network.aesl")?;
//!
//! // Subscribe by name
//! session.on_event("timer0", |values| println!("timer0: {:?}", values))?;
//!
//! // Fire and forget
//! session.send_event("button", &[1, 2])?;
//!
//! session.set("thymio-II", "event.source", [1i16])?;
//! let temperature = session.get("thymio-II", "temperature")?;
//!
//! // Blocks until stopped through a LoopHandle or a fatal fault
//! session.run()?;
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod network;
pub mod registry;
pub mod session;
pub mod subscriptions;
pub mod transport;
pub mod types;

// Re-exports
pub use config::{BusScope, CallbackPolicy, SessionConfig};
pub use error::{AsebaError, Result};
pub use filter::EventFilterManager;
pub use network::NetworkClient;
pub use registry::{AeslLoader, EventListFormat, EventListLoader, EventRegistry, JsonLoader};
pub use session::{LoopHandle, Session};
pub use subscriptions::{DispatchOutcome, Dispatcher, EventCallback, FrequencyWindow};
pub use transport::{
    BusOp, Connector, InMemoryBus, Proxy, SignalToken, Transport, TransportFault, Value,
};
pub use types::*;
