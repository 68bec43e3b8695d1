//! Message bus transport.
//!
//! The client never talks to a bus library directly. Everything goes through
//! the [`Transport`] trait, which covers the handful of capabilities the
//! client needs: proxies by path and interface, sync and async method calls,
//! signal subscriptions and introspection of child objects.
//!
//! [`InMemoryBus`] implements the trait together with a simulated Aseba
//! network service, for tests and for exercising call sites without a
//! running service.

mod memory;

pub use memory::{BusOp, InMemoryBus};

use crate::config::BusScope;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Well-known bus name of the Aseba network service.
pub const ASEBA_SERVICE: &str = "ch.epfl.mobots.Aseba";

/// Object path of the network object.
pub const NETWORK_PATH: &str = "/";

/// Interface of the network object.
pub const NETWORK_INTERFACE: &str = "ch.epfl.mobots.AsebaNetwork";

/// Interface of event filter objects.
pub const EVENT_FILTER_INTERFACE: &str = "ch.epfl.mobots.EventFilter";

/// Container path under which the service publishes event filters.
pub const EVENT_FILTERS_PATH: &str = "/events_filters";

/// Signal emitted by a filter for each matching event.
pub const EVENT_SIGNAL: &str = "Event";

/// Error name for a path with no object behind it.
pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";

/// Error name for a bus name with no owner.
pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";

/// Error name for a method the object does not implement.
pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";

/// Error name for malformed call arguments.
pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";

/// A fault reported by the bus: an error name and a human-readable message.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct TransportFault {
    pub name: String,
    pub message: String,
}

impl TransportFault {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn unknown_object(path: &str) -> Self {
        Self::new(UNKNOWN_OBJECT, format!("No such object path '{}'", path))
    }

    pub fn is_unknown_object(&self) -> bool {
        self.name == UNKNOWN_OBJECT
    }
}

/// Typed bus value used for method arguments, replies and signal bodies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    UInt16(u16),
    Str(String),
    ObjectPath(String),
    Int16Array(Vec<i16>),
    StrArray(Vec<String>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Value::UInt16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_words(&self) -> Option<&[i16]> {
        match self {
            Value::Int16Array(words) => Some(words),
            _ => None,
        }
    }

    pub fn as_str_array(&self) -> Option<&[String]> {
        match self {
            Value::StrArray(items) => Some(items),
            _ => None,
        }
    }

    /// Short type name, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::UInt16(_) => "uint16",
            Value::Str(_) => "string",
            Value::ObjectPath(_) => "object path",
            Value::Int16Array(_) => "int16 array",
            Value::StrArray(_) => "string array",
        }
    }
}

/// Continuation for a successful async call.
pub type ReplyCallback = Box<dyn FnOnce(Vec<Value>) + Send>;

/// Continuation for a failed async call.
pub type ErrorCallback = Box<dyn FnOnce(TransportFault) + Send>;

/// Handler invoked with the body of each received signal.
pub type SignalHandler = Box<dyn Fn(Vec<Value>) + Send + Sync>;

/// Identifies a signal subscription so it can be removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SignalToken(pub u64);

/// Capabilities of a connected message bus.
pub trait Transport: Send + Sync {
    /// Obtain a proxy for the object at `path`. Fails if the service is
    /// not reachable.
    fn get_object(&self, path: &str, interface: &str) -> Result<(), TransportFault>;

    /// Call a method and block until the reply arrives.
    fn call(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, TransportFault>;

    /// Call a method without waiting. Exactly one of the continuations runs
    /// once the outcome is known.
    fn call_async(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        args: Vec<Value>,
        on_reply: ReplyCallback,
        on_error: ErrorCallback,
    );

    /// Subscribe to a signal emitted by the object at `path`.
    fn connect_signal(
        &self,
        path: &str,
        interface: &str,
        signal: &str,
        handler: SignalHandler,
    ) -> Result<SignalToken, TransportFault>;

    /// Drop a signal subscription.
    fn remove_signal(&self, token: SignalToken) -> Result<(), TransportFault>;

    /// Names of the child objects directly below `path`.
    fn introspect(&self, path: &str) -> Result<Vec<String>, TransportFault>;

    /// Release the bus connection.
    fn disconnect(&self);
}

/// Opens bus connections.
pub trait Connector {
    fn connect(&self, scope: BusScope) -> Result<Arc<dyn Transport>, TransportFault>;
}

/// A remote object bound to a path and interface.
#[derive(Clone)]
pub struct Proxy {
    transport: Arc<dyn Transport>,
    path: String,
    interface: &'static str,
}

impl Proxy {
    /// Bind a proxy, checking that the object can be reached.
    pub fn open(
        transport: Arc<dyn Transport>,
        path: impl Into<String>,
        interface: &'static str,
    ) -> Result<Self, TransportFault> {
        let path = path.into();
        transport.get_object(&path, interface)?;
        Ok(Self {
            transport,
            path,
            interface,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<Vec<Value>, TransportFault> {
        tracing::debug!(path = %self.path, method, "bus call");
        self.transport.call(&self.path, self.interface, method, args)
    }

    pub fn call_async(
        &self,
        method: &str,
        args: Vec<Value>,
        on_reply: ReplyCallback,
        on_error: ErrorCallback,
    ) {
        tracing::debug!(path = %self.path, method, "async bus call");
        self.transport
            .call_async(&self.path, self.interface, method, args, on_reply, on_error)
    }

    pub fn connect_signal(
        &self,
        signal: &str,
        handler: SignalHandler,
    ) -> Result<SignalToken, TransportFault> {
        self.transport
            .connect_signal(&self.path, self.interface, signal, handler)
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("path", &self.path)
            .field("interface", &self.interface)
            .finish()
    }
}
