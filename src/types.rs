//! Core types shared across the client.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric identifier of an Aseba event on the bus.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u16);

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for EventId {
    fn from(id: u16) -> Self {
        EventId(id)
    }
}

/// An event named by the caller, either by name or by raw numeric ID.
///
/// Every public entry point taking an event accepts this, so `"timer0"`,
/// `String::from("timer0")`, a bare integer literal like `3` and `EventId(3)`
/// all convert into it. Names are resolved against the loaded event list
/// once, at the API boundary; IDs bypass resolution.
///
/// Wider integers that do not fit a 16-bit event ID become `OutOfRange` and
/// are rejected with `AsebaError::InvalidEventId` when resolved.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventRef {
    ByName(String),
    ById(EventId),
    OutOfRange(i64),
}

impl EventRef {
    fn from_wide(id: i64) -> Self {
        match u16::try_from(id) {
            Ok(id) => EventRef::ById(EventId(id)),
            Err(_) => EventRef::OutOfRange(id),
        }
    }
}

impl From<&str> for EventRef {
    fn from(name: &str) -> Self {
        EventRef::ByName(name.to_string())
    }
}

impl From<String> for EventRef {
    fn from(name: String) -> Self {
        EventRef::ByName(name)
    }
}

impl From<&String> for EventRef {
    fn from(name: &String) -> Self {
        EventRef::ByName(name.clone())
    }
}

impl From<EventId> for EventRef {
    fn from(id: EventId) -> Self {
        EventRef::ById(id)
    }
}

impl From<u16> for EventRef {
    fn from(id: u16) -> Self {
        EventRef::ById(EventId(id))
    }
}

impl From<i32> for EventRef {
    fn from(id: i32) -> Self {
        EventRef::from_wide(i64::from(id))
    }
}

impl From<i64> for EventRef {
    fn from(id: i64) -> Self {
        EventRef::from_wide(id)
    }
}

impl From<u32> for EventRef {
    fn from(id: u32) -> Self {
        EventRef::from_wide(i64::from(id))
    }
}

impl From<usize> for EventRef {
    fn from(id: usize) -> Self {
        EventRef::from_wide(i64::try_from(id).unwrap_or(i64::MAX))
    }
}

impl fmt::Display for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventRef::ByName(name) => write!(f, "{}", name),
            EventRef::ById(id) => write!(f, "#{}", id),
            EventRef::OutOfRange(id) => write!(f, "#{}", id),
        }
    }
}

/// A named entry of the event list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub name: String,
    pub id: EventId,
}

/// An event delivered by the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingEvent {
    pub id: EventId,
    pub name: String,
    pub values: Vec<i16>,
}

/// Value of a node variable as read from the network.
///
/// Single-word variables come back as a scalar, everything else as the full
/// array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Scalar(i16),
    Array(Vec<i16>),
}

impl VariableValue {
    /// Build from the raw words of a `GetVariable` reply.
    pub fn from_words(words: Vec<i16>) -> Self {
        if words.len() == 1 {
            VariableValue::Scalar(words[0])
        } else {
            VariableValue::Array(words)
        }
    }

    pub fn as_scalar(&self) -> Option<i16> {
        match self {
            VariableValue::Scalar(v) => Some(*v),
            VariableValue::Array(_) => None,
        }
    }

    /// The value as a word slice; a scalar is a one-element slice.
    pub fn as_words(&self) -> &[i16] {
        match self {
            VariableValue::Scalar(v) => std::slice::from_ref(v),
            VariableValue::Array(words) => words,
        }
    }
}

impl From<i16> for VariableValue {
    fn from(value: i16) -> Self {
        VariableValue::Scalar(value)
    }
}

impl From<Vec<i16>> for VariableValue {
    fn from(words: Vec<i16>) -> Self {
        VariableValue::Array(words)
    }
}

impl From<&[i16]> for VariableValue {
    fn from(words: &[i16]) -> Self {
        VariableValue::Array(words.to_vec())
    }
}

impl<const N: usize> From<[i16; N]> for VariableValue {
    fn from(words: [i16; N]) -> Self {
        VariableValue::Array(words.to_vec())
    }
}
