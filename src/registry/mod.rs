//! Event name registry.
//!
//! Maps human-readable event names to the numeric IDs used on the bus. An
//! event's ID is its position in the loaded event list, so the list must be
//! the same one the nodes were programmed with.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = EventRegistry::new();
//! registry.load_path("network.aesl")?;
//!
//! let id = registry.resolve("timer0")?;
//! assert_eq!(registry.name_of(id), Some("timer0"));
//! ```

mod loader;

pub use loader::{AeslLoader, EventListFormat, EventListLoader, JsonLoader};

use crate::error::{AsebaError, Result};
use crate::types::{EventDescriptor, EventId, EventRef};
use std::collections::HashMap;
use std::path::Path;

/// Largest number of events addressable with 16-bit IDs.
pub const MAX_EVENTS: usize = u16::MAX as usize + 1;

/// Static name to ID table.
#[derive(Clone, Debug, Default)]
pub struct EventRegistry {
    /// Names in load order; index is the event ID.
    names: Vec<String>,
    /// Name to ID mapping.
    by_name: HashMap<String, EventId>,
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from names in load order.
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        registry.replace(names.into_iter().map(Into::into).collect())?;
        Ok(registry)
    }

    /// Load an event list file, replacing the whole registry.
    ///
    /// The format is picked from the file extension.
    pub fn load_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let names = EventListFormat::from_path(path).loader().load(path)?;
        self.replace(names)?;
        tracing::info!(path = %path.display(), events = self.len(), "loaded event list");
        Ok(())
    }

    /// Replace the registry with `names`. On error the previous contents
    /// are kept.
    pub fn replace(&mut self, names: Vec<String>) -> Result<()> {
        if names.len() > MAX_EVENTS {
            return Err(AsebaError::TooManyEvents(names.len()));
        }

        let mut by_name = HashMap::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            if by_name.insert(name.clone(), EventId(index as u16)).is_some() {
                return Err(AsebaError::DuplicateEventName(name.clone()));
            }
        }

        self.names = names;
        self.by_name = by_name;
        Ok(())
    }

    /// Look up the ID of a named event.
    pub fn resolve(&self, name: &str) -> Result<EventId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| AsebaError::UnknownEvent(name.to_string()))
    }

    /// Turn a caller-supplied event reference into its canonical ID.
    pub fn resolve_ref(&self, event: &EventRef) -> Result<EventId> {
        match event {
            EventRef::ById(id) => Ok(*id),
            EventRef::ByName(name) => self.resolve(name),
            EventRef::OutOfRange(id) => Err(AsebaError::InvalidEventId(*id)),
        }
    }

    /// Name of the event with the given ID, if it is in the list.
    pub fn name_of(&self, id: EventId) -> Option<&str> {
        self.names.get(id.0 as usize).map(String::as_str)
    }

    /// All events in ID order.
    pub fn descriptors(&self) -> impl Iterator<Item = EventDescriptor> + '_ {
        self.names.iter().enumerate().map(|(index, name)| EventDescriptor {
            name: name.clone(),
            id: EventId(index as u16),
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
