//! Event filter lifecycle.
//!
//! The network service only forwards events to a client through a filter
//! object created on its behalf. One filter serves the whole session; the
//! client tells it which event IDs to forward and frees it on shutdown. A
//! client that dies without freeing its filter leaves it behind under
//! [`EVENT_FILTERS_PATH`], where [`EventFilterManager::reclaim_orphans`]
//! finds it.

use crate::error::{AsebaError, Result};
use crate::transport::{Proxy, Value, EVENT_FILTERS_PATH, EVENT_FILTER_INTERFACE};
use crate::types::EventId;
use std::collections::BTreeSet;

/// Owns the session's event filter.
#[derive(Debug)]
pub struct EventFilterManager {
    /// Network object, used to create filters.
    network: Proxy,
    /// The session filter, once created.
    filter: Option<Proxy>,
    /// Event IDs the filter has been asked to forward.
    listening: BTreeSet<EventId>,
}

impl EventFilterManager {
    pub fn new(network: Proxy) -> Self {
        Self {
            network,
            filter: None,
            listening: BTreeSet::new(),
        }
    }

    /// Free every filter published by the service except our own.
    ///
    /// Returns the number of filters freed. A missing container means no
    /// filter was ever created, which is not an error.
    pub fn reclaim_orphans(&self) -> Result<usize> {
        let children = match self.network.transport().introspect(EVENT_FILTERS_PATH) {
            Ok(children) => children,
            Err(fault) if fault.is_unknown_object() => {
                tracing::debug!("no event filter container, nothing to reclaim");
                return Ok(0);
            }
            Err(fault) => return Err(AsebaError::call("Introspect", fault)),
        };

        let mut freed = 0;
        for child in children {
            let path = format!("{}/{}", EVENT_FILTERS_PATH, child);
            if self.filter_path() == Some(path.as_str()) {
                continue;
            }

            let orphan = Proxy::open(
                self.network.transport().clone(),
                path.clone(),
                EVENT_FILTER_INTERFACE,
            )
            .map_err(|fault| AsebaError::call("Free", fault))?;
            match orphan.call("Free", vec![]) {
                Ok(_) => {
                    tracing::warn!(path = %path, "freed orphaned event filter");
                    freed += 1;
                }
                // Another client may have freed it between listing and now.
                Err(fault) if fault.is_unknown_object() => {
                    tracing::debug!(path = %path, "orphaned filter already gone");
                }
                Err(fault) => return Err(AsebaError::call("Free", fault)),
            }
        }
        Ok(freed)
    }

    /// Return the session filter, creating it on first use.
    pub fn ensure_filter(&mut self) -> Result<&Proxy> {
        if self.filter.is_none() {
            let reply = self
                .network
                .call("CreateEventFilter", vec![])
                .map_err(|fault| AsebaError::call("CreateEventFilter", fault))?;
            let path = match reply.first() {
                Some(Value::ObjectPath(path)) | Some(Value::Str(path)) => path.clone(),
                other => {
                    return Err(AsebaError::UnexpectedReply {
                        method: "CreateEventFilter".to_string(),
                        detail: format!(
                            "expected an object path, got {}",
                            other.map_or("nothing", Value::kind)
                        ),
                    })
                }
            };

            let filter = Proxy::open(self.network.transport().clone(), path, EVENT_FILTER_INTERFACE)
                .map_err(|fault| AsebaError::call("CreateEventFilter", fault))?;
            tracing::info!(path = %filter.path(), "created event filter");
            self.filter = Some(filter);
        }

        self.filter.as_ref().ok_or(AsebaError::SessionClosed)
    }

    /// Ask the filter to forward events with this ID.
    pub fn listen(&mut self, id: EventId) -> Result<()> {
        if self.listening.contains(&id) {
            return Ok(());
        }

        self.ensure_filter()?
            .call("ListenEvent", vec![Value::UInt16(id.0)])
            .map_err(|fault| AsebaError::call("ListenEvent", fault))?;
        self.listening.insert(id);
        tracing::debug!(event_id = %id, "listening for event");
        Ok(())
    }

    /// Free the session filter. Does nothing if none was created.
    pub fn release(&mut self) -> Result<()> {
        self.listening.clear();
        let Some(filter) = self.filter.take() else {
            return Ok(());
        };

        filter
            .call("Free", vec![])
            .map_err(|fault| AsebaError::call("Free", fault))?;
        tracing::info!(path = %filter.path(), "freed event filter");
        Ok(())
    }

    pub fn filter(&self) -> Option<&Proxy> {
        self.filter.as_ref()
    }

    pub fn filter_path(&self) -> Option<&str> {
        self.filter.as_ref().map(Proxy::path)
    }

    pub fn is_listening(&self, id: EventId) -> bool {
        self.listening.contains(&id)
    }
}
