//! Requests against the Aseba network object.

use crate::error::{AsebaError, Result};
use crate::transport::{Proxy, TransportFault, Value};
use crate::types::{EventId, VariableValue};
use std::path::Path;

/// Client for node variables, scripts and outgoing events.
///
/// Without a network proxy every request is answered locally: reads return
/// a zero-filled array, everything else does nothing.
#[derive(Debug, Clone)]
pub struct NetworkClient {
    network: Option<Proxy>,
    offline_read_len: usize,
}

impl NetworkClient {
    pub fn new(network: Proxy) -> Self {
        Self {
            network: Some(network),
            offline_read_len: 0,
        }
    }

    pub fn offline(read_len: usize) -> Self {
        Self {
            network: None,
            offline_read_len: read_len,
        }
    }

    /// Names of the nodes present on the network.
    pub fn get_nodes_list(&self) -> Result<Vec<String>> {
        let Some(network) = &self.network else {
            return Ok(Vec::new());
        };

        let reply = network
            .call("GetNodesList", vec![])
            .map_err(|fault| AsebaError::call("GetNodesList", fault))?;
        match reply.first().and_then(Value::as_str_array) {
            Some(names) => Ok(names.to_vec()),
            None => Err(unexpected("GetNodesList", "a string array", reply.first())),
        }
    }

    /// Read a variable. Single-word variables come back as a scalar.
    pub fn get(&self, node: &str, var: &str) -> Result<VariableValue> {
        let Some(network) = &self.network else {
            return Ok(VariableValue::Array(vec![0; self.offline_read_len]));
        };

        let reply = network
            .call(
                "GetVariable",
                vec![Value::Str(node.to_string()), Value::Str(var.to_string())],
            )
            .map_err(|fault| AsebaError::call("GetVariable", fault))?;
        match reply.first().and_then(Value::as_words) {
            Some(words) => Ok(VariableValue::from_words(words.to_vec())),
            None => Err(unexpected("GetVariable", "an int16 array", reply.first())),
        }
    }

    /// Write a variable and wait for the service to accept it.
    pub fn set(&self, node: &str, var: &str, value: VariableValue) -> Result<()> {
        let Some(network) = &self.network else {
            return Ok(());
        };

        network
            .call(
                "SetVariable",
                vec![
                    Value::Str(node.to_string()),
                    Value::Str(var.to_string()),
                    Value::Int16Array(value.as_words().to_vec()),
                ],
            )
            .map_err(|fault| AsebaError::call("SetVariable", fault))?;
        Ok(())
    }

    /// Load an Aseba script file onto the network.
    pub fn load_scripts(&self, path: &Path) -> Result<()> {
        let Some(network) = &self.network else {
            return Ok(());
        };

        network
            .call("LoadScripts", vec![Value::Str(path.display().to_string())])
            .map_err(|fault| AsebaError::call("LoadScripts", fault))?;
        Ok(())
    }

    /// Send an event without waiting for the reply. `on_failure` runs if
    /// the service rejects it.
    pub fn send_event<F>(&self, id: EventId, args: &[i16], on_failure: F)
    where
        F: FnOnce(TransportFault) + Send + 'static,
    {
        let Some(network) = &self.network else {
            return;
        };

        network.call_async(
            "SendEvent",
            vec![Value::UInt16(id.0), Value::Int16Array(args.to_vec())],
            Box::new(move |_| tracing::trace!(event_id = %id, "event sent")),
            Box::new(on_failure),
        );
    }
}

fn unexpected(method: &str, expected: &str, got: Option<&Value>) -> AsebaError {
    AsebaError::UnexpectedReply {
        method: method.to_string(),
        detail: format!(
            "expected {}, got {}",
            expected,
            got.map_or("nothing", Value::kind)
        ),
    }
}
