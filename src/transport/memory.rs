//! In-process bus hosting a simulated Aseba network service.

use super::{
    Connector, ErrorCallback, ReplyCallback, SignalHandler, SignalToken, Transport,
    TransportFault, Value, ASEBA_SERVICE, EVENT_FILTERS_PATH, EVENT_FILTER_INTERFACE,
    EVENT_SIGNAL, INVALID_ARGS, NETWORK_INTERFACE, NETWORK_PATH, SERVICE_UNKNOWN,
    UNKNOWN_METHOD,
};
use crate::config::BusScope;
use crate::types::EventId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// One operation observed by the bus, in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusOp {
    Connect(BusScope),
    GetObject { path: String },
    Call { path: String, method: String },
    CallAsync { path: String, method: String },
    ConnectSignal { path: String, signal: String },
    RemoveSignal(SignalToken),
    Introspect { path: String },
    Disconnect,
}

struct Node {
    name: String,
    variables: HashMap<String, Vec<i16>>,
}

struct SignalSubscription {
    path: String,
    interface: String,
    signal: String,
    handler: Arc<SignalHandler>,
}

struct PendingReply {
    outcome: Result<Vec<Value>, TransportFault>,
    on_reply: ReplyCallback,
    on_error: ErrorCallback,
}

#[derive(Default)]
struct BusState {
    service_available: bool,
    connected: bool,
    connect_fault: Option<TransportFault>,
    nodes: Vec<Node>,
    /// Live filters by number, with the event IDs each one listens to.
    filters: BTreeMap<u32, BTreeSet<EventId>>,
    next_filter: u32,
    /// The filter container only exists once a filter has been created.
    filters_published: bool,
    signals: HashMap<SignalToken, SignalSubscription>,
    next_token: u64,
    loaded_scripts: Vec<String>,
    sent_events: Vec<(EventId, Vec<i16>)>,
    faults: HashMap<String, TransportFault>,
    hold_replies: bool,
    pending: VecDeque<PendingReply>,
    journal: Vec<BusOp>,
}

impl BusState {
    fn filter_number(path: &str) -> Option<u32> {
        path.strip_prefix(EVENT_FILTERS_PATH)?
            .strip_prefix('/')?
            .parse()
            .ok()
    }

    fn create_filter(&mut self) -> String {
        let number = self.next_filter;
        self.next_filter += 1;
        self.filters.insert(number, BTreeSet::new());
        self.filters_published = true;
        format!("{}/{}", EVENT_FILTERS_PATH, number)
    }

    fn node_mut(&mut self, name: &str) -> Result<&mut Node, TransportFault> {
        self.nodes
            .iter_mut()
            .find(|node| node.name == name)
            .ok_or_else(|| TransportFault::new(INVALID_ARGS, format!("node {} does not exist", name)))
    }

    /// Run a method against the simulated service.
    fn invoke(
        &mut self,
        path: &str,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, TransportFault> {
        if !self.service_available {
            return Err(TransportFault::new(
                SERVICE_UNKNOWN,
                format!("The name {} was not provided by any service files", ASEBA_SERVICE),
            ));
        }
        if let Some(fault) = self.faults.get(method) {
            return Err(fault.clone());
        }

        match (interface, method) {
            (NETWORK_INTERFACE, _) if path != NETWORK_PATH => {
                Err(TransportFault::unknown_object(path))
            }
            (NETWORK_INTERFACE, "GetNodesList") => Ok(vec![Value::StrArray(
                self.nodes.iter().map(|node| node.name.clone()).collect(),
            )]),
            (NETWORK_INTERFACE, "GetVariable") => {
                let (node, var) = string_pair(&args)?;
                let node = self.node_mut(&node)?;
                let words = node.variables.get(&var).cloned().ok_or_else(|| {
                    TransportFault::new(
                        INVALID_ARGS,
                        format!("variable {} does not exist in node {}", var, node.name),
                    )
                })?;
                Ok(vec![Value::Int16Array(words)])
            }
            (NETWORK_INTERFACE, "SetVariable") => {
                let (node, var) = string_pair(&args)?;
                let words = args
                    .get(2)
                    .and_then(Value::as_words)
                    .ok_or_else(|| TransportFault::new(INVALID_ARGS, "expected int16 array"))?
                    .to_vec();
                self.node_mut(&node)?.variables.insert(var, words);
                Ok(vec![])
            }
            (NETWORK_INTERFACE, "CreateEventFilter") => {
                Ok(vec![Value::ObjectPath(self.create_filter())])
            }
            (NETWORK_INTERFACE, "SendEvent") => {
                let id = args
                    .first()
                    .and_then(Value::as_u16)
                    .ok_or_else(|| TransportFault::new(INVALID_ARGS, "expected event id"))?;
                let words = args
                    .get(1)
                    .and_then(Value::as_words)
                    .ok_or_else(|| TransportFault::new(INVALID_ARGS, "expected int16 array"))?;
                self.sent_events.push((EventId(id), words.to_vec()));
                Ok(vec![])
            }
            (NETWORK_INTERFACE, "LoadScripts") => {
                let file = args
                    .first()
                    .and_then(Value::as_str)
                    .ok_or_else(|| TransportFault::new(INVALID_ARGS, "expected file name"))?;
                self.loaded_scripts.push(file.to_string());
                Ok(vec![])
            }
            (EVENT_FILTER_INTERFACE, _) => {
                let number = Self::filter_number(path)
                    .filter(|number| self.filters.contains_key(number))
                    .ok_or_else(|| TransportFault::unknown_object(path))?;
                match method {
                    "ListenEvent" => {
                        let id = args
                            .first()
                            .and_then(Value::as_u16)
                            .ok_or_else(|| TransportFault::new(INVALID_ARGS, "expected event id"))?;
                        if let Some(listening) = self.filters.get_mut(&number) {
                            listening.insert(EventId(id));
                        }
                        Ok(vec![])
                    }
                    "Free" => {
                        self.filters.remove(&number);
                        Ok(vec![])
                    }
                    _ => Err(unknown_method(interface, method)),
                }
            }
            _ => Err(unknown_method(interface, method)),
        }
    }
}

fn unknown_method(interface: &str, method: &str) -> TransportFault {
    TransportFault::new(
        UNKNOWN_METHOD,
        format!("No such method '{}' in interface '{}'", method, interface),
    )
}

fn string_pair(args: &[Value]) -> Result<(String, String), TransportFault> {
    match (args.first().and_then(Value::as_str), args.get(1).and_then(Value::as_str)) {
        (Some(node), Some(var)) => Ok((node.to_string(), var.to_string())),
        _ => Err(TransportFault::new(INVALID_ARGS, "expected node and variable names")),
    }
}

/// A bus with an Aseba network service living in the same process.
///
/// Clones share the same bus. Every connection obtained through
/// [`Connector::connect`] sees the same nodes, filters and journal.
#[derive(Clone)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryBus {
    /// Create a bus with the network service running and no nodes.
    pub fn new() -> Self {
        let state = BusState {
            service_available: true,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Add a node with the given variables.
    pub fn with_node(self, name: &str, variables: &[(&str, &[i16])]) -> Self {
        self.state.lock().nodes.push(Node {
            name: name.to_string(),
            variables: variables
                .iter()
                .map(|(var, words)| (var.to_string(), words.to_vec()))
                .collect(),
        });
        self
    }

    /// Make the network service appear or disappear from the bus.
    pub fn set_service_available(&self, available: bool) {
        self.state.lock().service_available = available;
    }

    /// Make the next connection attempts fail.
    pub fn fail_connect(&self, fault: TransportFault) {
        self.state.lock().connect_fault = Some(fault);
    }

    /// Make every call to `method` fail with `fault`.
    pub fn fail_method(&self, method: &str, fault: TransportFault) {
        self.state.lock().faults.insert(method.to_string(), fault);
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.lock();
        state.faults.clear();
        state.connect_fault = None;
    }

    /// Queue async replies instead of delivering them immediately.
    pub fn hold_async_replies(&self, hold: bool) {
        self.state.lock().hold_replies = hold;
    }

    /// Deliver queued async replies. Returns how many were delivered.
    pub fn deliver_pending_replies(&self) -> usize {
        let pending: Vec<PendingReply> = self.state.lock().pending.drain(..).collect();
        let count = pending.len();
        for reply in pending {
            match reply.outcome {
                Ok(values) => (reply.on_reply)(values),
                Err(fault) => (reply.on_error)(fault),
            }
        }
        count
    }

    /// Create a filter outside of any client session, as a crashed client
    /// would have left behind.
    pub fn spawn_filter(&self) -> String {
        self.state.lock().create_filter()
    }

    /// Broadcast an event from a node. Returns the number of signal
    /// handlers that received it.
    pub fn emit_event(&self, id: EventId, name: &str, values: &[i16]) -> usize {
        let handlers: Vec<Arc<SignalHandler>> = {
            let state = self.state.lock();
            let paths: Vec<String> = state
                .filters
                .iter()
                .filter(|(_, listening)| listening.contains(&id))
                .map(|(number, _)| format!("{}/{}", EVENT_FILTERS_PATH, number))
                .collect();
            state
                .signals
                .values()
                .filter(|sub| {
                    sub.interface == EVENT_FILTER_INTERFACE
                        && sub.signal == EVENT_SIGNAL
                        && paths.contains(&sub.path)
                })
                .map(|sub| Arc::clone(&sub.handler))
                .collect()
        };

        for handler in &handlers {
            handler(vec![
                Value::UInt16(id.0),
                Value::Str(name.to_string()),
                Value::Int16Array(values.to_vec()),
            ]);
        }
        handlers.len()
    }

    pub fn variable(&self, node: &str, var: &str) -> Option<Vec<i16>> {
        let state = self.state.lock();
        state
            .nodes
            .iter()
            .find(|n| n.name == node)
            .and_then(|n| n.variables.get(var).cloned())
    }

    /// Paths of the live filters.
    pub fn filter_paths(&self) -> Vec<String> {
        self.state
            .lock()
            .filters
            .keys()
            .map(|number| format!("{}/{}", EVENT_FILTERS_PATH, number))
            .collect()
    }

    /// Event IDs a filter listens to, or `None` if it does not exist.
    pub fn listened_events(&self, path: &str) -> Option<Vec<EventId>> {
        let state = self.state.lock();
        let number = BusState::filter_number(path)?;
        state
            .filters
            .get(&number)
            .map(|listening| listening.iter().copied().collect())
    }

    pub fn sent_events(&self) -> Vec<(EventId, Vec<i16>)> {
        self.state.lock().sent_events.clone()
    }

    pub fn loaded_scripts(&self) -> Vec<String> {
        self.state.lock().loaded_scripts.clone()
    }

    pub fn signal_count(&self) -> usize {
        self.state.lock().signals.len()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Operations seen so far, in order.
    pub fn journal(&self) -> Vec<BusOp> {
        self.state.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for InMemoryBus {
    fn connect(&self, scope: BusScope) -> Result<Arc<dyn Transport>, TransportFault> {
        let mut state = self.state.lock();
        if let Some(fault) = state.connect_fault.clone() {
            return Err(fault);
        }
        state.connected = true;
        state.journal.push(BusOp::Connect(scope));
        drop(state);
        Ok(Arc::new(self.clone()))
    }
}

impl Transport for InMemoryBus {
    fn get_object(&self, path: &str, _interface: &str) -> Result<(), TransportFault> {
        let mut state = self.state.lock();
        state.journal.push(BusOp::GetObject {
            path: path.to_string(),
        });
        if !state.service_available {
            return Err(TransportFault::new(
                SERVICE_UNKNOWN,
                format!("The name {} was not provided by any service files", ASEBA_SERVICE),
            ));
        }
        Ok(())
    }

    fn call(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, TransportFault> {
        let mut state = self.state.lock();
        state.journal.push(BusOp::Call {
            path: path.to_string(),
            method: method.to_string(),
        });
        state.invoke(path, interface, method, args)
    }

    fn call_async(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        args: Vec<Value>,
        on_reply: ReplyCallback,
        on_error: ErrorCallback,
    ) {
        let outcome = {
            let mut state = self.state.lock();
            state.journal.push(BusOp::CallAsync {
                path: path.to_string(),
                method: method.to_string(),
            });
            let outcome = state.invoke(path, interface, method, args);
            if state.hold_replies {
                state.pending.push_back(PendingReply {
                    outcome,
                    on_reply,
                    on_error,
                });
                return;
            }
            outcome
        };

        match outcome {
            Ok(values) => on_reply(values),
            Err(fault) => on_error(fault),
        }
    }

    fn connect_signal(
        &self,
        path: &str,
        interface: &str,
        signal: &str,
        handler: SignalHandler,
    ) -> Result<SignalToken, TransportFault> {
        let mut state = self.state.lock();
        state.journal.push(BusOp::ConnectSignal {
            path: path.to_string(),
            signal: signal.to_string(),
        });
        let token = SignalToken(state.next_token);
        state.next_token += 1;
        state.signals.insert(
            token,
            SignalSubscription {
                path: path.to_string(),
                interface: interface.to_string(),
                signal: signal.to_string(),
                handler: Arc::new(handler),
            },
        );
        Ok(token)
    }

    fn remove_signal(&self, token: SignalToken) -> Result<(), TransportFault> {
        let mut state = self.state.lock();
        state.journal.push(BusOp::RemoveSignal(token));
        state.signals.remove(&token);
        Ok(())
    }

    fn introspect(&self, path: &str) -> Result<Vec<String>, TransportFault> {
        let mut state = self.state.lock();
        state.journal.push(BusOp::Introspect {
            path: path.to_string(),
        });
        if path == NETWORK_PATH {
            return Ok(if state.filters_published {
                vec![EVENT_FILTERS_PATH.trim_start_matches('/').to_string()]
            } else {
                vec![]
            });
        }
        if path == EVENT_FILTERS_PATH && state.filters_published {
            return Ok(state.filters.keys().map(|number| number.to_string()).collect());
        }
        Err(TransportFault::unknown_object(path))
    }

    fn disconnect(&self) {
        let mut state = self.state.lock();
        state.journal.push(BusOp::Disconnect);
        state.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    fn network_call(bus: &InMemoryBus, method: &str, args: Vec<Value>) -> Result<Vec<Value>, TransportFault> {
        bus.call(NETWORK_PATH, NETWORK_INTERFACE, method, args)
    }

    #[test]
    fn test_variables_round_trip() {
        let bus = InMemoryBus::new().with_node("thymio-II", &[("temperature", &[230])]);

        network_call(
            &bus,
            "SetVariable",
            vec![
                Value::Str("thymio-II".into()),
                Value::Str("leds".into()),
                Value::Int16Array(vec![1, 0, 1]),
            ],
        )
        .unwrap();

        assert_eq!(bus.variable("thymio-II", "leds"), Some(vec![1, 0, 1]));
        let reply = network_call(
            &bus,
            "GetVariable",
            vec![Value::Str("thymio-II".into()), Value::Str("temperature".into())],
        )
        .unwrap();
        assert_eq!(reply, vec![Value::Int16Array(vec![230])]);
    }

    #[test]
    fn test_unknown_node_is_a_fault() {
        let bus = InMemoryBus::new();
        let result = network_call(
            &bus,
            "GetVariable",
            vec![Value::Str("ghost".into()), Value::Str("x".into())],
        );
        assert_eq!(result.unwrap_err().name, INVALID_ARGS);
    }

    #[test]
    fn test_filter_container_appears_on_first_filter() {
        let bus = InMemoryBus::new();
        assert!(bus.introspect(EVENT_FILTERS_PATH).unwrap_err().is_unknown_object());

        let path = bus.spawn_filter();
        assert_eq!(path, "/events_filters/0");
        assert_eq!(bus.introspect(EVENT_FILTERS_PATH).unwrap(), vec!["0"]);

        bus.call(&path, EVENT_FILTER_INTERFACE, "Free", vec![]).unwrap();
        assert!(bus.introspect(EVENT_FILTERS_PATH).unwrap().is_empty());
    }

    #[test]
    fn test_emit_reaches_only_listening_filters() {
        let bus = InMemoryBus::new();
        let listening = bus.spawn_filter();
        let idle = bus.spawn_filter();
        bus.call(&listening, EVENT_FILTER_INTERFACE, "ListenEvent", vec![Value::UInt16(3)])
            .unwrap();

        let received = Arc::new(PlMutex::new(Vec::new()));
        for path in [&listening, &idle] {
            let received = Arc::clone(&received);
            let tag = path.clone();
            bus.connect_signal(
                path,
                EVENT_FILTER_INTERFACE,
                EVENT_SIGNAL,
                Box::new(move |_| received.lock().push(tag.clone())),
            )
            .unwrap();
        }

        assert_eq!(bus.emit_event(EventId(3), "timer0", &[1]), 1);
        assert_eq!(bus.emit_event(EventId(4), "other", &[]), 0);
        assert_eq!(*received.lock(), vec![listening]);
    }

    #[test]
    fn test_held_async_replies() {
        let bus = InMemoryBus::new();
        bus.hold_async_replies(true);

        let replied = Arc::new(PlMutex::new(false));
        let flag = Arc::clone(&replied);
        bus.call_async(
            NETWORK_PATH,
            NETWORK_INTERFACE,
            "SendEvent",
            vec![Value::UInt16(0), Value::Int16Array(vec![])],
            Box::new(move |_| *flag.lock() = true),
            Box::new(|_| panic!("unexpected error")),
        );

        assert!(!*replied.lock());
        assert_eq!(bus.deliver_pending_replies(), 1);
        assert!(*replied.lock());
        assert_eq!(bus.sent_events(), vec![(EventId(0), vec![])]);
    }

    #[test]
    fn test_injected_fault() {
        let bus = InMemoryBus::new();
        bus.fail_method("GetNodesList", TransportFault::new("test.Error", "boom"));
        assert_eq!(network_call(&bus, "GetNodesList", vec![]).unwrap_err().message, "boom");

        bus.clear_faults();
        assert!(network_call(&bus, "GetNodesList", vec![]).is_ok());
    }
}
