//! Session: one bus connection, one event filter, one event loop.

use crate::config::SessionConfig;
use crate::error::{AsebaError, Result};
use crate::filter::EventFilterManager;
use crate::network::NetworkClient;
use crate::registry::EventRegistry;
use crate::subscriptions::{Dispatcher, EventCallback};
use crate::transport::{
    Connector, Proxy, SignalToken, Transport, Value, EVENT_SIGNAL, NETWORK_INTERFACE,
    NETWORK_PATH,
};
use crate::types::{EventId, EventRef, IncomingEvent, VariableValue};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Work item for the session loop.
pub(crate) enum LoopMessage {
    /// An event delivered by the filter signal.
    Event(IncomingEvent),
    /// A fault that ends the session.
    Fault(AsebaError),
    /// Send an event on behalf of a [`LoopHandle`].
    Send { event: EventRef, args: Vec<i16> },
    /// Write a node variable on behalf of a [`LoopHandle`].
    Set {
        node: String,
        var: String,
        value: VariableValue,
    },
    /// Register a callback on behalf of a [`LoopHandle`].
    Subscribe {
        event: EventRef,
        callback: EventCallback,
    },
    /// Stop the loop and close the session.
    Stop,
}

/// Handle for driving a running session from elsewhere.
///
/// Cheap to clone and `Send`, so it can be moved into event callbacks or
/// other threads. Requests are queued and carried out by the loop, in the
/// order they were made, once the current callback has returned. A request
/// that fails without ending the session (an unknown event name, a rejected
/// `SetVariable`) is logged and skipped; fatal faults still end `run`.
#[derive(Clone, Debug)]
pub struct LoopHandle {
    sender: Sender<LoopMessage>,
}

impl LoopHandle {
    /// Ask the loop to close the session and return from `run`.
    pub fn stop(&self) {
        self.post(LoopMessage::Stop);
    }

    /// Queue [`Session::send_event`].
    pub fn send_event(&self, event: impl Into<EventRef>, args: &[i16]) {
        self.post(LoopMessage::Send {
            event: event.into(),
            args: args.to_vec(),
        });
    }

    /// Queue [`Session::set`].
    pub fn set(&self, node: &str, var: &str, value: impl Into<VariableValue>) {
        self.post(LoopMessage::Set {
            node: node.to_string(),
            var: var.to_string(),
            value: value.into(),
        });
    }

    /// Queue [`Session::on_event`].
    pub fn on_event<F>(&self, event: impl Into<EventRef>, callback: F)
    where
        F: FnMut(&[i16]) + Send + 'static,
    {
        self.post(LoopMessage::Subscribe {
            event: event.into(),
            callback: Box::new(callback),
        });
    }

    fn post(&self, message: LoopMessage) {
        // The session may already be gone.
        let _ = self.sender.send(message);
    }
}

/// Bus resources owned by a connected session.
struct LiveConnection {
    transport: Arc<dyn Transport>,
    filters: EventFilterManager,
    signal: Option<SignalToken>,
}

impl LiveConnection {
    /// Open the network object, reclaim stale filters, create ours and
    /// subscribe to its event signal. On failure the bus is released.
    fn establish(
        transport: Arc<dyn Transport>,
        config: &SessionConfig,
        sender: &Sender<LoopMessage>,
    ) -> Result<(Self, NetworkClient)> {
        let network = match Proxy::open(Arc::clone(&transport), NETWORK_PATH, NETWORK_INTERFACE) {
            Ok(network) => network,
            Err(fault) => {
                transport.disconnect();
                return Err(AsebaError::Connection(fault.to_string()));
            }
        };

        let mut live = LiveConnection {
            transport,
            filters: EventFilterManager::new(network.clone()),
            signal: None,
        };

        if let Err(e) = live.subscribe_events(config, sender) {
            // Undo whatever part of the setup succeeded.
            if let Err(cleanup) = live.teardown() {
                tracing::warn!(error = %cleanup, "cleanup after failed connect also failed");
            }
            return Err(e);
        }

        Ok((live, NetworkClient::new(network)))
    }

    fn subscribe_events(&mut self, config: &SessionConfig, sender: &Sender<LoopMessage>) -> Result<()> {
        if config.reclaim_orphans {
            let freed = self.filters.reclaim_orphans()?;
            if freed > 0 {
                tracing::info!(freed, "reclaimed orphaned event filters");
            }
        }

        let sender = sender.clone();
        let token = self
            .filters
            .ensure_filter()?
            .connect_signal(
                EVENT_SIGNAL,
                Box::new(move |body| match parse_event(body) {
                    Some(event) => {
                        let _ = sender.send(LoopMessage::Event(event));
                    }
                    None => tracing::warn!("ignored malformed Event signal"),
                }),
            )
            .map_err(|fault| AsebaError::call("connect Event signal", fault))?;
        self.signal = Some(token);
        Ok(())
    }

    /// Remove the signal subscription, free the filter, drop the bus.
    ///
    /// Every step runs even if an earlier one fails; the first error wins.
    fn teardown(&mut self) -> Result<()> {
        let mut first_error = None;

        if let Some(token) = self.signal.take() {
            if let Err(fault) = self.transport.remove_signal(token) {
                first_error.get_or_insert(AsebaError::call("remove Event signal", fault));
            }
        }
        if let Err(e) = self.filters.release() {
            first_error.get_or_insert(e);
        }
        self.transport.disconnect();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Decode the body of an `Event(id, name, values)` signal.
fn parse_event(body: Vec<Value>) -> Option<IncomingEvent> {
    let mut body = body.into_iter();
    let id = body.next()?.as_u16()?;
    let name = match body.next()? {
        Value::Str(name) => name,
        _ => return None,
    };
    let values = match body.next()? {
        Value::Int16Array(values) => values,
        _ => return None,
    };
    Some(IncomingEvent {
        id: EventId(id),
        name,
        values,
    })
}

/// A client session on the Aseba network.
///
/// Subscribe to events and set things up, then call [`Session::run`] to
/// block on the event loop. Callbacks run on the thread that called `run`.
/// The session closes when stopped through a [`LoopHandle`], when a fatal
/// fault arrives, when [`Session::close`] is called, or when it is dropped.
pub struct Session {
    config: SessionConfig,
    registry: EventRegistry,
    dispatcher: Dispatcher,
    network: NetworkClient,
    /// `None` when offline or after close.
    live: Option<LiveConnection>,
    sender: Sender<LoopMessage>,
    receiver: Receiver<LoopMessage>,
    closed: bool,
}

impl Session {
    /// Connect to the bus selected by `config`.
    ///
    /// With `config.offline` set the connector is not used.
    pub fn connect(connector: &dyn Connector, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        if config.offline {
            return Ok(Self::offline_with(config));
        }

        let transport = connector
            .connect(config.scope)
            .map_err(|fault| AsebaError::Connection(fault.to_string()))?;
        let (sender, receiver) = unbounded();
        let (live, network) = LiveConnection::establish(transport, &config, &sender)?;
        tracing::info!(scope = ?config.scope, filter = ?live.filters.filter_path(), "session connected");

        Ok(Self {
            dispatcher: Dispatcher::new(config.frequency_window, config.callback_policy),
            config,
            registry: EventRegistry::new(),
            network,
            live: Some(live),
            sender,
            receiver,
            closed: false,
        })
    }

    /// A session with no bus behind it.
    pub fn offline() -> Self {
        Self::offline_with(SessionConfig::offline())
    }

    fn offline_with(mut config: SessionConfig) -> Self {
        config.offline = true;
        let (sender, receiver) = unbounded();
        Self {
            dispatcher: Dispatcher::new(config.frequency_window, config.callback_policy),
            network: NetworkClient::offline(config.offline_read_len),
            config,
            registry: EventRegistry::new(),
            live: None,
            sender,
            receiver,
            closed: false,
        }
    }

    /// Connect, hand the session to `body`, then close it whatever `body`
    /// returned.
    pub fn scoped<T, F>(connector: &dyn Connector, config: SessionConfig, body: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T>,
    {
        let mut session = Self::connect(connector, config)?;
        let result = body(&mut session);
        let closed = session.close();
        let value = result?;
        closed?;
        Ok(value)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_offline(&self) -> bool {
        self.config.offline
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            sender: self.sender.clone(),
        }
    }

    /// Path of the session's event filter, if connected.
    pub fn filter_path(&self) -> Option<&str> {
        self.live.as_ref().and_then(|live| live.filters.filter_path())
    }

    // --- Event Names ---

    /// Load an event list file, replacing the current names.
    pub fn load_events_list(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.registry.load_path(path)
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut EventRegistry {
        &mut self.registry
    }

    /// Resolve an event name or ID to its ID.
    pub fn resolve(&self, event: impl Into<EventRef>) -> Result<EventId> {
        self.registry.resolve_ref(&event.into())
    }

    // --- Events ---

    /// Call `callback` with the values of every `event` received.
    ///
    /// Replaces any callback already registered for the same event. Returns
    /// the resolved event ID.
    pub fn on_event<F>(&mut self, event: impl Into<EventRef>, callback: F) -> Result<EventId>
    where
        F: FnMut(&[i16]) + Send + 'static,
    {
        self.subscribe_boxed(event.into(), Box::new(callback))
    }

    fn subscribe_boxed(&mut self, event: EventRef, callback: EventCallback) -> Result<EventId> {
        self.ensure_open()?;
        let id = self.registry.resolve_ref(&event)?;
        if let Some(live) = self.live.as_mut() {
            live.filters.listen(id)?;
        }
        self.dispatcher.subscribe(id, callback, Instant::now());
        Ok(id)
    }

    /// Send an event to the network without waiting.
    ///
    /// Only name resolution can fail here. If the bus later rejects the
    /// send, the session is closed and `run` returns
    /// [`AsebaError::AsyncSend`].
    pub fn send_event(&self, event: impl Into<EventRef>, args: &[i16]) -> Result<()> {
        self.ensure_open()?;
        let id = self.resolve(event)?;
        let sender = self.sender.clone();
        self.network.send_event(id, args, move |fault| {
            let _ = sender.send(LoopMessage::Fault(AsebaError::AsyncSend(fault)));
        });
        Ok(())
    }

    /// Frequency in events per second of a subscribed event, 0 otherwise.
    pub fn get_event_frequency(&self, event: impl Into<EventRef>) -> Result<f64> {
        let id = self.resolve(event)?;
        Ok(self.dispatcher.frequency_of(id))
    }

    /// Frequencies of all subscribed events.
    pub fn event_frequencies(&self) -> BTreeMap<EventId, f64> {
        self.dispatcher.frequencies()
    }

    /// Free event filters left on the service by earlier sessions.
    pub fn clear_events(&self) -> Result<usize> {
        self.ensure_open()?;
        match &self.live {
            Some(live) => live.filters.reclaim_orphans(),
            None => Ok(0),
        }
    }

    // --- Variables ---

    pub fn get_nodes_list(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.network.get_nodes_list()
    }

    /// Read a node variable.
    pub fn get(&self, node: &str, var: &str) -> Result<VariableValue> {
        self.ensure_open()?;
        self.network.get(node, var)
    }

    /// Write a node variable.
    pub fn set(&self, node: &str, var: &str, value: impl Into<VariableValue>) -> Result<()> {
        self.ensure_open()?;
        self.network.set(node, var, value.into())
    }

    /// Load an Aseba script file onto the network.
    pub fn load_scripts(&self, path: impl AsRef<Path>) -> Result<()> {
        self.ensure_open()?;
        self.network.load_scripts(path.as_ref())
    }

    // --- Event Loop ---

    /// Run the event loop until the session is stopped or a fatal fault
    /// arrives. The session is closed when this returns.
    pub fn run(&mut self) -> Result<()> {
        self.ensure_open()?;
        loop {
            let message = self.receiver.recv().map_err(|_| AsebaError::SessionClosed)?;
            if let ControlFlow::Break(()) = self.process(message)? {
                return Ok(());
            }
        }
    }

    /// Run the loop for at most `timeout`. Returns `Ok(true)` if the
    /// session was stopped, `Ok(false)` if time ran out.
    pub fn run_for(&mut self, timeout: Duration) -> Result<bool> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(message) => {
                    if let ControlFlow::Break(()) = self.process(message)? {
                        return Ok(true);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => return Err(AsebaError::SessionClosed),
            }
        }
    }

    /// Process everything already queued without blocking. Returns the
    /// number of messages handled.
    pub fn run_until_idle(&mut self) -> Result<usize> {
        self.ensure_open()?;
        let mut handled = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(message) => {
                    handled += 1;
                    if let ControlFlow::Break(()) = self.process(message)? {
                        return Ok(handled);
                    }
                }
                Err(TryRecvError::Empty) => return Ok(handled),
                Err(TryRecvError::Disconnected) => return Err(AsebaError::SessionClosed),
            }
        }
    }

    fn process(&mut self, message: LoopMessage) -> Result<ControlFlow<()>> {
        match message {
            LoopMessage::Event(event) => match self.dispatcher.dispatch(&event, Instant::now()) {
                Ok(_) => Ok(ControlFlow::Continue(())),
                Err(e) => Err(self.fail(e)),
            },
            LoopMessage::Fault(e) => Err(self.fail(e)),
            LoopMessage::Send { event, args } => {
                let result = self.send_event(event, &args);
                self.settle("send_event", result)
            }
            LoopMessage::Set { node, var, value } => {
                let result = self.set(&node, &var, value);
                self.settle("set", result)
            }
            LoopMessage::Subscribe { event, callback } => {
                let result = self.subscribe_boxed(event, callback).map(|_| ());
                self.settle("on_event", result)
            }
            LoopMessage::Stop => {
                self.close()?;
                Ok(ControlFlow::Break(()))
            }
        }
    }

    /// Outcome of a request queued through a [`LoopHandle`].
    fn settle(&mut self, request: &'static str, result: Result<()>) -> Result<ControlFlow<()>> {
        match result {
            Ok(()) => Ok(ControlFlow::Continue(())),
            Err(e) if e.is_fatal() => Err(self.fail(e)),
            Err(e) => {
                tracing::warn!(request, error = %e, "queued request failed");
                Ok(ControlFlow::Continue(()))
            }
        }
    }

    /// Tear the session down after a fatal fault and hand the fault back.
    fn fail(&mut self, error: AsebaError) -> AsebaError {
        tracing::error!(error = %error, "fatal session fault, closing");
        if let Err(close_error) = self.close() {
            tracing::warn!(error = %close_error, "close after fatal fault failed");
        }
        error
    }

    /// Close the session: unsubscribe from events, free the filter, release
    /// the bus. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.dispatcher.clear();

        match self.live.take() {
            Some(mut live) => {
                let result = live.teardown();
                tracing::info!("session closed");
                result
            }
            None => Ok(()),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(AsebaError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to close session on drop");
        }
    }
}
