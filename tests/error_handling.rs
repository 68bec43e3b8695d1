//! Error handling and edge case tests.

use aseba_bus::{
    AsebaError, BusOp, CallbackPolicy, EventId, InMemoryBus, Session, SessionConfig,
    TransportFault,
};
use std::time::Duration;
use tempfile::TempDir;

fn bus() -> InMemoryBus {
    InMemoryBus::new().with_node("thymio-II", &[("temperature", &[230])])
}

// --- Connection Errors ---

#[test]
fn test_bus_unreachable() {
    let bus = bus();
    bus.fail_connect(TransportFault::new(
        "org.freedesktop.DBus.Error.NoServer",
        "no bus",
    ));

    let result = Session::connect(&bus, SessionConfig::default());
    assert!(matches!(result, Err(AsebaError::Connection(_))));
}

#[test]
fn test_service_not_running() {
    let bus = bus();
    bus.set_service_available(false);

    let result = Session::connect(&bus, SessionConfig::default());

    assert!(matches!(result, Err(ref e) if e.is_fatal()));
    assert!(matches!(result, Err(AsebaError::Connection(_))));
    assert!(!bus.is_connected());
}

#[test]
fn test_filter_creation_failure_releases_bus() {
    let bus = bus();
    bus.fail_method("CreateEventFilter", TransportFault::new("test.Error", "denied"));

    let result = Session::connect(&bus, SessionConfig::default());

    assert!(matches!(result, Err(AsebaError::TransportCall { .. })));
    assert!(!bus.is_connected());
    assert_eq!(bus.signal_count(), 0);
}

// --- Name Resolution Errors ---

#[test]
fn test_unknown_event_name_without_list() {
    let bus = bus();
    let mut session = Session::connect(&bus, SessionConfig::default()).unwrap();

    let result = session.on_event("timer0", |_| {});
    assert!(matches!(result, Err(AsebaError::UnknownEvent(ref name)) if name == "timer0"));

    let result = session.send_event("timer0", &[]);
    assert!(matches!(result, Err(AsebaError::UnknownEvent(_))));

    let result = session.get_event_frequency("timer0");
    assert!(matches!(result, Err(AsebaError::UnknownEvent(_))));

    // Recoverable: the session is still usable.
    assert!(!session.is_closed());
    session.on_event(0u16, |_| {}).unwrap();
}

#[test]
fn test_event_id_out_of_range() {
    let bus = bus();
    let mut session = Session::connect(&bus, SessionConfig::default()).unwrap();

    let result = session.on_event(70000, |_| {});
    assert!(matches!(result, Err(AsebaError::InvalidEventId(70000))));

    let result = session.send_event(-1, &[]);
    assert!(matches!(result, Err(AsebaError::InvalidEventId(-1))));

    assert!(bus.sent_events().is_empty());
    assert!(!session.is_closed());
}

#[test]
fn test_malformed_event_list() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.aesl");
    std::fs::write(&path, "<network><event name=\"a\"/>").unwrap();

    let mut session = Session::offline();
    let result = session.load_events_list(&path);

    assert!(matches!(result, Err(AsebaError::RegistryLoad { .. })));
    assert!(session.registry().is_empty());
}

#[test]
fn test_missing_event_list() {
    let dir = TempDir::new().unwrap();
    let mut session = Session::offline();

    let result = session.load_events_list(dir.path().join("nope.aesl"));
    assert!(matches!(result, Err(AsebaError::RegistryLoad { .. })));
}

// --- Synchronous Call Errors ---

#[test]
fn test_sync_failure_does_not_end_session() {
    let bus = bus();
    let session = Session::connect(&bus, SessionConfig::default()).unwrap();

    let result = session.get("ghost", "temperature");
    assert!(matches!(result, Err(AsebaError::TransportCall { ref method, .. }) if method == "GetVariable"));

    bus.fail_method("SetVariable", TransportFault::new("test.Error", "busy"));
    assert!(session.set("thymio-II", "temperature", 1i16).is_err());

    bus.fail_method("LoadScripts", TransportFault::new("test.Error", "bad file"));
    assert!(session.load_scripts("x.aesl").is_err());

    assert!(!session.is_closed());
    assert_eq!(bus.filter_paths().len(), 1);
    assert!(session.get("thymio-II", "temperature").is_ok());
}

#[test]
fn test_listen_failure_registers_nothing() {
    let bus = bus();
    let mut session = Session::connect(&bus, SessionConfig::default()).unwrap();
    bus.fail_method("ListenEvent", TransportFault::new("test.Error", "refused"));

    assert!(session.on_event(4u16, |_| {}).is_err());
    assert!(session.event_frequencies().is_empty());
}

// --- Async Send Errors ---

#[test]
fn test_async_send_failure_is_fatal() {
    let bus = bus();
    let mut session = Session::connect(&bus, SessionConfig::default()).unwrap();
    bus.fail_method("SendEvent", TransportFault::new("test.Error", "link lost"));

    // The call itself succeeds; the failure arrives through the loop.
    session.send_event(1u16, &[42]).unwrap();
    bus.clear_journal();

    let result = session.run();

    match result {
        Err(AsebaError::AsyncSend(fault)) => assert_eq!(fault.message, "link lost"),
        other => panic!("Expected AsyncSend, got {:?}", other),
    }
    assert!(session.is_closed());
    assert!(bus.filter_paths().is_empty());
    assert_eq!(bus.journal().last(), Some(&BusOp::Disconnect));
}

#[test]
fn test_async_failure_delivered_on_later_iteration() {
    let bus = bus();
    bus.hold_async_replies(true);
    bus.fail_method("SendEvent", TransportFault::new("test.Error", "link lost"));
    let mut session = Session::connect(&bus, SessionConfig::default()).unwrap();

    session.send_event(0u16, &[]).unwrap();
    assert_eq!(session.run_until_idle().unwrap(), 0);
    assert!(!session.is_closed());

    bus.deliver_pending_replies();
    assert!(matches!(session.run_until_idle(), Err(AsebaError::AsyncSend(_))));
    assert!(session.is_closed());
}

#[test]
fn test_queued_set_failure_keeps_loop_running() {
    let bus = bus();
    let mut session = Session::connect(&bus, SessionConfig::default()).unwrap();
    let handle = session.handle();

    handle.set("ghost", "temperature", 1i16);
    handle.send_event("not-loaded", &[]);
    handle.set("thymio-II", "temperature", 245i16);

    assert_eq!(session.run_until_idle().unwrap(), 3);
    assert!(!session.is_closed());
    assert_eq!(bus.variable("thymio-II", "temperature"), Some(vec![245]));
}

#[test]
fn test_queued_send_failure_is_fatal() {
    let bus = bus();
    let mut session = Session::connect(&bus, SessionConfig::default()).unwrap();
    bus.fail_method("SendEvent", TransportFault::new("test.Error", "link lost"));

    let handle = session.handle();
    session
        .on_event(0u16, move |_| handle.send_event(1u16, &[42]))
        .unwrap();
    bus.emit_event(EventId(0), "timer0", &[]);

    assert!(matches!(session.run(), Err(AsebaError::AsyncSend(_))));
    assert!(session.is_closed());
    assert!(bus.filter_paths().is_empty());
}

#[test]
fn test_async_success_is_silent() {
    let bus = bus();
    bus.hold_async_replies(true);
    let mut session = Session::connect(&bus, SessionConfig::default()).unwrap();

    session.send_event(0u16, &[1]).unwrap();
    bus.deliver_pending_replies();

    assert_eq!(session.run_until_idle().unwrap(), 0);
    assert!(!session.is_closed());
}

// --- Callback Errors ---

#[test]
fn test_panicking_callback_isolated_by_default() {
    let bus = bus();
    let mut session = Session::connect(&bus, SessionConfig::default()).unwrap();
    session.on_event(0u16, |_| panic!("callback bug")).unwrap();

    bus.emit_event(EventId(0), "timer0", &[]);
    bus.emit_event(EventId(0), "timer0", &[]);

    assert_eq!(session.run_until_idle().unwrap(), 2);
    assert!(!session.is_closed());
}

#[test]
fn test_panicking_callback_aborts_when_configured() {
    let bus = bus();
    let config = SessionConfig {
        callback_policy: CallbackPolicy::Abort,
        ..Default::default()
    };
    let mut session = Session::connect(&bus, config).unwrap();
    session.on_event(5u16, |_| panic!("callback bug")).unwrap();

    bus.emit_event(EventId(5), "crash", &[]);
    let result = session.run_for(Duration::from_secs(5));

    assert!(matches!(
        result,
        Err(AsebaError::CallbackPanicked { event_id: EventId(5), .. })
    ));
    assert!(session.is_closed());
    assert!(bus.filter_paths().is_empty());
}

// --- Closed Session ---

#[test]
fn test_operations_after_close() {
    let bus = bus();
    let mut session = Session::connect(&bus, SessionConfig::default()).unwrap();
    session.close().unwrap();

    assert!(matches!(session.run(), Err(AsebaError::SessionClosed)));
    assert!(matches!(session.on_event(0u16, |_| {}), Err(AsebaError::SessionClosed)));
    assert!(matches!(session.send_event(0u16, &[]), Err(AsebaError::SessionClosed)));
    assert!(matches!(session.get("thymio-II", "temperature"), Err(AsebaError::SessionClosed)));
}

#[test]
fn test_free_failure_still_disconnects() {
    let bus = bus();
    let mut session = Session::connect(&bus, SessionConfig::default()).unwrap();
    bus.fail_method("Free", TransportFault::new("test.Error", "stuck"));

    let result = session.close();

    assert!(matches!(result, Err(AsebaError::TransportCall { ref method, .. }) if method == "Free"));
    assert!(!bus.is_connected());
    assert_eq!(bus.signal_count(), 0);
}
