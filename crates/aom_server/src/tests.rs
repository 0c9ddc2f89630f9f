use crate::codecs::*;
use crate::pipeline::{encode_frame, Frame, FrameDecoder, MessageDecoder};
use crate::*;
use aom_event_system::{Cancellable, EventBus, EventPriority, Owner, Scheduler, SchedulerError, TaskPriority};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug)]
struct RecordingTransport {
    remote: SocketAddr,
    writes: Mutex<Vec<Vec<u8>>>,
    flushes: AtomicUsize,
    closed: Mutex<Option<String>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    fn new(remote: &str) -> Arc<Self> {
        Arc::new(Self {
            remote: remote.parse().unwrap(),
            writes: Mutex::new(Vec::new()),
            flushes: AtomicUsize::new(0),
            closed: Mutex::new(None),
            failing: AtomicBool::new(false),
        })
    }

    fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    fn closed_reason(&self) -> Option<String> {
        self.closed.lock().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    fn write(&self, frame: Vec<u8>) -> Result<(), ServerError> {
        if !self.is_active() || self.failing.load(Ordering::SeqCst) {
            return Err(ServerError::Network("closed".to_string()));
        }
        self.writes.lock().unwrap().push(frame);
        Ok(())
    }

    fn flush(&self) -> Result<(), ServerError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self, reason: &str) {
        let mut closed = self.closed.lock().unwrap();
        if closed.is_none() {
            *closed = Some(reason.to_string());
        }
    }

    fn is_active(&self) -> bool {
        self.closed.lock().unwrap().is_none()
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }
}

fn idle_bus() -> Arc<EventBus> {
    Arc::new(EventBus::new(Arc::new(Scheduler::new(60, 1).unwrap())))
}

fn start_scheduler() -> (Arc<Scheduler>, JoinHandle<Result<(), SchedulerError>>) {
    let scheduler = Arc::new(Scheduler::new(120, 2).unwrap());
    let looper = Arc::clone(&scheduler);
    let handle = thread::spawn(move || looper.run());
    assert!(wait_until(Duration::from_secs(2), || scheduler.is_active()));
    (scheduler, handle)
}

fn stop_scheduler(scheduler: &Scheduler, handle: JoinHandle<Result<(), SchedulerError>>) {
    scheduler.stop().unwrap();
    handle.join().unwrap().unwrap();
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Answers `PING` with `PONG` on opcode 0x01.
fn echo_protocol() -> Protocol {
    Protocol::builder()
        .dispatch(Dispatch::Handlers)
        .inbound_with_handler(ProxyClientCodec, |session, message: &ProxyClientMessage| {
            if message.bytes() == b"PING" {
                session.send(Arc::new(ProxyClientMessage::new("PONG")), false)?;
            }
            Ok(())
        })
        .unwrap()
        .outbound(ProxyClientCodec)
        .unwrap()
        .build()
}

fn frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_frame(opcode, payload, &mut out).unwrap();
    out
}

#[test]
fn test_duplicate_registrations_fail_at_the_offending_call() {
    let inbound = Protocol::builder().inbound(ProxyClientCodec).unwrap().inbound(ProxyClientCodec);
    assert!(matches!(inbound, Err(ProtocolError::DuplicateOpcode(0x01))));

    let outbound = Protocol::builder().outbound(ProxyPingCodec).unwrap().outbound(ProxyPingCodec);
    assert!(matches!(outbound, Err(ProtocolError::DuplicateMessageType(_))));

    // The same codec in both directions is fine.
    assert!(proxy_protocol().is_ok());
}

#[test]
fn test_protocol_reports_unknown_opcodes_and_types() {
    let protocol = Protocol::builder().inbound(ProxyPingCodec).unwrap().build();

    assert!(matches!(protocol.decode(0x09, b""), Err(ProtocolError::UnknownOpcode(0x09))));
    assert!(matches!(
        protocol.decode(0x03, b"junk"),
        Err(ProtocolError::InvalidMessage(_))
    ));
    assert!(matches!(
        protocol.encode(&ProxyPingMessage),
        Err(ProtocolError::UnknownMessageType(_))
    ));
}

#[test]
fn test_decoded_frames_reencode_identically() {
    let protocol = proxy_protocol().unwrap();
    let wire = frame(0x02, b"\x00\x01upstream");

    let message = protocol.decode(0x02, &wire[3..]).unwrap();
    assert!(message.is::<ProxyServerMessage>());
    assert_eq!(protocol.encode(message.as_ref()).unwrap(), wire);
}

#[test]
fn test_missing_handler_is_an_io_error() {
    let protocol = Protocol::builder()
        .dispatch(Dispatch::Handlers)
        .inbound(ProxyPingCodec)
        .unwrap()
        .build();
    let session = Session::new(RecordingTransport::new("127.0.0.1:4000"), None, idle_bus());

    let error = protocol.handle(&session, &ProxyPingMessage).unwrap_err();
    match error {
        ServerError::Io(e) => assert_eq!(e.to_string(), "Message ProxyPingMessage doesn't have a handler"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_pulse_writes_every_queued_message_then_flushes_once() {
    let transport = RecordingTransport::new("127.0.0.1:4001");
    let session = Session::new(transport.clone(), Some(Arc::new(proxy_protocol().unwrap())), idle_bus());

    session.send(Arc::new(ProxyClientMessage::new("one")), false).unwrap();
    session.send_all([
        Arc::new(ProxyPingMessage) as Arc<dyn Message>,
        Arc::new(ProxyServerMessage::new("two")),
    ]);
    assert!(transport.writes().is_empty());

    session.pulse();

    assert_eq!(
        transport.writes(),
        vec![frame(0x01, b"one"), frame(0x03, b""), frame(0x02, b"two")]
    );
    assert_eq!(transport.flushes(), 1);
    assert_eq!(session.pending_outbound(), 0);
}

#[test]
fn test_failed_write_reports_once_and_discards_the_queue() {
    let transport = RecordingTransport::new("127.0.0.1:4003");
    let session = Session::new(transport.clone(), Some(Arc::new(proxy_protocol().unwrap())), idle_bus());
    let reported = Arc::new(AtomicUsize::new(0));
    {
        let reported = reported.clone();
        session.set_uncaught_handler(Arc::new(move |_: &Arc<Session>, _: &ServerError| {
            reported.fetch_add(1, Ordering::SeqCst);
        }));
    }

    for text in ["one", "two", "three"] {
        session.send(Arc::new(ProxyClientMessage::new(text)), false).unwrap();
    }
    transport.failing.store(true, Ordering::SeqCst);
    session.pulse();

    assert_eq!(reported.load(Ordering::SeqCst), 1);
    assert_eq!(session.pending_outbound(), 0);
    assert!(transport.writes().is_empty());
    assert_eq!(transport.flushes(), 0);
}

#[test]
fn test_urgent_send_bypasses_the_queue() {
    let transport = RecordingTransport::new("127.0.0.1:4002");
    let session = Session::new(transport.clone(), Some(Arc::new(proxy_protocol().unwrap())), idle_bus());

    session.send(Arc::new(ProxyPingMessage), true).unwrap();
    assert_eq!(transport.writes(), vec![frame(0x03, b"")]);
    assert_eq!(transport.flushes(), 1);
    assert_eq!(session.pending_outbound(), 0);

    session.disconnect("done");
    session.send(Arc::new(ProxyPingMessage), true).unwrap();
    assert_eq!(session.pending_outbound(), 1);
}

#[test]
fn test_inbound_messages_are_dispatched_in_arrival_order_through_handlers() {
    let transport = RecordingTransport::new("127.0.0.1:4003");
    let session = Session::new(transport.clone(), Some(Arc::new(echo_protocol())), idle_bus());
    let mut decoder = MessageDecoder::new();

    let mut wire = frame(0x01, b"PING");
    wire.extend(frame(0x01, b"noise"));
    wire.extend(frame(0x01, b"PING"));
    assert_eq!(decoder.decode(&session, &wire).unwrap(), 3);

    session.pulse();
    assert_eq!(transport.writes(), vec![frame(0x01, b"PONG"), frame(0x01, b"PONG")]);
    assert_eq!(transport.flushes(), 1);
}

#[test]
fn test_event_dispatch_raises_session_message_events() {
    let bus = idle_bus();
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        bus.register_event(Owner::Anonymous, EventPriority::Normal, move |event: &mut SessionMessageEvent| {
            if let Some(message) = event.message_as::<ProxyClientMessage>() {
                seen.lock().unwrap().push(message.bytes().to_vec());
            }
        });
    }
    let session = Session::new(
        RecordingTransport::new("127.0.0.1:4004"),
        Some(Arc::new(proxy_protocol().unwrap())),
        bus,
    );

    MessageDecoder::new()
        .decode(&session, &frame(0x01, b"hello"))
        .unwrap();
    session.pulse();

    assert_eq!(*seen.lock().unwrap(), vec![b"hello".to_vec()]);
}

#[test]
fn test_dispatch_failures_reach_the_default_handler_and_disconnect() {
    let protocol = Protocol::builder()
        .dispatch(Dispatch::Handlers)
        .inbound(ProxyPingCodec)
        .unwrap()
        .build();
    let transport = RecordingTransport::new("127.0.0.1:4005");
    let session = Session::new(transport.clone(), Some(Arc::new(protocol)), idle_bus());

    MessageDecoder::new().decode(&session, &frame(0x03, b"")).unwrap();
    session.pulse();

    let reason = transport.closed_reason().unwrap();
    assert!(reason.starts_with("An exception was raised:"), "{reason}");
    assert!(reason.contains("ProxyPingMessage doesn't have a handler"), "{reason}");
}

#[test]
fn test_panicking_handler_is_reported_to_the_uncaught_handler() {
    let protocol = Protocol::builder()
        .dispatch(Dispatch::Handlers)
        .inbound_with_handler(ProxyPingCodec, |_, _: &ProxyPingMessage| panic!("handler exploded"))
        .unwrap()
        .build();
    let session = Session::new(
        RecordingTransport::new("127.0.0.1:4006"),
        Some(Arc::new(protocol)),
        idle_bus(),
    );
    let reported = Arc::new(Mutex::new(None));
    {
        let reported = reported.clone();
        session.set_uncaught_handler(Arc::new(move |_: &Arc<Session>, error: &ServerError| {
            *reported.lock().unwrap() = Some(error.to_string());
        }));
    }

    session.enqueue_inbound(session.protocol().unwrap(), Arc::new(ProxyPingMessage));
    session.pulse();

    assert_eq!(
        reported.lock().unwrap().as_deref(),
        Some("Internal error: handler exploded")
    );
    assert!(session.is_active());
}

#[test]
fn test_sessions_without_a_protocol_drop_inbound_frames() {
    let session = Session::new(RecordingTransport::new("127.0.0.1:4007"), None, idle_bus());
    let queued = MessageDecoder::new()
        .decode(&session, &frame(0x01, b"lost"))
        .unwrap();
    assert_eq!(queued, 0);
    assert_eq!(session.pending_inbound(), 0);
}

#[test]
fn test_queued_messages_keep_the_protocol_that_decoded_them() {
    let handled = Arc::new(Mutex::new(Vec::new()));
    let tagged = |label: &'static str| {
        let handled = handled.clone();
        Arc::new(
            Protocol::builder()
                .dispatch(Dispatch::Handlers)
                .inbound_with_handler(ProxyClientCodec, move |_, _: &ProxyClientMessage| {
                    handled.lock().unwrap().push(label);
                    Ok(())
                })
                .unwrap()
                .build(),
        )
    };
    let handshake = tagged("handshake");
    let game = tagged("game");

    let session = Session::new(RecordingTransport::new("127.0.0.1:4008"), Some(handshake), idle_bus());
    let mut decoder = MessageDecoder::new();
    decoder.decode(&session, &frame(0x01, b"hello")).unwrap();

    session.set_protocol(Some(game));
    decoder.decode(&session, &frame(0x01, b"move")).unwrap();
    session.pulse();

    assert_eq!(*handled.lock().unwrap(), vec!["handshake", "game"]);
}

#[test]
fn test_cancelled_sessions_never_join_the_registry() {
    let (scheduler, handle) = start_scheduler();
    let bus = Arc::new(EventBus::new(Arc::clone(&scheduler)));
    let manager = Arc::new(SessionManager::new(Arc::new(proxy_protocol().unwrap()), Arc::clone(&bus)));
    bus.register_event(Owner::Anonymous, EventPriority::Normal, |event: &mut SessionConnectedEvent| {
        if event.session().remote_addr().port() == 6666 {
            event.cancel();
        }
    });

    let banned = RecordingTransport::new("10.0.0.1:6666");
    let allowed = RecordingTransport::new("10.0.0.2:5000");
    let rejected = Session::new(banned.clone(), Some(manager.default_protocol()), Arc::clone(&bus));
    let accepted = Session::new(allowed.clone(), Some(manager.default_protocol()), Arc::clone(&bus));
    manager.add(&rejected);
    manager.add(&accepted);

    assert!(wait_until(Duration::from_secs(2), || {
        manager.session_count() == 1 && banned.closed_reason().is_some()
    }));
    assert_eq!(banned.closed_reason().as_deref(), Some("<Cancelled>"));
    assert!(manager.session(&rejected.id()).is_none());
    assert!(manager.session(&accepted.id()).is_some());

    manager.send(ALL, Arc::new(ProxyClientMessage::new("broadcast")), false);
    manager.pulse();
    assert_eq!(allowed.writes(), vec![frame(0x01, b"broadcast")]);
    assert!(banned.writes().is_empty());

    stop_scheduler(&scheduler, handle);
}

#[test]
fn test_closed_event_fires_after_the_session_left_the_registry() {
    let (scheduler, handle) = start_scheduler();
    let bus = Arc::new(EventBus::new(Arc::clone(&scheduler)));
    let manager = Arc::new(SessionManager::new(Arc::new(proxy_protocol().unwrap()), Arc::clone(&bus)));
    let session = Session::new(
        RecordingTransport::new("10.0.0.3:5000"),
        Some(manager.default_protocol()),
        Arc::clone(&bus),
    );
    manager.add(&session);
    assert!(wait_until(Duration::from_secs(2), || manager.session_count() == 1));

    let (sender, receiver) = mpsc::channel();
    {
        let manager = Arc::downgrade(&manager);
        let sender = Mutex::new(sender);
        bus.register_event(Owner::Anonymous, EventPriority::Normal, move |event: &mut SessionClosedEvent| {
            let resolvable = manager
                .upgrade()
                .map(|manager| manager.session(&event.session().id()).is_some());
            let _ = sender.lock().unwrap().send(resolvable);
        });
    }

    session.disconnect("bye");
    manager.remove(&session);
    manager.remove(&session);

    assert_eq!(receiver.recv_timeout(Duration::from_secs(2)).unwrap(), Some(false));
    assert!(receiver.recv_timeout(Duration::from_millis(100)).is_err());

    stop_scheduler(&scheduler, handle);
}

#[test]
fn test_predicate_operations_only_touch_matching_sessions() {
    let (scheduler, handle) = start_scheduler();
    let bus = Arc::new(EventBus::new(Arc::clone(&scheduler)));
    let manager = Arc::new(SessionManager::new(Arc::new(proxy_protocol().unwrap()), Arc::clone(&bus)));

    let transports: Vec<_> = (0..3)
        .map(|i| RecordingTransport::new(&format!("10.0.1.{i}:7000")))
        .collect();
    for transport in &transports {
        let session = Session::new(transport.clone(), Some(manager.default_protocol()), Arc::clone(&bus));
        manager.add(&session);
    }
    assert!(wait_until(Duration::from_secs(2), || manager.session_count() == 3));

    let last_octet = |session: &Session| match session.remote_addr() {
        SocketAddr::V4(addr) => addr.ip().octets()[3],
        SocketAddr::V6(_) => 0,
    };
    manager.send_all(
        |session| last_octet(session) != 0,
        &[Arc::new(ProxyPingMessage) as Arc<dyn Message>, Arc::new(ProxyPingMessage)],
    );
    manager.disconnect(|session| last_octet(session) == 2, "kicked");
    manager.pulse();

    assert!(transports[0].writes().is_empty());
    assert_eq!(transports[1].writes().len(), 2);
    assert_eq!(transports[1].flushes(), 1);
    assert!(transports[2].writes().is_empty());
    assert_eq!(transports[2].closed_reason().as_deref(), Some("kicked"));

    stop_scheduler(&scheduler, handle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ping_is_answered_with_pong_over_tcp() {
    let (scheduler, handle) = start_scheduler();
    let bus = Arc::new(EventBus::new(Arc::clone(&scheduler)));
    let manager = Arc::new(SessionManager::new(Arc::new(echo_protocol()), Arc::clone(&bus)));
    {
        let manager = Arc::clone(&manager);
        scheduler.invoke_repeating(Owner::Anonymous, TaskPriority::Critical, 0, 1, move |_| manager.pulse());
    }

    assert!(manager.bind("127.0.0.1:0".parse().unwrap()).await);
    let address = manager.local_addr().unwrap();

    let mut client = TcpStream::connect(address).await.unwrap();
    // Split the frame to exercise the resumable decoder on the server side.
    let wire = frame(0x01, b"PING");
    client.write_all(&wire[..2]).await.unwrap();
    client.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.write_all(&wire[2..]).await.unwrap();

    let mut decoder = FrameDecoder::new();
    let mut buffer = [0u8; 64];
    let reply = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(frame) = decoder.next_frame() {
                return frame;
            }
            let read = client.read(&mut buffer).await.unwrap();
            assert!(read > 0, "server closed the connection early");
            decoder.feed(&buffer[..read]);
        }
    })
    .await
    .unwrap();
    assert_eq!(reply, Frame { opcode: 0x01, payload: b"PONG".to_vec() });

    let registered = manager.sessions();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].remote_addr(), client.local_addr().unwrap());

    tokio::time::timeout(Duration::from_secs(5), manager.stop("<Shutdown>"))
        .await
        .unwrap();
    let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buffer))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read, 0);
    assert!(wait_until(Duration::from_secs(2), || manager.session_count() == 0));

    stop_scheduler(&scheduler, handle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_binding_an_occupied_address_reports_false() {
    let bus = idle_bus();
    let first = Arc::new(SessionManager::new(Arc::new(proxy_protocol().unwrap()), Arc::clone(&bus)));
    let second = Arc::new(SessionManager::new(Arc::new(proxy_protocol().unwrap()), bus));

    assert!(first.bind("127.0.0.1:0".parse().unwrap()).await);
    let taken = first.local_addr().unwrap();
    assert!(!second.bind(taken).await);
    assert!(second.local_addr().is_none());

    first.stop("<Shutdown>").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_manager_listens_again_after_stop() {
    let (scheduler, handle) = start_scheduler();
    let bus = Arc::new(EventBus::new(Arc::clone(&scheduler)));
    let manager = Arc::new(SessionManager::new(Arc::new(echo_protocol()), Arc::clone(&bus)));
    {
        let manager = Arc::clone(&manager);
        scheduler.invoke_repeating(Owner::Anonymous, TaskPriority::Critical, 0, 1, move |_| manager.pulse());
    }

    assert!(manager.bind("127.0.0.1:0".parse().unwrap()).await);
    manager.stop("<Shutdown>").await;
    assert!(manager.local_addr().is_none());

    assert!(manager.bind("127.0.0.1:0".parse().unwrap()).await);
    let address = manager.local_addr().unwrap();
    let mut client = TcpStream::connect(address).await.unwrap();
    client.write_all(&frame(0x01, b"PING")).await.unwrap();

    let mut reply = [0u8; 7];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.to_vec(), frame(0x01, b"PONG"));
    assert_eq!(manager.session_count(), 1);

    manager.stop("<Shutdown>").await;
    stop_scheduler(&scheduler, handle);
}
