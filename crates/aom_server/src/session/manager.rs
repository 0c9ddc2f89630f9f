//! Session registry and TCP listener.

use super::core::{default_uncaught_handler, Session, UncaughtHandler};
use super::handlers::handle_connection;
use crate::events::{SessionClosedEvent, SessionConnectedEvent};
use crate::protocol::{Message, Protocol};
use aom_event_system::{Event, EventBus};
use dashmap::DashMap;
use futures::future::join_all;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Predicate matching every session, for the broadcast operations.
pub const ALL: fn(&Session) -> bool = match_all;

fn match_all(_: &Session) -> bool {
    true
}

/// Owns the registry of connected sessions and the listening sockets.
///
/// # Connection lifecycle
///
/// 1. A connection is accepted and wrapped in a [`Session`]
/// 2. [`SessionConnectedEvent`] is raised asynchronously
/// 3. If no handler cancelled it, the session joins the registry and becomes
///    visible to [`SessionManager::sessions`] and the broadcast operations;
///    otherwise it is disconnected with `<Cancelled>`
/// 4. When the connection goes away the session leaves the registry, then
///    [`SessionClosedEvent`] is raised asynchronously
pub struct SessionManager {
    protocol: RwLock<Arc<Protocol>>,
    events: Arc<EventBus>,
    sessions: DashMap<Uuid, Arc<Session>>,
    uncaught: RwLock<UncaughtHandler>,
    listeners: Mutex<Vec<SocketAddr>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl SessionManager {
    /// Creates a manager whose new sessions start with `protocol`.
    pub fn new(protocol: Arc<Protocol>, events: Arc<EventBus>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            protocol: RwLock::new(protocol),
            events,
            sessions: DashMap::new(),
            uncaught: RwLock::new(default_uncaught_handler()),
            listeners: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn default_protocol(&self) -> Arc<Protocol> {
        Arc::clone(&self.protocol.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Protocol given to connections accepted from now on.
    pub fn set_default_protocol(&self, protocol: Arc<Protocol>) {
        *self.protocol.write().unwrap_or_else(PoisonError::into_inner) = protocol;
    }

    /// Handler installed on every session accepted from now on.
    pub fn uncaught_handler(&self) -> UncaughtHandler {
        self.uncaught
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_uncaught_handler(&self, handler: UncaughtHandler) {
        *self.uncaught.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Starts listening on `address`.
    ///
    /// # Returns
    ///
    /// `true` once the socket is listening, `false` if it could not be bound.
    /// A failed bind leaves the manager usable.
    pub async fn bind(self: &Arc<Self>, address: SocketAddr) -> bool {
        let listener = match TcpListener::bind(address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("❌ Failed to bind {}: {}", address, e);
                return false;
            }
        };
        let local = listener.local_addr().unwrap_or(address);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(local);
        info!("🚀 Listening for sessions on {}", local);

        let manager = Arc::clone(self);
        let shutdown = self.shutdown.subscribe();
        self.track(tokio::spawn(manager.accept_loop(listener, local, shutdown)));
        true
    }

    /// Address of the first bound listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .copied()
    }

    async fn accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        local: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let manager = Arc::clone(&self);
                        let shutdown = self.shutdown.subscribe();
                        self.track(tokio::spawn(handle_connection(manager, stream, remote, shutdown)));
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }
        }
        info!("🛑 Listener on {} stopped", local);
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Raises [`SessionConnectedEvent`] for a freshly accepted session and
    /// registers it when the event completes uncancelled.
    pub(crate) fn add(self: &Arc<Self>, session: &Arc<Session>) {
        let manager = Arc::clone(self);
        self.events.invoke_async_event_with(
            SessionConnectedEvent::new(Arc::clone(session)),
            move |event| manager.on_connected(event),
        );
    }

    fn on_connected(&self, event: SessionConnectedEvent) {
        let session = Arc::clone(event.session());
        if event.is_cancelled() {
            session.disconnect("<Cancelled>");
            return;
        }
        self.sessions.insert(session.id(), Arc::clone(&session));
        debug!("✅ Session {} registered", session.id());
        // The connection may have dropped while the event was in flight.
        if !session.is_active() {
            self.remove(&session);
        }
    }

    /// Takes a session out of the registry and raises [`SessionClosedEvent`].
    pub(crate) fn remove(&self, session: &Arc<Session>) {
        if self.sessions.remove(&session.id()).is_some() {
            info!("👋 Session {} closed", session.id());
            self.events
                .invoke_async_event(SessionClosedEvent::new(Arc::clone(session)));
        }
    }

    pub fn session(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Every registered session, in no particular order.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn matching(&self, predicate: impl Fn(&Session) -> bool) -> Vec<Arc<Session>> {
        self.sessions()
            .into_iter()
            .filter(|session| predicate(session.as_ref()))
            .collect()
    }

    pub fn disconnect(&self, predicate: impl Fn(&Session) -> bool, reason: &str) {
        for session in self.matching(predicate) {
            session.disconnect(reason);
        }
    }

    pub fn send(&self, predicate: impl Fn(&Session) -> bool, message: Arc<dyn Message>, urgent: bool) {
        for session in self.matching(predicate) {
            if let Err(e) = session.send(Arc::clone(&message), urgent) {
                warn!(session = %session.id(), "Failed to send {}: {}", message.short_name(), e);
            }
        }
    }

    pub fn send_all(&self, predicate: impl Fn(&Session) -> bool, messages: &[Arc<dyn Message>]) {
        for session in self.matching(predicate) {
            session.send_all(messages.iter().cloned());
        }
    }

    /// Pulses every registered session. Driven by the tick loop.
    pub fn pulse(&self) {
        for session in self.sessions() {
            session.pulse();
        }
    }

    /// Disconnects every session with `reason`, closes the listeners and
    /// waits for every connection task to finish. The manager may be bound
    /// again afterwards.
    pub async fn stop(&self, reason: &str) {
        info!("🛑 Stopping session manager: {}", reason);
        self.disconnect(ALL, reason);
        self.shutdown.send_replace(true);

        // A listener may hand off one last connection while it winds down.
        loop {
            let tasks: Vec<_> = self
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .collect();
            if tasks.is_empty() {
                break;
            }
            for result in join_all(tasks).await {
                if let Err(e) = result {
                    warn!("Connection task ended abnormally: {}", e);
                }
            }
        }
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.shutdown.send_replace(false);
        info!("✅ Session manager stopped");
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .field("listeners", &self.listeners.lock().map(|l| l.clone()).unwrap_or_default())
            .finish()
    }
}
