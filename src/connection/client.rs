//! Connection client
//!
//! Owns one logical connection to the device server. Outbound messages are
//! stamped with the endpoint, the device id and a fresh correlation id.
//! Inbound messages are matched against the pending request registry and
//! then handed to the connection's [`ConnectionObserver`].
//!
//! Each connection attempt gets a generation number. Frames, opens and
//! closes belonging to an older generation are ignored, so a reconnect never
//! sees traffic from the connection it replaced.

use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::registry::{ConnectionId, PendingRequests, ResponseCallback};
use super::transport::{Connector, Frame, NORMAL_CLOSURE, TransportHandle, WebSocketConnector};
use crate::config::ClientConfig;
use crate::error::{DialogError, DialogResult};
use crate::value_objects::Message;

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Never connected
    Disconnected,
    Connecting,
    Open,
    /// Closed by either side or failed to open
    Closed,
}

/// Lifecycle and traffic notifications
///
/// All methods default to doing nothing. Calls happen on the connection's
/// receive task; a panic is logged and does not stop the connection.
pub trait ConnectionObserver: Send + Sync {
    fn on_open(&self) {}

    /// The connection ended, with the close code when one is known
    fn on_close(&self, _code: Option<u16>) {}

    /// Control message, never correlated
    fn on_control(&self, _message: &Message) {}

    /// Any other inbound message, after its response callback ran
    fn on_message(&self, _message: &Message) {}
}

struct NoopObserver;

impl ConnectionObserver for NoopObserver {}

struct Link {
    state: ConnectionState,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    id: ConnectionId,
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    registry: PendingRequests,
    observer: RwLock<Arc<dyn ConnectionObserver>>,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Link>,
}

/// Builder for [`ConnectionClient`]
pub struct ConnectionBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    registry: Option<PendingRequests>,
    observer: Option<Arc<dyn ConnectionObserver>>,
}

impl ConnectionBuilder {
    /// Transport to use instead of WebSocket
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Registry to use instead of the process-wide one
    pub fn registry(mut self, registry: PendingRequests) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> ConnectionClient {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        ConnectionClient {
            inner: Arc::new(Inner {
                id: ConnectionId::new(),
                config: self.config,
                connector: self.connector.unwrap_or_else(|| Arc::new(WebSocketConnector)),
                registry: self.registry.unwrap_or_else(PendingRequests::global),
                observer: RwLock::new(self.observer.unwrap_or_else(|| Arc::new(NoopObserver))),
                state,
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    outbound: None,
                    task: None,
                }),
            }),
        }
    }
}

/// Handle to a connection; clones share it
#[derive(Clone)]
pub struct ConnectionClient {
    inner: Arc<Inner>,
}

/// Non-owning handle to a connection
#[derive(Clone)]
pub struct WeakConnectionClient {
    inner: Weak<Inner>,
}

impl WeakConnectionClient {
    pub fn upgrade(&self) -> Option<ConnectionClient> {
        self.inner.upgrade().map(|inner| ConnectionClient { inner })
    }
}

impl ConnectionClient {
    /// WebSocket client using the process-wide registry
    pub fn new(config: ClientConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ConnectionBuilder {
        ConnectionBuilder {
            config,
            connector: None,
            registry: None,
            observer: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn device_id(&self) -> &str {
        &self.inner.config.device_id
    }

    pub fn registry(&self) -> &PendingRequests {
        &self.inner.registry
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the connection reaches `state`
    pub async fn wait_for(&self, state: ConnectionState) {
        let mut states = self.inner.state.subscribe();
        // the sender lives as long as `self`
        let _reached = states.wait_for(|current| *current == state).await.is_ok();
    }

    /// Replace the observer receiving lifecycle and traffic notifications
    pub fn set_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        *self
            .inner
            .observer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = observer;
    }

    pub fn downgrade(&self) -> WeakConnectionClient {
        WeakConnectionClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Open the connection in the background
    ///
    /// Outcome is reported through the observer: `on_open` on success,
    /// `on_close` when the attempt fails. Does nothing while a connection is
    /// already open or opening. Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        self.start(false);
    }

    /// Drop the current connection without notifying `on_close` and open a
    /// new one
    pub fn reconnect(&self) {
        self.start(true);
    }

    /// Close the connection
    ///
    /// Requests still awaiting a response are abandoned and no further
    /// inbound message is delivered. `on_close` is notified with code 1000.
    pub fn disconnect(&self) {
        let task = {
            let mut link = self.inner.lock_link();
            if !matches!(link.state, ConnectionState::Connecting | ConnectionState::Open) {
                return;
            }
            link.generation += 1;
            self.inner.shut(&mut link);
            link.task.take()
        };
        if let Some(task) = task {
            task.abort();
        }

        info!("Connection {} closed by client", self.inner.id);
        self.inner.notify(|observer| observer.on_close(Some(NORMAL_CLOSURE)));
    }

    /// Send a message without expecting a response
    ///
    /// Returns the correlation id the message carried, or `None` when the
    /// connection is not open and nothing was sent.
    pub fn send(&self, endpoint: &str, payload: Value) -> Option<String> {
        self.inner.transmit(endpoint, payload, None)
    }

    /// Send a message and run `callback` with the response to it
    ///
    /// The callback runs at most once, on the receive task. It never runs if
    /// the connection closes first.
    pub fn request<F>(&self, endpoint: &str, payload: Value, callback: F) -> Option<String>
    where
        F: FnOnce(Message) + Send + 'static,
    {
        self.inner.transmit(endpoint, payload, Some(Box::new(callback)))
    }

    /// Send a message and wait for the response to it
    pub async fn call(&self, endpoint: &str, payload: Value) -> DialogResult<Message> {
        let (tx, rx) = oneshot::channel();
        let callback: ResponseCallback = Box::new(move |message| {
            let _delivered = tx.send(message).is_ok();
        });
        let request_id = self
            .inner
            .transmit(endpoint, payload, Some(callback))
            .ok_or_else(|| DialogError::NotConnected {
                endpoint: endpoint.to_string(),
            })?;

        let timeout = self.inner.config.request_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(DialogError::Abandoned { request_id }),
            Err(_) => {
                self.inner.registry.remove(&request_id);
                warn!("Call to {} timed out ({})", endpoint, request_id);
                Err(DialogError::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Sender bound to one endpoint
    pub fn stream(&self, endpoint: impl Into<String>) -> StreamSender {
        StreamSender {
            client: self.clone(),
            endpoint: endpoint.into(),
        }
    }

    fn start(&self, replace: bool) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Cannot connect {} outside a Tokio runtime: {}", self.inner.id, e);
                return;
            }
        };

        let previous = {
            let mut link = self.inner.lock_link();
            let active = matches!(link.state, ConnectionState::Connecting | ConnectionState::Open);
            if active && !replace {
                debug!("Connection {} already {:?}", self.inner.id, link.state);
                return;
            }
            if active {
                self.inner.shut(&mut link);
            }
            link.generation += 1;
            link.state = ConnectionState::Connecting;
            self.inner.state.send_replace(ConnectionState::Connecting);

            let generation = link.generation;
            let inner = Arc::clone(&self.inner);
            let task = runtime.spawn(async move { inner.run(generation).await });
            link.task.replace(task)
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl std::fmt::Debug for ConnectionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionClient")
            .field("id", &self.inner.id)
            .field("url", &self.inner.config.url())
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn lock_link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn observer(&self) -> Arc<dyn ConnectionObserver> {
        Arc::clone(&self.observer.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn notify<F>(&self, notification: F)
    where
        F: FnOnce(&dyn ConnectionObserver),
    {
        let observer = self.observer();
        if catch_unwind(AssertUnwindSafe(|| notification(observer.as_ref()))).is_err() {
            error!("Observer of connection {} panicked", self.id);
        }
    }

    /// Mark closed, drop the outbound queue and abandon owned requests
    fn shut(&self, link: &mut Link) {
        link.outbound = None;
        link.state = ConnectionState::Closed;
        self.state.send_replace(ConnectionState::Closed);
        let abandoned = self.registry.abandon(self.id);
        if abandoned > 0 {
            debug!("Connection {} abandoned {} pending request(s)", self.id, abandoned);
        }
    }

    fn transmit(&self, endpoint: &str, payload: Value, callback: Option<ResponseCallback>) -> Option<String> {
        // held while registering and queueing so a concurrent close cannot
        // orphan the entry
        let link = self.lock_link();
        let outbound = match (&link.state, &link.outbound) {
            (ConnectionState::Open, Some(outbound)) => outbound,
            _ => {
                debug!("Dropping message to {}, connection {:?}", endpoint, link.state);
                return None;
            }
        };

        let request_id = self.registry.allocate(self.id, callback);
        let message = Message::outbound(endpoint, self.config.device_id.as_str(), request_id.as_str(), payload);
        let sent = match message.to_json_string() {
            Ok(text) => outbound.send(text).is_ok(),
            Err(e) => {
                error!("Failed to encode message to {}: {}", endpoint, e);
                false
            }
        };
        if !sent {
            self.registry.remove(&request_id);
            return None;
        }

        trace!("Sent {} to {}", request_id, endpoint);
        Some(request_id)
    }

    async fn run(self: Arc<Self>, generation: u64) {
        let url = self.config.url();
        debug!("Connection {} connecting to {}", self.id, url);

        let TransportHandle { outbound, mut inbound } = match self.connector.connect(&url).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Connection {} failed to open: {}", self.id, e);
                self.close(generation, None);
                return;
            }
        };

        {
            let mut link = self.lock_link();
            if link.generation != generation {
                return;
            }
            link.outbound = Some(outbound);
            link.state = ConnectionState::Open;
            self.state.send_replace(ConnectionState::Open);
        }
        info!("Connection {} open to {}", self.id, url);
        self.notify(|observer| observer.on_open());

        let code = loop {
            match inbound.recv().await {
                Some(Frame::Text(text)) => {
                    if !self.is_current(generation) {
                        return;
                    }
                    self.receive(generation, &text);
                }
                Some(Frame::Close(code)) => break code,
                None => break None,
            }
        };
        self.close(generation, code);
    }

    fn is_current(&self, generation: u64) -> bool {
        let link = self.lock_link();
        link.generation == generation && link.state == ConnectionState::Open
    }

    /// Close initiated by the transport or a failed open
    fn close(&self, generation: u64, code: Option<u16>) {
        {
            let mut link = self.lock_link();
            if link.generation != generation {
                return;
            }
            link.generation += 1;
            link.task = None;
            self.shut(&mut link);
        }
        info!("Connection {} closed (code {:?})", self.id, code);
        self.notify(|observer| observer.on_close(code));
    }

    /// Parse and deliver one frame
    ///
    /// Skill code runs between the steps, so the generation is checked again
    /// before each delivery: a `disconnect` from a callback silences the rest
    /// of the frame.
    fn receive(&self, generation: u64, text: &str) {
        let message = match Message::from_json_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Connection {} discarding inbound frame: {}", self.id, e);
                return;
            }
        };

        if message.control {
            trace!("Connection {} received control message", self.id);
            if self.is_current(generation) {
                self.notify(|observer| observer.on_control(&message));
            }
            return;
        }

        if let Some(request_id) = message.request_id.as_deref() {
            match self.registry.take(request_id) {
                Some(callback) => {
                    let response = message.clone();
                    if catch_unwind(AssertUnwindSafe(move || callback(response))).is_err() {
                        error!("Response callback for {} panicked", request_id);
                    }
                }
                None => trace!("No pending request for {}", request_id),
            }
        }

        if !self.is_current(generation) {
            debug!("Connection {} closed while handling a frame", self.id);
            return;
        }
        self.notify(|observer| observer.on_message(&message));
    }
}

/// Sends successive messages to one endpoint
#[derive(Debug, Clone)]
pub struct StreamSender {
    client: ConnectionClient,
    endpoint: String,
}

impl StreamSender {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one chunk; `None` when the connection is not open
    pub fn send(&self, payload: Value) -> Option<String> {
        self.client.send(&self.endpoint, payload)
    }
}
