//! Feed client connection lifecycle
//!
//! `start()` opens the transport and spawns the receive task, which sends the
//! subscribe control frames and then hands every inbound record to the
//! handler. `close()` tears down exactly once, in a fixed order:
//! heartbeat-off frame, `on_close`, stop flag, join receive task, close
//! transport, close log writer. A transport or decode failure on the receive
//! task runs the same teardown from the task itself (minus the join).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{DecodePolicy, FeedConfig};
use crate::error::{FeedError, TransportError};
use crate::handler::FeedHandler;
use crate::message::{decode_frame, MessageKind, RawRecord};
use crate::metrics::FeedMetrics;
use crate::transport::{Connect, ControlFrame, FeedTransport};
use crate::writer::LogWriter;

const FEED_NAME: &str = "gdax";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Idle = 0,
    Connecting = 1,
    Subscribed = 2,
    Running = 3,
    Closing = 4,
    Stopped = 5,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Idle,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Subscribed,
            3 => ConnectionState::Running,
            4 => ConnectionState::Closing,
            _ => ConnectionState::Stopped,
        }
    }

    /// States `close()` can tear down from.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Subscribed | ConnectionState::Running
        )
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Idle as u8))
    }

    fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Move an active state to `Closing`. Only one caller ever wins.
    fn begin_close(&self) -> bool {
        let mut current = self.0.load(Ordering::SeqCst);
        loop {
            if !ConnectionState::from_u8(current).is_active() {
                return false;
            }
            match self.0.compare_exchange(
                current,
                ConnectionState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Stop flag shared between the owning task and the receive task.
///
/// Starts out stopped; the client clears it when the receive task starts.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    pub fn request_stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    fn clear(&self) {
        self.tx.send_replace(false);
    }

    /// Resolve once the flag is set.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            let stopped = *rx.borrow_and_update();
            if stopped {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State touched by both the owning task and the receive task.
struct Shared<T, H> {
    config: FeedConfig,
    handler: Mutex<H>,
    stop: StopSignal,
    state: StateCell,
    connected: Arc<AtomicBool>,
    transport: RwLock<Option<Arc<T>>>,
    log: Mutex<Option<LogWriter>>,
    metrics: FeedMetrics,
    /// Held while sending control frames; true once heartbeat-on went out.
    control: tokio::sync::Mutex<bool>,
}

impl<T: FeedTransport, H: FeedHandler> Shared<T, H> {
    fn handler(&self) -> MutexGuard<'_, H> {
        lock(&self.handler)
    }

    fn transport(&self) -> Result<Arc<T>, TransportError> {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    fn set_transport(&self, transport: Option<Arc<T>>) -> Option<Arc<T>> {
        let mut guard = self.transport.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, transport)
    }

    async fn send_frame(&self, frame: ControlFrame) -> Result<(), TransportError> {
        let transport = self.transport()?;
        let text = frame.to_text()?;
        debug!(frame = frame.name(), text = %text, "Sending control frame");
        transport.send(text).await?;
        self.metrics.inc_control_frame(frame.name());
        Ok(())
    }

    /// Receive task body.
    async fn run(&self) {
        match self.subscribe().await {
            Ok(true) => self.listen().await,
            Ok(false) => debug!("Close requested before subscribing"),
            Err(e) => {
                self.fail(FeedError::Transport(e), "transport").await;
                return;
            }
        }
        debug!("Receive task exiting");
    }

    /// Send the subscribe frames. Returns false without sending anything when
    /// a close has already started.
    async fn subscribe(&self) -> Result<bool, TransportError> {
        let mut heartbeat_on = self.control.lock().await;
        if self.stop.is_stopped() || self.state.get() != ConnectionState::Connecting {
            return Ok(false);
        }

        self.send_frame(ControlFrame::subscribe(&self.config.products))
            .await?;
        if self.config.heartbeat() {
            self.send_frame(ControlFrame::Heartbeat { on: true }).await?;
            *heartbeat_on = true;
        }

        if self
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Subscribed)
        {
            self.connected.store(true, Ordering::SeqCst);
            self.metrics.set_connected();
            info!(products = ?self.config.products, mode = ?self.config.mode, "Subscribed to GDAX feed");
        }
        Ok(true)
    }

    async fn listen(&self) {
        while !self.stop.is_stopped() {
            let transport = match self.transport() {
                Ok(transport) => transport,
                Err(_) => break,
            };

            let frame = tokio::select! {
                biased;
                _ = self.stop.stopped() => break,
                frame = transport.receive() => frame,
            };

            let text = match frame {
                Ok(text) => text,
                Err(e) => {
                    self.fail(FeedError::Transport(e), "transport").await;
                    break;
                }
            };

            match decode_frame(&text) {
                Ok(record) => {
                    self.state
                        .transition(ConnectionState::Subscribed, ConnectionState::Running);
                    self.dispatch(&record);
                }
                Err(e) if self.config.decode_policy == DecodePolicy::Skip => {
                    debug!(bytes = text.len(), "Skipping undecodable frame");
                    self.report(&FeedError::Decode(e), "decode");
                }
                Err(e) => {
                    self.fail(FeedError::Decode(e), "decode").await;
                    break;
                }
            }
        }
    }

    fn dispatch(&self, record: &RawRecord) {
        let message_type = record
            .get("type")
            .and_then(|v| v.as_str())
            .and_then(MessageKind::from_type)
            .map(MessageKind::as_str)
            .unwrap_or("unknown");
        self.metrics.inc_message(message_type);

        let result = {
            let mut log = lock(&self.log);
            let mut handler = self.handler();
            handler.on_message(record, log.as_mut())
        };
        if let Err(e) = result {
            self.report(&e, "handler");
        }
    }

    fn report(&self, err: &FeedError, class: &str) {
        self.metrics.inc_error(class);
        self.handler().on_error(err);
    }

    /// Report a fatal error from the receive task and tear down.
    async fn fail(&self, err: FeedError, class: &str) {
        warn!(error = %err, "Feed connection failed");
        self.report(&err, class);
        if self.state.begin_close() {
            if let Err(e) = self.teardown(None).await {
                warn!(error = %e, "Teardown after failure did not complete cleanly");
            }
        }
    }

    /// Caller must have won `begin_close`.
    async fn teardown(&self, task: Option<JoinHandle<()>>) -> Result<(), FeedError> {
        let mut result: Result<(), FeedError> = Ok(());

        {
            let mut heartbeat_on = self.control.lock().await;
            if *heartbeat_on {
                if let Err(e) = self.send_frame(ControlFrame::Heartbeat { on: false }).await {
                    warn!(error = %e, "Failed to send heartbeat-off frame");
                }
                *heartbeat_on = false;
            }
        }

        self.handler().on_close();
        self.stop.request_stop();

        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Receive task did not exit cleanly");
            }
        }

        if let Some(transport) = self.set_transport(None) {
            if let Err(e) = transport.close().await {
                warn!(error = %e, "Failed to close transport");
                result = Err(e.into());
            }
        }

        let log = lock(&self.log).take();
        if let Some(mut log) = log {
            if let Err(e) = log.close() {
                warn!(error = %e, "Failed to close feed log");
                if result.is_ok() {
                    result = Err(e.into());
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        self.metrics.set_disconnected();
        self.state.set(ConnectionState::Stopped);
        info!("GDAX feed client stopped");
        result
    }
}

/// Streaming client for the GDAX feed.
pub struct FeedClient<C: Connect, H: FeedHandler> {
    connector: C,
    shared: Arc<Shared<C::Transport, H>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connect, H: FeedHandler> FeedClient<C, H> {
    /// Create a client. Opens the log writer when saving is configured.
    pub fn new(config: FeedConfig, connector: C, handler: H) -> Result<Self, FeedError> {
        let log = match &config.save {
            Some(save) => Some(LogWriter::open(
                &save.directory,
                save.file_prefix.clone(),
                save.max_bytes,
            )?),
            None => None,
        };

        Ok(Self {
            connector,
            shared: Arc::new(Shared {
                config,
                handler: Mutex::new(handler),
                stop: StopSignal::new(),
                state: StateCell::new(),
                connected: Arc::new(AtomicBool::new(false)),
                transport: RwLock::new(None),
                log: Mutex::new(log),
                metrics: FeedMetrics::new(FEED_NAME),
                control: tokio::sync::Mutex::new(false),
            }),
            task: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stop.is_stopped()
    }

    /// Returns a handle to the subscribed status
    pub fn connected_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shared.connected)
    }

    /// Run `f` against the handler while holding its lock.
    pub fn with_handler<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.shared.handler())
    }

    /// Open the connection and spawn the receive task.
    ///
    /// A connect failure is reported through `on_error`, followed by teardown,
    /// and returned.
    pub async fn start(&self) -> Result<(), FeedError> {
        if !self
            .shared
            .state
            .transition(ConnectionState::Idle, ConnectionState::Connecting)
        {
            return Err(FeedError::AlreadyStarted);
        }

        self.shared.handler().on_open();

        let transport = match self.connector.connect(&self.shared.config.url).await {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                let err = FeedError::Transport(e);
                self.shared.fail_start(&err).await;
                return Err(err);
            }
        };
        info!(url = %self.shared.config.url, "Connected to GDAX feed");

        self.shared.set_transport(Some(transport));
        self.shared.stop.clear();

        // close() may have run while we were connecting
        if self.shared.state.get() != ConnectionState::Connecting {
            self.shared.stop.request_stop();
            if let Some(transport) = self.shared.set_transport(None) {
                transport.close().await.ok();
            }
            return Err(TransportError::ConnectionClosed.into());
        }

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move { shared.run().await });
        *lock(&self.task) = Some(handle);
        Ok(())
    }

    /// Tear the connection down. Only the first call has side effects; later
    /// calls (or calls racing a teardown already in progress) just wait for the
    /// receive task to exit.
    pub async fn close(&self) -> Result<(), FeedError> {
        let task = lock(&self.task).take();
        if !self.shared.state.begin_close() {
            if let Some(task) = task {
                task.await.ok();
            }
            return Ok(());
        }

        info!("Closing GDAX feed client");
        self.shared.teardown(task).await
    }

    /// Resolve once the stop flag is set, either by `close()` or by a fatal
    /// error on the receive task. Resolves immediately before `start()`.
    pub async fn wait_for_stop(&self) {
        self.shared.stop.stopped().await
    }
}

impl<T: FeedTransport, H: FeedHandler> Shared<T, H> {
    async fn fail_start(&self, err: &FeedError) {
        warn!(error = %err, url = %self.config.url, "Failed to connect to GDAX feed");
        self.report(err, "transport");
        if self.state.begin_close() {
            if let Err(e) = self.teardown(None).await {
                warn!(error = %e, "Teardown after failed connect did not complete cleanly");
            }
        }
    }
}
