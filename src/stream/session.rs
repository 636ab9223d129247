//! Long-lived user stream session.
//!
//! `StreamSession` owns the connection lifecycle: it fetches the caller's
//! identity, opens the stream, splits the body into frames, classifies each
//! record against the identity, and publishes a [`Notification`] per frame.
//! A heartbeat deadline detects stalled connections; when it fires and
//! auto-reconnect is enabled the session reconnects on its own. Every other
//! disconnect waits for an explicit [`StreamSession::start`].

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::auth::{Credentials, CredentialsError};
use crate::stream::event::{classify, Category, Record};
use crate::stream::frame::{Frame, FrameDecoder, FramingMode};
use crate::stream::heartbeat::HeartbeatMonitor;
use crate::stream::transport::{Identity, Transport, TransportError};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SessionDefaults;

impl SessionDefaults {
    pub const AUTO_RECONNECT: bool = true;
    /// Roughly two server heartbeat intervals plus margin.
    pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(40);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Session configuration.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Reconnect immediately after a heartbeat timeout.
    pub auto_reconnect: bool,
    /// Silence allowed before the connection is treated as dead.
    pub heartbeat_timeout: Duration,
    /// Bound applied separately to the identity fetch and the stream open.
    /// `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    pub framing: FramingMode,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: SessionDefaults::AUTO_RECONNECT,
            heartbeat_timeout: SessionDefaults::HEARTBEAT_TIMEOUT,
            connect_timeout: Some(SessionDefaults::CONNECT_TIMEOUT),
            framing: FramingMode::default(),
        }
    }
}

impl SessionOptions {
    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    pub fn with_heartbeat_timeout(mut self, heartbeat_timeout: Duration) -> Self {
        self.heartbeat_timeout = heartbeat_timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Option<Duration>) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_framing(mut self, framing: FramingMode) -> Self {
        self.framing = framing;
        self
    }
}

/// Lifecycle phase of a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Idle,
    /// Identity fetch or stream open in flight.
    Connecting,
    Streaming,
    Disconnected,
}

/// Why a connection attempt ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DisconnectReason {
    /// The caller stopped the session.
    Stopped,
    IdentityFailed,
    ConnectFailed,
    /// The server closed or ended the response.
    StreamEnded,
    /// The response was aborted or failed mid-stream.
    StreamError,
    HeartbeatTimeout,
}

/// Item published by a session.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    Connected,
    Disconnected(DisconnectReason),
    Heartbeat,
    /// Frame that failed to decode.
    Garbage(String),
    /// Decoded record and its category.
    Event {
        category: Category,
        record: Box<Record>,
    },
}

impl Notification {
    /// Wire-style notification name, e.g. `message.reply` or `garbage`.
    pub fn name(&self) -> &str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected(_) => "disconnected",
            Self::Heartbeat => "heartbeat",
            Self::Garbage(_) => "garbage",
            Self::Event { category, .. } => category.as_str(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
}

/// Stream session and its notification receiver.
///
/// Dropping the session stops it.
pub struct StreamSession {
    handle: SessionHandle,
    notifications: mpsc::UnboundedReceiver<Notification>,
}

impl StreamSession {
    /// Creates an idle session with default options.
    pub fn new<T: Transport>(
        transport: T,
        credentials: Credentials,
    ) -> Result<Self, SessionError> {
        Self::with_options(transport, credentials, SessionOptions::default())
    }

    /// Creates an idle session. Fails when any credential field is empty.
    pub fn with_options<T: Transport>(
        transport: T,
        credentials: Credentials,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        credentials.validate()?;

        let (notify_tx, notifications) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            transport: Arc::new(transport),
            credentials,
            options,
            notify_tx,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                identity: None,
                generation: 0,
                worker: None,
            }),
        });

        Ok(Self {
            handle: SessionHandle { shared },
            notifications,
        })
    }

    /// Returns a cloneable control handle.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// See [`SessionHandle::start`].
    pub fn start(&self) -> bool {
        self.handle.start()
    }

    /// See [`SessionHandle::stop`].
    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    pub fn is_streaming(&self) -> bool {
        self.handle.is_streaming()
    }

    pub fn identity(&self) -> Option<Arc<Identity>> {
        self.handle.identity()
    }

    /// Receives the next notification. Pends while the session is idle.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.notifications.recv().await
    }

    /// Returns a notification if one is already queued.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.notifications.try_recv().ok()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.handle.stop();
    }
}

/// Cloneable control surface of a [`StreamSession`].
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Starts a connection attempt in a background task.
    ///
    /// Returns `false` without doing anything while an attempt is already
    /// connecting or streaming, or when called outside a Tokio runtime.
    pub fn start(&self) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            warn!(event = "session_start_rejected", reason = "no tokio runtime");
            return false;
        };

        let mut inner = self.shared.lock();
        if matches!(
            inner.state,
            SessionState::Connecting | SessionState::Streaming
        ) {
            return false;
        }

        inner.generation += 1;
        inner.state = SessionState::Connecting;
        inner.identity = None;
        let generation = inner.generation;
        let shared = Arc::clone(&self.shared);
        inner.worker = Some(runtime.spawn(run_worker(shared, generation)));
        debug!(event = "session_start", generation);
        true
    }

    /// Tears down the live connection and its heartbeat deadline.
    ///
    /// Publishes `Disconnected(Stopped)` when an attempt was live. Calling it
    /// again, or on a session that never started, does nothing. No
    /// notification from the torn-down connection is published after this
    /// returns.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        let Some(worker) = inner.worker.take() else {
            return;
        };
        worker.abort();
        inner.generation += 1;

        let was_live = matches!(
            inner.state,
            SessionState::Connecting | SessionState::Streaming
        );
        inner.state = SessionState::Disconnected;
        if was_live {
            info!(event = "stream_disconnected", reason = ?DisconnectReason::Stopped);
            self.shared
                .publish(Notification::Disconnected(DisconnectReason::Stopped));
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    /// Identity fetched by the latest attempt. Cleared when a new attempt begins.
    pub fn identity(&self) -> Option<Arc<Identity>> {
        self.shared.lock().identity.clone()
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    options: SessionOptions,
    notify_tx: mpsc::UnboundedSender<Notification>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: SessionState,
    identity: Option<Arc<Identity>>,
    /// Bumped on every start and stop; workers with an older value are stale.
    generation: u64,
    worker: Option<JoinHandle<()>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, notification: Notification) {
        let _ = self.notify_tx.send(notification);
    }

    /// Publishes unless the attempt has been superseded.
    fn publish_current(&self, generation: u64, notification: Notification) -> bool {
        let inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        self.publish(notification);
        true
    }
}

async fn run_worker(shared: Arc<Shared>, generation: u64) {
    loop {
        let reason = run_connection(&shared, generation).await;
        let reconnect =
            reason == DisconnectReason::HeartbeatTimeout && shared.options.auto_reconnect;

        {
            let mut inner = shared.lock();
            if inner.generation != generation {
                return;
            }
            if reconnect {
                inner.state = SessionState::Connecting;
                inner.identity = None;
            } else {
                inner.state = SessionState::Disconnected;
                inner.worker = None;
            }
            info!(event = "stream_disconnected", reason = ?reason);
            shared.publish(Notification::Disconnected(reason));
        }

        if !reconnect {
            return;
        }
        info!(event = "auto_reconnect", generation);
    }
}

/// Runs one connection attempt to completion.
async fn run_connection(shared: &Shared, generation: u64) -> DisconnectReason {
    let options = &shared.options;

    let identity = match bounded(
        options.connect_timeout,
        "identity fetch",
        shared.transport.fetch_identity(&shared.credentials),
    )
    .await
    {
        Ok(identity) => identity,
        Err(err) => {
            warn!(event = "identity_fetch_failed", error = %err);
            return DisconnectReason::IdentityFailed;
        }
    };

    let mut body = match bounded(
        options.connect_timeout,
        "stream open",
        shared.transport.open_stream(&shared.credentials),
    )
    .await
    {
        Ok(body) => body,
        Err(err) => {
            warn!(event = "stream_open_failed", error = %err);
            return DisconnectReason::ConnectFailed;
        }
    };

    let self_id = identity.id.clone();
    let mut decoder = FrameDecoder::new(options.framing);
    let mut heartbeat = HeartbeatMonitor::new();
    {
        let mut inner = shared.lock();
        if inner.generation != generation {
            return DisconnectReason::Stopped;
        }
        inner.identity = Some(Arc::new(identity));
        inner.state = SessionState::Streaming;
        heartbeat.arm(options.heartbeat_timeout);
        shared.publish(Notification::Connected);
    }
    info!(event = "stream_connected", user_id = %self_id);

    loop {
        tokio::select! {
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    if bytes.is_empty() {
                        continue;
                    }
                    heartbeat.arm(options.heartbeat_timeout);
                    for frame in decoder.feed(&bytes) {
                        let notification = frame_notification(frame, &self_id);
                        if !shared.publish_current(generation, notification) {
                            return DisconnectReason::Stopped;
                        }
                    }
                }
                Some(Err(err)) => {
                    warn!(event = "stream_failed", error = %err);
                    return DisconnectReason::StreamError;
                }
                None => return DisconnectReason::StreamEnded,
            },
            () = heartbeat.expired() => {
                warn!(
                    event = "heartbeat_timeout",
                    timeout_ms = u64::try_from(options.heartbeat_timeout.as_millis())
                        .unwrap_or(u64::MAX)
                );
                return DisconnectReason::HeartbeatTimeout;
            }
        }
    }
}

fn frame_notification(frame: Frame, self_id: &str) -> Notification {
    match frame {
        Frame::Heartbeat => {
            trace!(event = "heartbeat");
            Notification::Heartbeat
        }
        Frame::Garbage(residual) => {
            debug!(event = "frame_garbage", len = residual.len());
            Notification::Garbage(residual)
        }
        Frame::Record(mut record) => {
            let category = classify(&record, self_id);
            if category.has_message_text() {
                record.decode_text_entities();
            }
            trace!(event = "record", category = %category);
            Notification::Event { category, record }
        }
    }
}

async fn bounded<T, F>(
    limit: Option<Duration>,
    operation: &'static str,
    future: F,
) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| TransportError::Timeout(operation))?,
        None => future.await,
    }
}
