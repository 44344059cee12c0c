//! Connection handle
//!
//! `Socket` is a cheap, cloneable handle to one Socket.IO connection. The
//! connection itself is driven by a background worker task; the handle
//! registers handlers and queues commands for it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;
use uuid::Uuid;

use super::registry::{Event, HandlerId, HandlerRegistry};
use super::worker;
use crate::config::SocketOptions;
use crate::events::{self, UsageReport, UserJoinPayload};

/// Errors returned by handle operations
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("Connection is closed")]
    Closed,

    #[error("'{0}' is a reserved event name")]
    ReservedEvent(String),

    #[error("No acknowledgement within {0:?}")]
    AckTimeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for socket operations
pub type SocketResult<T> = Result<T, SocketError>;

/// Credentials sent with the Socket.IO handshake
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    /// Session token, if the user is signed in
    pub token: Option<String>,
    /// Id of the user opening the connection
    pub client_id: String,
}

impl AuthContext {
    /// Build the auth context for a user
    pub fn new(token: Option<&str>, client_id: &str) -> Self {
        Self {
            token: token.map(str::to_string),
            client_id: client_id.to_string(),
        }
    }

    /// JSON form attached to the CONNECT packet
    pub fn to_value(&self) -> Value {
        json!({
            "token": self.token,
            "client_id": self.client_id,
        })
    }
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// Instructions from handles to the connection worker
#[derive(Debug)]
pub(crate) enum Command {
    Emit {
        event: String,
        args: Vec<Value>,
        ack: Option<oneshot::Sender<Vec<Value>>>,
    },
    Ack {
        id: u64,
        args: Vec<Value>,
    },
    Close,
}

/// State shared between the handles and the worker
pub(crate) struct Shared {
    pub(crate) instance_id: Uuid,
    pub(crate) options: SocketOptions,
    pub(crate) auth: AuthContext,
    pub(crate) registry: HandlerRegistry,
    sid: RwLock<Option<String>>,
    connected: AtomicBool,
    finished: watch::Sender<bool>,
    pending_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

impl Shared {
    pub(crate) fn set_connected(&self, sid: Option<String>) {
        self.connected.store(sid.is_some(), Ordering::SeqCst);
        *self.sid.write().unwrap_or_else(PoisonError::into_inner) = sid;
    }

    pub(crate) fn dispatch(&self, event: &Event) {
        if self.registry.dispatch(event) == 0 {
            debug!("No handler for event '{}'", event.name);
        }
    }

    pub(crate) fn mark_finished(&self) {
        self.set_connected(None);
        self.finished.send_replace(true);
    }
}

/// Handle to one real-time connection
///
/// Clones refer to the same connection; equality is identity. The
/// connection stays up until [`close`](Self::close) is called or every
/// handle has been dropped.
#[derive(Clone)]
pub struct Socket {
    shared: Arc<Shared>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl Socket {
    /// Create a handle without connecting
    ///
    /// Register handlers, then call [`open`](Self::open) to start the
    /// connection so no early event is missed.
    pub fn new(options: SocketOptions, auth: AuthContext) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (finished, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                instance_id: Uuid::new_v4(),
                options,
                auth,
                registry: HandlerRegistry::new(),
                sid: RwLock::new(None),
                connected: AtomicBool::new(false),
                finished,
                pending_rx: Mutex::new(Some(cmd_rx)),
            }),
            cmd_tx,
        }
    }

    /// Start the background connection worker
    ///
    /// Must be called from within a tokio runtime. Returns `false` if the
    /// worker was already started.
    pub fn open(&self) -> bool {
        let cmd_rx = self
            .shared
            .pending_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match cmd_rx {
            Some(cmd_rx) => {
                let shared = Arc::clone(&self.shared);
                tokio::spawn(worker::run(shared, cmd_rx));
                true
            }
            None => false,
        }
    }

    /// Register a handler for an event
    pub fn on<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared.registry.register(event, Arc::new(handler))
    }

    /// Remove a previously registered handler
    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        self.shared.registry.remove(event, id)
    }

    /// Emit an event with a single payload argument
    ///
    /// Events emitted while disconnected are sent after the next successful
    /// connection, in order. That buffer has no size limit, so a socket that
    /// keeps failing to reconnect holds every emit made in the meantime;
    /// socket.io's own send buffer behaves the same way.
    pub fn emit(&self, event: &str, data: Value) -> SocketResult<()> {
        self.emit_args(event, vec![data], None)
    }

    /// Emit an event and wait for the server's acknowledgement
    pub async fn emit_with_ack(
        &self,
        event: &str,
        data: Value,
        timeout: Duration,
    ) -> SocketResult<Vec<Value>> {
        let (tx, rx) = oneshot::channel();
        self.emit_args(event, vec![data], Some(tx))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(args)) => Ok(args),
            Ok(Err(_)) => Err(SocketError::Closed),
            Err(_) => Err(SocketError::AckTimeout(timeout)),
        }
    }

    /// Answer a server event that asked for an acknowledgement
    pub fn ack(&self, id: u64, args: Vec<Value>) -> SocketResult<()> {
        self.send_command(Command::Ack { id, args })
    }

    /// Close the connection and stop reconnecting
    ///
    /// Idempotent. A connected socket receives a `disconnect` event with
    /// reason `io client disconnect`.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }

    /// Wait until the connection worker has stopped
    ///
    /// Returns immediately if the worker already stopped. Never returns for
    /// a handle that was not opened.
    pub async fn closed(&self) {
        let mut finished = self.shared.finished.subscribe();
        let _ = finished.wait_for(|done| *done).await;
    }

    /// Announce the user to the server (`user-join`)
    pub fn join_user(&self) -> SocketResult<()> {
        let payload = UserJoinPayload {
            auth: self.shared.auth.clone(),
        };
        self.emit(events::USER_JOIN, serde_json::to_value(payload)?)
    }

    /// Report that a model is in use (`usage`)
    pub fn report_usage(&self, report: &UsageReport) -> SocketResult<()> {
        self.emit(events::USAGE, serde_json::to_value(report)?)
    }

    /// Ask the server to broadcast the current user count (`user-count`)
    pub fn request_user_count(&self) -> SocketResult<()> {
        self.emit_args(events::USER_COUNT, Vec::new(), None)
    }

    /// Options the connection was built with
    pub fn options(&self) -> &SocketOptions {
        &self.shared.options
    }

    /// Credentials sent on every handshake
    pub fn auth(&self) -> &AuthContext {
        &self.shared.auth
    }

    /// Server-assigned session id while connected
    pub fn id(&self) -> Option<String> {
        self.shared
            .sid
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the namespace handshake has completed
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Local identifier distinguishing this connection from others
    pub fn instance_id(&self) -> Uuid {
        self.shared.instance_id
    }

    /// Run local handlers for an event as if it had been received
    #[cfg(test)]
    pub(crate) fn dispatch(&self, event: &Event) {
        self.shared.dispatch(event);
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    fn emit_args(
        &self,
        event: &str,
        args: Vec<Value>,
        ack: Option<oneshot::Sender<Vec<Value>>>,
    ) -> SocketResult<()> {
        if events::RESERVED_EVENTS.contains(&event) {
            return Err(SocketError::ReservedEvent(event.to_string()));
        }
        self.send_command(Command::Emit {
            event: event.to_string(),
            args,
            ack,
        })
    }

    fn send_command(&self, command: Command) -> SocketResult<()> {
        if *self.shared.finished.borrow() {
            return Err(SocketError::Closed);
        }
        self.cmd_tx.send(command).map_err(|_| SocketError::Closed)
    }
}

impl PartialEq for Socket {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Socket {}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("instance_id", &self.shared.instance_id)
            .field("base_url", &self.shared.options.base_url.as_str())
            .field("connected", &self.is_connected())
            .finish()
    }
}
