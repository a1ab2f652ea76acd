//! # tether-client
//!
//! Client side of the tether RPC runtime.
//!
//! A [`Client`] dials a tether server, performs the optional RSA+AES
//! handshake and credential exchange, then invokes named methods on named
//! services, receives results matched by correlation id, and dispatches
//! server-originated delegate invocations to locally registered callbacks.
//!
//! ```rust,no_run
//! use tether_client::{CallArg, Client, ClientConfig};
//!
//! # async fn run() -> Result<(), tether_proto::RemotingError> {
//! let client = Client::connect(ClientConfig::default()).await?;
//! let reply = client
//!     .invoke("Echo", "ping", vec![CallArg::value("s", "string", &"hi".to_string())])
//!     .await?;
//! let echoed: String = reply.value()?;
//! # Ok(()) }
//! ```

#![deny(unsafe_code)]

mod config;
mod handshake;

pub mod delegate;
pub mod pending;

pub use config::ClientConfig;
pub use delegate::{DelegateCallback, DelegateHandlers, RemoteDelegate};
pub use pending::{CallOutcome, PendingCalls};
pub use tether_proto::{
    CallContext, CallPhase, Cursor, Deserializable, ErrorKind, FaultRecord, RemotingError,
    Serializable,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tether_crypto::SessionCrypto;
use tether_proto::messages::{
    DelegatePlaceholder, GoodbyeMessage, MethodCallMessage, MethodCallResultMessage,
    OutParamMessage, ParamMessage,
};
use tether_proto::{CorrelationId, HandlerKey, SessionId};
use tether_wire::{open_envelope, seal_envelope, FrameReceiver, FrameSender, MessageKind, WireMessage};

// ─── Call arguments ──────────────────────────────────────────────────────────

/// The wire type name used for delegate-typed parameters.
pub const DELEGATE_TYPE: &str = "delegate";

/// One argument of an [`Client::invoke`] call.
pub enum CallArg {
    /// A serialized in-parameter.
    In {
        /// Parameter name.
        name: String,
        /// Serialized type name; must match the service descriptor.
        type_name: String,
        /// The serialized value.
        value: Vec<u8>,
    },
    /// A null in-parameter.
    Null {
        /// Parameter name.
        name: String,
        /// Serialized type name.
        type_name: String,
    },
    /// An out-parameter slot.
    Out {
        /// Parameter name.
        name: String,
        /// Serialized type name.
        type_name: String,
    },
    /// Subscribe a delegate: registers (or re-references) the handler and
    /// ships its key.
    Delegate {
        /// Parameter name.
        name: String,
        /// The delegate to register.
        delegate: RemoteDelegate,
    },
    /// Unsubscribe a delegate: ships the previously registered key and
    /// releases one reference once the call succeeds.
    Release {
        /// Parameter name.
        name: String,
        /// The delegate to release.
        delegate: RemoteDelegate,
    },
}

impl CallArg {
    /// A serialized value argument.
    pub fn value<T: Serializable>(
        name: impl Into<String>,
        type_name: impl Into<String>,
        value: &T,
    ) -> Self {
        Self::In { name: name.into(), type_name: type_name.into(), value: value.to_bytes() }
    }

    /// A null argument.
    pub fn null(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::Null { name: name.into(), type_name: type_name.into() }
    }

    /// An out-parameter slot.
    pub fn out(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::Out { name: name.into(), type_name: type_name.into() }
    }

    /// A delegate subscription argument.
    pub fn delegate(name: impl Into<String>, delegate: &RemoteDelegate) -> Self {
        Self::Delegate { name: name.into(), delegate: delegate.clone() }
    }

    /// A delegate release argument.
    pub fn release(name: impl Into<String>, delegate: &RemoteDelegate) -> Self {
        Self::Release { name: name.into(), delegate: delegate.clone() }
    }
}

/// Per-call options beyond the configured defaults.
#[derive(Clone, Default)]
pub struct InvokeOptions {
    /// Generic type arguments, by full type name.
    pub generic_arguments: Vec<String>,
    /// Per-call timeout override; `None` uses the configured default.
    pub timeout: Option<Duration>,
    /// Optional local cancellation. Cancelling completes the caller with
    /// `cancelled` and sends nothing to the server.
    pub cancel: Option<CancellationToken>,
    /// The target method is declared one-way: no response envelope exists,
    /// the call completes as soon as it is queued.
    pub one_way: bool,
}

/// A completed call's results.
#[derive(Debug)]
pub struct CallReply {
    result: MethodCallResultMessage,
}

impl CallReply {
    /// Whether the call returned null / void.
    pub fn is_void(&self) -> bool {
        self.result.is_return_null
    }

    /// Decode the return value.
    pub fn value<T: Deserializable>(&self) -> Result<T, RemotingError> {
        if self.result.is_return_null {
            return Err(RemotingError::new(
                ErrorKind::SerializationFailed,
                "call returned null",
            ));
        }
        T::from_bytes(&self.result.return_value).map_err(Into::into)
    }

    /// Decode an out-parameter by name; `Ok(None)` when null.
    pub fn out_param<T: Deserializable>(&self, name: &str) -> Result<Option<T>, RemotingError> {
        let param: &OutParamMessage = self
            .result
            .out_parameters
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| {
                RemotingError::new(
                    ErrorKind::SerializationFailed,
                    format!("no out-parameter named '{name}'"),
                )
            })?;
        if param.is_null {
            return Ok(None);
        }
        T::from_bytes(&param.value).map(Some).map_err(Into::into)
    }

    /// The raw result message.
    pub fn raw(&self) -> &MethodCallResultMessage {
        &self.result
    }
}

// ─── Client ──────────────────────────────────────────────────────────────────

struct Connection {
    session_id: SessionId,
    sender: FrameSender,
    crypto: Option<Arc<SessionCrypto>>,
    closed: CancellationToken,
}

impl Connection {
    fn is_alive(&self) -> bool {
        self.sender.is_open() && !self.closed.is_cancelled()
    }

    async fn send_sealed(
        &self,
        kind: MessageKind,
        correlation_id: Vec<u8>,
        error: bool,
        plaintext: Vec<u8>,
    ) -> Result<(), RemotingError> {
        let envelope =
            seal_envelope(kind, correlation_id, error, plaintext, self.crypto.as_deref())
                .map_err(|e| RemotingError::new(ErrorKind::CryptoFailed, e.to_string()))?;
        self.sender
            .send(envelope.encode())
            .await
            .map_err(|_| RemotingError::new(ErrorKind::ConnectionLost, "connection closed"))
    }
}

struct ClientInner {
    config: ClientConfig,
    conn: tokio::sync::Mutex<Option<Arc<Connection>>>,
    pending: Arc<PendingCalls>,
    handlers: Arc<DelegateHandlers>,
    directory_token: u64,
    disposed: AtomicBool,
}

/// A tether client session. Cheap to clone — internally Arc-wrapped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

enum DelegateOp {
    Subscribed(RemoteDelegate),
    Released(RemoteDelegate),
}

impl Client {
    // ── Connect ────────────────────────────────────────────────────────

    /// Dial the configured server and complete the handshake (and, when
    /// credentials are configured, the auth exchange).
    pub async fn connect(config: ClientConfig) -> Result<Self, RemotingError> {
        let established = handshake::establish(&config).await?;
        let directory_token = directory::register(config.channel_name.clone());

        let inner = Arc::new(ClientInner {
            config,
            conn: tokio::sync::Mutex::new(None),
            pending: Arc::new(PendingCalls::new()),
            handlers: Arc::new(DelegateHandlers::new()),
            directory_token,
            disposed: AtomicBool::new(false),
        });
        let client = Self { inner };
        client.install_connection(established).await;
        Ok(client)
    }

    async fn install_connection(&self, established: handshake::Established) -> Arc<Connection> {
        let conn = Arc::new(Connection {
            session_id: established.session_id,
            sender: established.sender,
            crypto: established.crypto,
            closed: CancellationToken::new(),
        });
        *self.inner.conn.lock().await = Some(conn.clone());
        spawn_recv_loop(self.inner.clone(), conn.clone(), established.receiver);
        conn
    }

    /// The current session id, if connected.
    pub async fn session_id(&self) -> Option<SessionId> {
        self.inner.conn.lock().await.as_ref().map(|c| c.session_id)
    }

    /// Whether the connection is currently alive.
    pub async fn is_connected(&self) -> bool {
        self.inner.conn.lock().await.as_ref().map(|c| c.is_alive()).unwrap_or(false)
    }

    async fn connection(&self) -> Result<Arc<Connection>, RemotingError> {
        let mut guard = self.inner.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            if conn.is_alive() {
                return Ok(conn.clone());
            }
        }
        if !self.inner.config.auto_reconnect {
            return Err(RemotingError::new(
                ErrorKind::NotConnected,
                "client is not connected",
            ));
        }

        log::info!("[tether] reconnecting to {}", self.inner.config.address());
        let established = handshake::establish(&self.inner.config).await?;
        let conn = Arc::new(Connection {
            session_id: established.session_id,
            sender: established.sender,
            crypto: established.crypto,
            closed: CancellationToken::new(),
        });
        *guard = Some(conn.clone());
        spawn_recv_loop(self.inner.clone(), conn.clone(), established.receiver);
        Ok(conn)
    }

    // ── Invoke ─────────────────────────────────────────────────────────

    /// Invoke `method` on the service registered as `service`.
    pub async fn invoke(
        &self,
        service: &str,
        method: &str,
        args: Vec<CallArg>,
    ) -> Result<CallReply, RemotingError> {
        self.invoke_with(service, method, args, InvokeOptions::default()).await
    }

    /// Invoke with explicit generic arguments, timeout or cancellation.
    pub async fn invoke_with(
        &self,
        service: &str,
        method: &str,
        args: Vec<CallArg>,
        options: InvokeOptions,
    ) -> Result<CallReply, RemotingError> {
        let conn = self.connection().await?;

        let (parameters, ops) = match self.marshal_args(args) {
            Ok(marshaled) => marshaled,
            Err(e) => return Err(e),
        };

        let message = MethodCallMessage {
            service_name: service.to_owned(),
            method_name: method.to_owned(),
            generic_arguments: options.generic_arguments.clone(),
            parameters,
            call_context: CallContext::snapshot(),
        };

        if options.one_way {
            let payload = self.inner.config.codec.encode_call(&message);
            return match conn.send_sealed(MessageKind::Call, Vec::new(), false, payload).await {
                Ok(()) => {
                    for op in &ops {
                        if let DelegateOp::Released(delegate) = op {
                            self.inner.handlers.confirm_release(delegate);
                        }
                    }
                    Ok(CallReply { result: MethodCallResultMessage::void() })
                }
                Err(e) => {
                    for op in &ops {
                        if let DelegateOp::Subscribed(delegate) = op {
                            self.inner.handlers.rollback_subscribe(delegate);
                        }
                    }
                    Err(e)
                }
            };
        }

        let outcome = self.send_and_wait(&conn, message, &options).await;

        match outcome {
            Ok(result) => {
                CallContext::merge_current(result.call_context.clone());
                for op in &ops {
                    if let DelegateOp::Released(delegate) = op {
                        self.inner.handlers.confirm_release(delegate);
                    }
                }
                Ok(CallReply { result })
            }
            Err(e) => {
                for op in &ops {
                    if let DelegateOp::Subscribed(delegate) = op {
                        self.inner.handlers.rollback_subscribe(delegate);
                    }
                }
                Err(e)
            }
        }
    }

    async fn send_and_wait(
        &self,
        conn: &Arc<Connection>,
        message: MethodCallMessage,
        options: &InvokeOptions,
    ) -> Result<MethodCallResultMessage, RemotingError> {
        let correlation = CorrelationId::generate();
        let receiver = self.inner.pending.insert(correlation)?;

        let payload = self.inner.config.codec.encode_call(&message);
        if let Err(e) = conn
            .send_sealed(MessageKind::Call, correlation.0.to_vec(), false, payload)
            .await
        {
            self.inner.pending.remove(&correlation);
            return Err(e);
        }

        let limit = options.timeout.unwrap_or(self.inner.config.invocation_timeout);

        let wait = async {
            match receiver.await {
                Ok(outcome) => outcome,
                Err(_) => Err(RemotingError::new(
                    ErrorKind::ConnectionLost,
                    "pending call dropped",
                )),
            }
        };
        tokio::pin!(wait);

        let deadline = async {
            if limit.is_zero() {
                std::future::pending::<()>().await
            } else {
                tokio::time::sleep(limit).await
            }
        };
        let cancelled = async {
            match &options.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = &mut wait => result,
            _ = deadline => {
                self.inner.pending.remove(&correlation);
                Err(RemotingError::new(
                    ErrorKind::CallTimeout,
                    format!("no result within {limit:?}"),
                )
                .with_phase(CallPhase::Invoke))
            }
            _ = cancelled => {
                // Local cancellation only: the slot is dropped, nothing is
                // sent to the server.
                self.inner.pending.remove(&correlation);
                Err(RemotingError::new(ErrorKind::Cancelled, "call cancelled locally"))
            }
        }
    }

    fn marshal_args(
        &self,
        args: Vec<CallArg>,
    ) -> Result<(Vec<ParamMessage>, Vec<DelegateOp>), RemotingError> {
        let mut parameters = Vec::with_capacity(args.len());
        let mut ops: Vec<DelegateOp> = Vec::new();

        let rollback = |ops: &[DelegateOp], handlers: &DelegateHandlers| {
            for op in ops {
                if let DelegateOp::Subscribed(delegate) = op {
                    handlers.rollback_subscribe(delegate);
                }
            }
        };

        for arg in args {
            match arg {
                CallArg::In { name, type_name, value } => {
                    parameters.push(ParamMessage::input(name, type_name, value));
                }
                CallArg::Null { name, type_name } => {
                    parameters.push(ParamMessage::null(name, type_name));
                }
                CallArg::Out { name, type_name } => {
                    parameters.push(ParamMessage::out(name, type_name));
                }
                CallArg::Delegate { name, delegate } => {
                    let key = self.inner.handlers.subscribe(&delegate);
                    parameters.push(ParamMessage::input(
                        name,
                        DELEGATE_TYPE,
                        placeholder_for(&delegate, key).to_bytes(),
                    ));
                    ops.push(DelegateOp::Subscribed(delegate));
                }
                CallArg::Release { name, delegate } => {
                    let Some(key) = delegate.current_key() else {
                        rollback(&ops, &self.inner.handlers);
                        return Err(RemotingError::new(
                            ErrorKind::ArgumentMismatch,
                            format!("delegate for parameter '{name}' is not subscribed"),
                        ));
                    };
                    parameters.push(ParamMessage::input(
                        name,
                        DELEGATE_TYPE,
                        placeholder_for(&delegate, key).to_bytes(),
                    ));
                    ops.push(DelegateOp::Released(delegate));
                }
            }
        }
        Ok((parameters, ops))
    }

    // ── Events ─────────────────────────────────────────────────────────

    /// Subscribe `delegate` to an event by invoking the service's subscribe
    /// method with the delegate as its only argument.
    pub async fn subscribe_event(
        &self,
        service: &str,
        method: &str,
        delegate: &RemoteDelegate,
    ) -> Result<(), RemotingError> {
        self.invoke(service, method, vec![CallArg::delegate("handler", delegate)])
            .await
            .map(|_| ())
    }

    /// Release one subscription of `delegate` via the service's unsubscribe
    /// method.
    pub async fn unsubscribe_event(
        &self,
        service: &str,
        method: &str,
        delegate: &RemoteDelegate,
    ) -> Result<(), RemotingError> {
        self.invoke(service, method, vec![CallArg::release("handler", delegate)])
            .await
            .map(|_| ())
    }

    /// The client's delegate handler map.
    pub fn handlers(&self) -> &DelegateHandlers {
        &self.inner.handlers
    }

    /// Outstanding calls (diagnostic).
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    // ── Disconnect ─────────────────────────────────────────────────────

    /// Send a goodbye and drop the connection. Idempotent; outstanding calls
    /// complete with `connection_lost`.
    pub async fn disconnect(&self) -> Result<(), RemotingError> {
        let conn = self.inner.conn.lock().await.take();
        if let Some(conn) = conn {
            let goodbye = GoodbyeMessage { session_id: conn.session_id.0.to_vec() };
            let _ = conn
                .send_sealed(MessageKind::Goodbye, Vec::new(), false, goodbye.to_bytes())
                .await;
            conn.closed.cancel();
            self.inner
                .pending
                .drain(|| RemotingError::new(ErrorKind::ConnectionLost, "client disconnected"));
            log::info!("[tether] disconnected from {}", self.inner.config.address());
        }
        Ok(())
    }

    /// Disconnect and unregister from the process-wide directory.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.disconnect().await;
        directory::unregister(self.inner.directory_token);
    }
}

fn placeholder_for(delegate: &RemoteDelegate, key: HandlerKey) -> DelegatePlaceholder {
    DelegatePlaceholder {
        handler_key: key.0.to_vec(),
        argument_types: delegate.signature().argument_types.clone(),
        return_type: delegate.signature().return_type.clone(),
    }
}

// ─── Receive loop ────────────────────────────────────────────────────────────

fn spawn_recv_loop(inner: Arc<ClientInner>, conn: Arc<Connection>, mut receiver: FrameReceiver) {
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = conn.closed.cancelled() => break,
                frame = receiver.recv() => match frame {
                    Some(bytes) => bytes,
                    None => break,
                },
            };

            let envelope = match WireMessage::decode(&frame) {
                Ok(envelope) => envelope,
                Err(e) => {
                    log::warn!("[tether] malformed envelope from server: {e}");
                    break;
                }
            };

            match envelope.kind() {
                Some(MessageKind::Result) => handle_result(&inner, &conn, envelope),
                Some(MessageKind::Delegate) => handle_delegate(&inner, &conn, envelope),
                Some(MessageKind::Goodbye) => {
                    log::info!("[tether] server said goodbye");
                    break;
                }
                Some(MessageKind::Error) => handle_server_error(&inner, &conn, envelope),
                Some(other) => {
                    log::warn!("[tether] unexpected '{other}' envelope discarded");
                }
                None => {
                    log::warn!(
                        "[tether] unknown envelope type '{}' discarded",
                        envelope.message_type
                    );
                }
            }
        }

        conn.closed.cancel();
        inner
            .pending
            .drain(|| RemotingError::new(ErrorKind::ConnectionLost, "connection closed"));
    });
}

fn handle_result(inner: &Arc<ClientInner>, conn: &Arc<Connection>, envelope: WireMessage) {
    let Some(correlation) = CorrelationId::from_slice(&envelope.correlation_id) else {
        log::warn!("[tether] result envelope without correlation id discarded");
        return;
    };

    let outcome: CallOutcome = match open_envelope(&envelope, conn.crypto.as_deref()) {
        Ok(plaintext) if envelope.error => match inner.config.codec.decode_fault(&plaintext) {
            Ok(fault) => Err(RemotingError::from_fault(fault)),
            Err(e) => Err(RemotingError::new(ErrorKind::SerializationFailed, e.to_string())),
        },
        Ok(plaintext) => inner
            .config
            .codec
            .decode_result(&plaintext)
            .map_err(|e| RemotingError::new(ErrorKind::SerializationFailed, e.to_string())),
        Err(e) => Err(RemotingError::new(ErrorKind::CryptoFailed, e.to_string())),
    };

    if !inner.pending.complete(&correlation, outcome) {
        log::warn!("[tether] result for unknown correlation {correlation} discarded");
    }
}

fn handle_delegate(inner: &Arc<ClientInner>, conn: &Arc<Connection>, envelope: WireMessage) {
    let plaintext = match open_envelope(&envelope, conn.crypto.as_deref()) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            log::warn!("[tether] rejected delegate envelope: {e}");
            return;
        }
    };
    let message = match inner.config.codec.decode_delegate(&plaintext) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("[tether] undecodable delegate invocation: {e}");
            return;
        }
    };
    let Some(key) = HandlerKey::from_slice(&message.handler_key) else {
        log::warn!("[tether] delegate invocation with malformed handler key discarded");
        return;
    };

    let Some((callback, _signature)) = inner.handlers.lookup(&key) else {
        log::warn!("[tether] delegate invocation for removed handler {key} discarded");
        return;
    };

    // Callbacks run off the receive loop; a slow handler must not stall the
    // protocol.
    let conn = conn.clone();
    let codec = inner.config.codec.clone();
    let reply_to = envelope.correlation_id.clone();
    tokio::spawn(async move {
        let outcome = callback(message.arguments);

        if reply_to.is_empty() {
            if let Err(fault) = outcome {
                log::warn!("[tether] fire-and-forget delegate handler faulted: {fault}");
            }
            return;
        }

        let (error, payload) = match outcome {
            Ok(value) => {
                let result = MethodCallResultMessage {
                    is_return_null: value.is_none(),
                    return_value: value.unwrap_or_default(),
                    ..Default::default()
                };
                (false, codec.encode_result(&result))
            }
            Err(fault) => (true, codec.encode_fault(&fault.truncated())),
        };
        if let Err(e) = conn.send_sealed(MessageKind::Result, reply_to, error, payload).await {
            log::warn!("[tether] failed to reply to delegate invocation: {e}");
        }
    });
}

fn handle_server_error(inner: &Arc<ClientInner>, conn: &Arc<Connection>, envelope: WireMessage) {
    let detail = open_envelope(&envelope, conn.crypto.as_deref())
        .ok()
        .and_then(|plaintext| inner.config.codec.decode_fault(&plaintext).ok());

    match detail {
        Some(fault) => {
            log::error!("[tether] server error: {fault}");
            // Unsolicited server errors (e.g. a failed auth discovered late)
            // terminate every outstanding call with the reported fault.
            inner.pending.drain(|| RemotingError::from_fault(fault.clone()));
        }
        None => log::error!("[tether] server sent an undecodable error envelope"),
    }
}

// ─── Directory ───────────────────────────────────────────────────────────────

/// Process-wide directory of live client instances, keyed by channel name.
///
/// Instances register on connect and unregister on dispose; the default
/// instance is simply the earliest-registered live entry.
pub mod directory {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Mutex, OnceLock};

    static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

    fn entries() -> &'static Mutex<Vec<(u64, String)>> {
        static ENTRIES: OnceLock<Mutex<Vec<(u64, String)>>> = OnceLock::new();
        ENTRIES.get_or_init(|| Mutex::new(Vec::new()))
    }

    pub(crate) fn register(name: String) -> u64 {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        entries().lock().unwrap().push((token, name));
        token
    }

    pub(crate) fn unregister(token: u64) {
        entries().lock().unwrap().retain(|(t, _)| *t != token);
    }

    /// Snapshot of the channel names of all live clients, oldest first.
    pub fn list() -> Vec<String> {
        entries().lock().unwrap().iter().map(|(_, n)| n.clone()).collect()
    }

    /// The default instance's channel name (the oldest live registration).
    pub fn default_channel() -> Option<String> {
        entries().lock().unwrap().first().map(|(_, n)| n.clone())
    }
}
