//! Server-side sessions and the session registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

use tether_crypto::SessionCrypto;
use tether_proto::messages::{Identity, MethodCallResultMessage};
use tether_proto::{CorrelationId, ErrorKind, HandlerKey, MessageCodec, RemotingError, SessionId};
use tether_wire::{seal_envelope, FrameSender, MessageKind};

use crate::delegate::{DelegateProxy, DelegateReplies};
use crate::service::RemoteService;

const STATE_ACTIVE: u8 = 0;
const STATE_DISPOSING: u8 = 1;
const STATE_DISPOSED: u8 = 2;

/// Lifecycle notifications emitted by the [`SessionRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session was created after a valid hello.
    Created(SessionId),
    /// A session was disposed (goodbye, transport close, sweep or shutdown).
    Disposed(SessionId),
}

/// One client session.
///
/// A session's encryption mode is fixed at creation and never changes. The
/// session exclusively owns its outbound transport handle and its pending
/// delegate proxies.
pub struct ServerSession {
    id: SessionId,
    peer: String,
    created_at: Instant,
    last_activity: Mutex<Instant>,
    crypto: Option<Arc<SessionCrypto>>,
    codec: Arc<dyn MessageCodec>,
    outbound: FrameSender,
    identity: Mutex<Option<Identity>>,
    delegates: Mutex<HashMap<HandlerKey, Arc<DelegateProxy>>>,
    delegate_replies: DelegateReplies,
    scoped: Mutex<HashMap<String, Arc<dyn RemoteService>>>,
    cancel: CancellationToken,
    state: AtomicU8,
}

impl ServerSession {
    fn new(
        crypto: Option<Arc<SessionCrypto>>,
        peer: String,
        outbound: FrameSender,
        codec: Arc<dyn MessageCodec>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: SessionId::generate(),
            peer,
            created_at: now,
            last_activity: Mutex::new(now),
            crypto,
            codec,
            outbound,
            identity: Mutex::new(None),
            delegates: Mutex::new(HashMap::new()),
            delegate_replies: DelegateReplies::default(),
            scoped: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            state: AtomicU8::new(STATE_ACTIVE),
        }
    }

    /// The server-issued session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Peer address string.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// When the session was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Whether the session is encrypted (fixed for its lifetime).
    pub fn is_encrypted(&self) -> bool {
        self.crypto.is_some()
    }

    /// The session crypto, if encrypted.
    pub fn crypto(&self) -> Option<&Arc<SessionCrypto>> {
        self.crypto.as_ref()
    }

    /// The codec this session serializes with.
    pub fn codec(&self) -> &Arc<dyn MessageCodec> {
        &self.codec
    }

    /// The authenticated identity, if the auth exchange completed.
    pub fn identity(&self) -> Option<Identity> {
        self.identity.lock().unwrap().clone()
    }

    pub(crate) fn set_identity(&self, identity: Identity) {
        *self.identity.lock().unwrap() = Some(identity);
    }

    /// Record activity now. Every received envelope and every outbound call
    /// on the session touches it.
    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// How long the session has been idle.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    /// Cancelled when the session is disposed; connection tasks select on it.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the session has been disposed (or is being disposed).
    pub fn is_disposed(&self) -> bool {
        self.state.load(Ordering::Acquire) != STATE_ACTIVE
    }

    /// Seal (when encrypted) and queue one envelope.
    pub async fn send_sealed(
        &self,
        kind: MessageKind,
        correlation_id: Vec<u8>,
        error: bool,
        plaintext: Vec<u8>,
    ) -> Result<(), RemotingError> {
        self.touch();
        let envelope =
            seal_envelope(kind, correlation_id, error, plaintext, self.crypto.as_deref())
                .map_err(|e| RemotingError::new(ErrorKind::CryptoFailed, e.to_string()))?;
        self.outbound
            .send(envelope.encode())
            .await
            .map_err(|_| RemotingError::new(ErrorKind::ConnectionLost, "session transport closed"))
    }

    /// The session-cached instance for a scoped service, created on first use.
    pub(crate) fn scoped_instance(
        &self,
        name: &str,
        factory: &(dyn Fn() -> Arc<dyn RemoteService> + Send + Sync),
    ) -> Arc<dyn RemoteService> {
        let mut scoped = self.scoped.lock().unwrap();
        scoped.entry(name.to_owned()).or_insert_with(factory).clone()
    }

    /// The proxy bound to `key`, created on first sight. Calls that carry a
    /// previously seen handler key (unsubscription) observe the same proxy.
    pub(crate) fn delegate_proxy(
        self: &Arc<Self>,
        key: HandlerKey,
        signature: tether_proto::DelegateSignature,
    ) -> Arc<DelegateProxy> {
        let mut delegates = self.delegates.lock().unwrap();
        delegates
            .entry(key)
            .or_insert_with(|| {
                Arc::new(DelegateProxy::new(
                    key,
                    signature,
                    Arc::downgrade(self),
                    self.delegate_replies.clone(),
                ))
            })
            .clone()
    }

    pub(crate) fn register_delegate_reply(
        &self,
        correlation_id: CorrelationId,
    ) -> oneshot::Receiver<Result<MethodCallResultMessage, RemotingError>> {
        self.delegate_replies.register(correlation_id)
    }

    /// Route an inbound `result` envelope to the delegate call awaiting it.
    pub(crate) fn complete_delegate_reply(
        &self,
        correlation_id: &CorrelationId,
        outcome: Result<MethodCallResultMessage, RemotingError>,
    ) {
        if !self.delegate_replies.complete(correlation_id, outcome) {
            log::warn!(
                "[tether] session {}: result for unknown delegate correlation {correlation_id}",
                self.id
            );
        }
    }

    /// Tear the session down exactly once: release every delegate proxy so
    /// services detach their handlers, fail pending delegate calls, then
    /// cancel the connection tasks and drop the transport.
    pub(crate) fn dispose(&self) {
        if self
            .state
            .compare_exchange(STATE_ACTIVE, STATE_DISPOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let proxies: Vec<Arc<DelegateProxy>> =
            self.delegates.lock().unwrap().drain().map(|(_, p)| p).collect();
        for proxy in proxies {
            proxy.release();
        }
        self.delegate_replies
            .drain(|| RemotingError::new(ErrorKind::ConnectionLost, "session disposed"));
        self.scoped.lock().unwrap().clear();

        self.cancel.cancel();
        self.state.store(STATE_DISPOSED, Ordering::Release);
        log::debug!("[tether] session {} disposed ({})", self.id, self.peer);
    }
}

// ─── SessionRegistry ─────────────────────────────────────────────────────────

/// All live sessions, keyed by id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<ServerSession>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        let (events, _) = broadcast::channel(64);
        Self { sessions: RwLock::new(HashMap::new()), events }
    }
}

impl SessionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and insert a session; emits [`SessionEvent::Created`].
    pub fn create(
        &self,
        crypto: Option<Arc<SessionCrypto>>,
        peer: impl Into<String>,
        outbound: FrameSender,
        codec: Arc<dyn MessageCodec>,
    ) -> Arc<ServerSession> {
        let session = Arc::new(ServerSession::new(crypto, peer.into(), outbound, codec));
        self.sessions.write().unwrap().insert(session.id(), session.clone());
        let _ = self.events.send(SessionEvent::Created(session.id()));
        log::info!("[tether] session {} created ({})", session.id(), session.peer());
        session
    }

    /// Look up a session.
    pub fn get(&self, id: &SessionId) -> Option<Arc<ServerSession>> {
        self.sessions.read().unwrap().get(id).cloned()
    }

    /// Snapshot of all sessions.
    pub fn iterate(&self) -> Vec<Arc<ServerSession>> {
        self.sessions.read().unwrap().values().cloned().collect()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().unwrap().is_empty()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Remove and dispose one session; emits [`SessionEvent::Disposed`].
    pub fn dispose_session(&self, id: &SessionId) {
        let removed = self.sessions.write().unwrap().remove(id);
        if let Some(session) = removed {
            session.dispose();
            let _ = self.events.send(SessionEvent::Disposed(*id));
        }
    }

    /// Remove and dispose sessions idle longer than `ceiling`.
    ///
    /// The scan takes only read locks; removal happens per session
    /// afterwards. Returns the disposed sessions.
    pub fn sweep(&self, ceiling: Duration) -> Vec<Arc<ServerSession>> {
        let expired: Vec<Arc<ServerSession>> = self
            .sessions
            .read()
            .unwrap()
            .values()
            .filter(|s| s.idle_for() > ceiling)
            .cloned()
            .collect();

        for session in &expired {
            log::info!(
                "[tether] sweeping session {} (idle {:?})",
                session.id(),
                session.idle_for()
            );
            self.dispose_session(&session.id());
        }
        expired
    }

    /// Dispose every session (server shutdown).
    pub fn dispose_all(&self) {
        let all: Vec<SessionId> =
            self.sessions.read().unwrap().keys().copied().collect();
        for id in all {
            self.dispose_session(&id);
        }
    }
}
