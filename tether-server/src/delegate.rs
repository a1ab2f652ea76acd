//! Server-side delegate proxies.
//!
//! When a call message carries a delegate-typed argument, the dispatcher
//! materializes a proxy bound to the sending session. Service code invokes
//! the proxy like a local callback; the proxy ships a `delegate` envelope
//! back through the owning session, so callback pushes count as session
//! activity like any other outbound call. The owning session releases every
//! proxy exactly once when it is disposed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;

use tether_proto::messages::{DelegateInvocationMessage, MethodCallResultMessage};
use tether_proto::{CorrelationId, DelegateSignature, ErrorKind, HandlerKey, RemotingError};
use tether_wire::MessageKind;

use crate::session::ServerSession;

type ReplySender = oneshot::Sender<Result<MethodCallResultMessage, RemotingError>>;

/// Pending synchronous delegate calls, keyed by correlation id.
///
/// Shared between the session (which routes inbound `result` envelopes) and
/// the proxies (which register waits).
#[derive(Clone, Default)]
pub(crate) struct DelegateReplies {
    slots: Arc<Mutex<HashMap<CorrelationId, ReplySender>>>,
}

impl DelegateReplies {
    pub(crate) fn register(
        &self,
        id: CorrelationId,
    ) -> oneshot::Receiver<Result<MethodCallResultMessage, RemotingError>> {
        let (tx, rx) = oneshot::channel();
        self.slots.lock().unwrap().insert(id, tx);
        rx
    }

    pub(crate) fn complete(
        &self,
        id: &CorrelationId,
        outcome: Result<MethodCallResultMessage, RemotingError>,
    ) -> bool {
        match self.slots.lock().unwrap().remove(id) {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub(crate) fn remove(&self, id: &CorrelationId) {
        self.slots.lock().unwrap().remove(id);
    }

    pub(crate) fn drain(&self, error: impl Fn() -> RemotingError) {
        let drained: Vec<ReplySender> =
            self.slots.lock().unwrap().drain().map(|(_, tx)| tx).collect();
        for tx in drained {
            let _ = tx.send(Err(error()));
        }
    }
}

/// A callable stand-in for a client-side handler.
///
/// Holds only a weak reference to its session; the session owns its proxies,
/// never the other way around.
pub struct DelegateProxy {
    key: HandlerKey,
    signature: DelegateSignature,
    session: Weak<ServerSession>,
    replies: DelegateReplies,
    on_release: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    released: AtomicBool,
}

impl DelegateProxy {
    pub(crate) fn new(
        key: HandlerKey,
        signature: DelegateSignature,
        session: Weak<ServerSession>,
        replies: DelegateReplies,
    ) -> Self {
        Self {
            key,
            signature,
            session,
            replies,
            on_release: Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    /// The handler key this proxy targets.
    pub fn handler_key(&self) -> HandlerKey {
        self.key
    }

    /// The delegate's declared signature.
    pub fn signature(&self) -> &DelegateSignature {
        &self.signature
    }

    /// Register a teardown hook; runs exactly once when the owning session is
    /// disposed. Services use this to detach event handlers.
    pub fn set_on_release(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_release.lock().unwrap() = Some(Box::new(hook));
    }

    /// Invoke the client-side handler with pre-serialized arguments.
    ///
    /// Fire-and-forget signatures return `Ok(None)` as soon as the envelope
    /// is queued. Signatures with a return value wait for the client's
    /// `result` envelope and yield its return blob. Every invocation goes
    /// through the owning session, which records it as activity.
    pub async fn invoke(&self, arguments: Vec<Vec<u8>>) -> Result<Option<Vec<u8>>, RemotingError> {
        if self.released.load(Ordering::Acquire) {
            return Err(RemotingError::new(
                ErrorKind::ConnectionLost,
                "delegate proxy released with its session",
            ));
        }
        let Some(session) = self.session.upgrade() else {
            return Err(RemotingError::new(
                ErrorKind::ConnectionLost,
                "delegate proxy outlived its session",
            ));
        };

        let synchronous = self.signature.return_type.is_some();
        let correlation = if synchronous { CorrelationId::generate().0.to_vec() } else { Vec::new() };

        let message = DelegateInvocationMessage {
            correlation_id: correlation.clone(),
            handler_key: self.key.0.to_vec(),
            arguments,
        };

        let wait = if synchronous {
            let id = CorrelationId::from_slice(&correlation).expect("generated correlation");
            Some((id, self.replies.register(id)))
        } else {
            None
        };

        let payload = session.codec().encode_delegate(&message);
        if let Err(e) = session
            .send_sealed(MessageKind::Delegate, correlation, false, payload)
            .await
        {
            if let Some((id, _)) = &wait {
                self.replies.remove(id);
            }
            return Err(e);
        }

        match wait {
            None => Ok(None),
            Some((id, rx)) => match rx.await {
                Ok(Ok(result)) => {
                    Ok((!result.is_return_null).then_some(result.return_value))
                }
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    self.replies.remove(&id);
                    Err(RemotingError::new(ErrorKind::ConnectionLost, "session disposed"))
                }
            },
        }
    }

    /// Run the teardown hook; the owning session calls this exactly once.
    pub(crate) fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(hook) = self.on_release.lock().unwrap().take() {
            hook();
        }
    }
}
