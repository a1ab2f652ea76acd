//! The pending-call table: correlates `result` envelopes with outstanding
//! invocations.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use tether_proto::messages::MethodCallResultMessage;
use tether_proto::{CorrelationId, ErrorKind, RemotingError};

/// What a completed call produced: the result message, or the error that
/// terminated it.
pub type CallOutcome = Result<MethodCallResultMessage, RemotingError>;

/// Pending calls keyed by correlation id; owned exclusively by the client
/// session. Each slot fires at most once.
#[derive(Default)]
pub struct PendingCalls {
    slots: Mutex<HashMap<CorrelationId, oneshot::Sender<CallOutcome>>>,
}

impl PendingCalls {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a slot before sending its call.
    ///
    /// Correlation ids come from a CSPRNG; a collision within a session is a
    /// protocol violation.
    pub fn insert(
        &self,
        id: CorrelationId,
    ) -> Result<oneshot::Receiver<CallOutcome>, RemotingError> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock().unwrap();
        if slots.contains_key(&id) {
            return Err(RemotingError::new(
                ErrorKind::ProtocolViolation,
                format!("correlation id collision: {id}"),
            ));
        }
        slots.insert(id, tx);
        Ok(rx)
    }

    /// Complete a slot. Returns `false` when no slot exists (timed out,
    /// cancelled or never ours) — the caller logs and discards.
    pub fn complete(&self, id: &CorrelationId, outcome: CallOutcome) -> bool {
        match self.slots.lock().unwrap().remove(id) {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Drop a slot (timeout or local cancellation). Returns whether it was
    /// still present.
    pub fn remove(&self, id: &CorrelationId) -> bool {
        self.slots.lock().unwrap().remove(id).is_some()
    }

    /// Complete every outstanding slot with `error` (transport close).
    pub fn drain(&self, error: impl Fn() -> RemotingError) {
        let drained: Vec<oneshot::Sender<CallOutcome>> =
            self.slots.lock().unwrap().drain().map(|(_, tx)| tx).collect();
        for tx in drained {
            let _ = tx.send(Err(error()));
        }
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    /// Whether no calls are outstanding.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().unwrap().is_empty()
    }
}
