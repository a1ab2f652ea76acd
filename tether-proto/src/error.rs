//! The closed error-kind set of the remoting runtime.

use std::fmt;
use std::io;

use crate::fault::FaultRecord;

// ─── ErrorKind ───────────────────────────────────────────────────────────────

/// Every error the runtime can surface, as a closed set.
///
/// Only `ConnectionRefused` is retriable at the transport layer; everything
/// else terminates the current RPC.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectionRefused,
    HandshakeFailed,
    ProtocolViolation,
    AuthFailed,
    NotConnected,
    ServiceUnknown,
    MethodUnknown,
    AmbiguousMethod,
    ArgumentMismatch,
    ServiceFaulted,
    CallTimeout,
    Cancelled,
    ConnectionLost,
    SerializationFailed,
    CryptoFailed,
    DuplicateRegistration,
    InternalError,
}

impl ErrorKind {
    /// The snake_case name used on the wire and in logs.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::ConnectionRefused => "connection_refused",
            Self::HandshakeFailed => "handshake_failed",
            Self::ProtocolViolation => "protocol_violation",
            Self::AuthFailed => "auth_failed",
            Self::NotConnected => "not_connected",
            Self::ServiceUnknown => "service_unknown",
            Self::MethodUnknown => "method_unknown",
            Self::AmbiguousMethod => "ambiguous_method",
            Self::ArgumentMismatch => "argument_mismatch",
            Self::ServiceFaulted => "service_faulted",
            Self::CallTimeout => "call_timeout",
            Self::Cancelled => "cancelled",
            Self::ConnectionLost => "connection_lost",
            Self::SerializationFailed => "serialization_failed",
            Self::CryptoFailed => "crypto_failed",
            Self::DuplicateRegistration => "duplicate_registration",
            Self::InternalError => "internal_error",
        }
    }

    /// The inverse of [`ErrorKind::wire_name`].
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Some(match name {
            "connection_refused" => Self::ConnectionRefused,
            "handshake_failed" => Self::HandshakeFailed,
            "protocol_violation" => Self::ProtocolViolation,
            "auth_failed" => Self::AuthFailed,
            "not_connected" => Self::NotConnected,
            "service_unknown" => Self::ServiceUnknown,
            "method_unknown" => Self::MethodUnknown,
            "ambiguous_method" => Self::AmbiguousMethod,
            "argument_mismatch" => Self::ArgumentMismatch,
            "service_faulted" => Self::ServiceFaulted,
            "call_timeout" => Self::CallTimeout,
            "cancelled" => Self::Cancelled,
            "connection_lost" => Self::ConnectionLost,
            "serialization_failed" => Self::SerializationFailed,
            "crypto_failed" => Self::CryptoFailed,
            "duplicate_registration" => Self::DuplicateRegistration,
            "internal_error" => Self::InternalError,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

// ─── CallPhase ───────────────────────────────────────────────────────────────

/// Which phase of a call an error (notably a timeout) occurred in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallPhase {
    /// Dialing / handshaking the transport.
    Connect,
    /// The credential exchange.
    Authenticate,
    /// The RPC itself.
    Invoke,
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Authenticate => "authenticate",
            Self::Invoke => "invoke",
        })
    }
}

// ─── RemotingError ───────────────────────────────────────────────────────────

/// The error type returned from every fallible runtime operation.
#[derive(Clone, Debug)]
pub struct RemotingError {
    /// Which member of the closed set this is.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
    /// The full fault record for `service_faulted` errors.
    pub fault: Option<FaultRecord>,
    /// The call phase, where it disambiguates (timeouts).
    pub phase: Option<CallPhase>,
}

impl RemotingError {
    /// Build an error of `kind` with a detail message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), fault: None, phase: None }
    }

    /// Attach the originating fault record.
    pub fn with_fault(mut self, fault: FaultRecord) -> Self {
        self.fault = Some(fault);
        self
    }

    /// Attach the call phase.
    pub fn with_phase(mut self, phase: CallPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Shorthand: `true` iff `self.kind == kind`.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Map a fault record arriving in an error envelope onto an error:
    /// infrastructure faults keep their kind, anything else is a service
    /// fault carrying the record.
    pub fn from_fault(fault: FaultRecord) -> Self {
        match ErrorKind::from_wire_name(&fault.type_name) {
            Some(kind) => Self::new(kind, fault.message.clone()).with_fault(fault),
            None => Self::new(ErrorKind::ServiceFaulted, fault.message.clone()).with_fault(fault),
        }
    }
}

impl fmt::Display for RemotingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(phase) = self.phase {
            write!(f, " ({phase})")?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for RemotingError {}

impl From<crate::deserialize::Error> for RemotingError {
    fn from(e: crate::deserialize::Error) -> Self {
        Self::new(ErrorKind::SerializationFailed, e.to_string())
    }
}

impl From<io::Error> for RemotingError {
    fn from(e: io::Error) -> Self {
        let kind = match e.kind() {
            io::ErrorKind::ConnectionRefused => ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => ErrorKind::ConnectionLost,
            _ => ErrorKind::ConnectionLost,
        };
        Self::new(kind, e.to_string())
    }
}
