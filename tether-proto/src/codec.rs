//! The pluggable message-serialization port.
//!
//! The runtime never serializes RPC messages directly; it goes through a
//! [`MessageCodec`] so that schema-based back-ends can be swapped in without
//! touching the engine. [`BinaryCodec`] is the built-in implementation,
//! delegating to the [`crate::Serializable`] impls of the message structs.

use crate::deserialize;
use crate::fault::FaultRecord;
use crate::messages::{
    decode_exact, DelegateInvocationMessage, MethodCallMessage, MethodCallResultMessage,
};
use crate::serialize::Serializable;

/// Byte-level (de)serialization of the RPC message structs.
///
/// Implementations must round-trip every message type. Argument values inside
/// the messages are opaque blobs here; per-parameter typing happens on the
/// receiver using the interface descriptor.
pub trait MessageCodec: Send + Sync {
    /// Encode a `call` payload.
    fn encode_call(&self, message: &MethodCallMessage) -> Vec<u8>;
    /// Decode a `call` payload.
    fn decode_call(&self, bytes: &[u8]) -> deserialize::Result<MethodCallMessage>;

    /// Encode a `result` payload.
    fn encode_result(&self, message: &MethodCallResultMessage) -> Vec<u8>;
    /// Decode a `result` payload.
    fn decode_result(&self, bytes: &[u8]) -> deserialize::Result<MethodCallResultMessage>;

    /// Encode a `delegate` payload.
    fn encode_delegate(&self, message: &DelegateInvocationMessage) -> Vec<u8>;
    /// Decode a `delegate` payload.
    fn decode_delegate(&self, bytes: &[u8]) -> deserialize::Result<DelegateInvocationMessage>;

    /// Encode a fault payload (`error` flag set on the envelope).
    fn encode_fault(&self, fault: &FaultRecord) -> Vec<u8>;
    /// Decode a fault payload.
    fn decode_fault(&self, bytes: &[u8]) -> deserialize::Result<FaultRecord>;

    /// Whether single argument values must be wrapped in a one-field record
    /// so the back-end can locate them. The binary codec does not need this;
    /// schema-based back-ends may.
    fn wraps_single_values(&self) -> bool {
        false
    }
}

/// The built-in length-prefixed binary codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct BinaryCodec;

impl MessageCodec for BinaryCodec {
    fn encode_call(&self, message: &MethodCallMessage) -> Vec<u8> {
        message.to_bytes()
    }

    fn decode_call(&self, bytes: &[u8]) -> deserialize::Result<MethodCallMessage> {
        decode_exact(bytes)
    }

    fn encode_result(&self, message: &MethodCallResultMessage) -> Vec<u8> {
        message.to_bytes()
    }

    fn decode_result(&self, bytes: &[u8]) -> deserialize::Result<MethodCallResultMessage> {
        decode_exact(bytes)
    }

    fn encode_delegate(&self, message: &DelegateInvocationMessage) -> Vec<u8> {
        message.to_bytes()
    }

    fn decode_delegate(&self, bytes: &[u8]) -> deserialize::Result<DelegateInvocationMessage> {
        decode_exact(bytes)
    }

    fn encode_fault(&self, fault: &FaultRecord) -> Vec<u8> {
        fault.to_bytes()
    }

    fn decode_fault(&self, bytes: &[u8]) -> deserialize::Result<FaultRecord> {
        decode_exact(bytes)
    }
}
