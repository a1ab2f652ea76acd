//! Serializable fault records.
//!
//! A fault record is what crosses the wire when service code fails: the
//! envelope's `error` flag is set and the payload is one of these instead of
//! a result message. Cause chains are walked recursively with a hard depth
//! limit so a pathological exception graph cannot produce unbounded nesting.

use crate::deserialize::{self, Buffer, Deserializable, Error};
use crate::serialize::Serializable;

/// Hard ceiling on `inner` nesting, both when building and when decoding.
pub const MAX_FAULT_DEPTH: usize = 16;

/// A serialized failure, preserving type, message, stack text, attached data
/// and a bounded chain of causes.
#[derive(Clone, Debug, PartialEq)]
pub struct FaultRecord {
    /// The fault's type name; for infrastructure faults this is an
    /// [`crate::ErrorKind`] wire name.
    pub type_name: String,
    /// Human-readable message.
    pub message: String,
    /// Captured stack or backtrace text, may be empty.
    pub stack_text: String,
    /// Additional name/value data attached to the fault.
    pub data: Vec<(String, Vec<u8>)>,
    /// The fault's cause, if any.
    pub inner: Option<Box<FaultRecord>>,
}

impl FaultRecord {
    /// A leaf fault with type and message only.
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            stack_text: String::new(),
            data: Vec::new(),
            inner: None,
        }
    }

    /// Attach stack text.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack_text = stack.into();
        self
    }

    /// Attach a cause.
    pub fn with_inner(mut self, inner: FaultRecord) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    /// Build a stand-in record from any error, walking `source()` causes up
    /// to [`MAX_FAULT_DEPTH`]. Used where a fault cannot be represented any
    /// other way; preserves type name, message and nothing else.
    pub fn stand_in_for(type_name: &str, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            if causes.len() + 1 >= MAX_FAULT_DEPTH {
                break;
            }
            causes.push(cause.to_string());
            source = cause.source();
        }

        let mut inner = None;
        for message in causes.into_iter().rev() {
            inner = Some(Box::new(FaultRecord { inner, ..FaultRecord::new("error", message) }));
        }
        FaultRecord { inner, ..FaultRecord::new(type_name, error.to_string()) }
    }

    /// Depth of the cause chain including `self`.
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut cursor = self.inner.as_deref();
        while let Some(next) = cursor {
            depth += 1;
            cursor = next.inner.as_deref();
        }
        depth
    }

    /// Clone of `self` with the cause chain cut at [`MAX_FAULT_DEPTH`].
    pub fn truncated(&self) -> Self {
        fn walk(record: &FaultRecord, budget: usize) -> FaultRecord {
            let mut out = record.clone();
            out.inner = match (&record.inner, budget) {
                (Some(inner), b) if b > 1 => Some(Box::new(walk(inner, b - 1))),
                _ => None,
            };
            out
        }
        walk(self, MAX_FAULT_DEPTH)
    }

    fn serialize_at(&self, buf: &mut Vec<u8>, budget: usize) {
        self.type_name.serialize(buf);
        self.message.serialize(buf);
        self.stack_text.serialize(buf);
        (self.data.len() as u32).serialize(buf);
        for (name, value) in &self.data {
            name.serialize(buf);
            value.serialize(buf);
        }
        match (&self.inner, budget) {
            (Some(inner), b) if b > 1 => {
                true.serialize(buf);
                inner.serialize_at(buf, b - 1);
            }
            _ => false.serialize(buf),
        }
    }

    fn deserialize_at(buf: Buffer, budget: usize) -> deserialize::Result<Self> {
        if budget == 0 {
            return Err(Error::DepthLimitExceeded);
        }
        let type_name = String::deserialize(buf)?;
        let message = String::deserialize(buf)?;
        let stack_text = String::deserialize(buf)?;
        let count = u32::deserialize(buf)? as usize;
        let mut data = Vec::with_capacity(count.min(buf.remaining()));
        for _ in 0..count {
            data.push((String::deserialize(buf)?, Vec::<u8>::deserialize(buf)?));
        }
        let inner = if bool::deserialize(buf)? {
            Some(Box::new(Self::deserialize_at(buf, budget - 1)?))
        } else {
            None
        };
        Ok(Self { type_name, message, stack_text, data, inner })
    }
}

impl Serializable for FaultRecord {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.serialize_at(buf, MAX_FAULT_DEPTH);
    }
}

impl Deserializable for FaultRecord {
    fn deserialize(buf: Buffer) -> deserialize::Result<Self> {
        Self::deserialize_at(buf, MAX_FAULT_DEPTH)
    }
}

impl std::fmt::Display for FaultRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}
