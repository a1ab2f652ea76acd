//! Message types and binary serialization for the tether RPC runtime.
//!
//! This crate is the wire vocabulary shared by `tether-client` and
//! `tether-server`:
//!
//! | Module         | Contents                                                  |
//! |----------------|-----------------------------------------------------------|
//! | [`serialize`]  | The [`Serializable`] trait and primitive impls            |
//! | [`deserialize`]| The [`Deserializable`] trait and the [`Cursor`] buffer    |
//! | [`messages`]   | RPC message structs (`call`, `result`, `delegate`, …)     |
//! | [`descriptor`] | Interface descriptors — the service contract              |
//! | [`fault`]      | Serializable fault records with bounded cause chains      |
//! | [`error`]      | The closed [`ErrorKind`] set and [`RemotingError`]        |
//! | [`context`]    | Task-local call-context propagation                       |
//! | [`codec`]      | The pluggable [`MessageCodec`] port and [`BinaryCodec`]   |
//!
//! It is intentionally transport- and runtime-agnostic: nothing here performs
//! I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod context;
pub mod descriptor;
pub mod deserialize;
pub mod error;
pub mod fault;
pub mod messages;
pub mod serialize;

pub use codec::{BinaryCodec, MessageCodec};
pub use context::CallContext;
pub use descriptor::{DelegateSignature, InterfaceDescriptor, MethodDescriptor, ParamSpec};
pub use deserialize::{Cursor, Deserializable};
pub use error::{CallPhase, ErrorKind, RemotingError};
pub use fault::FaultRecord;
pub use serialize::Serializable;

use std::fmt;

// ─── 128-bit identifiers ─────────────────────────────────────────────────────

macro_rules! token_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 16]);

        impl $name {
            /// Generate a fresh token from the system CSPRNG.
            pub fn generate() -> Self {
                let mut b = [0u8; 16];
                getrandom::getrandom(&mut b).expect("getrandom");
                Self(b)
            }

            /// Reconstruct a token from raw bytes; `None` unless exactly 16 bytes.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                let b: [u8; 16] = bytes.try_into().ok()?;
                Some(Self(b))
            }

            /// The raw 16 bytes.
            pub fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for b in &self.0 {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self)
            }
        }
    };
}

token_type! {
    /// Server-issued identifier of one client session.
    SessionId
}

token_type! {
    /// Token linking a `call` envelope to its `result` envelope.
    CorrelationId
}

token_type! {
    /// Token identifying a client-side callback so the server can reach it.
    HandlerKey
}
