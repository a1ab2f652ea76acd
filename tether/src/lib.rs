//! Session-oriented RPC runtime: clients invoke methods on server-hosted
//! services by name, receive results matched by correlation id, subscribe to
//! server-side events through remote delegates, and exchange call-scoped
//! metadata — over a framed binary transport with an optional RSA+AES
//! handshake.
//!
//! This crate is a facade re-exporting the member crates:
//!
//! | Crate            | Contents                                          |
//! |------------------|---------------------------------------------------|
//! | [`proto`]        | Message types, serialization, faults, call-context |
//! | [`crypto`]       | RSA-OAEP key wrap, AES-CBC sealing, signatures    |
//! | [`wire`]         | Frame codec, envelopes, TCP transport             |
//! | [`server`]       | Service hosting, sessions, dispatch               |
//! | [`client`]       | Connect, invoke, events, reconnect                |

pub use tether_client as client;
pub use tether_crypto as crypto;
pub use tether_proto as proto;
pub use tether_server as server;
pub use tether_wire as wire;

pub use tether_client::{CallArg, CallReply, Client, ClientConfig, InvokeOptions, RemoteDelegate};
pub use tether_proto::{
    CallContext, CallPhase, DelegateSignature, ErrorKind, FaultRecord, InterfaceDescriptor,
    MethodDescriptor, ParamSpec, RemotingError,
};
pub use tether_server::{
    DynService, Server, ServerConfig, ServiceLifetime, ServiceRegistration,
};
