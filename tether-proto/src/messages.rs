//! RPC message structs carried inside wire-envelope payloads.
//!
//! Every struct here encodes its fields in declaration order using the
//! primitives of [`crate::serialize`]: integers little-endian, strings and
//! byte strings `u32`-length-prefixed, sequences count-prefixed.

use crate::deserialize::{self, Buffer, Cursor, Deserializable};
use crate::serialize::Serializable;

// ─── Call ────────────────────────────────────────────────────────────────────

/// One parameter of a method call.
///
/// `value` is empty iff `is_null` is set.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamMessage {
    /// Parameter name as declared in the interface.
    pub name: String,
    /// Serialized type name used for overload resolution on the receiver.
    pub type_name: String,
    /// Whether this is an out-parameter slot.
    pub is_out: bool,
    /// Whether the value is null.
    pub is_null: bool,
    /// The serialized argument value.
    pub value: Vec<u8>,
}

impl ParamMessage {
    /// An in-parameter carrying `value`.
    pub fn input(name: impl Into<String>, type_name: impl Into<String>, value: Vec<u8>) -> Self {
        Self { name: name.into(), type_name: type_name.into(), is_out: false, is_null: false, value }
    }

    /// A null in-parameter.
    pub fn null(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self { name: name.into(), type_name: type_name.into(), is_out: false, is_null: true, value: Vec::new() }
    }

    /// An out-parameter slot (no inbound value).
    pub fn out(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self { name: name.into(), type_name: type_name.into(), is_out: true, is_null: true, value: Vec::new() }
    }
}

impl Serializable for ParamMessage {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.name.serialize(buf);
        self.type_name.serialize(buf);
        self.is_out.serialize(buf);
        self.is_null.serialize(buf);
        self.value.serialize(buf);
    }
}

impl Deserializable for ParamMessage {
    fn deserialize(buf: Buffer) -> deserialize::Result<Self> {
        Ok(Self {
            name: String::deserialize(buf)?,
            type_name: String::deserialize(buf)?,
            is_out: bool::deserialize(buf)?,
            is_null: bool::deserialize(buf)?,
            value: Vec::<u8>::deserialize(buf)?,
        })
    }
}

/// One name/value entry of the propagated call-context.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextEntry {
    /// Entry name.
    pub name: String,
    /// Opaque serialized value.
    pub value: Vec<u8>,
}

impl Serializable for ContextEntry {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.name.serialize(buf);
        self.value.serialize(buf);
    }
}

impl Deserializable for ContextEntry {
    fn deserialize(buf: Buffer) -> deserialize::Result<Self> {
        Ok(Self { name: String::deserialize(buf)?, value: Vec::<u8>::deserialize(buf)? })
    }
}

/// Payload of a `call` envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodCallMessage {
    /// The registered service name.
    pub service_name: String,
    /// The target method name.
    pub method_name: String,
    /// Full type names bound to the method's generic parameters, in order.
    pub generic_arguments: Vec<String>,
    /// Call parameters, in declaration order.
    pub parameters: Vec<ParamMessage>,
    /// Snapshot of the caller's call-context.
    pub call_context: Vec<ContextEntry>,
}

impl Serializable for MethodCallMessage {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.service_name.serialize(buf);
        self.method_name.serialize(buf);
        self.generic_arguments.serialize(buf);
        self.parameters.serialize(buf);
        self.call_context.serialize(buf);
    }
}

impl Deserializable for MethodCallMessage {
    fn deserialize(buf: Buffer) -> deserialize::Result<Self> {
        Ok(Self {
            service_name: String::deserialize(buf)?,
            method_name: String::deserialize(buf)?,
            generic_arguments: Vec::<String>::deserialize(buf)?,
            parameters: Vec::<ParamMessage>::deserialize(buf)?,
            call_context: Vec::<ContextEntry>::deserialize(buf)?,
        })
    }
}

// ─── Result ──────────────────────────────────────────────────────────────────

/// One out-parameter value returned with a result.
#[derive(Clone, Debug, PartialEq)]
pub struct OutParamMessage {
    /// Parameter name.
    pub name: String,
    /// Whether the out value is null.
    pub is_null: bool,
    /// Serialized out value; empty iff null.
    pub value: Vec<u8>,
}

impl Serializable for OutParamMessage {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.name.serialize(buf);
        self.is_null.serialize(buf);
        self.value.serialize(buf);
    }
}

impl Deserializable for OutParamMessage {
    fn deserialize(buf: Buffer) -> deserialize::Result<Self> {
        Ok(Self {
            name: String::deserialize(buf)?,
            is_null: bool::deserialize(buf)?,
            value: Vec::<u8>::deserialize(buf)?,
        })
    }
}

/// Payload of a successful `result` envelope.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MethodCallResultMessage {
    /// Whether the return value is null / the method is void.
    pub is_return_null: bool,
    /// Serialized return value; empty iff null.
    pub return_value: Vec<u8>,
    /// Out-parameter values, in declaration order.
    pub out_parameters: Vec<OutParamMessage>,
    /// Post-invocation call-context snapshot.
    pub call_context: Vec<ContextEntry>,
}

impl MethodCallResultMessage {
    /// A void/null result with no out-parameters.
    pub fn void() -> Self {
        Self { is_return_null: true, ..Self::default() }
    }

    /// A result returning `value`.
    pub fn returning(value: Vec<u8>) -> Self {
        Self { is_return_null: false, return_value: value, ..Self::default() }
    }
}

impl Serializable for MethodCallResultMessage {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.is_return_null.serialize(buf);
        self.return_value.serialize(buf);
        self.out_parameters.serialize(buf);
        self.call_context.serialize(buf);
    }
}

impl Deserializable for MethodCallResultMessage {
    fn deserialize(buf: Buffer) -> deserialize::Result<Self> {
        Ok(Self {
            is_return_null: bool::deserialize(buf)?,
            return_value: Vec::<u8>::deserialize(buf)?,
            out_parameters: Vec::<OutParamMessage>::deserialize(buf)?,
            call_context: Vec::<ContextEntry>::deserialize(buf)?,
        })
    }
}

// ─── Delegate invocation ─────────────────────────────────────────────────────

/// Payload of a `delegate` envelope — a server-originated callback.
///
/// `correlation_id` mirrors the envelope's correlation id: empty for
/// fire-and-forget signatures, 16 bytes when the delegate declares a return
/// value and the server awaits a `result` reply.
#[derive(Clone, Debug, PartialEq)]
pub struct DelegateInvocationMessage {
    /// Mirror of the envelope correlation id.
    pub correlation_id: Vec<u8>,
    /// The handler key the client registered.
    pub handler_key: Vec<u8>,
    /// Serialized arguments, one blob per delegate parameter.
    pub arguments: Vec<Vec<u8>>,
}

impl Serializable for DelegateInvocationMessage {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.correlation_id.serialize(buf);
        self.handler_key.serialize(buf);
        self.arguments.serialize(buf);
    }
}

impl Deserializable for DelegateInvocationMessage {
    fn deserialize(buf: Buffer) -> deserialize::Result<Self> {
        Ok(Self {
            correlation_id: Vec::<u8>::deserialize(buf)?,
            handler_key: Vec::<u8>::deserialize(buf)?,
            arguments: Vec::<Vec<u8>>::deserialize(buf)?,
        })
    }
}

/// The value blob shipped for a delegate-typed parameter: the handler key
/// plus the delegate's signature so the receiver can build a matching proxy.
#[derive(Clone, Debug, PartialEq)]
pub struct DelegatePlaceholder {
    /// The registered handler key (16 bytes).
    pub handler_key: Vec<u8>,
    /// Full type names of the delegate's arguments.
    pub argument_types: Vec<String>,
    /// Return type name; `None` marks a fire-and-forget delegate.
    pub return_type: Option<String>,
}

impl Serializable for DelegatePlaceholder {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.handler_key.serialize(buf);
        self.argument_types.serialize(buf);
        match &self.return_type {
            Some(t) => {
                true.serialize(buf);
                t.serialize(buf);
            }
            None => false.serialize(buf),
        }
    }
}

impl Deserializable for DelegatePlaceholder {
    fn deserialize(buf: Buffer) -> deserialize::Result<Self> {
        let handler_key = Vec::<u8>::deserialize(buf)?;
        let argument_types = Vec::<String>::deserialize(buf)?;
        let return_type = if bool::deserialize(buf)? { Some(String::deserialize(buf)?) } else { None };
        Ok(Self { handler_key, argument_types, return_type })
    }
}

// ─── Handshake ───────────────────────────────────────────────────────────────

/// Payload of the server's `hello` reply when encryption is active.
///
/// Carried as one opaque byte string in the envelope; internally framed as
/// `{wrapped_key_len wrapped_key pub_key_len pub_key}`.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerHelloPayload {
    /// The 16-byte session key, RSA-OAEP-wrapped with the client's public key.
    pub wrapped_key: Vec<u8>,
    /// The server's RSA public key (PKCS#1 DER) for signature verification.
    pub server_public_key: Vec<u8>,
}

impl Serializable for ServerHelloPayload {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.wrapped_key.serialize(buf);
        self.server_public_key.serialize(buf);
    }
}

impl Deserializable for ServerHelloPayload {
    fn deserialize(buf: Buffer) -> deserialize::Result<Self> {
        Ok(Self {
            wrapped_key: Vec::<u8>::deserialize(buf)?,
            server_public_key: Vec::<u8>::deserialize(buf)?,
        })
    }
}

/// One name/value credential pair of an `auth` payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Credential {
    /// Credential name, e.g. `"username"`.
    pub name: String,
    /// Credential value.
    pub value: String,
}

impl Credential {
    /// Shorthand constructor.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

impl Serializable for Credential {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.name.serialize(buf);
        self.value.serialize(buf);
    }
}

impl Deserializable for Credential {
    fn deserialize(buf: Buffer) -> deserialize::Result<Self> {
        Ok(Self { name: String::deserialize(buf)?, value: String::deserialize(buf)? })
    }
}

/// The authenticated identity established for a session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Identity {
    /// Principal name.
    pub name: String,
    /// Authentication domain, may be empty.
    pub domain: String,
    /// The mechanism that authenticated the principal.
    pub auth_type: String,
    /// Granted roles.
    pub roles: Vec<String>,
}

/// Payload of an `auth_response` envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthResponseMessage {
    /// Whether authentication succeeded.
    pub is_authenticated: bool,
    /// The established identity; default-empty on failure.
    pub identity: Identity,
}

impl Serializable for AuthResponseMessage {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.is_authenticated.serialize(buf);
        self.identity.name.serialize(buf);
        self.identity.domain.serialize(buf);
        self.identity.auth_type.serialize(buf);
        self.identity.roles.serialize(buf);
    }
}

impl Deserializable for AuthResponseMessage {
    fn deserialize(buf: Buffer) -> deserialize::Result<Self> {
        Ok(Self {
            is_authenticated: bool::deserialize(buf)?,
            identity: Identity {
                name: String::deserialize(buf)?,
                domain: String::deserialize(buf)?,
                auth_type: String::deserialize(buf)?,
                roles: Vec::<String>::deserialize(buf)?,
            },
        })
    }
}

/// Payload of a `goodbye` envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct GoodbyeMessage {
    /// The session being closed.
    pub session_id: Vec<u8>,
}

impl Serializable for GoodbyeMessage {
    fn serialize(&self, buf: &mut Vec<u8>) {
        self.session_id.serialize(buf);
    }
}

impl Deserializable for GoodbyeMessage {
    fn deserialize(buf: Buffer) -> deserialize::Result<Self> {
        Ok(Self { session_id: Vec::<u8>::deserialize(buf)? })
    }
}

/// Decode a whole-buffer message, rejecting trailing garbage.
pub fn decode_exact<T: Deserializable>(bytes: &[u8]) -> deserialize::Result<T> {
    let mut cursor = Cursor::from_slice(bytes);
    let value = T::deserialize(&mut cursor)?;
    if cursor.remaining() != 0 {
        return Err(deserialize::Error::LengthOutOfRange {
            declared: bytes.len(),
            remaining: cursor.remaining(),
        });
    }
    Ok(value)
}
