//! The invocable-service contract.
//!
//! A service is a single dynamic-dispatch object: the dispatcher hands it the
//! resolved method descriptor plus decoded argument values and gets back a
//! future producing either an outcome or a fault. Typed stubs, if wanted, sit
//! on top of this; the descriptor is the contract.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tether_proto::descriptor::{InterfaceDescriptor, MethodDescriptor};
use tether_proto::fault::FaultRecord;
use tether_proto::{Deserializable, ErrorKind, Serializable};

use crate::delegate::DelegateProxy;

/// The future every service invocation returns.
pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<InvocationOutcome, FaultRecord>> + Send + 'static>>;

/// One decoded argument handed to a service.
pub enum ArgValue {
    /// A serialized value blob; decode with the type from the signature.
    Value(Vec<u8>),
    /// An explicit null (also what out-parameter slots arrive as).
    Null,
    /// A delegate-typed argument, materialized as a session-owned proxy.
    Delegate(Arc<DelegateProxy>),
}

/// One out-parameter produced by an invocation.
pub struct OutValue {
    /// Parameter name, matching the signature.
    pub name: String,
    /// Serialized value, or `None` for null.
    pub value: Option<Vec<u8>>,
}

/// What a successful invocation produced.
#[derive(Default)]
pub struct InvocationOutcome {
    /// Serialized return value; `None` for void or null.
    pub return_value: Option<Vec<u8>>,
    /// Out-parameter values in declaration order.
    pub out_values: Vec<OutValue>,
}

impl InvocationOutcome {
    /// A void outcome.
    pub fn void() -> Self {
        Self::default()
    }

    /// An outcome returning `value`.
    pub fn returning<T: Serializable>(value: &T) -> Self {
        Self { return_value: Some(value.to_bytes()), out_values: Vec::new() }
    }

    /// Attach an out-parameter value.
    pub fn with_out<T: Serializable>(mut self, name: impl Into<String>, value: &T) -> Self {
        self.out_values.push(OutValue { name: name.into(), value: Some(value.to_bytes()) });
        self
    }
}

/// A hosted service instance.
///
/// Singleton instances are entered concurrently; interior synchronization is
/// the service's responsibility.
pub trait RemoteService: Send + Sync {
    /// Run `method` with `args`.
    fn invoke(&self, method: &MethodDescriptor, args: Vec<ArgValue>) -> ServiceFuture;
}

// ─── Argument helpers ────────────────────────────────────────────────────────

/// Decode a value argument, faulting on null or type confusion.
pub fn decode_arg<T: Deserializable>(arg: &ArgValue) -> Result<T, FaultRecord> {
    match arg {
        ArgValue::Value(bytes) => T::from_bytes(bytes).map_err(|e| {
            FaultRecord::new(ErrorKind::SerializationFailed.wire_name(), e.to_string())
        }),
        ArgValue::Null => Err(FaultRecord::new(
            ErrorKind::ArgumentMismatch.wire_name(),
            "unexpected null argument",
        )),
        ArgValue::Delegate(_) => Err(FaultRecord::new(
            ErrorKind::ArgumentMismatch.wire_name(),
            "unexpected delegate argument",
        )),
    }
}

/// Extract a delegate argument, faulting on anything else.
pub fn delegate_arg(arg: &ArgValue) -> Result<Arc<DelegateProxy>, FaultRecord> {
    match arg {
        ArgValue::Delegate(proxy) => Ok(proxy.clone()),
        _ => Err(FaultRecord::new(
            ErrorKind::ArgumentMismatch.wire_name(),
            "expected a delegate argument",
        )),
    }
}

// ─── DynService ──────────────────────────────────────────────────────────────

type MethodHandler = Arc<dyn Fn(Vec<ArgValue>) -> ServiceFuture + Send + Sync>;

/// A service assembled from closures, one per method.
///
/// The common way to host a service without code generation:
///
/// ```rust,no_run
/// use tether_proto::descriptor::{MethodDescriptor, ParamSpec};
/// use tether_server::service::{decode_arg, DynService, InvocationOutcome};
///
/// let (descriptor, service) = DynService::builder("Echo")
///     .method(
///         MethodDescriptor::new("ping", vec![ParamSpec::input("s", "string")], Some("string")),
///         |args| {
///             Box::pin(async move {
///                 let s: String = decode_arg(&args[0])?;
///                 Ok(InvocationOutcome::returning(&s))
///             })
///         },
///     )
///     .build();
/// ```
pub struct DynService {
    methods: HashMap<MethodKey, MethodHandler>,
}

#[derive(PartialEq, Eq, Hash)]
struct MethodKey {
    name: String,
    param_types: Vec<String>,
}

impl MethodKey {
    fn of(method: &MethodDescriptor) -> Self {
        Self {
            name: method.name.clone(),
            param_types: method.params.iter().map(|p| p.type_name.clone()).collect(),
        }
    }
}

impl DynService {
    /// Start building a service named `name`.
    pub fn builder(name: impl Into<String>) -> DynServiceBuilder {
        DynServiceBuilder { name: name.into(), methods: Vec::new() }
    }
}

impl RemoteService for DynService {
    fn invoke(&self, method: &MethodDescriptor, args: Vec<ArgValue>) -> ServiceFuture {
        match self.methods.get(&MethodKey::of(method)) {
            Some(handler) => handler(args),
            None => {
                let name = method.name.clone();
                Box::pin(async move {
                    Err(FaultRecord::new(
                        ErrorKind::MethodUnknown.wire_name(),
                        format!("no handler bound for {name}"),
                    ))
                })
            }
        }
    }
}

/// Builder returned by [`DynService::builder`].
pub struct DynServiceBuilder {
    name: String,
    methods: Vec<(MethodDescriptor, MethodHandler)>,
}

impl DynServiceBuilder {
    /// Bind `handler` to `descriptor`.
    pub fn method<H>(mut self, descriptor: MethodDescriptor, handler: H) -> Self
    where
        H: Fn(Vec<ArgValue>) -> ServiceFuture + Send + Sync + 'static,
    {
        self.methods.push((descriptor, Arc::new(handler)));
        self
    }

    /// Finish, producing the interface descriptor and the service instance.
    pub fn build(self) -> (InterfaceDescriptor, Arc<DynService>) {
        let descriptor =
            InterfaceDescriptor::new(self.name, self.methods.iter().map(|(d, _)| d.clone()).collect());
        let methods =
            self.methods.into_iter().map(|(d, h)| (MethodKey::of(&d), h)).collect();
        (descriptor, Arc::new(DynService { methods }))
    }
}
