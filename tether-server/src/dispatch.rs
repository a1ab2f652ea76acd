//! The invocation dispatcher: decode, resolve, invoke, marshal.

use std::sync::Arc;

use tokio::sync::Semaphore;

use tether_proto::descriptor::{InterfaceDescriptor, MethodDescriptor};
use tether_proto::fault::FaultRecord;
use tether_proto::messages::{
    DelegatePlaceholder, MethodCallMessage, MethodCallResultMessage, OutParamMessage, ParamMessage,
};
use tether_proto::{CallContext, Deserializable, ErrorKind, HandlerKey, RemotingError};
use tether_wire::MessageKind;

use crate::registry::ServiceRegistry;
use crate::service::ArgValue;
use crate::session::ServerSession;

// ─── Method resolution ───────────────────────────────────────────────────────

/// A method selected by overload resolution, with generic arguments
/// substituted into its parameter type tuple.
#[derive(Debug)]
pub struct ResolvedMethod {
    /// The winning descriptor.
    pub method: MethodDescriptor,
    /// Parameter type names after generic substitution.
    pub param_types: Vec<String>,
}

/// Locate the target method.
///
/// Candidates are the descriptor's methods sharing the call's name and
/// generic-argument arity. An exact match on the serialized parameter
/// type-name tuple beats any arity-only match; two surviving candidates are
/// an `ambiguous_method` error.
pub fn resolve_method(
    descriptor: &InterfaceDescriptor,
    method_name: &str,
    generic_args: &[String],
    params: &[ParamMessage],
) -> Result<ResolvedMethod, RemotingError> {
    let named: Vec<&MethodDescriptor> = descriptor.overloads(method_name).collect();
    if named.is_empty() {
        return Err(RemotingError::new(
            ErrorKind::MethodUnknown,
            format!("{}::{} is not part of the interface", descriptor.name, method_name),
        ));
    }

    let candidates: Vec<&MethodDescriptor> = named
        .into_iter()
        .filter(|m| m.generic_params.len() == generic_args.len())
        .collect();
    if candidates.is_empty() {
        return Err(RemotingError::new(
            ErrorKind::ArgumentMismatch,
            format!(
                "{}::{} takes a different number of generic arguments",
                descriptor.name, method_name
            ),
        ));
    }

    let call_types: Vec<&str> = params.iter().map(|p| p.type_name.as_str()).collect();

    let exact: Vec<(&MethodDescriptor, Vec<String>)> = candidates
        .iter()
        .map(|m| (*m, m.param_types_with(generic_args)))
        .filter(|(_, types)| {
            types.len() == call_types.len()
                && types.iter().zip(&call_types).all(|(a, b)| a == b)
        })
        .collect();

    match exact.len() {
        1 => {
            let (method, param_types) = exact.into_iter().next().unwrap();
            return Ok(ResolvedMethod { method: method.clone(), param_types });
        }
        n if n > 1 => {
            return Err(RemotingError::new(
                ErrorKind::AmbiguousMethod,
                format!("{}::{} has {n} exact overloads", descriptor.name, method_name),
            ));
        }
        _ => {}
    }

    let by_arity: Vec<&MethodDescriptor> =
        candidates.into_iter().filter(|m| m.params.len() == params.len()).collect();
    match by_arity.len() {
        0 => Err(RemotingError::new(
            ErrorKind::ArgumentMismatch,
            format!(
                "no overload of {}::{} takes {} parameters",
                descriptor.name,
                method_name,
                params.len()
            ),
        )),
        1 => {
            let method = by_arity[0].clone();
            let param_types = method.param_types_with(generic_args);
            Ok(ResolvedMethod { method, param_types })
        }
        n => Err(RemotingError::new(
            ErrorKind::AmbiguousMethod,
            format!("{}::{} has {n} overloads of that arity", descriptor.name, method_name),
        )),
    }
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

/// Runs decoded call messages on worker tasks with bounded concurrency so a
/// slow service cannot starve the protocol loops.
pub struct Dispatcher {
    services: Arc<ServiceRegistry>,
    workers: Arc<Semaphore>,
}

impl Dispatcher {
    /// Build a dispatcher over `services` with at most `concurrency`
    /// simultaneously running invocations.
    pub fn new(services: Arc<ServiceRegistry>, concurrency: usize) -> Self {
        Self { services, workers: Arc::new(Semaphore::new(concurrency.max(1))) }
    }

    /// Schedule one call. Returns immediately; the receive loop never blocks
    /// on user code.
    pub fn spawn_call(
        &self,
        session: Arc<ServerSession>,
        correlation_id: Vec<u8>,
        call: MethodCallMessage,
    ) {
        let services = self.services.clone();
        let workers = self.workers.clone();

        tokio::spawn(async move {
            let _permit = workers.acquire_owned().await.expect("dispatcher semaphore closed");

            let target = format!("{}::{}", call.service_name, call.method_name);
            let one_way = services
                .get(&call.service_name)
                .and_then(|r| {
                    resolve_method(
                        r.descriptor(),
                        &call.method_name,
                        &call.generic_arguments,
                        &call.parameters,
                    )
                    .ok()
                })
                .map(|m| m.method.one_way)
                .unwrap_or(false);

            match invoke_call(&services, &session, call).await {
                Ok(result) => {
                    if one_way {
                        return;
                    }
                    let payload = session.codec().encode_result(&result);
                    if let Err(e) = session
                        .send_sealed(MessageKind::Result, correlation_id, false, payload)
                        .await
                    {
                        log::warn!("[tether] failed to send result for {target}: {e}");
                    }
                }
                Err(fault) => {
                    if one_way {
                        // One-way faults stay local to the callee.
                        log::warn!("[tether] one-way call {target} faulted: {fault}");
                        return;
                    }
                    let payload = session.codec().encode_fault(&fault.truncated());
                    if let Err(e) = session
                        .send_sealed(MessageKind::Result, correlation_id, true, payload)
                        .await
                    {
                        log::warn!("[tether] failed to send fault for {target}: {e}");
                    }
                }
            }
        });
    }
}

/// Resolve, decode arguments, invoke and marshal one call.
async fn invoke_call(
    services: &ServiceRegistry,
    session: &Arc<ServerSession>,
    call: MethodCallMessage,
) -> Result<MethodCallResultMessage, FaultRecord> {
    let (registration, instance) =
        services.resolve(&call.service_name, Some(session)).map_err(fault_of)?;

    let resolved = resolve_method(
        registration.descriptor(),
        &call.method_name,
        &call.generic_arguments,
        &call.parameters,
    )
    .map_err(fault_of)?;

    let args = decode_args(session, &resolved.method, &call.parameters)?;

    // Restore the caller's context for the duration of the invocation and
    // capture whatever the service left in it afterwards.
    let context = CallContext::from_entries(call.call_context);
    let context_out = context.clone();
    let method = resolved.method.clone();
    let invocation = tokio::spawn(async move {
        context.scope(instance.invoke(&method, args)).await
    });

    let outcome = match invocation.await {
        Ok(outcome) => outcome?,
        Err(join_error) if join_error.is_panic() => {
            return Err(FaultRecord::new(
                ErrorKind::InternalError.wire_name(),
                "service panicked during invocation",
            ));
        }
        Err(_) => {
            return Err(FaultRecord::new(
                ErrorKind::Cancelled.wire_name(),
                "invocation task cancelled",
            ));
        }
    };

    Ok(MethodCallResultMessage {
        is_return_null: outcome.return_value.is_none(),
        return_value: outcome.return_value.unwrap_or_default(),
        out_parameters: outcome
            .out_values
            .into_iter()
            .map(|o| OutParamMessage {
                name: o.name,
                is_null: o.value.is_none(),
                value: o.value.unwrap_or_default(),
            })
            .collect(),
        call_context: context_out.entries(),
    })
}

fn decode_args(
    session: &Arc<ServerSession>,
    method: &MethodDescriptor,
    params: &[ParamMessage],
) -> Result<Vec<ArgValue>, FaultRecord> {
    let mut args = Vec::with_capacity(params.len());
    for (index, param) in params.iter().enumerate() {
        let declared = method.params.get(index);
        let is_delegate = declared.map(|p| p.delegate.is_some()).unwrap_or(false);

        if is_delegate && !param.is_null {
            let placeholder =
                DelegatePlaceholder::from_bytes(&param.value).map_err(|e| {
                    FaultRecord::new(ErrorKind::SerializationFailed.wire_name(), e.to_string())
                })?;
            let key = HandlerKey::from_slice(&placeholder.handler_key).ok_or_else(|| {
                FaultRecord::new(
                    ErrorKind::ArgumentMismatch.wire_name(),
                    format!("parameter '{}' carries a malformed handler key", param.name),
                )
            })?;
            let signature = tether_proto::DelegateSignature {
                argument_types: placeholder.argument_types,
                return_type: placeholder.return_type,
            };
            args.push(ArgValue::Delegate(session.delegate_proxy(key, signature)));
        } else if param.is_null {
            args.push(ArgValue::Null);
        } else {
            args.push(ArgValue::Value(param.value.clone()));
        }
    }
    Ok(args)
}

fn fault_of(error: RemotingError) -> FaultRecord {
    FaultRecord::new(error.kind.wire_name(), error.message)
}
