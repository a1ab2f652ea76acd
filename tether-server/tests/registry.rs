use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tether_proto::descriptor::{InterfaceDescriptor, MethodDescriptor, ParamSpec};
use tether_proto::{BinaryCodec, ErrorKind};
use tether_server::service::{DynService, InvocationOutcome};
use tether_server::session::SessionRegistry;
use tether_server::{RemoteService, ServiceLifetime, ServiceRegistration, ServiceRegistry};
use tether_wire::{spawn_stream_pump, FrameSender, DEFAULT_MAX_FRAME_BYTES};

fn counted_registration(
    name: &str,
    lifetime: ServiceLifetime,
    counter: Arc<AtomicUsize>,
) -> ServiceRegistration {
    let descriptor = InterfaceDescriptor::new(
        name,
        vec![MethodDescriptor::new("noop", vec![], None)],
    );
    ServiceRegistration::named(
        name,
        descriptor,
        Arc::new(move || -> Arc<dyn RemoteService> {
            counter.fetch_add(1, Ordering::SeqCst);
            let (_, service) = DynService::builder("x")
                .method(MethodDescriptor::new("noop", vec![], None), |_| {
                    Box::pin(async { Ok(InvocationOutcome::void()) })
                })
                .build();
            service
        }),
        lifetime,
    )
}

fn test_sender() -> FrameSender {
    let (stream, _other) = tokio::io::duplex(1 << 12);
    let (sender, _receiver) = spawn_stream_pump(stream, DEFAULT_MAX_FRAME_BYTES);
    sender
}

#[test]
fn duplicate_names_are_refused() {
    let registry = ServiceRegistry::new();
    let counter = Arc::new(AtomicUsize::new(0));
    registry
        .register(counted_registration("Echo", ServiceLifetime::Singleton, counter.clone()))
        .unwrap();

    let err = registry
        .register(counted_registration("Echo", ServiceLifetime::Singleton, counter))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DuplicateRegistration);
}

#[test]
fn default_name_is_the_interface_name() {
    let descriptor = InterfaceDescriptor::new(
        "com.example.Calculator",
        vec![MethodDescriptor::new(
            "add",
            vec![ParamSpec::input("a", "i32"), ParamSpec::input("b", "i32")],
            Some("i32"),
        )],
    );
    let (_, service) = DynService::builder("com.example.Calculator")
        .method(
            MethodDescriptor::new(
                "add",
                vec![ParamSpec::input("a", "i32"), ParamSpec::input("b", "i32")],
                Some("i32"),
            ),
            |_| Box::pin(async { Ok(InvocationOutcome::void()) }),
        )
        .build();

    let registry = ServiceRegistry::new();
    registry.register(ServiceRegistration::singleton(descriptor, service)).unwrap();
    assert!(registry.get("com.example.Calculator").is_some());
    assert!(registry.interface_of("com.example.Calculator").is_some());
    assert_eq!(registry.list().len(), 1);
}

#[test]
fn unknown_service_resolution_fails() {
    let registry = ServiceRegistry::new();
    let err = registry.resolve("Nope", None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServiceUnknown);
}

#[test]
fn singleton_is_created_once() {
    let registry = ServiceRegistry::new();
    let counter = Arc::new(AtomicUsize::new(0));
    registry
        .register(counted_registration("S", ServiceLifetime::Singleton, counter.clone()))
        .unwrap();

    registry.resolve("S", None).unwrap();
    registry.resolve("S", None).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn single_call_is_created_per_resolve() {
    let registry = ServiceRegistry::new();
    let counter = Arc::new(AtomicUsize::new(0));
    registry
        .register(counted_registration("S", ServiceLifetime::SingleCall, counter.clone()))
        .unwrap();

    registry.resolve("S", None).unwrap();
    registry.resolve("S", None).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn scoped_is_cached_per_session() {
    let registry = ServiceRegistry::new();
    let counter = Arc::new(AtomicUsize::new(0));
    registry
        .register(counted_registration("S", ServiceLifetime::Scoped, counter.clone()))
        .unwrap();

    let sessions = SessionRegistry::new();
    let codec = Arc::new(BinaryCodec);
    let a = sessions.create(None, "a", test_sender(), codec.clone());
    let b = sessions.create(None, "b", test_sender(), codec);

    registry.resolve("S", Some(&a)).unwrap();
    registry.resolve("S", Some(&a)).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1, "same session reuses the instance");

    registry.resolve("S", Some(&b)).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2, "second session gets its own instance");
}
