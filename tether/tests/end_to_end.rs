use std::sync::{Arc, Mutex};
use std::time::Duration;

use tether::proto::messages::{Credential, Identity};
use tether::proto::{Deserializable, Serializable};
use tether::server::service::{decode_arg, delegate_arg, InvocationOutcome};
use tether::server::{AuthProvider, DelegateProxy};
use tether::{
    CallArg, CallContext, CallPhase, Client, ClientConfig, DelegateSignature, DynService,
    ErrorKind, FaultRecord, InvokeOptions, MethodDescriptor, ParamSpec, RemoteDelegate,
    RemotingError, Server, ServerConfig, ServiceRegistration,
};

async fn bind_server(configure: impl FnOnce(&mut ServerConfig)) -> Server {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = ServerConfig::default();
    config.port = 0;
    configure(&mut config);
    Server::bind(config).await.expect("bind")
}

fn client_config(server: &Server) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.port = server.local_addr().port();
    config
}

fn register_echo(server: &Server) {
    let (descriptor, service) = DynService::builder("Echo")
        .method(
            MethodDescriptor::new("ping", vec![ParamSpec::input("s", "string")], Some("string")),
            |args| {
                Box::pin(async move {
                    let s: String = decode_arg(&args[0])?;
                    Ok(InvocationOutcome::returning(&s))
                })
            },
        )
        .method(
            MethodDescriptor::new(
                "stats",
                vec![ParamSpec::input("s", "string"), ParamSpec::output("upper", "string")],
                Some("i32"),
            ),
            |args| {
                Box::pin(async move {
                    let s: String = decode_arg(&args[0])?;
                    Ok(InvocationOutcome::returning(&(s.len() as i32))
                        .with_out("upper", &s.to_uppercase()))
                })
            },
        )
        .method(
            MethodDescriptor::new("note", vec![ParamSpec::input("s", "string")], None).one_way(),
            |_args| {
                Box::pin(async move {
                    Err(FaultRecord::new("NoteRejected", "one-way methods fail locally"))
                })
            },
        )
        .build();
    server
        .services()
        .register(ServiceRegistration::singleton(descriptor, service))
        .expect("register Echo");
}

// ─── S1: plaintext echo ───────────────────────────────────────────────────────

#[tokio::test]
async fn plaintext_echo() {
    let server = bind_server(|_| {}).await;
    register_echo(&server);

    let client = Client::connect(client_config(&server)).await.unwrap();
    assert!(client.is_connected().await);
    assert!(client.session_id().await.is_some());

    let reply = client
        .invoke("Echo", "ping", vec![CallArg::value("s", "string", &"hi".to_string())])
        .await
        .unwrap();
    assert_eq!(reply.value::<String>().unwrap(), "hi");

    client.disconnect().await.unwrap();
    server.shutdown().await;
}

// ─── S2: encrypted echo ───────────────────────────────────────────────────────

#[tokio::test]
async fn encrypted_echo() {
    let server = bind_server(|c| {
        c.message_encryption = true;
        c.rsa_key_size = 1024; // keep test keygen fast
    })
    .await;
    register_echo(&server);

    let mut config = client_config(&server);
    config.message_encryption = true;
    config.rsa_key_size = 1024;

    let client = Client::connect(config).await.unwrap();
    let session = server.sessions().iterate().pop().expect("one session");
    assert!(session.is_encrypted());

    let reply = client
        .invoke("Echo", "ping", vec![CallArg::value("s", "string", &"hi".to_string())])
        .await
        .unwrap();
    assert_eq!(reply.value::<String>().unwrap(), "hi");

    client.disconnect().await.unwrap();
    server.shutdown().await;
}

// ─── S3: event subscription ───────────────────────────────────────────────────

type Subscribers = Arc<Mutex<Vec<Arc<DelegateProxy>>>>;

fn register_clock(server: &Server) -> Subscribers {
    let subscribers: Subscribers = Arc::default();
    let tick_signature = DelegateSignature::fire_and_forget(["i32"]);

    let on_subscribe = subscribers.clone();
    let on_unsubscribe = subscribers.clone();
    let on_fire = subscribers.clone();

    let (descriptor, service) = DynService::builder("Clock")
        .method(
            MethodDescriptor::new(
                "subscribe_tick",
                vec![ParamSpec::delegate("handler", "delegate", tick_signature.clone())],
                None,
            ),
            move |args| {
                let subscribers = on_subscribe.clone();
                Box::pin(async move {
                    let proxy = delegate_arg(&args[0])?;
                    subscribers.lock().unwrap().push(proxy);
                    Ok(InvocationOutcome::void())
                })
            },
        )
        .method(
            MethodDescriptor::new(
                "unsubscribe_tick",
                vec![ParamSpec::delegate("handler", "delegate", tick_signature)],
                None,
            ),
            move |args| {
                let subscribers = on_unsubscribe.clone();
                Box::pin(async move {
                    let proxy = delegate_arg(&args[0])?;
                    subscribers
                        .lock()
                        .unwrap()
                        .retain(|p| p.handler_key() != proxy.handler_key());
                    Ok(InvocationOutcome::void())
                })
            },
        )
        .method(
            MethodDescriptor::new("fire", vec![ParamSpec::input("n", "i32")], None),
            move |args| {
                let subscribers = on_fire.clone();
                Box::pin(async move {
                    let n: i32 = decode_arg(&args[0])?;
                    let proxies: Vec<Arc<DelegateProxy>> =
                        subscribers.lock().unwrap().clone();
                    for proxy in proxies {
                        proxy.invoke(vec![n.to_bytes()]).await.map_err(|e| {
                            FaultRecord::new("TickDeliveryFailed", e.to_string())
                        })?;
                    }
                    Ok(InvocationOutcome::void())
                })
            },
        )
        .build();

    server
        .services()
        .register(ServiceRegistration::singleton(descriptor, service))
        .expect("register Clock");
    subscribers
}

#[tokio::test]
async fn event_subscription_delivers_ticks_in_order() {
    let server = bind_server(|_| {}).await;
    let subscribers = register_clock(&server);

    let client = Client::connect(client_config(&server)).await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let delegate = RemoteDelegate::new(
        DelegateSignature::fire_and_forget(["i32"]),
        move |args| {
            let n = i32::from_bytes(&args[0]).expect("tick argument");
            let _ = tx.send(n);
            Ok(None)
        },
    );

    client.subscribe_event("Clock", "subscribe_tick", &delegate).await.unwrap();
    assert_eq!(subscribers.lock().unwrap().len(), 1);
    assert_eq!(client.handlers().len(), 1);

    client.invoke("Clock", "fire", vec![CallArg::value("n", "i32", &1i32)]).await.unwrap();
    client.invoke("Clock", "fire", vec![CallArg::value("n", "i32", &2i32)]).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!((first, second), (1, 2));

    client.unsubscribe_event("Clock", "unsubscribe_tick", &delegate).await.unwrap();
    assert!(subscribers.lock().unwrap().is_empty());
    assert_eq!(client.handlers().len(), 0, "released handler leaves the map");

    client.invoke("Clock", "fire", vec![CallArg::value("n", "i32", &3i32)]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err(), "no tick after unsubscribe");

    client.disconnect().await.unwrap();
    server.shutdown().await;
}

// ─── S4: fault propagation ────────────────────────────────────────────────────

#[tokio::test]
async fn service_fault_reaches_the_caller() {
    let server = bind_server(|_| {}).await;
    let (descriptor, service) = DynService::builder("Boom")
        .method(MethodDescriptor::new("boom", vec![], None), |_args| {
            Box::pin(async move { Err(FaultRecord::new("InvalidArgument", "x")) })
        })
        .build();
    server.services().register(ServiceRegistration::singleton(descriptor, service)).unwrap();

    let client = Client::connect(client_config(&server)).await.unwrap();
    let err = client.invoke("Boom", "boom", vec![]).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::ServiceFaulted);
    let fault = err.fault.expect("fault record attached");
    assert_eq!(fault.type_name, "InvalidArgument");
    assert_eq!(fault.message, "x");

    client.disconnect().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn unknown_service_and_method_errors() {
    let server = bind_server(|_| {}).await;
    register_echo(&server);
    let client = Client::connect(client_config(&server)).await.unwrap();

    let err = client.invoke("Nope", "ping", vec![]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServiceUnknown);

    let err = client.invoke("Echo", "pong", vec![]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::MethodUnknown);

    client.disconnect().await.unwrap();
    server.shutdown().await;
}

// ─── S5: invocation timeout ───────────────────────────────────────────────────

#[tokio::test]
async fn slow_call_times_out_and_the_session_survives() {
    let server = bind_server(|_| {}).await;
    let (descriptor, service) = DynService::builder("Sleepy")
        .method(
            MethodDescriptor::new("sleep_ms", vec![ParamSpec::input("ms", "i64")], None),
            |args| {
                Box::pin(async move {
                    let ms: i64 = decode_arg(&args[0])?;
                    tokio::time::sleep(Duration::from_millis(ms as u64)).await;
                    Ok(InvocationOutcome::void())
                })
            },
        )
        .method(MethodDescriptor::new("noop", vec![], None), |_args| {
            Box::pin(async move { Ok(InvocationOutcome::void()) })
        })
        .build();
    server.services().register(ServiceRegistration::singleton(descriptor, service)).unwrap();

    let client = Client::connect(client_config(&server)).await.unwrap();

    let options = InvokeOptions {
        timeout: Some(Duration::from_millis(150)),
        ..Default::default()
    };
    let err = client
        .invoke_with("Sleepy", "sleep_ms", vec![CallArg::value("ms", "i64", &600i64)], options)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::CallTimeout);
    assert_eq!(err.phase, Some(CallPhase::Invoke));
    assert_eq!(client.pending_calls(), 0, "the pending slot is gone");

    // The late result is discarded; the session keeps working.
    tokio::time::sleep(Duration::from_millis(600)).await;
    client.invoke("Sleepy", "noop", vec![]).await.unwrap();

    client.disconnect().await.unwrap();
    server.shutdown().await;
}

// ─── S6: session sweep ────────────────────────────────────────────────────────

#[tokio::test]
async fn idle_sessions_are_swept_while_active_ones_stay() {
    let server = bind_server(|c| {
        c.max_session_age = Duration::from_millis(400);
        c.sweep_interval = Duration::from_millis(100);
    })
    .await;
    register_echo(&server);

    let active = Client::connect(client_config(&server)).await.unwrap();
    let idle = Client::connect(client_config(&server)).await.unwrap();
    assert_eq!(server.sessions().len(), 2);

    for _ in 0..12 {
        active
            .invoke("Echo", "ping", vec![CallArg::value("s", "string", &"keepalive".to_string())])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(server.sessions().len(), 1, "the idle session is gone");
    assert!(!idle.is_connected().await, "the swept session's transport is closed");
    let err = idle.invoke("Echo", "ping", vec![]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotConnected);

    active
        .invoke("Echo", "ping", vec![CallArg::value("s", "string", &"still here".to_string())])
        .await
        .unwrap();

    active.disconnect().await.unwrap();
    server.shutdown().await;
}

// ─── Call-context flow ────────────────────────────────────────────────────────

#[tokio::test]
async fn call_context_round_trips_through_the_service() {
    let server = bind_server(|_| {}).await;
    let (descriptor, service) = DynService::builder("Ctx")
        .method(MethodDescriptor::new("visit", vec![], Some("string")), |_args| {
            Box::pin(async move {
                let ctx = CallContext::current().expect("dispatcher installs the context");
                let prior = ctx
                    .get("k")
                    .map(|v| String::from_bytes(&v).expect("utf8"))
                    .unwrap_or_default();
                ctx.set("k", "v2".to_string().to_bytes());
                Ok(InvocationOutcome::returning(&prior))
            })
        })
        .build();
    server.services().register(ServiceRegistration::singleton(descriptor, service)).unwrap();

    let client = Client::connect(client_config(&server)).await.unwrap();

    let ctx = CallContext::new();
    ctx.set("k", "v1".to_string().to_bytes());
    let (seen_by_service, seen_after_return) = ctx
        .clone()
        .scope({
            let client = client.clone();
            async move {
                let reply = client.invoke("Ctx", "visit", vec![]).await.unwrap();
                let prior: String = reply.value().unwrap();
                let merged = CallContext::current().unwrap().get("k").unwrap();
                (prior, String::from_bytes(&merged).unwrap())
            }
        })
        .await;

    assert_eq!(seen_by_service, "v1", "the service saw the caller's entry");
    assert_eq!(seen_after_return, "v2", "the service's mutation merged back");

    client.disconnect().await.unwrap();
    server.shutdown().await;
}

// ─── One-way isolation ────────────────────────────────────────────────────────

#[tokio::test]
async fn one_way_fault_does_not_affect_the_next_call() {
    let server = bind_server(|_| {}).await;
    register_echo(&server);
    let client = Client::connect(client_config(&server)).await.unwrap();

    let options = InvokeOptions { one_way: true, ..Default::default() };
    client
        .invoke_with(
            "Echo",
            "note",
            vec![CallArg::value("s", "string", &"doomed".to_string())],
            options,
        )
        .await
        .unwrap();

    // The fault stayed on the server; the session is intact.
    let reply = client
        .invoke("Echo", "ping", vec![CallArg::value("s", "string", &"after".to_string())])
        .await
        .unwrap();
    assert_eq!(reply.value::<String>().unwrap(), "after");

    client.disconnect().await.unwrap();
    server.shutdown().await;
}

// ─── Out-parameters ───────────────────────────────────────────────────────────

#[tokio::test]
async fn out_parameters_flow_back() {
    let server = bind_server(|_| {}).await;
    register_echo(&server);
    let client = Client::connect(client_config(&server)).await.unwrap();

    let reply = client
        .invoke(
            "Echo",
            "stats",
            vec![
                CallArg::value("s", "string", &"hello".to_string()),
                CallArg::out("upper", "string"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(reply.value::<i32>().unwrap(), 5);
    assert_eq!(reply.out_param::<String>("upper").unwrap().as_deref(), Some("HELLO"));

    client.disconnect().await.unwrap();
    server.shutdown().await;
}

// ─── Synchronous delegates ────────────────────────────────────────────────────

#[tokio::test]
async fn delegate_with_return_value_round_trips() {
    let server = bind_server(|_| {}).await;
    let (descriptor, service) = DynService::builder("Oracle")
        .method(
            MethodDescriptor::new(
                "ask",
                vec![ParamSpec::delegate(
                    "handler",
                    "delegate",
                    DelegateSignature {
                        argument_types: vec!["i32".into()],
                        return_type: Some("i32".into()),
                    },
                )],
                Some("i32"),
            ),
            |args| {
                Box::pin(async move {
                    let proxy = delegate_arg(&args[0])?;
                    let answer = proxy
                        .invoke(vec![7i32.to_bytes()])
                        .await
                        .map_err(|e| FaultRecord::new("AskFailed", e.to_string()))?;
                    Ok(InvocationOutcome {
                        return_value: answer,
                        out_values: Vec::new(),
                    })
                })
            },
        )
        .build();
    server.services().register(ServiceRegistration::singleton(descriptor, service)).unwrap();

    let client = Client::connect(client_config(&server)).await.unwrap();

    let delegate = RemoteDelegate::new(
        DelegateSignature {
            argument_types: vec!["i32".into()],
            return_type: Some("i32".into()),
        },
        |args| {
            let n = i32::from_bytes(&args[0]).expect("question");
            Ok(Some((n * 2).to_bytes()))
        },
    );

    let reply = client
        .invoke("Oracle", "ask", vec![CallArg::delegate("handler", &delegate)])
        .await
        .unwrap();
    assert_eq!(reply.value::<i32>().unwrap(), 14);

    client.disconnect().await.unwrap();
    server.shutdown().await;
}

// ─── Authentication ───────────────────────────────────────────────────────────

fn credential_provider() -> Arc<dyn AuthProvider> {
    Arc::new(|credentials: &[Credential]| {
        let get = |name: &str| {
            credentials.iter().find(|c| c.name == name).map(|c| c.value.as_str())
        };
        if get("username") == Some("svc") && get("password") == Some("pw") {
            Ok(Identity {
                name: "svc".into(),
                domain: String::new(),
                auth_type: "credentials".into(),
                roles: vec!["user".into()],
            })
        } else {
            Err(RemotingError::new(ErrorKind::AuthFailed, "bad credentials"))
        }
    })
}

#[tokio::test]
async fn valid_credentials_establish_an_identity() {
    let server = bind_server(|c| c.auth_provider = Some(credential_provider())).await;
    register_echo(&server);

    let mut config = client_config(&server);
    config.credentials =
        vec![Credential::new("username", "svc"), Credential::new("password", "pw")];

    let client = Client::connect(config).await.unwrap();
    let reply = client
        .invoke("Echo", "ping", vec![CallArg::value("s", "string", &"hi".to_string())])
        .await
        .unwrap();
    assert_eq!(reply.value::<String>().unwrap(), "hi");

    let session = server.sessions().iterate().pop().expect("session");
    let identity = session.identity().expect("authenticated");
    assert_eq!(identity.name, "svc");
    assert_eq!(identity.roles, vec!["user".to_string()]);

    client.disconnect().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn invalid_credentials_fail_the_connect() {
    let server = bind_server(|c| c.auth_provider = Some(credential_provider())).await;

    let mut config = client_config(&server);
    config.credentials =
        vec![Credential::new("username", "svc"), Credential::new("password", "wrong")];

    let err = Client::connect(config).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::AuthFailed);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.sessions().is_empty(), "the rejected session is torn down");
    server.shutdown().await;
}

// ─── Reconnect ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn auto_reconnect_redials_after_disconnect() {
    let server = bind_server(|_| {}).await;
    register_echo(&server);

    let mut config = client_config(&server);
    config.auto_reconnect = true;
    let client = Client::connect(config).await.unwrap();
    let first_session = client.session_id().await.unwrap();

    client.disconnect().await.unwrap();

    let reply = client
        .invoke("Echo", "ping", vec![CallArg::value("s", "string", &"back".to_string())])
        .await
        .unwrap();
    assert_eq!(reply.value::<String>().unwrap(), "back");

    let second_session = client.session_id().await.unwrap();
    assert_ne!(first_session, second_session, "reconnect establishes a fresh session");

    client.dispose().await;
    server.shutdown().await;
}

// ─── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn local_cancellation_completes_without_a_wire_message() {
    let server = bind_server(|_| {}).await;
    let (descriptor, service) = DynService::builder("Sleepy")
        .method(
            MethodDescriptor::new("sleep_ms", vec![ParamSpec::input("ms", "i64")], None),
            |args| {
                Box::pin(async move {
                    let ms: i64 = decode_arg(&args[0])?;
                    tokio::time::sleep(Duration::from_millis(ms as u64)).await;
                    Ok(InvocationOutcome::void())
                })
            },
        )
        .build();
    server.services().register(ServiceRegistration::singleton(descriptor, service)).unwrap();

    let client = Client::connect(client_config(&server)).await.unwrap();

    let cancel = tokio_util::sync::CancellationToken::new();
    let options = InvokeOptions { cancel: Some(cancel.clone()), ..Default::default() };

    let invoke = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .invoke_with(
                    "Sleepy",
                    "sleep_ms",
                    vec![CallArg::value("ms", "i64", &60_000i64)],
                    options,
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let err = invoke.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(client.pending_calls(), 0);

    client.disconnect().await.unwrap();
    server.shutdown().await;
}
