use tether_proto::fault::{FaultRecord, MAX_FAULT_DEPTH};
use tether_proto::messages::{
    decode_exact, AuthResponseMessage, ContextEntry, Credential, DelegateInvocationMessage,
    DelegatePlaceholder, GoodbyeMessage, Identity, MethodCallMessage, MethodCallResultMessage,
    OutParamMessage, ParamMessage, ServerHelloPayload,
};
use tether_proto::{Deserializable, Serializable};

fn round_trip<T>(value: &T) -> T
where
    T: Serializable + Deserializable,
{
    T::from_bytes(&value.to_bytes()).expect("round trip")
}

#[test]
fn call_message_round_trip() {
    let msg = MethodCallMessage {
        service_name: "Echo".into(),
        method_name: "ping".into(),
        generic_arguments: vec!["string".into()],
        parameters: vec![
            ParamMessage::input("s", "string", "hi".to_string().to_bytes()),
            ParamMessage::null("opt", "i64"),
            ParamMessage::out("n", "i32"),
        ],
        call_context: vec![ContextEntry { name: "tenant".into(), value: vec![1, 2, 3] }],
    };
    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn param_value_empty_iff_null() {
    let null = ParamMessage::null("a", "string");
    assert!(null.is_null);
    assert!(null.value.is_empty());

    let full = ParamMessage::input("a", "string", "x".to_string().to_bytes());
    assert!(!full.is_null);
    assert!(!full.value.is_empty());
}

#[test]
fn result_message_round_trip() {
    let msg = MethodCallResultMessage {
        is_return_null: false,
        return_value: 42i32.to_bytes(),
        out_parameters: vec![
            OutParamMessage { name: "count".into(), is_null: false, value: 7i64.to_bytes() },
            OutParamMessage { name: "missing".into(), is_null: true, value: vec![] },
        ],
        call_context: vec![],
    };
    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn delegate_invocation_round_trip() {
    let msg = DelegateInvocationMessage {
        correlation_id: vec![9; 16],
        handler_key: vec![7; 16],
        arguments: vec![1i32.to_bytes(), 2i32.to_bytes()],
    };
    assert_eq!(round_trip(&msg), msg);
}

#[test]
fn delegate_placeholder_round_trip() {
    let with_return = DelegatePlaceholder {
        handler_key: vec![1; 16],
        argument_types: vec!["i32".into(), "string".into()],
        return_type: Some("bool".into()),
    };
    assert_eq!(round_trip(&with_return), with_return);

    let fire_and_forget = DelegatePlaceholder {
        handler_key: vec![2; 16],
        argument_types: vec!["i32".into()],
        return_type: None,
    };
    assert_eq!(round_trip(&fire_and_forget), fire_and_forget);
}

#[test]
fn handshake_messages_round_trip() {
    let hello = ServerHelloPayload {
        wrapped_key: vec![0xAA; 128],
        server_public_key: vec![0xBB; 140],
    };
    assert_eq!(round_trip(&hello), hello);

    let creds = vec![
        Credential::new("username", "svc"),
        Credential::new("password", "secret"),
    ];
    assert_eq!(round_trip(&creds), creds);

    let auth = AuthResponseMessage {
        is_authenticated: true,
        identity: Identity {
            name: "svc".into(),
            domain: "corp".into(),
            auth_type: "credentials".into(),
            roles: vec!["reader".into(), "writer".into()],
        },
    };
    assert_eq!(round_trip(&auth), auth);

    let bye = GoodbyeMessage { session_id: vec![3; 16] };
    assert_eq!(round_trip(&bye), bye);
}

#[test]
fn decode_exact_rejects_trailing_bytes() {
    let mut bytes = GoodbyeMessage { session_id: vec![3; 16] }.to_bytes();
    bytes.push(0xFF);
    assert!(decode_exact::<GoodbyeMessage>(&bytes).is_err());
}

#[test]
fn fault_round_trip_with_data_and_inner() {
    let fault = FaultRecord::new("InvalidArgument", "x")
        .with_stack("at Boom()")
        .with_inner(FaultRecord::new("RootCause", "deeper"));
    let decoded = FaultRecord::from_bytes(&fault.to_bytes()).unwrap();
    assert_eq!(decoded, fault);
}

#[test]
fn fault_chain_is_cut_at_depth_limit() {
    let mut fault = FaultRecord::new("leaf", "0");
    for i in 1..40 {
        fault = FaultRecord::new("wrap", i.to_string()).with_inner(fault);
    }
    assert!(fault.depth() > MAX_FAULT_DEPTH);

    let decoded = FaultRecord::from_bytes(&fault.to_bytes()).unwrap();
    assert_eq!(decoded.depth(), MAX_FAULT_DEPTH);
}

#[test]
fn stand_in_preserves_type_and_message() {
    let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
    let fault = FaultRecord::stand_in_for("io_error", &io);
    assert_eq!(fault.type_name, "io_error");
    assert!(fault.message.contains("boom"));
}
