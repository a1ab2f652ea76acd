use tether_proto::descriptor::{InterfaceDescriptor, MethodDescriptor, ParamSpec};
use tether_proto::messages::ParamMessage;
use tether_proto::{ErrorKind, Serializable};
use tether_server::resolve_method;

fn calculator() -> InterfaceDescriptor {
    InterfaceDescriptor::new(
        "Calculator",
        vec![
            MethodDescriptor::new(
                "add",
                vec![ParamSpec::input("a", "i32"), ParamSpec::input("b", "i32")],
                Some("i32"),
            ),
            MethodDescriptor::new(
                "add",
                vec![ParamSpec::input("a", "f64"), ParamSpec::input("b", "f64")],
                Some("f64"),
            ),
            MethodDescriptor::new(
                "describe",
                vec![ParamSpec::input("value", "T")],
                Some("string"),
            )
            .with_generics(["T"]),
            MethodDescriptor::new("reset", vec![], None).one_way(),
        ],
    )
}

fn params(types: &[&str]) -> Vec<ParamMessage> {
    types
        .iter()
        .enumerate()
        .map(|(i, t)| ParamMessage::input(format!("p{i}"), *t, 0i32.to_bytes()))
        .collect()
}

#[test]
fn exact_type_tuple_wins() {
    let desc = calculator();
    let resolved = resolve_method(&desc, "add", &[], &params(&["f64", "f64"])).unwrap();
    assert_eq!(resolved.method.return_type.as_deref(), Some("f64"));
    assert_eq!(resolved.param_types, vec!["f64", "f64"]);
}

#[test]
fn unknown_method_name() {
    let desc = calculator();
    let err = resolve_method(&desc, "subtract", &[], &params(&["i32"])).unwrap_err();
    assert_eq!(err.kind, ErrorKind::MethodUnknown);
}

#[test]
fn wrong_arity_is_argument_mismatch() {
    let desc = calculator();
    let err = resolve_method(&desc, "add", &[], &params(&["i32"])).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ArgumentMismatch);
}

#[test]
fn two_arity_matches_without_exact_match_are_ambiguous() {
    let desc = calculator();
    // Type names match neither overload exactly, but both have arity 2.
    let err = resolve_method(&desc, "add", &[], &params(&["bytes", "bytes"])).unwrap_err();
    assert_eq!(err.kind, ErrorKind::AmbiguousMethod);
}

#[test]
fn generic_arguments_substitute_into_the_tuple() {
    let desc = calculator();
    let resolved = resolve_method(
        &desc,
        "describe",
        &["string".to_owned()],
        &params(&["string"]),
    )
    .unwrap();
    assert_eq!(resolved.param_types, vec!["string"]);
    assert!(resolved.method.generic_params.contains(&"T".to_owned()));
}

#[test]
fn generic_arity_mismatch_is_rejected() {
    let desc = calculator();
    let err = resolve_method(&desc, "describe", &[], &params(&["string"])).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ArgumentMismatch);
}

#[test]
fn one_way_flag_travels_with_resolution() {
    let desc = calculator();
    let resolved = resolve_method(&desc, "reset", &[], &[]).unwrap();
    assert!(resolved.method.one_way);
}

#[test]
fn two_identical_signatures_are_ambiguous() {
    let desc = InterfaceDescriptor::new(
        "Weird",
        vec![
            MethodDescriptor::new("go", vec![ParamSpec::input("a", "i32")], None),
            MethodDescriptor::new("go", vec![ParamSpec::input("b", "i32")], Some("i32")),
        ],
    );
    let err = resolve_method(&desc, "go", &[], &params(&["i32"])).unwrap_err();
    assert_eq!(err.kind, ErrorKind::AmbiguousMethod);
}
