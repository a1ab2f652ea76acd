//! Interface descriptors — the contract between caller and service.
//!
//! A descriptor carries everything the dispatcher needs to resolve and type a
//! call: method names, parameter type names, return types, generic parameter
//! lists and one-way flags. There is no inheritance in this model; a service
//! registers one flat descriptor.

/// Signature of a delegate-typed parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct DelegateSignature {
    /// Full type names of the delegate's arguments.
    pub argument_types: Vec<String>,
    /// Return type; `None` makes the delegate fire-and-forget.
    pub return_type: Option<String>,
}

impl DelegateSignature {
    /// A fire-and-forget delegate taking `argument_types`.
    pub fn fire_and_forget<I, S>(argument_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argument_types: argument_types.into_iter().map(Into::into).collect(),
            return_type: None,
        }
    }
}

/// One parameter of a method signature.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: String,
    /// Full serialized type name; may be a generic parameter name.
    pub type_name: String,
    /// Whether the parameter flows back to the caller.
    pub is_out: bool,
    /// Present iff this parameter is delegate-typed.
    pub delegate: Option<DelegateSignature>,
}

impl ParamSpec {
    /// A plain in-parameter.
    pub fn input(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self { name: name.into(), type_name: type_name.into(), is_out: false, delegate: None }
    }

    /// An out-parameter.
    pub fn output(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self { name: name.into(), type_name: type_name.into(), is_out: true, delegate: None }
    }

    /// A delegate-typed parameter.
    pub fn delegate(
        name: impl Into<String>,
        type_name: impl Into<String>,
        signature: DelegateSignature,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            is_out: false,
            delegate: Some(signature),
        }
    }
}

/// One invocable method of a service interface.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodDescriptor {
    /// Method name; overloads share it.
    pub name: String,
    /// Names of generic parameters, e.g. `["T"]`. Empty for plain methods.
    pub generic_params: Vec<String>,
    /// Parameters in declaration order.
    pub params: Vec<ParamSpec>,
    /// Return type name; `None` for void.
    pub return_type: Option<String>,
    /// One-way methods produce no response envelope.
    pub one_way: bool,
}

impl MethodDescriptor {
    /// A plain two-way method.
    pub fn new(
        name: impl Into<String>,
        params: Vec<ParamSpec>,
        return_type: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            generic_params: Vec::new(),
            params,
            return_type: return_type.map(str::to_owned),
            one_way: false,
        }
    }

    /// Mark the method one-way.
    pub fn one_way(mut self) -> Self {
        self.one_way = true;
        self
    }

    /// Declare generic parameters.
    pub fn with_generics<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.generic_params = names.into_iter().map(Into::into).collect();
        self
    }

    /// The parameter type-name tuple with `generic_args` substituted for the
    /// method's generic parameter names.
    pub fn param_types_with(&self, generic_args: &[String]) -> Vec<String> {
        self.params
            .iter()
            .map(|p| {
                match self.generic_params.iter().position(|g| *g == p.type_name) {
                    Some(i) if i < generic_args.len() => generic_args[i].clone(),
                    _ => p.type_name.clone(),
                }
            })
            .collect()
    }
}

/// A service interface: a name plus its flat method list.
#[derive(Clone, Debug, PartialEq)]
pub struct InterfaceDescriptor {
    /// Fully qualified interface name; the default service name.
    pub name: String,
    /// All invocable methods, overloads included.
    pub methods: Vec<MethodDescriptor>,
}

impl InterfaceDescriptor {
    /// Build a descriptor from its parts.
    pub fn new(name: impl Into<String>, methods: Vec<MethodDescriptor>) -> Self {
        Self { name: name.into(), methods }
    }

    /// All methods sharing `name`.
    pub fn overloads<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MethodDescriptor> {
        self.methods.iter().filter(move |m| m.name == name)
    }
}
