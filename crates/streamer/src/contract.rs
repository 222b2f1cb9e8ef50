//! # Contract Descriptors
//!
//! A contract is the declared shape of a remote handler: a namespace, a name,
//! and a list of members. Before a proxy may be built for it, a contract is
//! validated into a [`ContractDescriptor`], which maps every member name to
//! its wire name.
//!
//! ## Rules
//!
//! - Only interface contracts, made of async methods only.
//! - No properties, no events, no by-reference parameters.
//! - No two methods may share a wire name (overloading is not supported).
//!
//! ## Wire names
//!
//! ```text
//! namespace "Sample", contract "IEchoHandler", method "EchoAsync"
//!   -> "Sample.EchoHandler.Echo"
//! ```

use std::collections::HashSet;

use crate::dispatch::qualified_name;

/// Reasons a contract cannot be used for a proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    NotInterface { contract: String },
    Property { contract: String, name: String },
    Event { contract: String, name: String },
    NotAsync { method: String },
    ByRefParameter { method: String, parameter: String },
    DuplicateMethod { method: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInterface { contract } => {
                write!(f, "Only interfaces are supported ({} is not one)", contract)
            }
            Self::Property { contract, name } => {
                write!(f, "Properties are not supported ({}.{})", contract, name)
            }
            Self::Event { contract, name } => {
                write!(f, "Events are not supported ({}.{})", contract, name)
            }
            Self::NotAsync { method } => write!(f, "Method '{}' must be async", method),
            Self::ByRefParameter { method, parameter } => write!(
                f,
                "Ref parameters are not supported (parameter '{}' of '{}')",
                parameter, method
            ),
            Self::DuplicateMethod { method } => write!(
                f,
                "Duplicate definitions of {}. Overloading is not supported.",
                method
            ),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractKind {
    Interface,
    Class,
}

/// What a method hands back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// Completes asynchronously with no value.
    AsyncUnit,
    /// Completes asynchronously with a value of the named type.
    AsyncValue(&'static str),
    /// Returns synchronously. Never valid for a remote call.
    Blocking(&'static str),
}

impl ResultShape {
    pub fn of_async<T: ?Sized>() -> Self {
        match std::any::type_name::<T>() {
            "()" => Self::AsyncUnit,
            name => Self::AsyncValue(name),
        }
    }

    pub fn blocking<T: ?Sized>() -> Self {
        Self::Blocking(std::any::type_name::<T>())
    }

    pub fn is_async(&self) -> bool {
        !matches!(self, Self::Blocking(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub type_name: &'static str,
    /// The parameter is an output or by-reference slot (`&mut T`).
    pub by_ref: bool,
}

impl ParamSpec {
    pub fn of<T: ?Sized>(name: &'static str) -> Self {
        let type_name = std::any::type_name::<T>();
        Self {
            name,
            type_name,
            by_ref: type_name.starts_with("&mut "),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSpec {
    pub name: &'static str,
    pub params: Vec<ParamSpec>,
    pub result: ResultShape,
}

impl MethodSpec {
    pub fn new(name: &'static str, params: Vec<ParamSpec>, result: ResultShape) -> Self {
        Self { name, params, result }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberSpec {
    Method(MethodSpec),
    Property {
        name: &'static str,
        type_name: &'static str,
    },
    Event {
        name: &'static str,
    },
}

/// The declared shape of a contract, as written by its author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractSpec {
    pub namespace: &'static str,
    pub name: &'static str,
    pub kind: ContractKind,
    pub members: Vec<MemberSpec>,
}

impl ContractSpec {
    pub fn new(
        namespace: &'static str,
        name: &'static str,
        kind: ContractKind,
        members: Vec<MemberSpec>,
    ) -> Self {
        Self {
            namespace,
            name,
            kind,
            members,
        }
    }
}

/// One validated method of a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Member name as declared on the contract.
    pub name: &'static str,
    /// Qualified name sent in a request's `M` field.
    pub wire_name: String,
    pub params: Vec<ParamSpec>,
    pub result: ResultShape,
}

/// A contract that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractDescriptor {
    full_name: String,
    methods: Vec<MethodDescriptor>,
}

impl ContractDescriptor {
    /// Checks `spec` against the contract rules and computes wire names.
    ///
    /// The first violation found is returned, checking the contract kind,
    /// then properties, then events, then each method in declaration order.
    pub fn validate(spec: ContractSpec) -> Result<Self> {
        if spec.kind != ContractKind::Interface {
            return Err(Error::NotInterface {
                contract: spec.name.to_string(),
            });
        }

        for member in &spec.members {
            if let MemberSpec::Property { name, .. } = member {
                return Err(Error::Property {
                    contract: spec.name.to_string(),
                    name: name.to_string(),
                });
            }
        }

        for member in &spec.members {
            if let MemberSpec::Event { name } = member {
                return Err(Error::Event {
                    contract: spec.name.to_string(),
                    name: name.to_string(),
                });
            }
        }

        let full_name = qualified_name(spec.namespace, trim_interface_marker(spec.name));
        let mut seen = HashSet::new();
        let mut methods = Vec::new();

        for member in spec.members {
            let MemberSpec::Method(method) = member else {
                continue;
            };

            if !method.result.is_async() {
                return Err(Error::NotAsync {
                    method: method.name.to_string(),
                });
            }

            if let Some(param) = method.params.iter().find(|p| p.by_ref) {
                return Err(Error::ByRefParameter {
                    method: method.name.to_string(),
                    parameter: param.name.to_string(),
                });
            }

            let wire_name = qualified_name(&full_name, strip_async_suffix(method.name));
            if !seen.insert(wire_name.to_lowercase()) {
                return Err(Error::DuplicateMethod { method: wire_name });
            }

            methods.push(MethodDescriptor {
                name: method.name,
                wire_name,
                params: method.params,
                result: method.result,
            });
        }

        Ok(Self { full_name, methods })
    }

    /// `<namespace>.<trimmed name>`, the prefix of every wire name.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Looks up a method by its declared member name.
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }
}

/// Wire name of `method` on contract `contract` in `namespace`.
pub fn wire_name(namespace: &str, contract: &str, method: &str) -> String {
    let full_name = qualified_name(namespace, trim_interface_marker(contract));
    qualified_name(&full_name, strip_async_suffix(method))
}

/// Drops a trailing `Async` (or `_async` for snake case) from a method name.
///
/// Only a non-empty stem loses the suffix. A method named exactly `Async` or
/// `_async` keeps its whole name on purpose, so its wire name never ends in an
/// empty segment like `Sample.Contract.`.
pub fn strip_async_suffix(method: &str) -> &str {
    for suffix in ["_async", "Async"] {
        if let Some(stem) = method.strip_suffix(suffix) {
            if !stem.is_empty() {
                return stem;
            }
        }
    }
    method
}

/// Drops every leading `I` from a contract name.
pub fn trim_interface_marker(contract: &str) -> &str {
    contract.trim_start_matches('I')
}
