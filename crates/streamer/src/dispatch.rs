//! # Dispatch Table
//!
//! Maps qualified method names to invokers, and turns a [`Request`] into a
//! [`Response`].
//!
//! ## Architecture
//!
//! - **MethodSet**: explicit registration. A handler lists its
//!   `(method name, function)` pairs under its full type name.
//! - **Handler**: a type that can describe its own method set.
//! - **DispatchTable**: the live table owned by one server channel. Keys are
//!   `<full name>.<method>`, compared case-insensitively.
//! - **Binding**: the handle returned by a successful bind. Unbinding removes
//!   exactly the entries that bind installed.
//!
//! ## Invariants
//!
//! - A bind installs all of its entries or none of them.
//! - Only one handler may ever be bound to a table.
//! - Failures inside a call (unknown method, bad arguments, a failing or
//!   panicking handler) become the response's `E` field. They are never
//!   errors of the channel.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::Weak;

use serde::Serialize;
use serde_json::Value;

use crate::args::FromArgs;
use crate::args::MethodFn;
use crate::codec::Request;
use crate::codec::Response;

/// Binding errors. These are configuration mistakes, reported at bind time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Two methods of the same handler share a qualified name.
    DuplicateMethod(String),
    /// The channel already has a handler bound.
    AlreadyBound,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateMethod(name) => write!(
                f,
                "Duplicate definitions of {}. Overloading is not supported.",
                name
            ),
            Self::AlreadyBound => write!(f, "Can't bind to different objects"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

type Invoker = Arc<dyn Fn(Vec<Value>) -> std::result::Result<Option<Value>, String> + Send + Sync>;

/// The methods one handler exposes, registered explicitly.
///
/// ```ignore
/// let methods = MethodSet::new("Sample.EchoHandler")
///     .method("Echo", |value: String| value)
///     .try_method("Parse", |text: String| text.parse::<i64>());
/// ```
pub struct MethodSet {
    full_name: String,
    methods: Vec<(String, Invoker)>,
}

impl MethodSet {
    /// Starts an empty set for the handler type named `full_name`
    /// (e.g. `Sample.EchoHandler`).
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            methods: Vec::new(),
        }
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Registers a method that cannot fail.
    pub fn method<F, Args, R>(mut self, name: &str, f: F) -> Self
    where
        F: MethodFn<Args, R>,
        Args: FromArgs + 'static,
        R: Serialize + 'static,
    {
        let invoker: Invoker = Arc::new(move |args: Vec<Value>| {
            let args = Args::from_args(args)?;
            encode_result(&f.call(args))
        });
        self.methods.push((name.to_string(), invoker));
        self
    }

    /// Registers a method whose `Err` is reported to the caller by message.
    pub fn try_method<F, Args, R, E>(mut self, name: &str, f: F) -> Self
    where
        F: MethodFn<Args, std::result::Result<R, E>>,
        Args: FromArgs + 'static,
        R: Serialize + 'static,
        E: Display + 'static,
    {
        let invoker: Invoker = Arc::new(move |args: Vec<Value>| {
            let args = Args::from_args(args)?;
            let value = f.call(args).map_err(|e| e.to_string())?;
            encode_result(&value)
        });
        self.methods.push((name.to_string(), invoker));
        self
    }

    /// The qualified names this set would install, in registration order.
    pub fn qualified_names(&self) -> Vec<String> {
        self.methods
            .iter()
            .map(|(name, _)| qualified_name(&self.full_name, name))
            .collect()
    }
}

/// Something that can be bound to a server channel.
///
/// Implement this for a handler type so it can list its own methods, usually
/// by cloning an `Arc<Self>` into each registered closure.
pub trait Handler {
    fn methods(self) -> MethodSet;
}

impl Handler for MethodSet {
    fn methods(self) -> MethodSet {
        self
    }
}

/// `<full name>.<method>`, the key a client must send in `M`.
pub fn qualified_name(full_name: &str, method: &str) -> String {
    if full_name.is_empty() {
        method.to_string()
    } else {
        format!("{}.{}", full_name, method)
    }
}

fn dispatch_key(name: &str) -> String {
    name.to_lowercase()
}

fn encode_result<R: Serialize>(value: &R) -> std::result::Result<Option<Value>, String> {
    let value = serde_json::to_value(value).map_err(|e| e.to_string())?;
    Ok(Some(value).filter(|v| !v.is_null()))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "Handler panicked".to_string()
    }
}

struct Entry {
    name: String,
    invoker: Invoker,
}

#[derive(Default)]
struct TableState {
    entries: HashMap<String, Entry>,
    bound: bool,
}

/// The live qualified-name → invoker table of one server channel.
#[derive(Default)]
pub struct DispatchTable {
    state: RwLock<TableState>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs every method of `handler`, or nothing on error.
    pub fn bind<H: Handler>(self: &Arc<Self>, handler: H) -> Result<Binding> {
        let set = handler.methods();

        let mut seen = HashSet::new();
        let mut staged = Vec::with_capacity(set.methods.len());
        for (method, invoker) in set.methods {
            let name = qualified_name(&set.full_name, &method);
            let key = dispatch_key(&name);
            if !seen.insert(key.clone()) {
                return Err(Error::DuplicateMethod(name));
            }
            staged.push((key, Entry { name, invoker }));
        }

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.bound {
            return Err(Error::AlreadyBound);
        }
        state.bound = true;

        let mut keys = Vec::with_capacity(staged.len());
        for (key, entry) in staged {
            tracing::debug!(method = %entry.name, "bound method");
            keys.push(key.clone());
            state.entries.insert(key, entry);
        }

        Ok(Binding {
            table: Arc::downgrade(self),
            keys: Mutex::new(keys),
        })
    }

    /// Case-insensitive lookup of a qualified name.
    pub fn contains(&self, method: &str) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.entries.contains_key(&dispatch_key(method))
    }

    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, method: &str) -> Option<Invoker> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .entries
            .get(&dispatch_key(method))
            .map(|entry| entry.invoker.clone())
    }

    fn remove(&self, keys: &[String]) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            if let Some(entry) = state.entries.remove(key) {
                tracing::debug!(method = %entry.name, "unbound method");
            }
        }
    }

    /// Runs one request against the table and produces its response.
    ///
    /// The handler runs synchronously on the calling task.
    pub fn dispatch(&self, request: Request) -> Response {
        let Request { id, method, args } = request;
        let method = method.unwrap_or_default();

        let Some(invoker) = self.lookup(&method) else {
            tracing::debug!(id, method = %method, "unknown method");
            return Response::unknown_method(id, &method);
        };

        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| invoker(args)))
            .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())));

        match outcome {
            Ok(result) => Response::ok(id, result),
            Err(message) => {
                tracing::debug!(id, method = %method, error = %message, "call failed");
                Response::err(id, message)
            }
        }
    }
}

/// The entries installed by one bind, removable as a unit.
///
/// Dropping a `Binding` leaves the methods in place.
pub struct Binding {
    table: Weak<DispatchTable>,
    keys: Mutex<Vec<String>>,
}

impl Binding {
    /// Removes the bound methods. Later requests for them get
    /// "Unknown method". Calling this more than once is harmless.
    pub fn unbind(&self) {
        let keys = std::mem::take(&mut *self.keys.lock().unwrap_or_else(|e| e.into_inner()));
        if let Some(table) = self.table.upgrade() {
            table.remove(&keys);
        }
    }
}
