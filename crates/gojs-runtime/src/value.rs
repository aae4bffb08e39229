//! The simulated JavaScript value model.
//!
//! Values crossing the host/guest boundary form a small tagged sum. The
//! reference kinds (strings, byte arrays, arrays, objects, functions and
//! bare property maps) hold `Arc`s; the allocation address doubles as the
//! identity signature the value registry interns on. Host functions receive
//! a [`FuncScope`] at call time instead of capturing the module, which keeps
//! the object graph free of back-pointers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::instance::Instance;
use crate::module::Module;

/// The properties on an object: either nested values or functions.
pub type Properties = HashMap<String, Value>;

/// A simulated JavaScript object.
pub struct JsObject {
    pub properties: RwLock<Properties>,
}

/// Everything a host function may touch while it runs: the owning module
/// (registry, waPC context) and the engine adapter of the current call.
pub struct FuncScope<'a> {
    pub module: &'a Module,
    pub instance: &'a mut dyn Instance,
}

type HostFn = Box<dyn Fn(&mut FuncScope<'_>, &[Value]) -> Value + Send + Sync>;

/// A host-side function value.
///
/// Constructor functions carry a name so `instanceof` checks can match on it.
pub struct JsFunction {
    name: Option<String>,
    f: HostFn,
}

impl JsFunction {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn call(&self, scope: &mut FuncScope<'_>, args: &[Value]) -> Value {
        (self.f)(scope, args)
    }
}

/// A value passed between the host and the guest.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<String>),
    Bytes(Arc<RwLock<Vec<u8>>>),
    Array(Arc<RwLock<Vec<Value>>>),
    Object(Arc<JsObject>),
    Function(Arc<JsFunction>),
    Properties(Arc<RwLock<Properties>>),
}

impl Value {
    pub fn object(properties: Properties) -> Value {
        Value::Object(Arc::new(JsObject {
            properties: RwLock::new(properties),
        }))
    }

    pub fn array(elements: Vec<Value>) -> Value {
        Value::Array(Arc::new(RwLock::new(elements)))
    }

    pub fn bytes(data: Vec<u8>) -> Value {
        Value::Bytes(Arc::new(RwLock::new(data)))
    }

    pub fn properties(properties: Properties) -> Value {
        Value::Properties(Arc::new(RwLock::new(properties)))
    }

    pub fn function(f: impl Fn(&mut FuncScope<'_>, &[Value]) -> Value + Send + Sync + 'static) -> Value {
        Value::Function(Arc::new(JsFunction {
            name: None,
            f: Box::new(f),
        }))
    }

    /// A named function; the name is what `instanceof` matches against.
    pub fn constructor(
        name: &str,
        f: impl Fn(&mut FuncScope<'_>, &[Value]) -> Value + Send + Sync + 'static,
    ) -> Value {
        Value::Function(Arc::new(JsFunction {
            name: Some(name.to_owned()),
            f: Box::new(f),
        }))
    }

    /// A stable identifier for the value's heap cell, or `None` for the
    /// kinds that are stored inline in the NaN box.
    pub fn signature(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(Arc::as_ptr(s) as usize),
            Value::Bytes(b) => Some(Arc::as_ptr(b) as *const () as usize),
            Value::Array(a) => Some(Arc::as_ptr(a) as *const () as usize),
            Value::Object(o) => Some(Arc::as_ptr(o) as *const () as usize),
            Value::Function(f) => Some(Arc::as_ptr(f) as *const () as usize),
            Value::Properties(p) => Some(Arc::as_ptr(p) as *const () as usize),
            _ => None,
        }
    }

    /// The 2-bit type tag stored in the upper word of the NaN box.
    pub(crate) fn type_tag(&self) -> u32 {
        match self {
            Value::Object(_) | Value::Array(_) | Value::Bytes(_) | Value::Properties(_) => 1,
            Value::String(_) => 2,
            Value::Function(_) => 4,
            _ => 0,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bytes(_) => "Uint8Array",
            Value::Array(_) => "Array",
            Value::Object(_) => "Object",
            Value::Function(_) => "function",
            Value::Properties(_) => "properties",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

macro_rules! value_from_number {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Value {
                Value::Number(v as f64)
            }
        })*
    };
}

value_from_number!(f64, f32, i8, u8, i16, u16, i32, u32, i64, u64, isize, usize);

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::String(Arc::new(v.to_owned()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::String(Arc::new(v))
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Value {
        Value::bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Value {
        Value::array(v)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Properties(a), Value::Properties(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "Uint8Array(len={})", b.read().len()),
            Value::Array(a) => write!(f, "Array(len={})", a.read().len()),
            Value::Object(o) => write!(f, "Object(props={})", o.properties.read().len()),
            Value::Function(func) => match func.name() {
                Some(name) => write!(f, "function {name}"),
                None => write!(f, "function"),
            },
            Value::Properties(p) => write!(f, "Properties(len={})", p.read().len()),
        }
    }
}
