use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::interp::{Interp, Scope};
use super::source::FunctionCode;
use super::ScriptError;
use crate::compiler::CompiledTemplate;
use crate::component::ComponentScope;
use crate::dom::NodeId;

pub type ObjectRef = Rc<RefCell<IndexMap<String, Value>>>;
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

type NativeImpl = dyn Fn(&Interp, &Value, &[Value]) -> Result<Value, ScriptError>;

/// A host function callable from script. Receives the interpreter, `this` and arguments.
#[derive(Clone)]
pub struct NativeFn {
    pub name: Rc<str>,
    func: Rc<NativeImpl>,
}

impl NativeFn {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&Interp, &Value, &[Value]) -> Result<Value, ScriptError> + 'static,
    {
        Self {
            name: Rc::from(name),
            func: Rc::new(func),
        }
    }

    pub fn call(&self, interp: &Interp, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
        (self.func)(interp, this, args)
    }

    pub fn ptr_eq(&self, other: &NativeFn) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

/// A script function closed over its defining scope.
pub struct Closure {
    pub code: Rc<FunctionCode>,
    pub scope: Rc<Scope>,
}

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Rc<Closure>),
    Native(NativeFn),
    Node(NodeId),
    Component(ComponentScope),
    Template(Rc<CompiledTemplate>),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(props: IndexMap<String, Value>) -> Value {
        Value::Object(Rc::new(RefCell::new(props)))
    }

    pub fn new_object() -> Value {
        Value::object(IndexMap::new())
    }

    pub fn native<F>(name: &str, func: F) -> Value
    where
        F: Fn(&Interp, &Value, &[Value]) -> Result<Value, ScriptError> + 'static,
    {
        Value::Native(NativeFn::new(name, func))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Native(_) | Value::Template(_)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Value::Node(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_component(&self) -> Option<&ComponentScope> {
        match self {
            Value::Component(scope) => Some(scope),
            _ => None,
        }
    }

    /// Own property of a plain object.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(map) => map.borrow().get(key).cloned(),
            _ => None,
        }
    }

    /// Set an own property of a plain object. Returns false for non-objects.
    pub fn set(&self, key: &str, value: Value) -> bool {
        match self {
            Value::Object(map) => {
                map.borrow_mut().insert(key.to_string(), value);
                true
            }
            _ => false,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) | Value::Native(_) | Value::Template(_) => "function",
            _ => "object",
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            Value::Array(items) => {
                let items = items.borrow();
                match items.len() {
                    0 => 0.0,
                    1 => items[0].to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    /// String conversion that needs no engine access (`String(x)` semantics for plain values).
    pub fn to_display(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => s.to_string(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_display() })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(map) => match map.borrow().get("message") {
                // Error-like objects
                Some(Value::Str(msg)) if map.borrow().contains_key("name") => {
                    let name = map
                        .borrow()
                        .get("name")
                        .map(|n| n.to_display())
                        .unwrap_or_default();
                    format!("{}: {}", name, msg)
                }
                _ => "[object Object]".to_string(),
            },
            Value::Function(closure) => format!(
                "function {}() {{ [code] }}",
                closure.code.name.as_deref().unwrap_or("")
            ),
            Value::Native(native) => format!("function {}() {{ [native code] }}", native.name),
            Value::Node(_) => "[object Node]".to_string(),
            Value::Component(_) => "[object Object]".to_string(),
            Value::Template(tpl) => format!("function {}() {{ [template] }}", tpl.id),
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a.ptr_eq(b),
            (Value::Node(a), Value::Node(b)) => a == b,
            (Value::Component(a), Value::Component(b)) => a.ptr_eq(b),
            (Value::Template(a), Value::Template(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::Str(_))
            | (Value::Str(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => {
                if matches!(self, Value::Bool(_) | Value::Number(_) | Value::Str(_))
                    && matches!(other, Value::Bool(_) | Value::Number(_) | Value::Str(_))
                {
                    self.to_number() == other.to_number()
                } else {
                    false
                }
            }
            _ => self.strict_equals(other),
        }
    }

    /// Convert JSON into script values. Objects keep their key order.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::str(s),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert into JSON. Functions and host handles have no JSON form and are dropped
    /// from objects (`null` inside arrays).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Undefined => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => {
                serde_json::Value::Number(serde_json::Number::from(*n as i64))
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Array(items) => {
                serde_json::Value::Array(items.borrow().iter().map(|v| v.to_json()).collect())
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map.borrow().iter() {
                    if v.has_json_form() {
                        out.insert(k.clone(), v.to_json());
                    }
                }
                serde_json::Value::Object(out)
            }
            _ => serde_json::Value::Null,
        }
    }

    fn has_json_form(&self) -> bool {
        !matches!(
            self,
            Value::Undefined
                | Value::Function(_)
                | Value::Native(_)
                | Value::Node(_)
                | Value::Component(_)
                | Value::Template(_)
        )
    }

    /// Copy of an object's own properties (one level deep).
    pub fn shallow_clone(&self) -> Value {
        match self {
            Value::Object(map) => Value::object(map.borrow().clone()),
            Value::Array(items) => Value::array(items.borrow().clone()),
            other => other.clone(),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Undefined
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::str(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NodeId> for Value {
    fn from(id: NodeId) -> Self {
        Value::Node(id)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(&json)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(_) | Value::Object(_) => write!(f, "{}", self.to_json()),
            Value::Node(id) => write!(f, "Node({})", id.0),
            Value::Component(scope) => write!(f, "Component({})", scope.id()),
            other => write!(f, "{}", other.to_display()),
        }
    }
}

/// Format a number the way script string conversion does (`1`, `1.5`, `NaN`).
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}
