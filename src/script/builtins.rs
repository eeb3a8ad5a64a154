//! Builtin globals, method tables and host bindings for the script interpreter.

use indexmap::IndexMap;
use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, error, info, warn};

use super::interp::{Interp, Scope};
use super::value::{number_to_string, Value};
use super::ScriptError;
use crate::dom::{ElementChild, NodeId, NodeKind};
use crate::escape::escape_html;
use crate::html;
use crate::render::RenderOptions;

type EResult<T> = Result<T, ScriptError>;

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn arg_string(args: &[Value], index: usize) -> String {
    match args.get(index) {
        None | Some(Value::Undefined) => String::new(),
        Some(value) => value.to_display(),
    }
}

/// Resolve a possibly negative relative index against `len` (`slice` semantics).
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

fn this_array(this: &Value) -> EResult<super::value::ArrayRef> {
    match this {
        Value::Array(items) => Ok(items.clone()),
        other => Err(ScriptError::type_error(format!(
            "{} is not an array",
            other.to_display()
        ))),
    }
}

fn this_string(this: &Value) -> String {
    this.to_display()
}

// ═══════════════════════════════════════════════════════════════════════════════
// KEYS
// ═══════════════════════════════════════════════════════════════════════════════

/// Enumerable own keys, in insertion order (`for..in`, `Object.keys`).
pub fn own_keys(_interp: &Interp, value: &Value) -> Vec<String> {
    match value {
        Value::Object(map) => map.borrow().keys().cloned().collect(),
        Value::Array(items) => (0..items.borrow().len()).map(|i| i.to_string()).collect(),
        Value::Str(s) => (0..s.chars().count()).map(|i| i.to_string()).collect(),
        Value::Component(component) => component.member_keys(),
        _ => Vec::new(),
    }
}

fn own_entries(interp: &Interp, value: &Value) -> EResult<Vec<(String, Value)>> {
    let keys = own_keys(interp, value);
    keys.into_iter()
        .map(|key| {
            let item = interp.get_member(value, &key)?;
            Ok((key, item))
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// GLOBALS
// ═══════════════════════════════════════════════════════════════════════════════

/// Install the builtin globals into `scope`.
pub fn install_globals(scope: &Rc<Scope>) {
    scope.define("NaN", Value::Number(f64::NAN));
    scope.define("Infinity", Value::Number(f64::INFINITY));
    scope.define("undefined", Value::Undefined);
    scope.define("Math", math_object());
    scope.define("JSON", json_object());
    scope.define("Object", object_constructor());
    scope.define("Array", array_constructor());
    scope.define("console", console_object());

    scope.define(
        "String",
        Value::native("String", |interp, _, args| {
            Ok(Value::str(match args.first() {
                None => String::new(),
                Some(value) => interp.stringify(value),
            }))
        }),
    );
    scope.define(
        "Number",
        Value::native("Number", |_, _, args| {
            Ok(Value::Number(args.first().map(|v| v.to_number()).unwrap_or(0.0)))
        }),
    );
    scope.define(
        "Boolean",
        Value::native("Boolean", |_, _, args| Ok(Value::Bool(arg(args, 0).truthy()))),
    );
    scope.define(
        "parseInt",
        Value::native("parseInt", |_, _, args| {
            let radix = match arg(args, 1) {
                Value::Undefined => 10,
                value => value.to_number() as u32,
            };
            Ok(Value::Number(parse_int(&arg_string(args, 0), radix)))
        }),
    );
    scope.define(
        "parseFloat",
        Value::native("parseFloat", |_, _, args| {
            Ok(Value::Number(parse_float(&arg_string(args, 0))))
        }),
    );
    scope.define(
        "isNaN",
        Value::native("isNaN", |_, _, args| {
            Ok(Value::Bool(arg(args, 0).to_number().is_nan()))
        }),
    );
    scope.define(
        "Error",
        Value::native("Error", |_, _, args| {
            let error = Value::new_object();
            error.set("name", Value::str("Error"));
            error.set("message", Value::str(arg_string(args, 0)));
            Ok(error)
        }),
    );

    let timer_ids = Rc::new(Cell::new(0u64));
    scope.define(
        "setTimeout",
        Value::native("setTimeout", move |interp, _, args| {
            let callback = arg(args, 0);
            if !callback.is_callable() {
                return Err(ScriptError::type_error("setTimeout callback is not a function"));
            }
            let delay = arg(args, 1).to_number();
            let delay = if delay.is_finite() && delay > 0.0 {
                delay as u64
            } else {
                0
            };
            let extra: Vec<Value> = args.iter().skip(2).cloned().collect();
            interp.engine().schedule(
                "setTimeout",
                delay,
                Box::new(move |engine| {
                    if let Err(e) = engine.interp().call(&callback, Value::Undefined, &extra) {
                        error!(error = %e, "setTimeout callback failed");
                    }
                }),
            );
            timer_ids.set(timer_ids.get() + 1);
            Ok(Value::Number(timer_ids.get() as f64))
        }),
    );

    scope.define(
        "__interp",
        Value::native("__interp", |interp, _, args| {
            Ok(Value::str(output_text(interp, &arg(args, 0))?))
        }),
    );
    scope.define(
        "__escape",
        Value::native("__escape", |interp, _, args| {
            Ok(Value::str(escape_html(&output_text(interp, &arg(args, 0))?)))
        }),
    );
}

/// Text written by `##=` and `##-`: callables are invoked with no arguments,
/// null and undefined produce nothing.
fn output_text(interp: &Interp, value: &Value) -> EResult<String> {
    let value = if value.is_callable() {
        interp.call(value, Value::Undefined, &[])?
    } else {
        value.clone()
    };
    if value.is_nullish() {
        return Ok(String::new());
    }
    Ok(interp.stringify(&value))
}

fn parse_int(text: &str, radix: u32) -> f64 {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, digits) = if (radix == 16 || radix == 0)
        && (digits.starts_with("0x") || digits.starts_with("0X"))
    {
        (16, &digits[2..])
    } else if radix == 0 {
        (10, digits)
    } else {
        (radix, digits)
    };
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let valid: String = digits.chars().take_while(|c| c.is_digit(radix)).collect();
    if valid.is_empty() {
        return f64::NAN;
    }
    let value = valid
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, d| acc * radix as f64 + d as f64);
    if negative {
        -value
    } else {
        value
    }
}

fn parse_float(text: &str) -> f64 {
    let text = text.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_exp = false;
    let bytes = text.as_bytes();
    while end < bytes.len() {
        let c = bytes[end] as char;
        let ok = c.is_ascii_digit()
            || ((c == '-' || c == '+')
                && (end == 0 || matches!(bytes[end - 1] as char, 'e' | 'E')))
            || (c == '.' && !seen_dot && !seen_exp)
            || ((c == 'e' || c == 'E') && !seen_exp && end > 0);
        if !ok {
            break;
        }
        seen_dot |= c == '.';
        seen_exp |= c == 'e' || c == 'E';
        end += 1;
    }
    let mut candidate = &text[..end];
    while !candidate.is_empty() {
        if let Ok(n) = candidate.parse::<f64>() {
            return n;
        }
        candidate = &candidate[..candidate.len() - 1];
    }
    if text.starts_with("Infinity") {
        return f64::INFINITY;
    }
    f64::NAN
}

fn math_object() -> Value {
    let math = Value::new_object();
    math.set("PI", Value::Number(std::f64::consts::PI));
    math.set("E", Value::Number(std::f64::consts::E));

    let unary: [(&str, fn(f64) -> f64); 7] = [
        ("floor", f64::floor),
        ("ceil", f64::ceil),
        ("abs", f64::abs),
        ("sqrt", f64::sqrt),
        ("trunc", f64::trunc),
        ("round", |n| (n + 0.5).floor()),
        ("sign", |n| if n == 0.0 || n.is_nan() { n } else { n.signum() }),
    ];
    for (name, op) in unary {
        math.set(
            name,
            Value::native(name, move |_, _, args| Ok(Value::Number(op(arg(args, 0).to_number())))),
        );
    }
    math.set(
        "pow",
        Value::native("pow", |_, _, args| {
            Ok(Value::Number(arg(args, 0).to_number().powf(arg(args, 1).to_number())))
        }),
    );
    math.set(
        "min",
        Value::native("min", |_, _, args| {
            Ok(Value::Number(args.iter().map(|v| v.to_number()).fold(
                f64::INFINITY,
                |acc, n| if n.is_nan() || acc.is_nan() { f64::NAN } else { acc.min(n) },
            )))
        }),
    );
    math.set(
        "max",
        Value::native("max", |_, _, args| {
            Ok(Value::Number(args.iter().map(|v| v.to_number()).fold(
                f64::NEG_INFINITY,
                |acc, n| if n.is_nan() || acc.is_nan() { f64::NAN } else { acc.max(n) },
            )))
        }),
    );

    // xorshift64*; deterministic per engine
    let state = Rc::new(Cell::new(0x2545_f491_4f6c_dd1du64));
    math.set(
        "random",
        Value::native("random", move |_, _, _| {
            let mut x = state.get();
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;
            state.set(x);
            let bits = x.wrapping_mul(0x2545_f491_4f6c_dd1d) >> 11;
            Ok(Value::Number(bits as f64 / (1u64 << 53) as f64))
        }),
    );
    math
}

fn json_object() -> Value {
    let json = Value::new_object();
    json.set(
        "stringify",
        Value::native("stringify", |_, _, args| {
            let value = arg(args, 0);
            if matches!(
                value,
                Value::Undefined | Value::Function(_) | Value::Native(_)
            ) {
                return Ok(Value::Undefined);
            }
            let json = value.to_json();
            let text = if arg(args, 2).truthy() {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            };
            text.map(Value::str)
                .map_err(|e| ScriptError::type_error(e.to_string()))
        }),
    );
    json.set(
        "parse",
        Value::native("parse", |_, _, args| {
            let text = arg_string(args, 0);
            serde_json::from_str::<serde_json::Value>(&text)
                .map(|json| Value::from_json(&json))
                .map_err(|e| ScriptError::syntax(e.column(), format!("JSON.parse: {}", e)))
        }),
    );
    json
}

fn object_constructor() -> Value {
    let object = Value::new_object();
    object.set(
        "keys",
        Value::native("keys", |interp, _, args| {
            let keys = own_keys(interp, &arg(args, 0));
            Ok(Value::array(keys.into_iter().map(Value::str).collect()))
        }),
    );
    object.set(
        "values",
        Value::native("values", |interp, _, args| {
            let entries = own_entries(interp, &arg(args, 0))?;
            Ok(Value::array(entries.into_iter().map(|(_, v)| v).collect()))
        }),
    );
    object.set(
        "entries",
        Value::native("entries", |interp, _, args| {
            let entries = own_entries(interp, &arg(args, 0))?;
            Ok(Value::array(
                entries
                    .into_iter()
                    .map(|(k, v)| Value::array(vec![Value::str(k), v]))
                    .collect(),
            ))
        }),
    );
    object.set(
        "assign",
        Value::native("assign", |interp, _, args| {
            let target = arg(args, 0);
            for source in args.iter().skip(1) {
                if source.is_nullish() {
                    continue;
                }
                for (key, value) in own_entries(interp, source)? {
                    interp.set_member(&target, &key, value)?;
                }
            }
            Ok(target)
        }),
    );
    object.set(
        "freeze",
        Value::native("freeze", |_, _, args| Ok(arg(args, 0))),
    );
    object
}

fn array_constructor() -> Value {
    let array = Value::new_object();
    array.set(
        "isArray",
        Value::native("isArray", |_, _, args| {
            Ok(Value::Bool(matches!(arg(args, 0), Value::Array(_))))
        }),
    );
    array.set(
        "from",
        Value::native("from", |interp, _, args| {
            let source = arg(args, 0);
            let items: Vec<Value> = match &source {
                Value::Array(items) => items.borrow().clone(),
                Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
                Value::Object(_) => {
                    let len = source.get("length").map(|v| v.to_number()).unwrap_or(0.0);
                    let len = if len.is_finite() && len > 0.0 { len as usize } else { 0 };
                    (0..len)
                        .map(|i| source.get(&i.to_string()).unwrap_or_default())
                        .collect()
                }
                _ => Vec::new(),
            };
            let mapper = arg(args, 1);
            if mapper.is_callable() {
                let mapped = items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| {
                        interp.call(&mapper, Value::Undefined, &[item, Value::Number(i as f64)])
                    })
                    .collect::<EResult<Vec<_>>>()?;
                return Ok(Value::array(mapped));
            }
            Ok(Value::array(items))
        }),
    );
    array
}

fn console_object() -> Value {
    let console = Value::new_object();
    let line = |interp: &Interp, args: &[Value]| {
        args.iter()
            .map(|v| match v {
                Value::Array(_) | Value::Object(_) => v.to_json().to_string(),
                other => interp.stringify(other),
            })
            .collect::<Vec<_>>()
            .join(" ")
    };
    console.set(
        "log",
        Value::native("log", move |interp, _, args| {
            info!(target: "co_template::console", "{}", line(interp, args));
            Ok(Value::Undefined)
        }),
    );
    console.set(
        "info",
        Value::native("info", move |interp, _, args| {
            info!(target: "co_template::console", "{}", line(interp, args));
            Ok(Value::Undefined)
        }),
    );
    console.set(
        "debug",
        Value::native("debug", move |interp, _, args| {
            debug!(target: "co_template::console", "{}", line(interp, args));
            Ok(Value::Undefined)
        }),
    );
    console.set(
        "warn",
        Value::native("warn", move |interp, _, args| {
            warn!(target: "co_template::console", "{}", line(interp, args));
            Ok(Value::Undefined)
        }),
    );
    console.set(
        "error",
        Value::native("error", move |interp, _, args| {
            error!(target: "co_template::console", "{}", line(interp, args));
            Ok(Value::Undefined)
        }),
    );
    console
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIBRARY HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// The `co` object visible to templates.
pub fn library_object() -> Value {
    let co = Value::new_object();
    co.set(
        "get",
        Value::native("get", |interp, _, args| {
            Ok(interp
                .engine()
                .get(&arg_string(args, 0))
                .map(Value::Template)
                .unwrap_or(Value::Undefined))
        }),
    );
    co.set(
        "compile",
        Value::native("compile", |interp, _, args| {
            let template = interp
                .engine()
                .compile(&arg_string(args, 0), &arg_string(args, 1))?;
            Ok(Value::Template(template))
        }),
    );
    co.set(
        "render",
        Value::native("render", |interp, _, args| {
            let options = RenderOptions {
                target: arg(args, 2).as_node(),
                ..RenderOptions::default()
            };
            let component = interp
                .engine()
                .render(&arg_string(args, 0), arg(args, 1), options)?;
            Ok(Value::Component(component))
        }),
    );
    co.set(
        "i18n",
        Value::native("i18n", |interp, _, args| {
            Ok(Value::str(interp.engine().i18n(&arg_string(args, 0))))
        }),
    );
    co.set(
        "addI18n",
        Value::native("addI18n", |interp, _, args| {
            let translations = own_entries(interp, &arg(args, 1))?
                .into_iter()
                .map(|(lang, text)| (lang, text.to_display()))
                .collect::<Vec<_>>();
            interp.engine().add_i18n(&arg_string(args, 0), translations);
            Ok(Value::Undefined)
        }),
    );
    co.set(
        "setLanguage",
        Value::native("setLanguage", |interp, _, args| {
            interp.engine().set_language(&arg_string(args, 0));
            Ok(Value::Undefined)
        }),
    );
    co.set(
        "language",
        Value::native("language", |interp, _, _| {
            Ok(Value::str(interp.engine().language()))
        }),
    );
    co.set(
        "createElement",
        Value::native("createElement", |interp, _, args| {
            let attrs = own_entries(interp, &arg(args, 1))?
                .into_iter()
                .map(|(name, value)| (name, value.to_display()))
                .collect::<Vec<_>>();
            let children = match arg(args, 2) {
                Value::Array(items) => items.borrow().clone(),
                Value::Undefined | Value::Null => Vec::new(),
                single => vec![single],
            };
            let children = children
                .into_iter()
                .map(|child| match child {
                    Value::Node(id) => ElementChild::Node(id),
                    other => ElementChild::Text(interp.stringify(&other)),
                })
                .collect::<Vec<_>>();
            let element = interp
                .engine()
                .create_element(&arg_string(args, 0), &attrs, &children);
            Ok(Value::Node(element))
        }),
    );
    co.set(
        "attrs",
        Value::native("attrs", |interp, _, args| {
            let attrs = own_entries(interp, &arg(args, 0))?
                .into_iter()
                .map(|(name, value)| (name, value.to_display()))
                .collect::<Vec<_>>();
            Ok(Value::str(crate::dom::attrs_to_string(&attrs)))
        }),
    );
    co.set(
        "escape",
        Value::native("escape", |_, _, args| {
            Ok(Value::str(escape_html(&arg_string(args, 0))))
        }),
    );
    co.set(
        "fire",
        Value::native("fire", |interp, _, args| {
            let component = match arg(args, 0) {
                Value::Component(component) => component,
                other => {
                    return Err(ScriptError::type_error(format!(
                        "co.fire expects a component, got {}",
                        other.to_display()
                    )))
                }
            };
            interp
                .engine()
                .fire(&component, &arg_string(args, 1), &arg_string(args, 2))?;
            Ok(Value::Undefined)
        }),
    );
    co
}

// ═══════════════════════════════════════════════════════════════════════════════
// METHOD TABLES
// ═══════════════════════════════════════════════════════════════════════════════

pub fn object_method(key: &str) -> Option<Value> {
    let method = match key {
        "hasOwnProperty" => Value::native("hasOwnProperty", |_, this, args| {
            let key = arg_string(args, 0);
            Ok(Value::Bool(match this {
                Value::Object(map) => map.borrow().contains_key(&key),
                _ => false,
            }))
        }),
        "toString" => Value::native("toString", |_, this, _| Ok(Value::str(this.to_display()))),
        _ => return None,
    };
    Some(method)
}

pub fn array_method(key: &str) -> Option<Value> {
    let method = match key {
        "push" => Value::native("push", |_, this, args| {
            let items = this_array(this)?;
            let mut items = items.borrow_mut();
            items.extend(args.iter().cloned());
            Ok(Value::Number(items.len() as f64))
        }),
        "pop" => Value::native("pop", |_, this, _| {
            Ok(this_array(this)?.borrow_mut().pop().unwrap_or_default())
        }),
        "shift" => Value::native("shift", |_, this, _| {
            let items = this_array(this)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Ok(Value::Undefined);
            }
            Ok(items.remove(0))
        }),
        "unshift" => Value::native("unshift", |_, this, args| {
            let items = this_array(this)?;
            let mut items = items.borrow_mut();
            for (i, value) in args.iter().enumerate() {
                items.insert(i, value.clone());
            }
            Ok(Value::Number(items.len() as f64))
        }),
        "slice" => Value::native("slice", |_, this, args| {
            let items = this_array(this)?.borrow().clone();
            let start = relative_index(&arg(args, 0), items.len(), 0);
            let end = relative_index(&arg(args, 1), items.len(), items.len());
            Ok(Value::array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            }))
        }),
        "splice" => Value::native("splice", |_, this, args| {
            let items = this_array(this)?;
            let mut items = items.borrow_mut();
            let len = items.len();
            let start = relative_index(&arg(args, 0), len, 0);
            let count = match args.get(1) {
                None => len - start,
                Some(value) => (value.to_number().max(0.0) as usize).min(len - start),
            };
            let removed: Vec<Value> = items
                .splice(start..start + count, args.iter().skip(2).cloned())
                .collect();
            Ok(Value::array(removed))
        }),
        "concat" => Value::native("concat", |_, this, args| {
            let mut items = this_array(this)?.borrow().clone();
            for value in args {
                match value {
                    Value::Array(more) => items.extend(more.borrow().iter().cloned()),
                    other => items.push(other.clone()),
                }
            }
            Ok(Value::array(items))
        }),
        "join" => Value::native("join", |interp, this, args| {
            let separator = match arg(args, 0) {
                Value::Undefined => ",".to_string(),
                other => other.to_display(),
            };
            let items = this_array(this)?.borrow().clone();
            Ok(Value::str(
                items
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { interp.stringify(v) })
                    .collect::<Vec<_>>()
                    .join(&separator),
            ))
        }),
        "indexOf" => Value::native("indexOf", |_, this, args| {
            let needle = arg(args, 0);
            let items = this_array(this)?.borrow().clone();
            Ok(Value::Number(
                items
                    .iter()
                    .position(|v| v.strict_equals(&needle))
                    .map(|i| i as f64)
                    .unwrap_or(-1.0),
            ))
        }),
        "includes" => Value::native("includes", |_, this, args| {
            let needle = arg(args, 0);
            let items = this_array(this)?.borrow().clone();
            Ok(Value::Bool(items.iter().any(|v| {
                v.strict_equals(&needle)
                    || (v.to_number().is_nan()
                        && needle.to_number().is_nan()
                        && matches!((v, &needle), (Value::Number(_), Value::Number(_))))
            })))
        }),
        "reverse" => Value::native("reverse", |_, this, _| {
            this_array(this)?.borrow_mut().reverse();
            Ok(this.clone())
        }),
        "map" | "filter" | "forEach" | "find" | "findIndex" | "some" | "every" => {
            let name: &'static str = match key {
                "map" => "map",
                "filter" => "filter",
                "forEach" => "forEach",
                "find" => "find",
                "findIndex" => "findIndex",
                "some" => "some",
                _ => "every",
            };
            Value::native(name, move |interp, this, args| {
                iterate(interp, name, this, &arg(args, 0))
            })
        }
        "reduce" => Value::native("reduce", |interp, this, args| {
            let items = this_array(this)?.borrow().clone();
            let callback = arg(args, 0);
            let mut iter = items.into_iter().enumerate();
            let mut acc = match args.get(1) {
                Some(initial) => initial.clone(),
                None => match iter.next() {
                    Some((_, first)) => first,
                    None => {
                        return Err(ScriptError::type_error(
                            "Reduce of empty array with no initial value",
                        ))
                    }
                },
            };
            for (i, item) in iter {
                acc = interp.call(
                    &callback,
                    Value::Undefined,
                    &[acc, item, Value::Number(i as f64), this.clone()],
                )?;
            }
            Ok(acc)
        }),
        "sort" => Value::native("sort", |interp, this, args| {
            let array = this_array(this)?;
            let mut items = array.borrow().clone();
            let comparator = arg(args, 0);
            let mut failure = None;
            items.sort_by(|a, b| {
                if failure.is_some() {
                    return std::cmp::Ordering::Equal;
                }
                if comparator.is_callable() {
                    match interp.call(&comparator, Value::Undefined, &[a.clone(), b.clone()]) {
                        Ok(result) => result
                            .to_number()
                            .partial_cmp(&0.0)
                            .unwrap_or(std::cmp::Ordering::Equal),
                        Err(e) => {
                            failure = Some(e);
                            std::cmp::Ordering::Equal
                        }
                    }
                } else {
                    interp.stringify(a).cmp(&interp.stringify(b))
                }
            });
            if let Some(e) = failure {
                return Err(e);
            }
            *array.borrow_mut() = items;
            Ok(this.clone())
        }),
        "toString" => Value::native("toString", |_, this, _| Ok(Value::str(this.to_display()))),
        _ => return None,
    };
    Some(method)
}

fn iterate(interp: &Interp, name: &str, this: &Value, callback: &Value) -> EResult<Value> {
    if !callback.is_callable() {
        return Err(ScriptError::type_error(format!(
            "{} is not a function",
            callback.to_display()
        )));
    }
    let items = this_array(this)?.borrow().clone();
    let mut mapped = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        let result = interp.call(
            callback,
            Value::Undefined,
            &[item.clone(), Value::Number(i as f64), this.clone()],
        )?;
        match name {
            "map" => mapped.push(result),
            "filter" if result.truthy() => mapped.push(item),
            "find" if result.truthy() => return Ok(item),
            "findIndex" if result.truthy() => return Ok(Value::Number(i as f64)),
            "some" if result.truthy() => return Ok(Value::Bool(true)),
            "every" if !result.truthy() => return Ok(Value::Bool(false)),
            _ => {}
        }
    }
    Ok(match name {
        "map" | "filter" => Value::array(mapped),
        "find" => Value::Undefined,
        "findIndex" => Value::Number(-1.0),
        "some" => Value::Bool(false),
        "every" => Value::Bool(true),
        _ => Value::Undefined,
    })
}

pub fn string_method(key: &str) -> Option<Value> {
    let method = match key {
        "toUpperCase" => Value::native("toUpperCase", |_, this, _| {
            Ok(Value::str(this_string(this).to_uppercase()))
        }),
        "toLowerCase" => Value::native("toLowerCase", |_, this, _| {
            Ok(Value::str(this_string(this).to_lowercase()))
        }),
        "trim" => Value::native("trim", |_, this, _| Ok(Value::str(this_string(this).trim()))),
        "trimStart" => Value::native("trimStart", |_, this, _| {
            Ok(Value::str(this_string(this).trim_start()))
        }),
        "trimEnd" => Value::native("trimEnd", |_, this, _| {
            Ok(Value::str(this_string(this).trim_end()))
        }),
        "split" => Value::native("split", |_, this, args| {
            let text = this_string(this);
            let parts: Vec<Value> = match arg(args, 0) {
                Value::Undefined => vec![Value::str(&text)],
                separator => {
                    let separator = separator.to_display();
                    if separator.is_empty() {
                        text.chars().map(|c| Value::str(c.to_string())).collect()
                    } else {
                        text.split(separator.as_str()).map(Value::str).collect()
                    }
                }
            };
            Ok(Value::array(parts))
        }),
        "replace" | "replaceAll" => {
            let all = key == "replaceAll";
            Value::native(if all { "replaceAll" } else { "replace" }, move |interp, this, args| {
                let text = this_string(this);
                let pattern = arg_string(args, 0);
                let replacement = arg(args, 1);
                let mut out = String::new();
                let mut rest = text.as_str();
                while let Some(pos) = rest.find(pattern.as_str()) {
                    out.push_str(&rest[..pos]);
                    if replacement.is_callable() {
                        let value = interp.call(
                            &replacement,
                            Value::Undefined,
                            &[Value::str(&pattern)],
                        )?;
                        out.push_str(&interp.stringify(&value));
                    } else {
                        out.push_str(&replacement.to_display());
                    }
                    rest = &rest[pos + pattern.len()..];
                    if !all || pattern.is_empty() {
                        break;
                    }
                }
                out.push_str(rest);
                Ok(Value::str(out))
            })
        }
        "includes" => Value::native("includes", |_, this, args| {
            Ok(Value::Bool(this_string(this).contains(&arg_string(args, 0))))
        }),
        "startsWith" => Value::native("startsWith", |_, this, args| {
            Ok(Value::Bool(this_string(this).starts_with(&arg_string(args, 0))))
        }),
        "endsWith" => Value::native("endsWith", |_, this, args| {
            Ok(Value::Bool(this_string(this).ends_with(&arg_string(args, 0))))
        }),
        "indexOf" => Value::native("indexOf", |_, this, args| {
            let text = this_string(this);
            let needle = arg_string(args, 0);
            Ok(Value::Number(match text.find(&needle) {
                Some(byte) => text[..byte].chars().count() as f64,
                None => -1.0,
            }))
        }),
        "slice" | "substring" => {
            let clamp = key == "substring";
            Value::native(if clamp { "substring" } else { "slice" }, move |_, this, args| {
                let chars: Vec<char> = this_string(this).chars().collect();
                let len = chars.len();
                let bound = |value: &Value, default: usize| {
                    if clamp && !matches!(value, Value::Undefined) {
                        let n = value.to_number();
                        if n.is_nan() || n < 0.0 {
                            0
                        } else {
                            (n as usize).min(len)
                        }
                    } else {
                        relative_index(value, len, default)
                    }
                };
                let mut start = bound(&arg(args, 0), 0);
                let mut end = bound(&arg(args, 1), len);
                if clamp && start > end {
                    std::mem::swap(&mut start, &mut end);
                }
                Ok(Value::str(if start < end {
                    chars[start..end].iter().collect::<String>()
                } else {
                    String::new()
                }))
            })
        }
        "charAt" => Value::native("charAt", |_, this, args| {
            let index = arg(args, 0).to_number();
            let index = if index.is_nan() { 0 } else { index as usize };
            Ok(Value::str(
                this_string(this)
                    .chars()
                    .nth(index)
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
            ))
        }),
        "repeat" => Value::native("repeat", |_, this, args| {
            let count = arg(args, 0).to_number();
            if count < 0.0 || count.is_infinite() {
                return Err(ScriptError::Range("Invalid count value".to_string()));
            }
            let count = if count.is_nan() { 0 } else { count as usize };
            Ok(Value::str(this_string(this).repeat(count)))
        }),
        "padStart" | "padEnd" => {
            let start = key == "padStart";
            Value::native(if start { "padStart" } else { "padEnd" }, move |_, this, args| {
                let text = this_string(this);
                let target = arg(args, 0).to_number();
                let target = if target.is_nan() { 0 } else { target as usize };
                let filler = match arg(args, 1) {
                    Value::Undefined => " ".to_string(),
                    other => other.to_display(),
                };
                let len = text.chars().count();
                if target <= len || filler.is_empty() {
                    return Ok(Value::str(text));
                }
                let padding: String = filler.chars().cycle().take(target - len).collect();
                Ok(Value::str(if start {
                    format!("{}{}", padding, text)
                } else {
                    format!("{}{}", text, padding)
                }))
            })
        }
        "concat" => Value::native("concat", |interp, this, args| {
            let mut text = this_string(this);
            for value in args {
                text.push_str(&interp.stringify(value));
            }
            Ok(Value::str(text))
        }),
        "toString" => Value::native("toString", |_, this, _| Ok(Value::str(this_string(this)))),
        _ => return None,
    };
    Some(method)
}

pub fn number_method(key: &str) -> Option<Value> {
    let method = match key {
        "toFixed" => Value::native("toFixed", |_, this, args| {
            let digits = arg(args, 0).to_number();
            let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 100.0) as usize };
            let n = this.to_number();
            if !n.is_finite() {
                return Ok(Value::str(number_to_string(n)));
            }
            Ok(Value::str(format!("{:.*}", digits, n)))
        }),
        "toString" => Value::native("toString", |_, this, _| {
            Ok(Value::str(number_to_string(this.to_number())))
        }),
        _ => return None,
    };
    Some(method)
}

pub fn function_method(key: &str) -> Option<Value> {
    let method = match key {
        "call" => Value::native("call", |interp, this, args| {
            let rest = args.get(1..).unwrap_or(&[]);
            interp.call(this, arg(args, 0), rest)
        }),
        "apply" => Value::native("apply", |interp, this, args| {
            let rest = match arg(args, 1) {
                Value::Array(items) => items.borrow().clone(),
                _ => Vec::new(),
            };
            interp.call(this, arg(args, 0), &rest)
        }),
        "bind" => Value::native("bind", |_, this, args| {
            let target = this.clone();
            let bound_this = arg(args, 0);
            let bound_args: Vec<Value> = args.iter().skip(1).cloned().collect();
            Ok(Value::native("bound", move |interp, _, args| {
                let mut all = bound_args.clone();
                all.extend(args.iter().cloned());
                interp.call(&target, bound_this.clone(), &all)
            }))
        }),
        _ => return None,
    };
    Some(method)
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE BINDINGS
// ═══════════════════════════════════════════════════════════════════════════════

fn node_list(ids: Vec<NodeId>) -> Value {
    Value::array(ids.into_iter().map(Value::Node).collect())
}

fn optional_node(id: Option<NodeId>) -> Value {
    id.map(Value::Node).unwrap_or(Value::Null)
}

fn camel_case(name: &str) -> String {
    let mut out = String::new();
    let mut upper = false;
    for c in name.chars() {
        if c == '-' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn event_type_of(value: &Value) -> String {
    match value.get("type") {
        Some(kind) => kind.to_display(),
        None => value.to_display(),
    }
}

/// Read a property of a DOM node.
pub fn node_get(interp: &Interp, id: NodeId, key: &str) -> EResult<Value> {
    let engine = interp.engine();
    let value = match key {
        "nodeType" => engine.with_dom(|dom| {
            Value::Number(match dom.kind(id) {
                NodeKind::Element(_) => 1.0,
                NodeKind::Text(_) => 3.0,
                NodeKind::Comment(_) => 8.0,
                NodeKind::Document => 9.0,
                NodeKind::Fragment => 11.0,
            })
        }),
        "nodeName" | "tagName" => engine.with_dom(|dom| {
            Value::str(match dom.kind(id) {
                NodeKind::Element(el) => el.tag.to_uppercase(),
                NodeKind::Text(_) => "#text".to_string(),
                NodeKind::Comment(_) => "#comment".to_string(),
                NodeKind::Document => "#document".to_string(),
                NodeKind::Fragment => "#document-fragment".to_string(),
            })
        }),
        "id" => engine.with_dom(|dom| Value::str(dom.get_attribute(id, "id").unwrap_or(""))),
        "className" => {
            engine.with_dom(|dom| Value::str(dom.get_attribute(id, "class").unwrap_or("")))
        }
        "textContent" => engine.with_dom(|dom| Value::str(dom.text_content(id))),
        "innerHTML" => engine.with_dom(|dom| Value::str(dom.inner_html(id))),
        "outerHTML" => engine.with_dom(|dom| Value::str(dom.outer_html(id))),
        "parentNode" | "parentElement" => engine.with_dom(|dom| optional_node(dom.parent(id))),
        "firstChild" => engine.with_dom(|dom| optional_node(dom.children(id).first().copied())),
        "lastChild" => engine.with_dom(|dom| optional_node(dom.children(id).last().copied())),
        "children" => engine.with_dom(|dom| node_list(dom.element_children(id))),
        "childNodes" => engine.with_dom(|dom| node_list(dom.children(id).to_vec())),
        "shadowRoot" => engine.with_dom(|dom| optional_node(dom.shadow_root(id))),
        "isConnected" => engine.with_dom(|dom| Value::Bool(dom.is_connected(id))),
        "dataset" => engine.with_dom(|dom| {
            let mut map = IndexMap::new();
            for (name, value) in dom.attributes(id) {
                if let Some(rest) = name.strip_prefix("data-") {
                    map.insert(camel_case(rest), Value::str(value));
                }
            }
            Value::object(map)
        }),
        "getAttribute" => Value::native("getAttribute", move |interp, _, args| {
            let name = arg_string(args, 0);
            Ok(interp.engine().with_dom(|dom| {
                dom.get_attribute(id, &name)
                    .map(Value::str)
                    .unwrap_or(Value::Null)
            }))
        }),
        "setAttribute" => Value::native("setAttribute", move |interp, _, args| {
            let name = arg_string(args, 0);
            let value = arg_string(args, 1);
            interp
                .engine()
                .with_dom(|dom| dom.set_attribute(id, &name, &value));
            Ok(Value::Undefined)
        }),
        "removeAttribute" => Value::native("removeAttribute", move |interp, _, args| {
            let name = arg_string(args, 0);
            interp.engine().with_dom(|dom| dom.remove_attribute(id, &name));
            Ok(Value::Undefined)
        }),
        "hasAttribute" => Value::native("hasAttribute", move |interp, _, args| {
            let name = arg_string(args, 0);
            Ok(Value::Bool(
                interp.engine().with_dom(|dom| dom.has_attribute(id, &name)),
            ))
        }),
        "appendChild" => Value::native("appendChild", move |interp, _, args| {
            let child = expect_node(&arg(args, 0))?;
            interp.engine().with_dom(|dom| dom.append_child(id, child));
            Ok(Value::Node(child))
        }),
        "insertBefore" => Value::native("insertBefore", move |interp, _, args| {
            let child = expect_node(&arg(args, 0))?;
            let reference = arg(args, 1).as_node();
            interp
                .engine()
                .with_dom(|dom| dom.insert_before(id, child, reference));
            Ok(Value::Node(child))
        }),
        "remove" => Value::native("remove", move |interp, _, _| {
            interp.engine().with_dom(|dom| dom.detach(id));
            Ok(Value::Undefined)
        }),
        "replaceWith" => Value::native("replaceWith", move |interp, _, args| {
            let replacements = args
                .iter()
                .map(|value| match value {
                    Value::Node(node) => Ok(*node),
                    other => Ok(interp
                        .engine()
                        .with_dom(|dom| dom.create_text(&other.to_display()))),
                })
                .collect::<EResult<Vec<_>>>()?;
            interp
                .engine()
                .with_dom(|dom| dom.replace_with(id, &replacements));
            Ok(Value::Undefined)
        }),
        "addEventListener" => Value::native("addEventListener", move |interp, _, args| {
            let kind = arg_string(args, 0);
            let handler = arg(args, 1);
            if !handler.is_callable() {
                return Err(ScriptError::type_error("listener is not a function"));
            }
            interp
                .engine()
                .with_dom(|dom| dom.add_listener(id, &kind, handler));
            Ok(Value::Undefined)
        }),
        "removeEventListener" => Value::native("removeEventListener", move |interp, _, args| {
            let kind = arg_string(args, 0);
            let handler = arg(args, 1);
            interp
                .engine()
                .with_dom(|dom| dom.remove_listener_by_handler(id, &kind, &handler));
            Ok(Value::Undefined)
        }),
        "dispatchEvent" => Value::native("dispatchEvent", move |interp, _, args| {
            let kind = event_type_of(&arg(args, 0));
            let delivered = interp.engine().dispatch_event(id, &kind)?;
            Ok(Value::Bool(delivered))
        }),
        "click" => Value::native("click", move |interp, _, _| {
            interp.engine().dispatch_event(id, "click")?;
            Ok(Value::Undefined)
        }),
        "querySelector" => Value::native("querySelector", move |interp, _, args| {
            let selector = arg_string(args, 0);
            Ok(optional_node(
                interp
                    .engine()
                    .with_dom(|dom| dom.query_selector(id, &selector)),
            ))
        }),
        "querySelectorAll" => Value::native("querySelectorAll", move |interp, _, args| {
            let selector = arg_string(args, 0);
            Ok(node_list(
                interp
                    .engine()
                    .with_dom(|dom| dom.query_selector_all(id, &selector)),
            ))
        }),
        "contains" => Value::native("contains", move |interp, _, args| {
            Ok(Value::Bool(match arg(args, 0) {
                Value::Node(other) => interp.engine().with_dom(|dom| dom.contains(id, other)),
                _ => false,
            }))
        }),
        "attachShadow" => Value::native("attachShadow", move |interp, _, _| {
            Ok(Value::Node(interp.engine().with_dom(|dom| dom.attach_shadow(id))))
        }),
        _ => engine.with_dom(|dom| dom.property(id, key).unwrap_or_default()),
    };
    Ok(value)
}

fn expect_node(value: &Value) -> EResult<NodeId> {
    value.as_node().ok_or_else(|| {
        ScriptError::type_error(format!("{} is not a node", value.to_display()))
    })
}

/// Write a property of a DOM node.
pub fn node_set(interp: &Interp, id: NodeId, key: &str, value: Value) -> EResult<()> {
    let engine = interp.engine();
    match key {
        "textContent" => {
            let text = if value.is_nullish() {
                String::new()
            } else {
                interp.stringify(&value)
            };
            engine.with_dom(|dom| dom.set_text_content(id, &text));
        }
        "innerHTML" => {
            let markup = interp.stringify(&value);
            engine.with_dom(|dom| {
                let fragment = html::parse_fragment(dom, &markup);
                dom.clear_children(id);
                dom.append_child(id, fragment);
            });
        }
        "id" => engine.with_dom(|dom| dom.set_attribute(id, "id", &value.to_display())),
        "className" => engine.with_dom(|dom| dom.set_attribute(id, "class", &value.to_display())),
        "nodeType" | "nodeName" | "tagName" | "parentNode" | "children" | "childNodes"
        | "shadowRoot" | "outerHTML" => {
            return Err(ScriptError::type_error(format!(
                "Cannot set read-only property '{}'",
                key
            )))
        }
        _ => engine.with_dom(|dom| dom.set_property(id, key, value)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::engine::Engine;

    fn eval(source: &str) -> String {
        let engine = Engine::new(Config::default());
        let value = engine.interp().run(source).unwrap();
        value.to_display()
    }

    #[test]
    fn test_array_methods() {
        assert_eq!(eval("return [3, 1, 2].sort().join('-')"), "1-2-3");
        assert_eq!(eval("return [1, 2, 3].map(x => x * 2).filter(x => x > 2).join()"), "4,6");
        assert_eq!(eval("return [1, 2, 3].reduce((a, b) => a + b, 0)"), "6");
        assert_eq!(eval("let a = [1, 2, 3, 4]; a.splice(1, 2, 'x'); return a.join()"), "1,x,4");
        assert_eq!(eval("return [1, 2, 3].slice(-2).join()"), "2,3");
        assert_eq!(eval("return [5, 6].indexOf(6) + [5].indexOf(9)"), "0");
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(eval("return ' Hi '.trim().toUpperCase()"), "HI");
        assert_eq!(eval("return 'a-b-c'.split('-').length"), "3");
        assert_eq!(eval("return 'aaa'.replace('a', 'b') + 'aaa'.replaceAll('a', 'b')"), "baabbb");
        assert_eq!(eval("return '7'.padStart(3, '0')"), "007");
        assert_eq!(eval("return 'hello'.slice(1, -1) + 'hello'.substring(3, 1)"), "ellel");
    }

    #[test]
    fn test_globals() {
        assert_eq!(eval("return parseInt('42px') + parseFloat('1.5e1x')"), "57");
        assert_eq!(eval("return Math.max(1, 9, 3) + Math.floor(2.7)"), "11");
        assert_eq!(eval("return JSON.stringify({ a: [1, 'x'] })"), r#"{"a":[1,"x"]}"#);
        assert_eq!(eval("return JSON.parse('{\"k\": 2}').k"), "2");
        assert_eq!(eval("return Object.keys({ b: 1, a: 2 }).join()"), "b,a");
        assert_eq!(eval("return Array.isArray([]) && !Array.isArray({})"), "true");
        let r = eval("return Math.random()").parse::<f64>().unwrap();
        assert!((0.0..1.0).contains(&r));
    }

    #[test]
    fn test_output_helpers() {
        assert_eq!(eval("return __interp(null) + __interp(() => 'called')"), "called");
        assert_eq!(eval("return __escape('<b>')"), "&lt;b&gt;");
    }

    #[test]
    fn test_function_methods() {
        assert_eq!(
            eval("function f(a, b) { return this.x + a + b } return f.call({ x: 1 }, 2, 3)"),
            "6"
        );
        assert_eq!(
            eval("function f(a) { return this.x + a } const g = f.bind({ x: 'a' }); return g('b')"),
            "ab"
        );
    }

    #[test]
    fn test_set_timeout_runs_on_queue() {
        let engine = Engine::new(Config::default());
        engine
            .interp()
            .run("hits = 0; setTimeout(() => { hits++ }, 10)")
            .unwrap();
        assert_eq!(engine.interp().eval("hits").unwrap().to_display(), "0");
        engine.advance(10);
        assert_eq!(engine.interp().eval("hits").unwrap().to_display(), "1");
    }

    #[test]
    fn test_node_bindings() {
        let engine = Engine::new(Config::default());
        let out = engine
            .interp()
            .run(
                "const el = co.createElement('div', { id: 'box', 'data-user-id': '7' }, ['hi'])
                 el.setAttribute('title', 't')
                 el.innerHTML = '<span class=\"x\">a</span><span>b</span>'
                 return [el.tagName, el.dataset.userId, el.children.length,
                         el.querySelector('.x').textContent, el.getAttribute('title')].join('|')",
            )
            .unwrap();
        assert_eq!(out.to_display(), "DIV|7|2|a|t");
    }
}
