//! Runtime value representation
//!
//! This module defines the [`Value`] enum, the tagged union every template
//! expression resolves to. Unlike a host language with runtime reflection,
//! values are closed and capability-checked: the dotted-lookup chain in the
//! expression grammar probes these variants explicitly (map key, then list
//! index, then zero-argument call).
//!
//! # Safe-marked strings
//!
//! [`Value::Safe`] is a string that needs no further HTML escaping before
//! output. Filters flagged `is_safe` propagate the mark; the `safe` filter
//! sets it.
//!
//! # Equality
//!
//! `PartialEq` (and the `==`/`!=` template operators) compare loosely:
//! `Int`/`Float` cross-compare numerically and `Str`/`Safe` compare by
//! content. [`Value::strict_eq`] backs the `===`/`!==`/`is` operators and
//! additionally requires the same type tag.

use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::engine::Template;

/// A zero-argument host function exposed to templates.
///
/// This is the engine's stand-in for zero-argument method invocation in the
/// lookup chain: when a dotted lookup resolves to a `Callable`, it is invoked
/// and replaced by its result. Because invocation is observable, callables
/// also serve as side-effect probes in tests (e.g. for short-circuit checks).
#[derive(Clone)]
pub struct Callable(Rc<dyn Fn() -> Value>);

impl Callable {
    pub fn new(f: impl Fn() -> Value + 'static) -> Self {
        Callable(Rc::new(f))
    }

    pub fn invoke(&self) -> Value {
        (self.0)()
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<callable>")
    }
}

/// Runtime values seen by templates.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A string marked as not requiring HTML escaping.
    Safe(String),
    List(Vec<Value>),
    Map(FxHashMap<String, Value>),
    Callable(Callable),
    /// An already-compiled template; accepted by `extends` and `include`.
    Template(Rc<Template>),
}

impl Value {
    /// Truthiness, used by `if`, `firstof`, and the `default` filter.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Str(s) | Value::Safe(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Callable(_) | Value::Template(_) => true,
        }
    }

    /// Whether this value is exempt from autoescaping.
    pub fn is_safe(&self) -> bool {
        matches!(self, Value::Safe(_))
    }

    /// The numeric interpretation used by `widthratio` and the `add` filter.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            Value::Str(s) | Value::Safe(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Safe(s) => Some(s),
            _ => None,
        }
    }

    /// Stringification before escaping: `None` renders empty, scalars via
    /// their natural display, lists and maps in bracketed form with map keys
    /// sorted so output is deterministic.
    pub fn display_string(&self) -> String {
        match self {
            Value::None => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => n.to_string(),
            Value::Str(s) | Value::Safe(s) => s.clone(),
            Value::List(items) => {
                let parts: Vec<String> =
                    items.iter().map(|v| v.display_string()).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Map(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let parts: Vec<String> = keys
                    .into_iter()
                    .map(|k| format!("{}: {}", k, map[k].display_string()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Callable(_) | Value::Template(_) => String::new(),
        }
    }

    /// The final output form: safe-marked values pass through untouched,
    /// everything else is stringified and escaped when autoescape is active.
    pub fn output(&self, autoescape: bool) -> String {
        match self {
            Value::Safe(s) => s.clone(),
            other => {
                let text = other.display_string();
                if autoescape {
                    escape_html(&text)
                } else {
                    text
                }
            }
        }
    }

    /// Strict equality: same type tag (with `Safe` and `Str` counted as one
    /// string type) and equal content. Backs `===`, `!==`, `is`, `is not`.
    pub fn strict_eq(&self, other: &Value) -> bool {
        self.type_tag() == other.type_tag() && self == other
    }

    fn type_tag(&self) -> u8 {
        match self {
            Value::None => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Str(_) | Value::Safe(_) => 3,
            Value::List(_) => 4,
            Value::Map(_) => 5,
            Value::Callable(_) => 6,
            Value::Template(_) => 7,
        }
    }

    /// Ordering for `<`/`<=`/`>`/`>=`: defined within numbers, within
    /// strings, and elementwise for lists. `None` means the comparison is
    /// unsupported, which conditional evaluation treats as false.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (a, b)
                if matches!(a, Value::Int(_) | Value::Float(_))
                    && matches!(b, Value::Int(_) | Value::Float(_)) =>
            {
                let (x, y) = (a.as_number()?, b.as_number()?);
                x.partial_cmp(&y)
            }
            (Value::Str(a) | Value::Safe(a), Value::Str(b) | Value::Safe(b)) => {
                Some(a.cmp(b))
            }
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        unequal => return Some(unequal),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    /// Membership for the `in` operator: substring for strings, element for
    /// lists, key for maps. `None` means the test is unsupported.
    pub fn contains(&self, needle: &Value) -> Option<bool> {
        match self {
            Value::Str(s) | Value::Safe(s) => {
                needle.as_str().map(|n| s.contains(n))
            }
            Value::List(items) => Some(items.iter().any(|v| v == needle)),
            Value::Map(map) => needle.as_str().map(|n| map.contains_key(n)),
            _ => None,
        }
    }

    /// Map-key access, the first step of the per-segment lookup chain.
    pub(crate) fn get_key(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Numeric-index access, the second step of the lookup chain.
    pub(crate) fn get_index(&self, index: usize) -> Option<&Value> {
        match self {
            Value::List(items) => items.get(index),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a) | Value::Safe(a), Value::Str(b) | Value::Safe(b)) => {
                a == b
            }
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Callable(a), Value::Callable(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Value::Template(a), Value::Template(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Escape the five HTML metacharacters.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<FxHashMap<String, Value>> for Value {
    fn from(map: FxHashMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::None,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
        }
    }
}
