//! Built-in filter library
//!
//! Filters are pure functions `(value, argument, autoescape) -> value`
//! registered with metadata:
//! - `safe`: the filter's output keeps the input's safe-mark (set on the
//!   [`FilterDef`] via [`FilterDef::is_safe`]).
//! - `needs_autoescape`: the filter receives the live autoescape flag as
//!   its third argument (everything else gets `false`).
//! - an argument policy, validated at compile time.
//!
//! The set here is the handful needed to exercise the engine's contracts;
//! a full string/date/number suite is a library concern, registered through
//! [`Library`](crate::library::Library) like any third-party filter.

use std::rc::Rc;

use crate::context::value::{escape_html, Value};
use crate::library::Library;

/// The uniform filter call shape. The third argument is the autoescape
/// flag, only populated for filters registered `needs_autoescape`.
pub type FilterFn = Rc<dyn Fn(&Value, Option<&Value>, bool) -> Value>;

/// Compile-time argument policy for a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPolicy {
    None,
    Optional,
    Required,
}

/// A registered filter: the function plus its metadata flags.
#[derive(Clone)]
pub struct FilterDef {
    pub(crate) func: FilterFn,
    pub(crate) safe: bool,
    pub(crate) needs_autoescape: bool,
    pub(crate) arg: ArgPolicy,
}

impl FilterDef {
    pub fn new(func: impl Fn(&Value, Option<&Value>, bool) -> Value + 'static) -> Self {
        FilterDef {
            func: Rc::new(func),
            safe: false,
            needs_autoescape: false,
            arg: ArgPolicy::None,
        }
    }

    /// Declare that safe input produces safe output.
    pub fn is_safe(mut self) -> Self {
        self.safe = true;
        self
    }

    /// Declare that the filter wants the live autoescape flag.
    pub fn needs_autoescape(mut self) -> Self {
        self.needs_autoescape = true;
        self
    }

    pub fn requires_arg(mut self) -> Self {
        self.arg = ArgPolicy::Required;
        self
    }

    pub fn optional_arg(mut self) -> Self {
        self.arg = ArgPolicy::Optional;
        self
    }
}

/// Register the default filters into a library.
pub(crate) fn register_defaults(library: &mut Library) {
    library.register_filter(
        "lower",
        FilterDef::new(|v, _, _| Value::Str(v.display_string().to_lowercase())).is_safe(),
    );
    library.register_filter(
        "upper",
        FilterDef::new(|v, _, _| Value::Str(v.display_string().to_uppercase())),
    );
    library.register_filter(
        "capfirst",
        FilterDef::new(|v, _, _| {
            let text = v.display_string();
            let mut chars = text.chars();
            let capped = match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => text,
            };
            Value::Str(capped)
        })
        .is_safe(),
    );
    library.register_filter(
        "length",
        FilterDef::new(|v, _, _| match v {
            Value::Str(s) | Value::Safe(s) => Value::Int(s.chars().count() as i64),
            Value::List(items) => Value::Int(items.len() as i64),
            Value::Map(map) => Value::Int(map.len() as i64),
            _ => Value::Str(String::new()),
        })
        .is_safe(),
    );
    library.register_filter(
        "default",
        FilterDef::new(|v, arg, _| {
            if v.is_truthy() {
                v.clone()
            } else {
                arg.cloned().unwrap_or(Value::None)
            }
        })
        .requires_arg(),
    );
    library.register_filter(
        "default_if_none",
        FilterDef::new(|v, arg, _| {
            if matches!(v, Value::None) {
                arg.cloned().unwrap_or(Value::None)
            } else {
                v.clone()
            }
        })
        .requires_arg(),
    );
    library.register_filter(
        "join",
        FilterDef::new(|v, arg, autoescape| {
            let items = match v {
                Value::List(items) => items,
                other => return other.clone(),
            };
            let sep = arg.map(|a| a.output(autoescape)).unwrap_or_default();
            let parts: Vec<String> =
                items.iter().map(|item| item.output(autoescape)).collect();
            Value::Safe(parts.join(&sep))
        })
        .is_safe()
        .needs_autoescape()
        .requires_arg(),
    );
    library.register_filter(
        "first",
        FilterDef::new(|v, _, _| match v {
            Value::List(items) => items.first().cloned().unwrap_or(Value::Str(String::new())),
            Value::Str(s) | Value::Safe(s) => {
                Value::Str(s.chars().next().map(String::from).unwrap_or_default())
            }
            _ => Value::Str(String::new()),
        }),
    );
    library.register_filter(
        "last",
        FilterDef::new(|v, _, _| match v {
            Value::List(items) => items.last().cloned().unwrap_or(Value::Str(String::new())),
            Value::Str(s) | Value::Safe(s) => {
                Value::Str(s.chars().last().map(String::from).unwrap_or_default())
            }
            _ => Value::Str(String::new()),
        }),
    );
    library.register_filter(
        "add",
        FilterDef::new(|v, arg, _| {
            let arg = match arg {
                Some(arg) => arg,
                None => return v.clone(),
            };
            match (v, arg) {
                (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
                (Value::List(a), Value::List(b)) => {
                    let mut out = a.clone();
                    out.extend(b.iter().cloned());
                    Value::List(out)
                }
                (Value::Str(a) | Value::Safe(a), Value::Str(b) | Value::Safe(b)) => {
                    Value::Str(format!("{}{}", a, b))
                }
                (a, b) => match (a.as_number(), b.as_number()) {
                    (Some(x), Some(y)) => Value::Float(x + y),
                    _ => Value::Str(String::new()),
                },
            }
        })
        .requires_arg(),
    );
    library.register_filter(
        "cut",
        FilterDef::new(|v, arg, _| {
            let needle = arg.map(|a| a.display_string()).unwrap_or_default();
            Value::Str(v.display_string().replace(&needle, ""))
        })
        .requires_arg(),
    );
    library.register_filter(
        "yesno",
        FilterDef::new(|v, arg, _| {
            let mapping = arg
                .map(|a| a.display_string())
                .unwrap_or_else(|| "yes,no,maybe".to_string());
            let parts: Vec<&str> = mapping.split(',').collect();
            if parts.len() < 2 {
                return v.clone();
            }
            let chosen = if matches!(v, Value::None) {
                parts.get(2).copied().unwrap_or(parts[1])
            } else if v.is_truthy() {
                parts[0]
            } else {
                parts[1]
            };
            Value::Str(chosen.to_string())
        })
        .optional_arg(),
    );
    library.register_filter(
        "pluralize",
        FilterDef::new(|v, arg, _| {
            let suffixes = arg
                .map(|a| a.display_string())
                .unwrap_or_else(|| "s".to_string());
            let (singular, plural) = match suffixes.split_once(',') {
                Some((s, p)) => (s.to_string(), p.to_string()),
                None => (String::new(), suffixes),
            };
            let count = match v {
                Value::List(items) => Some(items.len() as f64),
                other => other.as_number(),
            };
            match count {
                Some(n) if n == 1.0 => Value::Str(singular),
                Some(_) => Value::Str(plural),
                None => Value::Str(String::new()),
            }
        })
        .optional_arg(),
    );
    library.register_filter(
        "safe",
        FilterDef::new(|v, _, _| Value::Safe(v.display_string())).is_safe(),
    );
    library.register_filter(
        "escape",
        FilterDef::new(|v, _, _| match v {
            // Already safe: escaping again would double-encode.
            Value::Safe(s) => Value::Safe(s.clone()),
            other => Value::Safe(escape_html(&other.display_string())),
        })
        .is_safe(),
    );
}
