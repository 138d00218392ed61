//! Dynamically typed call arguments as supplied by application code.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// A callable argument. Callables never cross the wire.
#[derive(Clone)]
pub struct Function(Arc<dyn Fn(&[ArgValue]) + Send + Sync>);

impl Function {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[ArgValue]) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, args: &[ArgValue]) {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Function")
    }
}

/// A raw, uncoerced argument.
#[derive(Debug, Clone, Default)]
pub enum ArgValue {
    /// Explicitly absent. Treated exactly like an omitted trailing argument.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ArgValue>),
    Object(BTreeMap<String, ArgValue>),
    Function(Function),
}

impl ArgValue {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[ArgValue]) + Send + Sync + 'static,
    {
        ArgValue::Function(Function::new(f))
    }

    pub fn object<I, K>(members: I) -> Self
    where
        I: IntoIterator<Item = (K, ArgValue)>,
        K: Into<String>,
    {
        ArgValue::Object(members.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, ArgValue::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ArgValue::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, ArgValue::Function(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ArgValue::Undefined => "undefined",
            ArgValue::Null => "null",
            ArgValue::Bool(_) => "boolean",
            ArgValue::Number(_) => "number",
            ArgValue::String(_) => "string",
            ArgValue::Array(_) => "array",
            ArgValue::Object(_) => "object",
            ArgValue::Function(_) => "function",
        }
    }

    /// Truthiness.
    pub fn to_boolean(&self) -> bool {
        match self {
            ArgValue::Undefined | ArgValue::Null => false,
            ArgValue::Bool(b) => *b,
            ArgValue::Number(n) => !(*n == 0.0 || n.is_nan()),
            ArgValue::String(s) => !s.is_empty(),
            ArgValue::Array(_) | ArgValue::Object(_) | ArgValue::Function(_) => true,
        }
    }

    /// Numeric conversion. Unconvertible input yields NaN.
    pub fn to_number(&self) -> f64 {
        match self {
            ArgValue::Undefined => f64::NAN,
            ArgValue::Null => 0.0,
            ArgValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            ArgValue::Number(n) => *n,
            ArgValue::String(s) => parse_number(s),
            ArgValue::Array(items) => match items.as_slice() {
                [] => 0.0,
                [single] => parse_number(&single.to_display_string()),
                _ => f64::NAN,
            },
            ArgValue::Object(_) | ArgValue::Function(_) => f64::NAN,
        }
    }

    /// String conversion. Never fails.
    pub fn to_display_string(&self) -> String {
        match self {
            ArgValue::Undefined => "undefined".to_string(),
            ArgValue::Null => "null".to_string(),
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Number(n) => format_number(*n),
            ArgValue::String(s) => s.clone(),
            ArgValue::Array(items) => items
                .iter()
                .map(|item| match item {
                    ArgValue::Undefined | ArgValue::Null => String::new(),
                    other => other.to_display_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            ArgValue::Object(_) => "[object Object]".to_string(),
            ArgValue::Function(_) => "function".to_string(),
        }
    }

    /// Wire form. `None` for values that cannot be serialized (callables,
    /// undefined); non-finite numbers become null.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            ArgValue::Undefined | ArgValue::Function(_) => None,
            ArgValue::Null => Some(Value::Null),
            ArgValue::Bool(b) => Some(Value::Bool(*b)),
            ArgValue::Number(n) => Some(number_to_json(*n)),
            ArgValue::String(s) => Some(Value::String(s.clone())),
            ArgValue::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .map(|item| item.to_json().unwrap_or(Value::Null))
                    .collect(),
            )),
            ArgValue::Object(members) => Some(Value::Object(
                members
                    .iter()
                    .filter_map(|(k, v)| v.to_json().map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }
}

pub(crate) fn number_to_json(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn parse_number(raw: &str) -> f64 {
    let s = raw.trim();
    if s.is_empty() {
        return 0.0;
    }
    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    let lower = s.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        return u64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    // Rust accepts "inf" and "nan" spellings that are not numbers here.
    if lower.contains("inf") || lower.contains("nan") {
        return f64::NAN;
    }
    s.parse::<f64>().unwrap_or(f64::NAN)
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n != 0.0 && (n.abs() >= 1e21 || n.abs() < 1e-6) {
        // Exponent form, with an explicit sign on positive exponents.
        let formatted = format!("{:e}", n);
        match formatted.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{}e+{}", mantissa, exponent)
            }
            _ => formatted,
        }
    } else if n.fract() == 0.0 {
        format!("{}", n as i128)
    } else {
        format!("{}", n)
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Number(v)
    }
}

impl From<i32> for ArgValue {
    fn from(v: i32) -> Self {
        ArgValue::Number(v as f64)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Number(v as f64)
    }
}

impl From<u32> for ArgValue {
    fn from(v: u32) -> Self {
        ArgValue::Number(v as f64)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::String(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::String(v)
    }
}

impl From<Vec<ArgValue>> for ArgValue {
    fn from(v: Vec<ArgValue>) -> Self {
        ArgValue::Array(v)
    }
}

impl From<Function> for ArgValue {
    fn from(f: Function) -> Self {
        ArgValue::Function(f)
    }
}

impl From<Value> for ArgValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => ArgValue::Null,
            Value::Bool(b) => ArgValue::Bool(b),
            Value::Number(n) => ArgValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => ArgValue::String(s),
            Value::Array(items) => ArgValue::Array(items.into_iter().map(ArgValue::from).collect()),
            Value::Object(members) => ArgValue::Object(
                members
                    .into_iter()
                    .map(|(k, v)| (k, ArgValue::from(v)))
                    .collect(),
            ),
        }
    }
}
