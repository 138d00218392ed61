//! Schema-driven coercion of raw arguments into wire-safe values.

use std::collections::BTreeMap;

use nativebridge_extension_sdk::ArgKind;
use serde_json::{Map, Value};

use super::schema::ArgumentSchema;
use super::value::{number_to_json, ArgValue, Function};
use super::ArgumentError;

/// A single coerced argument.
#[derive(Debug, Clone)]
pub enum Coerced {
    /// Explicit null accepted by a nullable entry.
    Null,
    Bool(bool),
    /// Result of a signed integer kind, already wrapped into range.
    Int(i64),
    /// Result of an unsigned integer kind, already wrapped into range.
    UInt(u64),
    Double(f64),
    String(String),
    Function(Function),
    /// A non-null object or callable, passed through as-is.
    Dictionary(ArgValue),
    Array(Vec<Coerced>),
    /// Array element with no declared element kind.
    Any(ArgValue),
    /// Listener callbacks that were present, by name.
    Listener(BTreeMap<String, Function>),
}

impl Coerced {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Coerced::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Coerced::Int(v) => Some(*v),
            Coerced::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Coerced::UInt(v) => Some(*v),
            Coerced::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Coerced::Double(v) => Some(*v),
            Coerced::Int(v) => Some(*v as f64),
            Coerced::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Coerced::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Coerced::Function(f) => Some(f),
            Coerced::Dictionary(ArgValue::Function(f)) => Some(f),
            _ => None,
        }
    }

    /// Wire form; `None` for callables.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Coerced::Null => Some(Value::Null),
            Coerced::Bool(b) => Some(Value::Bool(*b)),
            Coerced::Int(v) => Some(Value::from(*v)),
            Coerced::UInt(v) => Some(Value::from(*v)),
            Coerced::Double(v) => Some(number_to_json(*v)),
            Coerced::String(s) => Some(Value::String(s.clone())),
            Coerced::Function(_) | Coerced::Listener(_) => None,
            Coerced::Dictionary(v) | Coerced::Any(v) => v.to_json(),
            Coerced::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .map(|item| item.to_json().unwrap_or(Value::Null))
                    .collect(),
            )),
        }
    }
}

/// Named result of coercing one call's arguments.
#[derive(Debug, Clone, Default)]
pub struct CoercedArgs {
    // Schema order; `None` marks an omitted optional argument.
    entries: Vec<(String, Option<Coerced>)>,
}

impl CoercedArgs {
    /// Whether the argument was supplied (null counts as supplied).
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Coerced> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_ref())
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.get(name).and_then(Coerced::as_function)
    }

    pub fn listener(&self, name: &str) -> Option<&BTreeMap<String, Function>> {
        match self.get(name) {
            Some(Coerced::Listener(callbacks)) => Some(callbacks),
            _ => None,
        }
    }

    /// Iterate supplied arguments in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Coerced)> {
        self.entries
            .iter()
            .filter_map(|(n, v)| v.as_ref().map(|v| (n.as_str(), v)))
    }

    /// Supplied, serializable arguments as envelope fields.
    pub fn to_wire_fields(&self) -> Map<String, Value> {
        self.iter()
            .filter_map(|(name, value)| value.to_json().map(|v| (name.to_string(), v)))
            .collect()
    }
}

/// Coerce `values` positionally against `schema`.
///
/// Fails on the first offending argument; nothing is partially applied.
pub fn coerce(values: &[ArgValue], schema: &ArgumentSchema) -> Result<CoercedArgs, ArgumentError> {
    let mut entries = Vec::with_capacity(schema.len());

    for (index, entry) in schema.entries().iter().enumerate() {
        let spec = &entry.spec;
        let value = values.get(index).unwrap_or(&ArgValue::Undefined);

        let coerced = match value {
            ArgValue::Undefined => {
                if !spec.optional {
                    return Err(ArgumentError::Missing {
                        name: spec.name.clone(),
                        expected: spec.kind.name(),
                    });
                }
                None
            }
            ArgValue::Null => {
                if !spec.nullable {
                    return Err(ArgumentError::InvalidNull {
                        name: spec.name.clone(),
                        expected: spec.kind.name(),
                    });
                }
                Some(Coerced::Null)
            }
            present => {
                let coerced = coerce_value(&spec.name, &spec.kind, present)?;
                if let Some(predicate) = &entry.predicate {
                    if !predicate(&coerced) {
                        return Err(ArgumentError::Rejected {
                            name: spec.name.clone(),
                            expected: spec.kind.name(),
                        });
                    }
                }
                Some(coerced)
            }
        };

        entries.push((spec.name.clone(), coerced));
    }

    Ok(CoercedArgs { entries })
}

/// Coerce one present value to `kind`.
pub fn coerce_value(name: &str, kind: &ArgKind, value: &ArgValue) -> Result<Coerced, ArgumentError> {
    let conversion = |detail: String| ArgumentError::Conversion {
        name: name.to_string(),
        expected: kind.name(),
        detail,
    };

    match kind {
        ArgKind::Boolean => Ok(Coerced::Bool(value.to_boolean())),
        ArgKind::Byte => Ok(Coerced::Int(wrap_integer(value, 8, true) as i64)),
        ArgKind::Octet => Ok(Coerced::UInt(wrap_integer(value, 8, false) as u64)),
        ArgKind::Short => Ok(Coerced::Int(wrap_integer(value, 16, true) as i64)),
        ArgKind::UnsignedShort => Ok(Coerced::UInt(wrap_integer(value, 16, false) as u64)),
        ArgKind::Long => Ok(Coerced::Int(wrap_integer(value, 32, true) as i64)),
        ArgKind::UnsignedLong => Ok(Coerced::UInt(wrap_integer(value, 32, false) as u64)),
        ArgKind::LongLong => Ok(Coerced::Int(wrap_integer(value, 64, true) as i64)),
        ArgKind::UnsignedLongLong => Ok(Coerced::UInt(wrap_integer(value, 64, false) as u64)),
        ArgKind::Double => {
            let n = value.to_number();
            if n.is_finite() {
                Ok(Coerced::Double(n))
            } else {
                Err(conversion(format!(
                    "'{}' is not a finite number",
                    value.to_display_string()
                )))
            }
        }
        ArgKind::String => Ok(Coerced::String(value.to_display_string())),
        ArgKind::Function => match value {
            ArgValue::Function(f) => Ok(Coerced::Function(f.clone())),
            other => Err(conversion(format!("{} is not callable", other.type_name()))),
        },
        ArgKind::Dictionary => match value {
            ArgValue::Object(_) | ArgValue::Function(_) => Ok(Coerced::Dictionary(value.clone())),
            other => Err(conversion(format!("{} is not an object", other.type_name()))),
        },
        ArgKind::Enum { values } => {
            let s = value.to_display_string();
            if values.iter().any(|allowed| *allowed == s) {
                Ok(Coerced::String(s))
            } else {
                Err(conversion(format!(
                    "'{}' is not one of [{}]",
                    s,
                    values.join(", ")
                )))
            }
        }
        ArgKind::Array { element } => {
            let ArgValue::Array(items) = value else {
                return Err(conversion(format!("{} is not an array", value.type_name())));
            };
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match element {
                    Some(element) => {
                        let coerced = coerce_value(name, element, item).map_err(|e| {
                            conversion(format!("element {}: {}", i, e.detail()))
                        })?;
                        out.push(coerced);
                    }
                    None => out.push(Coerced::Any(item.clone())),
                }
            }
            Ok(Coerced::Array(out))
        }
        ArgKind::Listener { callbacks } => {
            let ArgValue::Object(members) = value else {
                return Err(conversion(format!("{} is not an object", value.type_name())));
            };
            let mut present = BTreeMap::new();
            for callback in callbacks {
                match members.get(callback) {
                    None | Some(ArgValue::Undefined) => {}
                    Some(ArgValue::Function(f)) => {
                        present.insert(callback.clone(), f.clone());
                    }
                    Some(other) => {
                        return Err(conversion(format!(
                            "member '{}' is {}, not callable",
                            callback,
                            other.type_name()
                        )));
                    }
                }
            }
            Ok(Coerced::Listener(present))
        }
    }
}

const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

/// Two's-complement truncation of `value` to `bits` bits.
///
/// Non-numeric and non-finite input becomes 0; fractions truncate toward
/// zero; out-of-range input wraps.
fn wrap_integer(value: &ArgValue, bits: u32, signed: bool) -> i128 {
    let raw: i128 = match value {
        ArgValue::String(s) => match s.trim().parse::<i128>() {
            Ok(exact) => exact,
            Err(_) => float_to_i128(value.to_number()),
        },
        other => float_to_i128(other.to_number()),
    };

    let modulus = 1i128 << bits;
    let wrapped = raw.rem_euclid(modulus);
    if signed && wrapped >= modulus / 2 {
        wrapped - modulus
    } else {
        wrapped
    }
}

fn float_to_i128(n: f64) -> i128 {
    if !n.is_finite() {
        return 0;
    }
    let t = n.trunc();
    if t.abs() < 1e36 {
        t as i128
    } else {
        // Only the low 64 bits matter to any target width.
        t.rem_euclid(TWO_POW_64) as i128
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nativebridge_extension_sdk::ArgSpec;
    use serde_json::json;

    fn one(kind: ArgKind, value: ArgValue) -> Result<Coerced, ArgumentError> {
        coerce_value("v", &kind, &value)
    }

    #[test]
    fn test_integer_wraparound() {
        assert_eq!(one(ArgKind::Octet, 300.into()).unwrap().as_u64(), Some(44));
        assert_eq!(one(ArgKind::Byte, 200.into()).unwrap().as_i64(), Some(-56));
        assert_eq!(one(ArgKind::Octet, (-1).into()).unwrap().as_u64(), Some(255));
        assert_eq!(one(ArgKind::Short, 40000.into()).unwrap().as_i64(), Some(-25536));
        assert_eq!(one(ArgKind::UnsignedShort, 65537.into()).unwrap().as_u64(), Some(1));
        assert_eq!(
            one(ArgKind::Long, ArgValue::Number(2147483648.0)).unwrap().as_i64(),
            Some(-2147483648)
        );
        assert_eq!(
            one(ArgKind::UnsignedLong, ArgValue::Number(4294967301.0)).unwrap().as_u64(),
            Some(5)
        );
        assert_eq!(
            one(ArgKind::UnsignedLongLong, (-1).into()).unwrap().as_u64(),
            Some(u64::MAX)
        );
    }

    #[test]
    fn test_integer_conversion_of_odd_inputs() {
        assert_eq!(one(ArgKind::Long, ArgValue::Number(3.9)).unwrap().as_i64(), Some(3));
        assert_eq!(one(ArgKind::Byte, ArgValue::Number(-3.9)).unwrap().as_i64(), Some(-3));
        assert_eq!(one(ArgKind::Long, "abc".into()).unwrap().as_i64(), Some(0));
        assert_eq!(one(ArgKind::Long, ArgValue::Number(f64::INFINITY)).unwrap().as_i64(), Some(0));
        assert_eq!(one(ArgKind::Long, true.into()).unwrap().as_i64(), Some(1));
        assert_eq!(
            one(ArgKind::LongLong, "9007199254740993".into()).unwrap().as_i64(),
            Some(9_007_199_254_740_993)
        );
    }

    #[test]
    fn test_double_requires_finite() {
        assert_eq!(one(ArgKind::Double, "3.5".into()).unwrap().as_f64(), Some(3.5));
        let err = one(ArgKind::Double, "abc".into()).unwrap_err();
        assert_eq!(err.argument(), "v");
        assert_eq!(err.expected(), "double");
        assert!(one(ArgKind::Double, ArgValue::Number(f64::NAN)).is_err());
    }

    #[test]
    fn test_enum_membership() {
        let kind = ArgKind::enumeration(["A", "B"]);
        assert_eq!(one(kind.clone(), "A".into()).unwrap().as_str(), Some("A"));
        assert!(matches!(
            one(kind, "C".into()),
            Err(ArgumentError::Conversion { .. })
        ));
    }

    #[test]
    fn test_function_and_dictionary() {
        assert!(one(ArgKind::Function, ArgValue::function(|_| {})).is_ok());
        assert!(one(ArgKind::Function, "f".into()).is_err());
        assert!(one(ArgKind::Dictionary, ArgValue::object([("a", 1.into())])).is_ok());
        assert!(one(ArgKind::Dictionary, ArgValue::function(|_| {})).is_ok());
        assert!(one(ArgKind::Dictionary, 5.into()).is_err());
    }

    #[test]
    fn test_array_elements_are_coerced() {
        let kind = ArgKind::array_of(ArgKind::Octet);
        let value = ArgValue::Array(vec![1.into(), "258".into()]);
        let Coerced::Array(items) = one(kind, value).unwrap() else {
            panic!("expected array");
        };
        assert_eq!(items[1].as_u64(), Some(2));

        let kind = ArgKind::array_of(ArgKind::Function);
        let value = ArgValue::Array(vec![ArgValue::function(|_| {}), 1.into()]);
        let err = one(kind, value).unwrap_err();
        assert!(err.to_string().contains("element 1"));

        assert!(one(ArgKind::Array { element: None }, "x".into()).is_err());
    }

    #[test]
    fn test_listener_callbacks() {
        let kind = ArgKind::listener(["onsuccess", "onerror"]);
        let value = ArgValue::object([("onsuccess", ArgValue::function(|_| {}))]);
        let Coerced::Listener(callbacks) = one(kind.clone(), value).unwrap() else {
            panic!("expected listener");
        };
        assert!(callbacks.contains_key("onsuccess"));
        assert!(!callbacks.contains_key("onerror"));

        let value = ArgValue::object([("onerror", "nope".into())]);
        assert!(one(kind, value).is_err());
    }

    #[test]
    fn test_optional_and_nullable() {
        let schema = ArgumentSchema::new()
            .arg(ArgSpec::new("a", ArgKind::Long))
            .arg(ArgSpec::new("b", ArgKind::String).optional().nullable())
            .arg(ArgSpec::new("c", ArgKind::Double).optional());

        let args = coerce(&[1.into(), ArgValue::Undefined], &schema).unwrap();
        assert!(args.has("a"));
        assert!(!args.has("b"));
        assert!(!args.has("c"));

        let args = coerce(&[1.into(), ArgValue::Null], &schema).unwrap();
        assert!(matches!(args.get("b"), Some(Coerced::Null)));

        let err = coerce(&[1.into(), "x".into(), ArgValue::Null], &schema).unwrap_err();
        assert!(matches!(err, ArgumentError::InvalidNull { ref name, .. } if name == "c"));

        let err = coerce(&[], &schema).unwrap_err();
        assert!(matches!(err, ArgumentError::Missing { ref name, .. } if name == "a"));
    }

    #[test]
    fn test_predicate_runs_after_coercion() {
        let schema = ArgumentSchema::new().arg_with(ArgSpec::new("level", ArgKind::Double), |v| {
            v.as_f64().map(|n| (0.0..=1.0).contains(&n)).unwrap_or(false)
        });
        assert!(coerce(&["0.5".into()], &schema).is_ok());
        assert!(matches!(
            coerce(&[2.into()], &schema),
            Err(ArgumentError::Rejected { .. })
        ));
    }

    #[test]
    fn test_double_end_to_end() {
        let schema = ArgumentSchema::new().arg(ArgSpec::new("x", ArgKind::Double));
        let args = coerce(&["3.5".into()], &schema).unwrap();
        assert!(args.has("x"));
        assert_eq!(args.get("x").and_then(Coerced::as_f64), Some(3.5));
        assert_eq!(args.to_wire_fields(), json!({"x": 3.5}).as_object().unwrap().clone());

        let err = coerce(&["abc".into()], &schema).unwrap_err();
        assert_eq!(err.argument(), "x");
    }

    #[test]
    fn test_wire_fields_skip_callables() {
        let schema = ArgumentSchema::new()
            .arg(ArgSpec::new("path", ArgKind::String))
            .arg(ArgSpec::new("onDone", ArgKind::Function));
        let args = coerce(&["/tmp".into(), ArgValue::function(|_| {})], &schema).unwrap();
        assert_eq!(args.to_wire_fields().len(), 1);
        assert!(args.function("onDone").is_some());
    }
}
