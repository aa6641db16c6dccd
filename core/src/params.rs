//! Moodle parameter encoding
//! Flattens typed values into the bracket-indexed form the REST server expects

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Flat upstream parameter set, kept in insertion order
pub type ParamSet = Map<String, Value>;

/// Declared type of an endpoint parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum ParamType {
    #[default]
    Str,
    Int,
    Float,
    Bool,
    List,
    Dict,
}

impl From<String> for ParamType {
    fn from(raw: String) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "int" => Self::Int,
            "float" | "double" => Self::Float,
            "bool" => Self::Bool,
            "list" => Self::List,
            "dict" => Self::Dict,
            _ => Self::Str,
        }
    }
}

impl From<ParamType> for String {
    fn from(ty: ParamType) -> Self {
        match ty {
            ParamType::Str => "str",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::List => "list",
            ParamType::Dict => "dict",
        }
        .to_string()
    }
}

const TRUTHY: [&str; 4] = ["1", "true", "on", "yes"];

/// Encode a single named value into `params`.
///
/// Conversion failures never raise: the original value is passed through.
/// Lists of objects recurse one extra level (`name[i][key]`) while a plain
/// object only expands its top-level fields (`name[key]`).
pub fn encode_param(params: &mut ParamSet, name: &str, value: &Value, declared: ParamType) {
    match declared {
        ParamType::Bool => {
            params.insert(name.to_string(), flag(is_truthy(value)));
        }
        ParamType::Float => {
            let encoded = to_float(value).unwrap_or_else(|| value.clone());
            params.insert(name.to_string(), encoded);
        }
        ParamType::Int => {
            let encoded = to_int(value).unwrap_or_else(|| value.clone());
            params.insert(name.to_string(), encoded);
        }
        ParamType::List => {
            for (idx, item) in parse_list_value(value).into_iter().enumerate() {
                match item {
                    Value::Object(fields) => {
                        for (key, inner) in fields {
                            let inner = match inner {
                                Value::Bool(b) => flag(b),
                                other => other,
                            };
                            params.insert(format!("{}[{}][{}]", name, idx, key), inner);
                        }
                    }
                    other => {
                        params.insert(format!("{}[{}]", name, idx), other);
                    }
                }
            }
        }
        ParamType::Str | ParamType::Dict => match value {
            Value::Object(fields) => {
                for (key, inner) in fields {
                    params.insert(format!("{}[{}]", name, key), inner.clone());
                }
            }
            other => {
                params.insert(name.to_string(), other.clone());
            }
        },
    }
}

/// Normalize a raw `list` parameter into a sequence.
///
/// Accepts a JSON array string, a comma separated string, a native array or
/// a single scalar.
pub fn parse_list_value(raw: &Value) -> Vec<Value> {
    match raw {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Vec::new();
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Array(items)) => items,
                // Valid JSON but not an array: keep the caller's string as-is
                Ok(_) => vec![raw.clone()],
                Err(_) if trimmed.contains(',') => trimmed
                    .split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
                Err(_) => vec![Value::String(trimmed.to_string())],
            }
        }
        other => vec![other.clone()],
    }
}

fn flag(on: bool) -> Value {
    Value::from(u8::from(on))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::String(s) => TRUTHY.contains(&s.trim().to_lowercase().as_str()),
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

fn to_int(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
        Value::Number(n) => {
            let f = n.as_f64()?;
            if f.is_finite() {
                Some(Value::from(f.trunc() as i64))
            } else {
                None
            }
        }
        Value::Bool(b) => Some(flag(*b)),
        Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    }
}

fn to_float(value: &Value) -> Option<Value> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    Number::from_f64(f).map(Value::Number)
}

/// Render a parameter value the way it travels on the wire
pub fn wire_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        composite => composite.to_string(),
    }
}

/// Flatten an encoded parameter set into form/query pairs
pub fn form_pairs(params: &ParamSet) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(key, value)| (key.clone(), wire_value(value)))
        .collect()
}
