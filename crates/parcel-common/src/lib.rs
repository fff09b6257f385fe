// Shared data types used across parcel crates.
use bytes::Bytes;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("value of type {0} cannot be represented as JSON")]
    NotJson(&'static str),
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("value nests deeper than {limit} levels")]
    TooDeep { limit: usize },
}

// Largest integer an f64 holds exactly; beyond this JSON output keeps float form.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Deepest array/object nesting `to_json` emits. serde_json's parser refuses
/// the 128th nested container, so anything deeper could never be read back.
pub const MAX_JSON_NESTING: usize = 127;

/// Opaque message body exchanged with the host environment.
///
/// Only the capabilities the queue codec needs are exposed: type checks, a
/// textual projection, a JSON projection, and raw byte views.
///
/// ```
/// use parcel_common::Value;
///
/// let value = Value::object([("a", Value::from(1))]);
/// assert_eq!(value.to_json().expect("json"), r#"{"a":1}"#);
/// assert_eq!(Value::from_json(r#"{"a":1}"#).expect("parse"), value);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Bytes),
    Array(Vec<Value>),
    // Entries keep insertion order, like object properties do.
    Object(Vec<(String, Value)>),
}

impl Value {
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    pub fn is_byte_view(&self) -> bool {
        matches!(self, Value::Bytes(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Array(_) | Value::Bytes(_))
    }

    // Short type name used in user-facing type errors.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    // Property lookup for object values; first matching key wins.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(entries) => entries
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Textual JSON projection of the value.
    ///
    /// Follows the usual JSON.stringify rules: undefined object members are
    /// skipped, undefined array items become `null`, and non-finite numbers
    /// become `null`. A top-level undefined and raw bytes are rejected.
    pub fn to_json(&self) -> Result<String> {
        let json = self.to_json_value(0)?.ok_or(Error::NotJson(self.type_of()))?;
        Ok(json.to_string())
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(text)?;
        Ok(Self::from(json))
    }

    // `depth` counts the containers enclosing `self`.
    fn to_json_value(&self, depth: usize) -> Result<Option<serde_json::Value>> {
        if matches!(self, Value::Array(_) | Value::Object(_)) && depth >= MAX_JSON_NESTING {
            return Err(Error::TooDeep {
                limit: MAX_JSON_NESTING,
            });
        }
        let json = match self {
            Value::Undefined => return Ok(None),
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(_) => return Err(Error::NotJson(self.type_of())),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let json = item.to_json_value(depth + 1)?;
                    out.push(json.unwrap_or(serde_json::Value::Null));
                }
                serde_json::Value::Array(out)
            }
            Value::Object(entries) => {
                let mut map = serde_json::Map::with_capacity(entries.len());
                for (key, value) in entries {
                    if let Some(json) = value.to_json_value(depth + 1)? {
                        map.insert(key.clone(), json);
                    }
                }
                serde_json::Value::Object(map)
            }
        };
        Ok(Some(json))
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        return serde_json::Value::Null;
    }
    // Integral values print without a fractional part.
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(f64::from(value))
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Bytes(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(value))
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_numbers_print_without_fraction() {
        assert_eq!(Value::from(1).to_json().expect("json"), "1");
        assert_eq!(Value::from(-0.0).to_json().expect("json"), "0");
        assert_eq!(Value::from(1.5).to_json().expect("json"), "1.5");
        assert_eq!(Value::from(f64::NAN).to_json().expect("json"), "null");
    }

    #[test]
    fn undefined_members_follow_stringify_rules() {
        let value = Value::object([
            ("keep", Value::Bool(true)),
            ("skip", Value::Undefined),
            (
                "list",
                Value::Array(vec![Value::Undefined, Value::from("x")]),
            ),
        ]);
        assert_eq!(
            value.to_json().expect("json"),
            r#"{"keep":true,"list":[null,"x"]}"#
        );
    }

    #[test]
    fn top_level_undefined_and_bytes_are_rejected() {
        let err = Value::Undefined.to_json().expect_err("undefined");
        assert!(matches!(err, Error::NotJson("undefined")));
        let err = Value::from(vec![1u8, 2]).to_json().expect_err("bytes");
        assert!(matches!(err, Error::NotJson("bytes")));
    }

    #[test]
    fn from_json_preserves_member_order() {
        let value = Value::from_json(r#"{"z":1,"a":[true,null],"m":"s"}"#).expect("parse");
        let Value::Object(entries) = &value else {
            panic!("expected object");
        };
        let keys: Vec<&str> = entries.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, ["z", "a", "m"]);
        assert_eq!(value.get("m"), Some(&Value::from("s")));
        assert_eq!(value.to_json().expect("json"), r#"{"z":1,"a":[true,null],"m":"s"}"#);
    }

    fn nested_arrays(levels: usize) -> Value {
        (0..levels).fold(Value::from(1), |inner, _| Value::Array(vec![inner]))
    }

    #[test]
    fn json_nesting_stops_where_the_parser_does() {
        let deepest = nested_arrays(MAX_JSON_NESTING);
        let text = deepest.to_json().expect("json");
        assert_eq!(Value::from_json(&text).expect("parse"), deepest);

        let err = nested_arrays(MAX_JSON_NESTING + 1)
            .to_json()
            .expect_err("too deep");
        assert!(matches!(err, Error::TooDeep { limit: MAX_JSON_NESTING }));

        let wrapped = Value::object([("inner", nested_arrays(MAX_JSON_NESTING))]);
        assert!(matches!(wrapped.to_json(), Err(Error::TooDeep { .. })));
    }

    #[test]
    fn from_json_rejects_malformed_input() {
        let err = Value::from_json("{not json").expect_err("invalid");
        assert!(matches!(err, Error::InvalidJson(_)));
    }

    #[test]
    fn capabilities_report_shape() {
        assert!(Value::from("s").is_string());
        assert!(Value::from(vec![1u8]).is_byte_view());
        assert!(Value::object([("a", Value::Null)]).is_object());
        assert!(!Value::from(3).is_object());
        assert_eq!(Value::Null.type_of(), "null");
    }
}
