//! Owned, thread-transferable representation of engine values.
//!
//! `MarshaledValue` is the only form in which data crosses a thread
//! boundary. It owns all nested data and is fully independent of any
//! execution-context lifetime. The Serialize/Deserialize implementations
//! are manual because object keys are themselves marshaled values and must
//! be coerced to property-name strings for JSON text.

use serde::{Deserialize, Serialize};

/// Element kind of a marshaled binary buffer.
///
/// Only unsigned 8-bit buffers are supported; engine bindings fall back to
/// `Uint8` for any other typed-array kind. This is a known limitation, not
/// a silent drop: the buffer bytes are still copied in full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryKind {
    Uint8,
}

/// An engine value deep-copied into an owned tagged variant.
///
/// Numeric variants mirror the engine's own classification priority:
/// a value representable as `Int32` is marshaled as `Int32` even when it
/// would also fit `UInt32` or `Float64`.
#[derive(Clone, Debug, PartialEq)]
pub enum MarshaledValue {
    Int32(i32),
    UInt32(u32),
    Float64(f64),
    Boolean(bool),
    Null,
    Undefined,
    String(String),
    Binary { kind: BinaryKind, bytes: Vec<u8> },
    /// Property pairs in insertion order. Keys are not required unique at
    /// the type level; materialization applies last-write-wins, matching
    /// engine property-store semantics.
    Object(Vec<(MarshaledValue, MarshaledValue)>),
    Array(Vec<MarshaledValue>),
}

impl MarshaledValue {
    /// Coerce this value to an engine property-name string, the way a
    /// script engine stringifies object keys.
    pub fn property_key(&self) -> String {
        match self {
            MarshaledValue::String(s) => s.clone(),
            MarshaledValue::Int32(i) => i.to_string(),
            MarshaledValue::UInt32(u) => u.to_string(),
            MarshaledValue::Float64(f) => f.to_string(),
            MarshaledValue::Boolean(b) => b.to_string(),
            MarshaledValue::Null => "null".to_string(),
            MarshaledValue::Undefined => "undefined".to_string(),
            MarshaledValue::Array(_) | MarshaledValue::Binary { .. } => String::new(),
            MarshaledValue::Object(_) => "[object Object]".to_string(),
        }
    }

    /// Serialize to JSON text. `Undefined` renders as `null`; binary
    /// buffers render as arrays of byte values.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse JSON text into a marshaled value. Integers are classified
    /// `Int32` first, then `UInt32`, then `Float64`, mirroring the
    /// marshaling classifier order.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Classify an integer the way the marshaler would: first matching of
    /// `Int32`, `UInt32`, `Float64` wins.
    pub(crate) fn from_i64(value: i64) -> Self {
        if let Ok(i) = i32::try_from(value) {
            MarshaledValue::Int32(i)
        } else if let Ok(u) = u32::try_from(value) {
            MarshaledValue::UInt32(u)
        } else {
            MarshaledValue::Float64(value as f64)
        }
    }
}

impl Serialize for MarshaledValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        match self {
            MarshaledValue::Int32(i) => serializer.serialize_i32(*i),
            MarshaledValue::UInt32(u) => serializer.serialize_u32(*u),
            MarshaledValue::Float64(f) => serializer.serialize_f64(*f),
            MarshaledValue::Boolean(b) => serializer.serialize_bool(*b),
            MarshaledValue::Null | MarshaledValue::Undefined => serializer.serialize_none(),
            MarshaledValue::String(s) => serializer.serialize_str(s),
            MarshaledValue::Binary { bytes, .. } => bytes.serialize(serializer),
            MarshaledValue::Array(items) => items.serialize(serializer),
            MarshaledValue::Object(pairs) => {
                let mut map = serializer.serialize_map(Some(pairs.len()))?;
                for (key, value) in pairs {
                    map.serialize_entry(&key.property_key(), value)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for MarshaledValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = MarshaledValue;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a JSON value (null, bool, number, string, array, or object)")
            }

            fn visit_bool<E>(self, value: bool) -> Result<Self::Value, E> {
                Ok(MarshaledValue::Boolean(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E> {
                Ok(MarshaledValue::from_i64(value))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E> {
                if let Ok(i) = i64::try_from(value) {
                    Ok(MarshaledValue::from_i64(i))
                } else {
                    Ok(MarshaledValue::Float64(value as f64))
                }
            }

            fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E> {
                Ok(MarshaledValue::Float64(value))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(MarshaledValue::String(value.to_owned()))
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E> {
                Ok(MarshaledValue::String(value))
            }

            fn visit_none<E>(self) -> Result<Self::Value, E> {
                Ok(MarshaledValue::Null)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(MarshaledValue::Null)
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(MarshaledValue::Array(items))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: de::MapAccess<'de>,
            {
                let mut pairs = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, MarshaledValue>()? {
                    pairs.push((MarshaledValue::String(key), value));
                }
                Ok(MarshaledValue::Object(pairs))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_classification_order() {
        assert_eq!(MarshaledValue::from_i64(-5), MarshaledValue::Int32(-5));
        assert_eq!(MarshaledValue::from_i64(21), MarshaledValue::Int32(21));
        assert_eq!(
            MarshaledValue::from_i64(3_000_000_000),
            MarshaledValue::UInt32(3_000_000_000)
        );
        assert_eq!(
            MarshaledValue::from_i64(5_000_000_000),
            MarshaledValue::Float64(5_000_000_000.0)
        );
    }

    #[test]
    fn json_round_trip_preserves_order() {
        let value = MarshaledValue::Object(vec![
            (MarshaledValue::String("b".into()), MarshaledValue::Int32(1)),
            (
                MarshaledValue::String("a".into()),
                MarshaledValue::Array(vec![
                    MarshaledValue::Int32(1),
                    MarshaledValue::Int32(2),
                    MarshaledValue::String("x".into()),
                ]),
            ),
        ]);

        let text = value.to_json().unwrap();
        assert_eq!(text, r#"{"b":1,"a":[1,2,"x"]}"#);
        assert_eq!(MarshaledValue::from_json(&text).unwrap(), value);
    }

    #[test]
    fn undefined_serializes_as_null() {
        assert_eq!(MarshaledValue::Undefined.to_json().unwrap(), "null");
        assert_eq!(
            MarshaledValue::from_json("null").unwrap(),
            MarshaledValue::Null
        );
    }

    #[test]
    fn numeric_keys_coerce_to_strings() {
        let value = MarshaledValue::Object(vec![(
            MarshaledValue::Int32(7),
            MarshaledValue::Boolean(true),
        )]);
        assert_eq!(value.to_json().unwrap(), r#"{"7":true}"#);
    }

    #[test]
    fn binary_serializes_as_byte_array() {
        let value = MarshaledValue::Binary {
            kind: BinaryKind::Uint8,
            bytes: vec![0, 128, 255],
        };
        assert_eq!(value.to_json().unwrap(), "[0,128,255]");
    }

    #[test]
    fn special_floats_are_representable() {
        let nan = MarshaledValue::Float64(f64::NAN);
        let inf = MarshaledValue::Float64(f64::INFINITY);
        assert!(matches!(nan, MarshaledValue::Float64(f) if f.is_nan()));
        assert!(matches!(inf, MarshaledValue::Float64(f) if f.is_infinite()));
    }
}
