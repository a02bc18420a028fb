//! Deep copy between engine values and [`MarshaledValue`].
//!
//! This is the only sanctioned way any value crosses a thread boundary:
//! raw engine handles are never shared between threads. Marshaling
//! failures on individual values never abort the surrounding operation;
//! the offending value degrades to `Undefined` with a warning.

use crate::pool::engine::{ScriptEngine, ValueKind};
use crate::pool::value::MarshaledValue;
use tracing::warn;

/// Recursively deep-copy an engine value into an owned marshaled value.
///
/// Classification follows the engine's own type-check priority (Int32,
/// then UInt32, then Float64, ...); the first matching classifier wins.
pub fn marshal<E: ScriptEngine>(engine: &mut E, value: &E::Value) -> MarshaledValue {
    match engine.classify(value) {
        ValueKind::Int32 => read_or_degrade(engine.int32_value(value).map(MarshaledValue::Int32)),
        ValueKind::UInt32 => {
            read_or_degrade(engine.uint32_value(value).map(MarshaledValue::UInt32))
        }
        ValueKind::Float64 => {
            read_or_degrade(engine.float64_value(value).map(MarshaledValue::Float64))
        }
        ValueKind::Boolean => {
            read_or_degrade(engine.boolean_value(value).map(MarshaledValue::Boolean))
        }
        ValueKind::Null => MarshaledValue::Null,
        ValueKind::Undefined => MarshaledValue::Undefined,
        ValueKind::String => {
            read_or_degrade(engine.string_value(value).map(MarshaledValue::String))
        }
        ValueKind::Binary => read_or_degrade(
            engine
                .binary_value(value)
                .map(|(kind, bytes)| MarshaledValue::Binary { kind, bytes }),
        ),
        ValueKind::Array => {
            let length = engine.array_length(value);
            let mut items = Vec::with_capacity(length as usize);
            for index in 0..length {
                // Holes marshal as Undefined.
                let item = match engine.array_element(value, index) {
                    Some(element) => marshal(engine, &element),
                    None => MarshaledValue::Undefined,
                };
                items.push(item);
            }
            MarshaledValue::Array(items)
        }
        ValueKind::Object => {
            let keys = engine.property_keys(value);
            let mut pairs = Vec::with_capacity(keys.len());
            for key in keys {
                let marshaled_key = marshal(engine, &key);
                let marshaled_value = match engine.property(value, &key) {
                    Some(property) => marshal(engine, &property),
                    None => MarshaledValue::Undefined,
                };
                pairs.push((marshaled_key, marshaled_value));
            }
            MarshaledValue::Object(pairs)
        }
        ValueKind::Unsupported => {
            warn!("cannot marshal unsupported value kind, degrading to undefined");
            MarshaledValue::Undefined
        }
    }
}

/// Reconstruct an engine value inside `engine` from a marshaled value.
///
/// Object and array reconstruction preserves the key/element order
/// recorded during marshaling; duplicate object keys resolve
/// last-write-wins through the engine's own property store.
pub fn materialize<E: ScriptEngine>(engine: &mut E, value: &MarshaledValue) -> E::Value {
    match value {
        MarshaledValue::Int32(i) => engine.new_int32(*i),
        MarshaledValue::UInt32(u) => engine.new_uint32(*u),
        MarshaledValue::Float64(f) => engine.new_float64(*f),
        MarshaledValue::Boolean(b) => engine.new_boolean(*b),
        MarshaledValue::Null => engine.null(),
        MarshaledValue::Undefined => engine.undefined(),
        MarshaledValue::String(s) => engine.new_string(s),
        MarshaledValue::Binary { kind, bytes } => engine.new_binary(*kind, bytes),
        MarshaledValue::Array(items) => {
            let array = engine.new_array();
            for (index, item) in items.iter().enumerate() {
                let element = materialize(engine, item);
                engine.set_element(&array, index as u32, &element);
            }
            array
        }
        MarshaledValue::Object(pairs) => {
            let object = engine.new_object();
            for (key, value) in pairs {
                let engine_key = materialize(engine, key);
                let engine_value = materialize(engine, value);
                engine.set_property(&object, &engine_key, &engine_value);
            }
            object
        }
    }
}

fn read_or_degrade(value: Option<MarshaledValue>) -> MarshaledValue {
    value.unwrap_or_else(|| {
        warn!("engine reader disagreed with its own classification, degrading to undefined");
        MarshaledValue::Undefined
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::testing::{StubEngine, StubValue};
    use crate::pool::value::BinaryKind;

    fn round_trip(value: MarshaledValue) -> MarshaledValue {
        let mut engine = StubEngine::new();
        let engine_value = materialize(&mut engine, &value);
        marshal(&mut engine, &engine_value)
    }

    #[test]
    fn scalars_round_trip() {
        for value in [
            MarshaledValue::Int32(-42),
            MarshaledValue::UInt32(3_000_000_000),
            MarshaledValue::Float64(2.5),
            MarshaledValue::Boolean(true),
            MarshaledValue::Null,
            MarshaledValue::Undefined,
            MarshaledValue::String("hello".into()),
        ] {
            assert_eq!(round_trip(value.clone()), value);
        }
    }

    #[test]
    fn binary_round_trips_as_owned_copy() {
        let value = MarshaledValue::Binary {
            kind: BinaryKind::Uint8,
            bytes: vec![1, 2, 3, 255],
        };
        assert_eq!(round_trip(value.clone()), value);
    }

    #[test]
    fn nested_structures_preserve_order() {
        let value = MarshaledValue::Object(vec![
            (
                MarshaledValue::String("b".into()),
                MarshaledValue::Int32(1),
            ),
            (
                MarshaledValue::String("a".into()),
                MarshaledValue::Array(vec![
                    MarshaledValue::Int32(1),
                    MarshaledValue::Int32(2),
                    MarshaledValue::String("x".into()),
                ]),
            ),
        ]);
        assert_eq!(round_trip(value.clone()), value);
    }

    #[test]
    fn duplicate_keys_resolve_last_write_wins() {
        let value = MarshaledValue::Object(vec![
            (
                MarshaledValue::String("a".into()),
                MarshaledValue::Int32(1),
            ),
            (
                MarshaledValue::String("a".into()),
                MarshaledValue::Int32(2),
            ),
        ]);
        let expected = MarshaledValue::Object(vec![(
            MarshaledValue::String("a".into()),
            MarshaledValue::Int32(2),
        )]);
        assert_eq!(round_trip(value), expected);
    }

    #[test]
    fn unsupported_values_degrade_to_undefined() {
        let mut engine = StubEngine::new();
        let function = StubValue::function(|_args| Ok(StubValue::Undefined));
        assert_eq!(marshal(&mut engine, &function), MarshaledValue::Undefined);
    }

    #[test]
    fn function_valued_property_degrades_without_aborting_object() {
        let mut engine = StubEngine::new();
        let object = engine.new_object();
        let key_n = engine.new_string("n");
        let n = engine.new_int32(7);
        engine.set_property(&object, &key_n, &n);
        let key_f = engine.new_string("f");
        let f = StubValue::function(|_args| Ok(StubValue::Undefined));
        engine.set_property(&object, &key_f, &f);

        let marshaled = marshal(&mut engine, &object);
        assert_eq!(
            marshaled,
            MarshaledValue::Object(vec![
                (MarshaledValue::String("n".into()), MarshaledValue::Int32(7)),
                (
                    MarshaledValue::String("f".into()),
                    MarshaledValue::Undefined
                ),
            ])
        );
    }

    #[test]
    fn sparse_materialize_fills_holes_with_undefined() {
        let mut engine = StubEngine::new();
        let array = engine.new_array();
        let tail = engine.new_int32(9);
        engine.set_element(&array, 2, &tail);

        assert_eq!(
            marshal(&mut engine, &array),
            MarshaledValue::Array(vec![
                MarshaledValue::Undefined,
                MarshaledValue::Undefined,
                MarshaledValue::Int32(9),
            ])
        );
    }
}
