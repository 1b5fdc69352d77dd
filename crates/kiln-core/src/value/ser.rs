//! Host values → [`Value`], via `serde::Serialize`.
//!
//! Sequences and tuples lower to `Value::Array`; maps and structs lower to
//! `Value::Object`. Anything without a counterpart (byte buffers, non-scalar
//! map keys, integers outside `i64`) fails with a [`ConversionError`] that
//! names the path of the offending element.

use serde::ser::{self, Impossible, Serialize};

use super::{Key, Map, Value};
use crate::error::ConversionError;

/// Convert any `Serialize` host value into a [`Value`].
///
/// ```
/// use kiln_core::value::{to_value, Value};
///
/// let value = to_value(&("a", 1, true)).unwrap();
/// assert_eq!(
///     value,
///     Value::Array(vec![Value::from("a"), Value::Int(1), Value::Bool(true)])
/// );
/// ```
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, ConversionError> {
    value.serialize(ValueSerializer)
}

impl Serialize for Value {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use ser::{SerializeMap, SerializeSeq};

        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    match key {
                        Key::Int(i) => map.serialize_entry(i, value)?,
                        Key::Str(s) => map.serialize_entry(s, value)?,
                    }
                }
                map.end()
            }
        }
    }
}

/// Serializer whose output is a [`Value`].
pub struct ValueSerializer;

impl ser::Serializer for ValueSerializer {
    type Ok = Value;
    type Error = ConversionError;

    type SerializeSeq = SerializeArray;
    type SerializeTuple = SerializeArray;
    type SerializeTupleStruct = SerializeArray;
    type SerializeTupleVariant = SerializeVariant<SerializeArray>;
    type SerializeMap = SerializeObject;
    type SerializeStruct = SerializeObject;
    type SerializeStructVariant = SerializeVariant<SerializeObject>;

    fn serialize_bool(self, v: bool) -> Result<Value, ConversionError> {
        Ok(Value::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Value, ConversionError> {
        Ok(Value::Int(v as i64))
    }

    fn serialize_i16(self, v: i16) -> Result<Value, ConversionError> {
        Ok(Value::Int(v as i64))
    }

    fn serialize_i32(self, v: i32) -> Result<Value, ConversionError> {
        Ok(Value::Int(v as i64))
    }

    fn serialize_i64(self, v: i64) -> Result<Value, ConversionError> {
        Ok(Value::Int(v))
    }

    fn serialize_i128(self, v: i128) -> Result<Value, ConversionError> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| ConversionError::out_of_range(format!("integer {} does not fit in i64", v)))
    }

    fn serialize_u8(self, v: u8) -> Result<Value, ConversionError> {
        Ok(Value::Int(v as i64))
    }

    fn serialize_u16(self, v: u16) -> Result<Value, ConversionError> {
        Ok(Value::Int(v as i64))
    }

    fn serialize_u32(self, v: u32) -> Result<Value, ConversionError> {
        Ok(Value::Int(v as i64))
    }

    fn serialize_u64(self, v: u64) -> Result<Value, ConversionError> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| ConversionError::out_of_range(format!("integer {} does not fit in i64", v)))
    }

    fn serialize_u128(self, v: u128) -> Result<Value, ConversionError> {
        i64::try_from(v)
            .map(Value::Int)
            .map_err(|_| ConversionError::out_of_range(format!("integer {} does not fit in i64", v)))
    }

    fn serialize_f32(self, v: f32) -> Result<Value, ConversionError> {
        Ok(Value::Float(v as f64))
    }

    fn serialize_f64(self, v: f64) -> Result<Value, ConversionError> {
        Ok(Value::Float(v))
    }

    fn serialize_char(self, v: char) -> Result<Value, ConversionError> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Value, ConversionError> {
        Ok(Value::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Value, ConversionError> {
        Err(ConversionError::unsupported(format!(
            "byte buffer of {} bytes has no engine counterpart",
            v.len()
        )))
    }

    fn serialize_none(self) -> Result<Value, ConversionError> {
        Ok(Value::Null)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Value, ConversionError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Value, ConversionError> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Value, ConversionError> {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Value, ConversionError> {
        Ok(Value::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Value, ConversionError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Value, ConversionError> {
        let inner = value
            .serialize(ValueSerializer)
            .map_err(|e| e.at_key(variant))?;
        let mut map = Map::with_capacity(1);
        map.insert(Key::Str(variant.to_string()), inner);
        Ok(Value::Object(map))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SerializeArray, ConversionError> {
        Ok(SerializeArray {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SerializeArray, ConversionError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SerializeArray, ConversionError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<SerializeVariant<SerializeArray>, ConversionError> {
        Ok(SerializeVariant {
            variant,
            inner: self.serialize_seq(Some(len))?,
        })
    }

    fn serialize_map(self, len: Option<usize>) -> Result<SerializeObject, ConversionError> {
        Ok(SerializeObject {
            map: Map::with_capacity(len.unwrap_or(0)),
            pending_key: None,
        })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SerializeObject, ConversionError> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<SerializeVariant<SerializeObject>, ConversionError> {
        Ok(SerializeVariant {
            variant,
            inner: self.serialize_map(Some(len))?,
        })
    }
}

/// Accumulates sequence and tuple elements.
pub struct SerializeArray {
    items: Vec<Value>,
}

impl SerializeArray {
    fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ConversionError> {
        let index = self.items.len();
        let item = value
            .serialize(ValueSerializer)
            .map_err(|e| e.at_index(index))?;
        self.items.push(item);
        Ok(())
    }
}

impl ser::SerializeSeq for SerializeArray {
    type Ok = Value;
    type Error = ConversionError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ConversionError> {
        self.push(value)
    }

    fn end(self) -> Result<Value, ConversionError> {
        Ok(Value::Array(self.items))
    }
}

impl ser::SerializeTuple for SerializeArray {
    type Ok = Value;
    type Error = ConversionError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ConversionError> {
        self.push(value)
    }

    fn end(self) -> Result<Value, ConversionError> {
        Ok(Value::Array(self.items))
    }
}

impl ser::SerializeTupleStruct for SerializeArray {
    type Ok = Value;
    type Error = ConversionError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ConversionError> {
        self.push(value)
    }

    fn end(self) -> Result<Value, ConversionError> {
        Ok(Value::Array(self.items))
    }
}

/// Accumulates map and struct entries.
pub struct SerializeObject {
    map: Map,
    pending_key: Option<Key>,
}

impl SerializeObject {
    fn insert<T: Serialize + ?Sized>(&mut self, key: Key, value: &T) -> Result<(), ConversionError> {
        let value = value
            .serialize(ValueSerializer)
            .map_err(|e| e.at_key(key.to_property_name()))?;
        self.map.insert(key, value);
        Ok(())
    }
}

impl ser::SerializeMap for SerializeObject {
    type Ok = Value;
    type Error = ConversionError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), ConversionError> {
        self.pending_key = Some(key.serialize(KeySerializer)?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ConversionError> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| ConversionError::invalid_key("map value serialized before its key"))?;
        self.insert(key, value)
    }

    fn end(self) -> Result<Value, ConversionError> {
        Ok(Value::Object(self.map))
    }
}

impl ser::SerializeStruct for SerializeObject {
    type Ok = Value;
    type Error = ConversionError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), ConversionError> {
        self.insert(Key::Str(key.to_string()), value)
    }

    fn end(self) -> Result<Value, ConversionError> {
        Ok(Value::Object(self.map))
    }
}

/// Wraps a tuple or struct variant as `{ variant: inner }`.
pub struct SerializeVariant<S> {
    variant: &'static str,
    inner: S,
}

impl<S> SerializeVariant<S> {
    fn wrap(variant: &'static str, inner: Value) -> Value {
        let mut map = Map::with_capacity(1);
        map.insert(Key::Str(variant.to_string()), inner);
        Value::Object(map)
    }
}

impl ser::SerializeTupleVariant for SerializeVariant<SerializeArray> {
    type Ok = Value;
    type Error = ConversionError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ConversionError> {
        let variant = self.variant;
        self.inner.push(value).map_err(|e| e.at_key(variant))
    }

    fn end(self) -> Result<Value, ConversionError> {
        Ok(Self::wrap(self.variant, Value::Array(self.inner.items)))
    }
}

impl ser::SerializeStructVariant for SerializeVariant<SerializeObject> {
    type Ok = Value;
    type Error = ConversionError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), ConversionError> {
        let variant = self.variant;
        self.inner
            .insert(Key::Str(key.to_string()), value)
            .map_err(|e| e.at_key(variant))
    }

    fn end(self) -> Result<Value, ConversionError> {
        Ok(Self::wrap(self.variant, Value::Object(self.inner.map)))
    }
}

/// Serializes map keys: strings and integers only.
struct KeySerializer;

impl KeySerializer {
    fn reject(kind: &str) -> ConversionError {
        ConversionError::invalid_key(format!("{} cannot be used as an object key", kind))
    }
}

impl ser::Serializer for KeySerializer {
    type Ok = Key;
    type Error = ConversionError;

    type SerializeSeq = Impossible<Key, ConversionError>;
    type SerializeTuple = Impossible<Key, ConversionError>;
    type SerializeTupleStruct = Impossible<Key, ConversionError>;
    type SerializeTupleVariant = Impossible<Key, ConversionError>;
    type SerializeMap = Impossible<Key, ConversionError>;
    type SerializeStruct = Impossible<Key, ConversionError>;
    type SerializeStructVariant = Impossible<Key, ConversionError>;

    fn serialize_bool(self, _v: bool) -> Result<Key, ConversionError> {
        Err(Self::reject("a boolean"))
    }

    fn serialize_i8(self, v: i8) -> Result<Key, ConversionError> {
        Ok(Key::Int(v as i64))
    }

    fn serialize_i16(self, v: i16) -> Result<Key, ConversionError> {
        Ok(Key::Int(v as i64))
    }

    fn serialize_i32(self, v: i32) -> Result<Key, ConversionError> {
        Ok(Key::Int(v as i64))
    }

    fn serialize_i64(self, v: i64) -> Result<Key, ConversionError> {
        Ok(Key::Int(v))
    }

    fn serialize_u8(self, v: u8) -> Result<Key, ConversionError> {
        Ok(Key::Int(v as i64))
    }

    fn serialize_u16(self, v: u16) -> Result<Key, ConversionError> {
        Ok(Key::Int(v as i64))
    }

    fn serialize_u32(self, v: u32) -> Result<Key, ConversionError> {
        Ok(Key::Int(v as i64))
    }

    fn serialize_u64(self, v: u64) -> Result<Key, ConversionError> {
        i64::try_from(v)
            .map(Key::Int)
            .map_err(|_| ConversionError::out_of_range(format!("key {} does not fit in i64", v)))
    }

    fn serialize_f32(self, _v: f32) -> Result<Key, ConversionError> {
        Err(Self::reject("a float"))
    }

    fn serialize_f64(self, _v: f64) -> Result<Key, ConversionError> {
        Err(Self::reject("a float"))
    }

    fn serialize_char(self, v: char) -> Result<Key, ConversionError> {
        Ok(Key::Str(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Key, ConversionError> {
        Ok(Key::Str(v.to_string()))
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<Key, ConversionError> {
        Err(Self::reject("a byte buffer"))
    }

    fn serialize_none(self) -> Result<Key, ConversionError> {
        Err(Self::reject("null"))
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Key, ConversionError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Key, ConversionError> {
        Err(Self::reject("null"))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Key, ConversionError> {
        Err(Self::reject("null"))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<Key, ConversionError> {
        Ok(Key::Str(variant.to_string()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Key, ConversionError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<Key, ConversionError> {
        Err(Self::reject("an enum variant with data"))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, ConversionError> {
        Err(Self::reject("a sequence"))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, ConversionError> {
        Err(Self::reject("a tuple"))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, ConversionError> {
        Err(Self::reject("a tuple struct"))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, ConversionError> {
        Err(Self::reject("an enum variant with data"))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, ConversionError> {
        Err(Self::reject("a map"))
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, ConversionError> {
        Err(Self::reject("a struct"))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, ConversionError> {
        Err(Self::reject("an enum variant with data"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use serde::Serialize;

    use super::*;
    use crate::error::ConversionErrorKind;

    #[test]
    fn test_scalars() {
        assert_eq!(to_value(&()).unwrap(), Value::Null);
        assert_eq!(to_value(&None::<i32>).unwrap(), Value::Null);
        assert_eq!(to_value(&true).unwrap(), Value::Bool(true));
        assert_eq!(to_value(&7u8).unwrap(), Value::Int(7));
        assert_eq!(to_value(&1.5f64).unwrap(), Value::Float(1.5));
        assert_eq!(to_value(&1.0f64).unwrap(), Value::Float(1.0));
        assert_eq!(to_value(&'x').unwrap(), Value::from("x"));
        assert_eq!(to_value("text").unwrap(), Value::from("text"));
    }

    #[test]
    fn test_tuple_lowers_to_array() {
        let value = to_value(&("string", true, 1)).unwrap();
        assert_eq!(
            value,
            Value::Array(vec![Value::from("string"), Value::Bool(true), Value::Int(1)])
        );
    }

    #[test]
    fn test_maps_and_structs_lower_to_objects() {
        #[derive(Serialize)]
        struct Point {
            x: i32,
            y: f64,
        }

        let value = to_value(&Point { x: 1, y: 2.5 }).unwrap();
        assert_eq!(value.get("x"), Some(&Value::Int(1)));
        assert_eq!(value.get("y"), Some(&Value::Float(2.5)));

        let mut numeric = BTreeMap::new();
        numeric.insert(1u32, "one");
        let value = to_value(&numeric).unwrap();
        assert_eq!(value.get(1i64), Some(&Value::from("one")));
    }

    #[test]
    fn test_enum_variants() {
        #[derive(Serialize)]
        enum Shape {
            Empty,
            Circle(f64),
            Rect { w: i32, h: i32 },
        }

        assert_eq!(to_value(&Shape::Empty).unwrap(), Value::from("Empty"));
        assert_eq!(
            to_value(&Shape::Circle(1.5)).unwrap().get("Circle"),
            Some(&Value::Float(1.5))
        );
        let rect = to_value(&Shape::Rect { w: 2, h: 3 }).unwrap();
        assert_eq!(rect.get("Rect").and_then(|r| r.get("h")), Some(&Value::Int(3)));
    }

    #[test]
    fn test_out_of_range_integer_names_path() {
        let value: HashMap<&str, Vec<u64>> = [("ids", vec![1, u64::MAX])].into_iter().collect();
        let err = to_value(&value).unwrap_err();
        assert_eq!(err.kind(), ConversionErrorKind::OutOfRange);
        assert_eq!(err.path(), "$.ids[1]");
    }

    #[test]
    fn test_bytes_rejected() {
        struct Blob;
        impl Serialize for Blob {
            fn serialize<S: ser::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_bytes(&[1, 2, 3])
            }
        }

        let err = to_value(&vec![Blob]).unwrap_err();
        assert_eq!(err.kind(), ConversionErrorKind::Unsupported);
        assert_eq!(err.path(), "$[0]");
    }

    #[test]
    fn test_composite_keys_rejected() {
        let mut map = BTreeMap::new();
        map.insert(vec![1], 1);
        let err = to_value(&map).unwrap_err();
        assert_eq!(err.kind(), ConversionErrorKind::InvalidKey);
    }

    #[test]
    fn test_value_serializes_to_json() {
        let value: Value = [("a", Value::Int(1)), ("b", Value::Float(1.0))]
            .into_iter()
            .collect();
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"{"a":1,"b":1.0}"#);
    }
}
