//! Conversion between [`Value`] and engine values.
//!
//! Both directions are depth-guarded, so cyclic or pathologically deep
//! engine structures end in a `DepthExceeded` error instead of a stack
//! overflow.
//!
//! Only ordinary objects (prototype `Object.prototype` or `null`) cross as
//! `Value::Object`. Built-in exotic objects such as `Map`, `Date` or typed
//! arrays, and instances of user classes, are rejected.

use rquickjs::{Array, Ctx, Exception, Function, Object, Type, qjs};
use thiserror::Error;

use crate::error::ConversionError;
use crate::value::{Key, MAX_SAFE_INTEGER, Map, Value};

/// Engine-side value handle.
pub type EngineValue<'js> = rquickjs::Value<'js>;

/// Default nesting limit for conversions.
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Failure while marshaling.
#[derive(Debug, Error)]
pub enum MarshalError {
    /// The value has no counterpart on the other side.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// The engine itself failed (allocation, or a getter threw).
    #[error("engine error during conversion: {0}")]
    Engine(#[from] rquickjs::Error),
}

impl MarshalError {
    fn at_index(self, index: usize) -> Self {
        match self {
            MarshalError::Conversion(e) => MarshalError::Conversion(e.at_index(index)),
            other => other,
        }
    }

    fn at_key(self, key: &str) -> Self {
        match self {
            MarshalError::Conversion(e) => MarshalError::Conversion(e.at_key(key)),
            other => other,
        }
    }
}

/// Converts values across the boundary with a fixed depth limit.
#[derive(Debug, Clone, Copy)]
pub struct Marshaler {
    max_depth: usize,
}

impl Default for Marshaler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl Marshaler {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Host value → engine value.
    pub fn to_engine<'js>(
        &self,
        ctx: &Ctx<'js>,
        value: &Value,
    ) -> Result<EngineValue<'js>, MarshalError> {
        self.to_engine_at(ctx, value, 0)
    }

    /// Engine value → host value.
    pub fn from_engine<'js>(&self, value: &EngineValue<'js>) -> Result<Value, MarshalError> {
        // A fresh object's prototype is the intrinsic, whatever the global `Object` now is.
        let object_proto = if value.is_object() {
            Object::new(value.ctx().clone())?.get_prototype()
        } else {
            None
        };
        self.from_engine_at(value, object_proto.as_ref(), 0)
    }

    fn to_engine_at<'js>(
        &self,
        ctx: &Ctx<'js>,
        value: &Value,
        depth: usize,
    ) -> Result<EngineValue<'js>, MarshalError> {
        if depth > self.max_depth {
            return Err(ConversionError::depth_exceeded(self.max_depth).into());
        }

        let converted = match value {
            Value::Null => EngineValue::new_null(ctx.clone()),
            Value::Bool(b) => EngineValue::new_bool(ctx.clone(), *b),
            Value::Int(i) => int_to_engine(ctx, *i)?,
            Value::Float(x) => float_to_engine(ctx, *x),
            Value::String(s) => rquickjs::String::from_str(ctx.clone(), s)?.into_value(),
            Value::Array(items) => {
                let array = Array::new(ctx.clone())?;
                for (index, item) in items.iter().enumerate() {
                    let element = self
                        .to_engine_at(ctx, item, depth + 1)
                        .map_err(|e| e.at_index(index))?;
                    array.set(index, element)?;
                }
                array.into_value()
            }
            Value::Object(map) => {
                let object = Object::new(ctx.clone())?;
                for (key, item) in map {
                    if !key.is_representable() {
                        return Err(ConversionError::invalid_key(format!(
                            "integer key {} is not an array index (0 to 2^32 - 2)",
                            key
                        ))
                        .into());
                    }
                    let name = key.to_property_name();
                    let property = self
                        .to_engine_at(ctx, item, depth + 1)
                        .map_err(|e| e.at_key(&name))?;
                    object.set(name.as_str(), property)?;
                }
                object.into_value()
            }
        };
        Ok(converted)
    }

    fn from_engine_at<'js>(
        &self,
        value: &EngineValue<'js>,
        object_proto: Option<&Object<'js>>,
        depth: usize,
    ) -> Result<Value, MarshalError> {
        if depth > self.max_depth {
            return Err(ConversionError::depth_exceeded(self.max_depth).into());
        }

        match value.type_of() {
            Type::Undefined | Type::Null => Ok(Value::Null),
            Type::Bool => Ok(Value::Bool(value.as_bool().unwrap_or_default())),
            Type::Int => Ok(Value::Int(value.as_int().unwrap_or_default() as i64)),
            Type::Float => Ok(float_to_value(value.as_float().unwrap_or(f64::NAN))),
            Type::String => match value.as_string() {
                Some(s) => Ok(Value::String(s.to_string()?)),
                None => Err(ConversionError::unsupported("string handle could not be read").into()),
            },
            Type::Array => match value.as_array() {
                Some(array) => self.array_from_engine(array, object_proto, depth),
                None => Err(ConversionError::unsupported("array handle could not be read").into()),
            },
            Type::Exception => match value.as_exception() {
                Some(exception) => self.exception_from_engine(exception, object_proto, depth),
                None => Err(ConversionError::unsupported("error handle could not be read").into()),
            },
            Type::Object => match value.as_object() {
                Some(object) if is_ordinary(object, object_proto) => {
                    self.object_from_engine(object, Map::new(), object_proto, depth)
                }
                Some(object) => Err(ConversionError::unsupported(format!(
                    "{} objects cannot be represented",
                    class_name(object)
                ))
                .into()),
                None => Err(ConversionError::unsupported("object handle could not be read").into()),
            },
            other => Err(ConversionError::unsupported(format!(
                "engine {:?} values cannot be represented",
                other
            ))
            .into()),
        }
    }

    fn array_from_engine<'js>(
        &self,
        array: &Array<'js>,
        object_proto: Option<&Object<'js>>,
        depth: usize,
    ) -> Result<Value, MarshalError> {
        let len = array.len();
        let mut items = Vec::with_capacity(len);
        for index in 0..len {
            let element: EngineValue<'_> = array.get(index)?;
            let item = self
                .from_engine_at(&element, object_proto, depth + 1)
                .map_err(|e| e.at_index(index))?;
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    /// Own enumerable string-keyed properties, in engine enumeration order.
    fn object_from_engine<'js>(
        &self,
        object: &Object<'js>,
        mut map: Map,
        object_proto: Option<&Object<'js>>,
        depth: usize,
    ) -> Result<Value, MarshalError> {
        for entry in object.props::<String, EngineValue<'_>>() {
            let (name, property) = entry?;
            let item = self
                .from_engine_at(&property, object_proto, depth + 1)
                .map_err(|e| e.at_key(&name))?;
            map.insert(Key::from_property_name(&name), item);
        }
        Ok(Value::Object(map))
    }

    /// Error instances keep `name`, `message` and `stack` on the prototype chain
    /// or as non-enumerable properties, so they are lifted explicitly.
    fn exception_from_engine<'js>(
        &self,
        exception: &Exception<'js>,
        object_proto: Option<&Object<'js>>,
        depth: usize,
    ) -> Result<Value, MarshalError> {
        let mut map = Map::new();
        let name: Option<String> = exception.as_object().get("name")?;
        if let Some(name) = name {
            map.insert(Key::from("name"), Value::String(name));
        }
        if let Some(message) = exception.message() {
            map.insert(Key::from("message"), Value::String(message));
        }
        if let Some(stack) = exception.stack() {
            map.insert(Key::from("stack"), Value::String(stack));
        }
        self.object_from_engine(exception.as_object(), map, object_proto, depth)
    }
}

/// Prototype is `Object.prototype` or `null`.
fn is_ordinary<'js>(object: &Object<'js>, object_proto: Option<&Object<'js>>) -> bool {
    match object.get_prototype() {
        None => true,
        Some(proto) => object_proto.is_some_and(|intrinsic| proto.as_value() == intrinsic.as_value()),
    }
}

/// Constructor name for diagnostics (`Map`, `Date`, a class name).
fn class_name(object: &Object<'_>) -> String {
    object
        .get_prototype()
        .and_then(|proto| proto.get::<_, Option<Function<'_>>>("constructor").ok().flatten())
        .and_then(|constructor| constructor.get::<_, Option<String>>("name").ok().flatten())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "exotic".to_string())
}

fn int_to_engine<'js>(ctx: &Ctx<'js>, i: i64) -> Result<EngineValue<'js>, MarshalError> {
    if let Ok(small) = i32::try_from(i) {
        return Ok(EngineValue::new_int(ctx.clone(), small));
    }
    if i.unsigned_abs() <= MAX_SAFE_INTEGER as u64 {
        return Ok(EngineValue::new_float(ctx.clone(), i as f64));
    }
    Err(ConversionError::out_of_range(format!(
        "integer {} is outside the engine's exact integer range (±{})",
        i, MAX_SAFE_INTEGER
    ))
    .into())
}

/// Always float-tagged: `new_float` would retag int32-valued doubles such as
/// `1.0` as ints.
fn float_to_engine<'js>(ctx: &Ctx<'js>, x: f64) -> EngineValue<'js> {
    // SAFETY: float values carry no reference count and belong to no runtime.
    unsafe { EngineValue::from_raw(ctx.clone(), qjs::__JS_NewFloat64(x)) }
}

/// Float-tagged engine numbers stay `Float`, except integral values beyond
/// the engine's small-integer tag that are still exact.
fn float_to_value(x: f64) -> Value {
    let beyond_small_int = x < i32::MIN as f64 || x > i32::MAX as f64;
    if x.fract() == 0.0 && beyond_small_int && x.abs() <= MAX_SAFE_INTEGER as f64 {
        Value::Int(x as i64)
    } else {
        Value::Float(x)
    }
}

#[cfg(test)]
mod tests {
    use rquickjs::{Context, Runtime};

    use super::*;
    use crate::error::ConversionErrorKind;

    fn with_ctx<R: Send>(f: impl for<'js> FnOnce(Ctx<'js>) -> R + Send) -> R {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(f)
    }

    fn eval(source: &str) -> Result<Value, MarshalError> {
        with_ctx(|ctx| {
            let value: EngineValue<'_> = ctx.eval(source).unwrap();
            Marshaler::default().from_engine(&value)
        })
    }

    fn round_trip(value: &Value) -> Value {
        with_ctx(|ctx| {
            let marshaler = Marshaler::default();
            let engine = marshaler.to_engine(&ctx, value).unwrap();
            marshaler.from_engine(&engine).unwrap()
        })
    }

    #[test]
    fn test_round_trip() {
        let mut object = Map::new();
        object.insert(Key::from("flag"), Value::Bool(true));
        object.insert(Key::Int(3), Value::from(vec![Value::Int(1), Value::Float(2.5)]));
        object.insert(Key::from("nested"), Value::from(vec![Value::Null]));

        let values = [
            Value::Null,
            Value::Bool(false),
            Value::Int(0),
            Value::Int(-7),
            Value::Int(i32::MAX as i64 + 1),
            Value::Int(MAX_SAFE_INTEGER),
            Value::Int(-MAX_SAFE_INTEGER),
            Value::Float(1.5),
            Value::Float(1.0),
            Value::Float(2.0),
            Value::Float(-0.25),
            Value::from("héllo"),
            Value::from(""),
            Value::Array(vec![]),
            Value::Object(Map::new()),
            Value::Object(object),
        ];

        for value in &values {
            assert_eq!(&round_trip(value), value, "round trip of {}", value);
        }
    }

    #[test]
    fn test_number_tags() {
        assert_eq!(eval("1").unwrap(), Value::Int(1));
        assert_eq!(eval("1.5").unwrap(), Value::Float(1.5));
        // The engine stores integral number literals as int32.
        assert_eq!(eval("1.0").unwrap(), Value::Int(1));
        assert_eq!(eval("2 ** 40").unwrap(), Value::Int(1 << 40));
        assert_eq!(eval("0.1 + 0.2").unwrap(), Value::Float(0.1 + 0.2));
        assert!(matches!(eval("NaN").unwrap(), Value::Float(x) if x.is_nan()));
        assert_eq!(eval("2 ** 60").unwrap(), Value::Float(2f64.powi(60)));
    }

    #[test]
    fn test_null_and_undefined_unify() {
        assert_eq!(eval("null").unwrap(), Value::Null);
        assert_eq!(eval("undefined").unwrap(), Value::Null);
        assert_eq!(
            eval("[undefined, null]").unwrap(),
            Value::from(vec![Value::Null, Value::Null])
        );
    }

    #[test]
    fn test_array_detected_by_engine_type() {
        let value = eval("({length: 1, 0: 'x'})").unwrap();
        assert!(value.as_object().is_some());

        let value = eval("[1, [2, 3], {object: true}]").unwrap();
        assert_eq!(
            value,
            Value::from(vec![
                Value::Int(1),
                Value::from(vec![Value::Int(2), Value::Int(3)]),
                [("object", true)].into_iter().collect(),
            ])
        );
    }

    #[test]
    fn test_numeric_keys() {
        let value = eval("({1: false, test: true})").unwrap();
        let mut expected = Map::new();
        expected.insert(Key::Int(1), Value::Bool(false));
        expected.insert(Key::from("test"), Value::Bool(true));
        assert_eq!(value, Value::Object(expected));

        let value = eval("({'01': 1, '-1': 2, '1.5': 3})").unwrap();
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert!(keys.iter().all(|k| matches!(k, Key::Str(_))));
    }

    #[test]
    fn test_functions_rejected_with_path() {
        let err = eval("({handlers: [1, function() {}]})").unwrap_err();
        let MarshalError::Conversion(err) = err else {
            panic!("expected conversion error");
        };
        assert_eq!(err.kind(), ConversionErrorKind::Unsupported);
        assert_eq!(err.path(), "$.handlers[1]");
    }

    #[test]
    fn test_symbols_rejected() {
        assert!(matches!(
            eval("Symbol('s')"),
            Err(MarshalError::Conversion(_))
        ));
    }

    #[test]
    fn test_cycle_hits_depth_limit() {
        let err = eval("var a = {}; a.self = a; a").unwrap_err();
        let MarshalError::Conversion(err) = err else {
            panic!("expected conversion error");
        };
        assert_eq!(err.kind(), ConversionErrorKind::DepthExceeded);
    }

    #[test]
    fn test_deep_host_value_rejected() {
        let mut value = Value::Null;
        for _ in 0..10 {
            value = Value::from(vec![value]);
        }
        with_ctx(|ctx| {
            let err = Marshaler::new(4).to_engine(&ctx, &value).unwrap_err();
            let MarshalError::Conversion(err) = err else {
                panic!("expected conversion error");
            };
            assert_eq!(err.kind(), ConversionErrorKind::DepthExceeded);
            assert_eq!(err.path(), "$[0][0][0][0][0]");
        });
    }

    #[test]
    fn test_unsafe_integer_rejected() {
        with_ctx(|ctx| {
            let err = Marshaler::default()
                .to_engine(&ctx, &Value::Int(i64::MAX))
                .unwrap_err();
            let MarshalError::Conversion(err) = err else {
                panic!("expected conversion error");
            };
            assert_eq!(err.kind(), ConversionErrorKind::OutOfRange);
        });
    }

    #[test]
    fn test_integral_floats_keep_float_tag() {
        for x in [1.0, 2.0, 0.0, -3.0] {
            assert_eq!(round_trip(&Value::Float(x)), Value::Float(x));
        }
        with_ctx(|ctx| {
            let engine = Marshaler::default()
                .to_engine(&ctx, &Value::Float(1.0))
                .unwrap();
            assert_eq!(engine.type_of(), Type::Float);
        });
    }

    #[test]
    fn test_exotic_objects_rejected() {
        let cases = [
            ("new Map([[1, 2]])", "Map"),
            ("new Set([1, 2])", "Set"),
            ("new Date(0)", "Date"),
            ("/re/g", "RegExp"),
            ("new Uint8Array([1, 2])", "Uint8Array"),
            ("new ArrayBuffer(8)", "ArrayBuffer"),
            ("new WeakMap()", "WeakMap"),
            ("new (class Point { constructor() { this.x = 1; } })()", "Point"),
        ];
        for (source, class) in cases {
            let err = eval(source).unwrap_err();
            let MarshalError::Conversion(err) = err else {
                panic!("expected conversion error for {}", source);
            };
            assert_eq!(err.kind(), ConversionErrorKind::Unsupported, "{}", source);
            assert!(err.message().contains(class), "{}: {}", source, err.message());
        }
    }

    #[test]
    fn test_exotic_object_path() {
        let err = eval("({ when: [new Date(0)] })").unwrap_err();
        let MarshalError::Conversion(err) = err else {
            panic!("expected conversion error");
        };
        assert_eq!(err.path(), "$.when[0]");
    }

    #[test]
    fn test_ordinary_objects_accepted() {
        let value = eval("var o = Object.create(null); o.a = 1; o").unwrap();
        assert_eq!(value.get("a"), Some(&Value::Int(1)));

        // Shadowing the global does not change what counts as ordinary.
        let value = eval("var Object = function() {}; ({ b: 2 })").unwrap();
        assert_eq!(value.get("b"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_non_index_integer_keys_rejected() {
        for key in [-1, 4_294_967_295] {
            let mut map = Map::new();
            map.insert(Key::Int(key), Value::Bool(true));
            with_ctx(|ctx| {
                let err = Marshaler::default()
                    .to_engine(&ctx, &Value::Object(map))
                    .unwrap_err();
                let MarshalError::Conversion(err) = err else {
                    panic!("expected conversion error");
                };
                assert_eq!(err.kind(), ConversionErrorKind::InvalidKey);
            });
        }
    }

    #[test]
    fn test_error_objects_lifted() {
        let value = eval("var e = new TypeError('bad'); e.code = 7; e").unwrap();
        assert_eq!(value.get("name"), Some(&Value::from("TypeError")));
        assert_eq!(value.get("message"), Some(&Value::from("bad")));
        assert_eq!(value.get("code"), Some(&Value::Int(7)));
    }
}
