//! Integration tests for values crossing the host/engine boundary.
//!
//! Values go in through `call` on an echo function and come back out
//! through `eval`, so both directions of the marshaler are covered.

use std::collections::HashMap;
use std::time::Duration;

use kiln_core::{ConversionErrorKind, Error, Key, Map, Runtime, Value};
use serde::{Deserialize, Serialize};

const ECHO: &str = r#"
function echo(...args) {
    return args;
}
"#;

fn echo_runtime() -> Runtime {
    Runtime::new(Some(ECHO)).unwrap()
}

fn object(entries: Vec<(Key, Value)>) -> Value {
    Value::Object(entries.into_iter().collect::<Map>())
}

// =============================================================================
// eval: engine -> host
// =============================================================================

#[test]
fn test_eval_numbers() {
    let runtime = Runtime::new(None).unwrap();
    assert_eq!(runtime.eval("1", None).unwrap(), Value::Int(1));
    assert_eq!(runtime.eval("1.5", None).unwrap(), Value::Float(1.5));
    // Integral literals are stored as integers by the engine.
    assert_eq!(runtime.eval("1.0", None).unwrap(), Value::Int(1));
    assert_eq!(runtime.eval("-7", None).unwrap(), Value::Int(-7));
    assert_eq!(runtime.eval("2 ** 40", None).unwrap(), Value::Int(1 << 40));

    let nan = runtime.eval("NaN", None).unwrap();
    assert!(nan.as_f64().is_some_and(f64::is_nan));
}

#[test]
fn test_eval_null_and_undefined() {
    let runtime = Runtime::new(None).unwrap();
    assert_eq!(runtime.eval("null", None).unwrap(), Value::Null);
    assert_eq!(runtime.eval("undefined", None).unwrap(), Value::Null);
    assert_eq!(runtime.eval("var x = 1;", None).unwrap(), Value::Null);
}

#[test]
fn test_eval_strings_and_bools() {
    let runtime = Runtime::new(None).unwrap();
    assert_eq!(runtime.eval("'test'", None).unwrap(), Value::from("test"));
    assert_eq!(runtime.eval("'ünïcödé ✓'", None).unwrap(), Value::from("ünïcödé ✓"));
    assert_eq!(runtime.eval("''", None).unwrap(), Value::from(""));
    assert_eq!(runtime.eval("true", None).unwrap(), Value::Bool(true));
    assert_eq!(runtime.eval("1 > 2", None).unwrap(), Value::Bool(false));
}

#[test]
fn test_eval_arrays() {
    let runtime = Runtime::new(None).unwrap();
    assert_eq!(
        runtime.eval("[1, 'test', false]", None).unwrap(),
        Value::Array(vec![Value::Int(1), Value::from("test"), Value::Bool(false)])
    );
    assert_eq!(runtime.eval("[]", None).unwrap(), Value::Array(vec![]));
    assert_eq!(
        runtime.eval("[[1], [2, [3]]]", None).unwrap(),
        Value::Array(vec![
            Value::Array(vec![Value::Int(1)]),
            Value::Array(vec![Value::Int(2), Value::Array(vec![Value::Int(3)])]),
        ])
    );
}

#[test]
fn test_eval_objects() {
    let runtime = Runtime::new(None).unwrap();

    let value = runtime.eval("({ test: true, 1: false })", None).unwrap();
    assert_eq!(
        value,
        object(vec![
            (Key::Int(1), Value::Bool(false)),
            (Key::from("test"), Value::Bool(true)),
        ])
    );

    let nested = runtime
        .eval("({ outer: { inner: [1, { deep: null }] } })", None)
        .unwrap();
    let inner = nested.get("outer").and_then(|v| v.get("inner")).unwrap();
    assert_eq!(inner.as_array().map(<[Value]>::len), Some(2));
    assert_eq!(
        inner.as_array().unwrap()[1],
        object(vec![(Key::from("deep"), Value::Null)])
    );
}

#[test]
fn test_eval_function_result_is_conversion_error() {
    let runtime = Runtime::new(None).unwrap();
    let err = runtime.eval("({ f: function() {} })", None).unwrap_err();
    let Error::Conversion(conversion) = err else {
        panic!("expected conversion error, got {:?}", err);
    };
    assert_eq!(conversion.kind(), ConversionErrorKind::Unsupported);
    assert_eq!(conversion.path(), "$.f");
}

#[test]
fn test_eval_builtin_collections_are_unsupported() {
    let runtime = Runtime::new(None).unwrap();
    for (source, path) in [
        ("({ m: new Map([[1, 2]]) })", "$.m"),
        ("({ s: new Set([1]) })", "$.s"),
        ("[new Date(0)]", "$[0]"),
        ("({ re: /a+/ })", "$.re"),
        ("({ bytes: new Uint8Array(4) })", "$.bytes"),
    ] {
        let err = runtime.eval(source, None).unwrap_err();
        let Error::Conversion(conversion) = err else {
            panic!("expected conversion error for {}, got {:?}", source, err);
        };
        assert_eq!(conversion.kind(), ConversionErrorKind::Unsupported, "{}", source);
        assert_eq!(conversion.path(), path, "{}", source);
    }

    let bare = runtime
        .eval("var o = Object.create(null); o.k = 'v'; o", None)
        .unwrap();
    assert_eq!(bare.get("k"), Some(&Value::from("v")));
}

// =============================================================================
// call: host -> engine -> host
// =============================================================================

#[test]
fn test_call_without_args() {
    let runtime = echo_runtime();
    assert_eq!(runtime.call("echo", &[], None).unwrap(), Value::Array(vec![]));
}

#[test]
fn test_call_scalars() {
    let runtime = echo_runtime();
    let args = vec![
        Value::Int(1),
        Value::Int(-42),
        Value::Float(1.5),
        Value::Bool(true),
        Value::from("test"),
        Value::Null,
    ];
    assert_eq!(
        runtime.call("echo", &args, None).unwrap(),
        Value::Array(args.clone())
    );
}

#[test]
fn test_call_echo_keeps_integral_floats() {
    let runtime = echo_runtime();
    let args = [Value::Float(1.0), Value::Float(2.0)];
    assert_eq!(
        runtime.call("echo", &args, None).unwrap(),
        Value::Array(vec![Value::Float(1.0), Value::Float(2.0)])
    );
}

#[test]
fn test_call_negative_integer_key_is_rejected() {
    let runtime = echo_runtime();
    let arg = object(vec![(Key::Int(-1), Value::Bool(true))]);
    let err = runtime.call("echo", &[arg], None).unwrap_err();
    let Error::Conversion(conversion) = err else {
        panic!("expected conversion error, got {:?}", err);
    };
    assert_eq!(conversion.kind(), ConversionErrorKind::InvalidKey);

    // The string form is a plain property name and survives as-is.
    let arg = object(vec![(Key::from("-1"), Value::Bool(true))]);
    let result = runtime.call("echo", &[arg.clone()], None).unwrap();
    assert_eq!(result, Value::Array(vec![arg]));
}

#[test]
fn test_call_collections() {
    let runtime = echo_runtime();
    let list = Value::Array(vec![Value::Int(1), Value::from("two"), Value::Array(vec![])]);
    let obj = object(vec![
        (Key::from("test"), Value::Bool(true)),
        (Key::Int(1), Value::Bool(false)),
    ]);

    let result = runtime
        .call("echo", &[list.clone(), obj.clone()], None)
        .unwrap();
    assert_eq!(result, Value::Array(vec![list, obj]));
}

#[test]
fn test_call_unsafe_integer_is_rejected() {
    let runtime = echo_runtime();
    let err = runtime
        .call("echo", &[Value::Int(1), Value::Int(i64::MAX)], None)
        .unwrap_err();
    let Error::Conversion(conversion) = err else {
        panic!("expected conversion error, got {:?}", err);
    };
    assert_eq!(conversion.kind(), ConversionErrorKind::OutOfRange);
    assert_eq!(conversion.path(), "$[1]");
}

#[test]
fn test_call_with_timeout_completes() {
    let runtime = echo_runtime();
    let result = runtime
        .call("echo", &[Value::Int(7)], Some(Duration::from_secs(1)))
        .unwrap();
    assert_eq!(result, Value::Array(vec![Value::Int(7)]));
}

// =============================================================================
// call_as: typed host values
// =============================================================================

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Point {
    x: i64,
    y: f64,
    label: Option<String>,
}

#[test]
fn test_call_as_tuple_comes_back_as_sequence() {
    let runtime = echo_runtime();
    let result: Vec<Value> = runtime
        .call_as("echo", ((1, "test"),), None)
        .unwrap();
    assert_eq!(
        result,
        vec![Value::Array(vec![Value::Int(1), Value::from("test")])]
    );
}

#[test]
fn test_call_as_structs() {
    let runtime = Runtime::new(Some("function shift(p, dx) { p.x += dx; return p; }")).unwrap();
    let point = Point {
        x: 1,
        y: 2.5,
        label: None,
    };
    let moved: Point = runtime.call_as("shift", (point, 10), None).unwrap();
    assert_eq!(
        moved,
        Point {
            x: 11,
            y: 2.5,
            label: None
        }
    );
}

#[test]
fn test_call_as_numeric_keys_into_string_map() {
    let runtime = Runtime::new(Some("function flags() { return { 1: false, test: true }; }")).unwrap();
    let flags: HashMap<String, bool> = runtime.call_as("flags", (), None).unwrap();
    assert_eq!(flags.get("1"), Some(&false));
    assert_eq!(flags.get("test"), Some(&true));
}

#[test]
fn test_call_as_result_type_mismatch() {
    let runtime = echo_runtime();
    let err = runtime
        .call_as::<_, Vec<i64>>("echo", (1, "two"), None)
        .unwrap_err();
    let Error::Conversion(conversion) = err else {
        panic!("expected conversion error, got {:?}", err);
    };
    assert_eq!(conversion.path(), "$[1]");
}
