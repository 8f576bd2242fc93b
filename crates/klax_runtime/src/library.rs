//! Built-in native functions
//!
//! Registers the standard library (math, logic, strings, arrays and logging)
//! available to every script.

use klax_types::{InvokeError, Value};

use crate::klax_function;
use crate::registry::FunctionRegistry;

/// Register all built-in functions
pub fn register_builtins(registry: &mut FunctionRegistry) {
    register_math(registry);
    register_logic(registry);
    register_strings(registry);
    register_arrays(registry);
    register_debug(registry);

    tracing::debug!("Registered {} built-in functions", registry.len());
}

// ─────────────────────────────────────────────────────────────────────────────
// Math
// ─────────────────────────────────────────────────────────────────────────────

fn register_math(registry: &mut FunctionRegistry) {
    register_add_int(registry);
    register_subtract_int(registry);
    register_multiply_int(registry);
    register_divide_int(registry);
    register_modulo_int(registry);
    register_add_float(registry);
    register_subtract_float(registry);
    register_multiply_float(registry);
    register_divide_float(registry);
    register_min_int(registry);
    register_max_int(registry);
    register_clamp_float(registry);
    register_abs_float(registry);
    register_sqrt(registry);
    register_to_float(registry);
    register_equal(registry);
    register_less_int(registry);
    register_greater_int(registry);
    register_less_float(registry);
    register_greater_float(registry);
}

/// Add two integers
#[klax_function(key = "math/add_int", category = "Math", name = "Add (Int)", pure = true)]
fn add_int(a: i64, b: i64) -> i64 {
    a.wrapping_add(b)
}

/// Subtract B from A
#[klax_function(key = "math/subtract_int", category = "Math", name = "Subtract (Int)", pure = true)]
fn subtract_int(a: i64, b: i64) -> i64 {
    a.wrapping_sub(b)
}

#[klax_function(key = "math/multiply_int", category = "Math", name = "Multiply (Int)", pure = true)]
fn multiply_int(a: i64, b: i64) -> i64 {
    a.wrapping_mul(b)
}

/// Integer division, truncating toward zero
#[klax_function(key = "math/divide_int", category = "Math", name = "Divide (Int)", pure = true)]
fn divide_int(a: i64, b: i64) -> Result<i64, InvokeError> {
    a.checked_div(b)
        .ok_or_else(|| InvokeError::Failed(format!("cannot divide {a} by {b}")))
}

#[klax_function(key = "math/modulo_int", category = "Math", name = "Modulo (Int)", pure = true)]
fn modulo_int(a: i64, b: i64) -> Result<i64, InvokeError> {
    a.checked_rem(b)
        .ok_or_else(|| InvokeError::Failed(format!("cannot take {a} modulo {b}")))
}

/// Add two numbers
#[klax_function(key = "math/add_float", category = "Math", name = "Add", pure = true)]
fn add_float(a: f64, b: f64) -> f64 {
    a + b
}

#[klax_function(key = "math/subtract_float", category = "Math", name = "Subtract", pure = true)]
fn subtract_float(a: f64, b: f64) -> f64 {
    a - b
}

#[klax_function(key = "math/multiply_float", category = "Math", name = "Multiply", pure = true)]
fn multiply_float(a: f64, b: f64) -> f64 {
    a * b
}

/// Divide A by B; dividing by zero yields infinity or NaN
#[klax_function(key = "math/divide_float", category = "Math", name = "Divide", pure = true)]
fn divide_float(a: f64, b: f64) -> f64 {
    a / b
}

#[klax_function(key = "math/min_int", category = "Math", name = "Min (Int)", pure = true)]
fn min_int(a: i64, b: i64) -> i64 {
    a.min(b)
}

#[klax_function(key = "math/max_int", category = "Math", name = "Max (Int)", pure = true)]
fn max_int(a: i64, b: i64) -> i64 {
    a.max(b)
}

/// Clamp a value between Min and Max
#[klax_function(key = "math/clamp_float", category = "Math", name = "Clamp", pure = true)]
fn clamp_float(value: f64, min: f64, max: f64) -> f64 {
    // also catches NaN bounds
    if !(min <= max) {
        return value;
    }
    value.clamp(min, max)
}

#[klax_function(key = "math/abs_float", category = "Math", name = "Abs", pure = true)]
fn abs_float(value: f64) -> f64 {
    value.abs()
}

#[klax_function(key = "math/sqrt", category = "Math", name = "Square Root", pure = true)]
fn sqrt(value: f64) -> f64 {
    value.sqrt()
}

#[klax_function(key = "math/to_float", category = "Math", name = "To Float", pure = true)]
fn to_float(value: i64) -> f64 {
    value as f64
}

/// Compare two values; numbers compare by value across Int and Float
#[klax_function(key = "math/equal", category = "Math", name = "Equal", pure = true)]
fn equal(a: Value, b: Value) -> bool {
    match (&a, &b) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => a.as_f64() == b.as_f64(),
        _ => a == b,
    }
}

#[klax_function(key = "math/less_int", category = "Math", name = "Less (Int)", pure = true)]
fn less_int(a: i64, b: i64) -> bool {
    a < b
}

#[klax_function(key = "math/greater_int", category = "Math", name = "Greater (Int)", pure = true)]
fn greater_int(a: i64, b: i64) -> bool {
    a > b
}

#[klax_function(key = "math/less_float", category = "Math", name = "Less", pure = true)]
fn less_float(a: f64, b: f64) -> bool {
    a < b
}

#[klax_function(key = "math/greater_float", category = "Math", name = "Greater", pure = true)]
fn greater_float(a: f64, b: f64) -> bool {
    a > b
}

// ─────────────────────────────────────────────────────────────────────────────
// Logic
// ─────────────────────────────────────────────────────────────────────────────

fn register_logic(registry: &mut FunctionRegistry) {
    register_and_bool(registry);
    register_or_bool(registry);
    register_xor_bool(registry);
    register_not_bool(registry);
}

#[klax_function(key = "logic/and", category = "Logic", name = "And", pure = true)]
fn and_bool(a: bool, b: bool) -> bool {
    a && b
}

#[klax_function(key = "logic/or", category = "Logic", name = "Or", pure = true)]
fn or_bool(a: bool, b: bool) -> bool {
    a || b
}

#[klax_function(key = "logic/xor", category = "Logic", name = "Xor", pure = true)]
fn xor_bool(a: bool, b: bool) -> bool {
    a ^ b
}

#[klax_function(key = "logic/not", category = "Logic", name = "Not", pure = true)]
fn not_bool(value: bool) -> bool {
    !value
}

// ─────────────────────────────────────────────────────────────────────────────
// Strings
// ─────────────────────────────────────────────────────────────────────────────

fn register_strings(registry: &mut FunctionRegistry) {
    register_concat(registry);
    register_string_length(registry);
    register_string_contains(registry);
    register_to_upper(registry);
    register_to_lower(registry);
    register_to_string(registry);
    register_split(registry);
}

#[klax_function(key = "string/concat", category = "String", name = "Concat", pure = true)]
fn concat(a: String, b: String) -> String {
    a + &b
}

/// Length in characters
#[klax_function(key = "string/length", category = "String", name = "Length", pure = true)]
fn string_length(text: String) -> i64 {
    text.chars().count() as i64
}

#[klax_function(key = "string/contains", category = "String", name = "Contains", pure = true)]
fn string_contains(text: String, pattern: String) -> bool {
    text.contains(&pattern)
}

#[klax_function(key = "string/to_upper", category = "String", name = "To Upper", pure = true)]
fn to_upper(text: String) -> String {
    text.to_uppercase()
}

#[klax_function(key = "string/to_lower", category = "String", name = "To Lower", pure = true)]
fn to_lower(text: String) -> String {
    text.to_lowercase()
}

/// Display form of any value
#[klax_function(key = "string/to_string", category = "String", name = "To String", pure = true)]
fn to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[klax_function(key = "string/split", category = "String", name = "Split", pure = true)]
fn split(text: String, separator: String) -> Vec<String> {
    if separator.is_empty() {
        return vec![text];
    }
    text.split(separator.as_str()).map(str::to_string).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Arrays
// ─────────────────────────────────────────────────────────────────────────────

fn register_arrays(registry: &mut FunctionRegistry) {
    register_array_length(registry);
    register_array_get(registry);
    register_array_push(registry);
    register_array_contains(registry);
    register_array_range(registry);
}

#[klax_function(key = "array/length", category = "Array", name = "Length", pure = true)]
fn array_length(array: Vec<Value>) -> i64 {
    array.len() as i64
}

/// Element at Index, or Valid = false when out of range
#[klax_function(
    key = "array/get",
    category = "Array",
    name = "Get",
    pure = true,
    outputs = "Item, Valid"
)]
fn array_get(array: Vec<Value>, index: i64) -> (Value, bool) {
    match usize::try_from(index).ok().and_then(|i| array.get(i)) {
        Some(item) => (item.clone(), true),
        None => (Value::Null, false),
    }
}

/// Copy of the array with Item appended
#[klax_function(key = "array/push", category = "Array", name = "Push", pure = true)]
fn array_push(array: Vec<Value>, item: Value) -> Vec<Value> {
    let mut array = array;
    array.push(item);
    array
}

#[klax_function(key = "array/contains", category = "Array", name = "Contains", pure = true)]
fn array_contains(array: Vec<Value>, item: Value) -> bool {
    array.iter().any(|v| equal(v.clone(), item.clone()))
}

/// Integers from First to Last inclusive
#[klax_function(key = "array/range", category = "Array", name = "Range", pure = true)]
fn array_range(first: i64, last: i64) -> Result<Vec<i64>, InvokeError> {
    const MAX_RANGE: i64 = 1 << 20;
    if last.saturating_sub(first) >= MAX_RANGE {
        return Err(InvokeError::Failed(format!(
            "range {first}..={last} is longer than {MAX_RANGE}"
        )));
    }
    Ok((first..=last).collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Debug
// ─────────────────────────────────────────────────────────────────────────────

fn register_debug(registry: &mut FunctionRegistry) {
    register_print(registry);
}

/// Log a message; Level is one of error, warn, debug or info
#[klax_function(key = "debug/print", category = "Debug", name = "Print")]
fn print(message: Value, level: String) {
    match level.as_str() {
        "error" => tracing::error!(target: "klax", "{}", message),
        "warn" => tracing::warn!(target: "klax", "{}", message),
        "debug" => tracing::debug!(target: "klax", "{}", message),
        _ => tracing::info!(target: "klax", "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use klax_types::PinType;

    fn call(registry: &FunctionRegistry, key: &str, inputs: &[Value]) -> Vec<Value> {
        let mut outputs = Vec::new();
        registry.invoke(key, inputs, &mut outputs).unwrap();
        outputs
    }

    #[test]
    fn test_generated_signatures() {
        let info = add_int_info();
        assert_eq!(info.key, "math/add_int");
        assert_eq!(info.description.as_deref(), Some("Add two integers"));
        assert!(info.pure);
        assert_eq!(info.inputs[0].name, "A");
        assert_eq!(info.outputs[0].name, "Result");
        assert_eq!(info.outputs[0].pin_type, PinType::Int);

        let get = array_get_info();
        assert_eq!(get.outputs.len(), 2);
        assert_eq!(get.outputs[1].name, "Valid");
        assert_eq!(get.inputs[0].pin_type, PinType::array(PinType::Any));

        let print = print_info();
        assert!(!print.pure);
        assert!(print.outputs.is_empty());
    }

    #[test]
    fn test_builtins_run() {
        let registry = FunctionRegistry::with_builtins();
        assert_eq!(call(&registry, "math/add_int", &[Value::Int(3), Value::Int(4)]), vec![Value::Int(7)]);
        assert_eq!(
            call(&registry, "math/equal", &[Value::Int(2), Value::Float(2.0)]),
            vec![Value::Bool(true)]
        );
        assert_eq!(
            call(&registry, "string/concat", &[Value::from("ab"), Value::from("cd")]),
            vec![Value::from("abcd")]
        );
        assert_eq!(
            call(&registry, "array/get", &[Value::from(vec![1_i64, 2]), Value::Int(5)]),
            vec![Value::Null, Value::Bool(false)]
        );
        assert!(registry.categories().contains(&"Math".to_string()));
    }

    #[test]
    fn test_failures_surface_as_native_errors() {
        let registry = FunctionRegistry::with_builtins();
        let mut outputs = Vec::new();
        let err = registry
            .invoke("math/divide_int", &[Value::Int(1), Value::Int(0)], &mut outputs)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::ScriptError::NativeCall { ref key, source: InvokeError::Failed(_) } if key == "math/divide_int"
        ));

        let err = registry
            .invoke("math/add_int", &[Value::from("one"), Value::Int(0)], &mut outputs)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::ScriptError::NativeCall {
                source: InvokeError::InvalidArgument { index: 0, .. },
                ..
            }
        ));
    }
}
