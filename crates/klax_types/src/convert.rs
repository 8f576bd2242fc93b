//! Conversions between [`Value`] and native Rust types.
//!
//! These traits are what `#[klax_function]` expands to: every parameter of a
//! bound function is read with [`FromValue`], the result is written back with
//! [`IntoValue`], and the declared pin types come from [`PinTyped`].

use crate::{Handle, PinType, Value};

/// Error when converting from Value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("Expected {expected}, got {actual}")]
    TypeMismatch {
        expected: PinType,
        actual: &'static str,
    },
    #[error("Integer out of range: {0}")]
    OutOfRange(i64),
}

/// Error raised by a native callable
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvokeError {
    #[error("Missing argument {0}")]
    MissingArgument(usize),
    #[error("Invalid argument {index}: {source}")]
    InvalidArgument {
        index: usize,
        #[source]
        source: ValueError,
    },
    #[error("{0}")]
    Failed(String),
}

/// Types that can be read from a script value
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, ValueError>;
}

/// Types that can be written back as a script value
pub trait IntoValue {
    fn into_value(self) -> Value;
}

/// Types with a fixed pin type
pub trait PinTyped {
    fn pin_type() -> PinType;
}

fn mismatch<T: PinTyped>(value: &Value) -> ValueError {
    ValueError::TypeMismatch {
        expected: T::pin_type(),
        actual: value.kind_name(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Primitive Implementations
// ─────────────────────────────────────────────────────────────────────────────

macro_rules! impl_native {
    ($ty:ty, $pin:expr, $read:expr) => {
        impl PinTyped for $ty {
            fn pin_type() -> PinType {
                $pin
            }
        }

        impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self, ValueError> {
                let read: fn(&Value) -> Option<$ty> = $read;
                read(value).ok_or_else(|| mismatch::<$ty>(value))
            }
        }

        impl IntoValue for $ty {
            fn into_value(self) -> Value {
                Value::from(self)
            }
        }
    };
}

impl_native!(bool, PinType::Bool, |v| v.as_bool());
impl_native!(i64, PinType::Int, |v| v.as_i64());
impl_native!(f64, PinType::Float, |v| v.as_f64());
impl_native!(f32, PinType::Float, |v| v.as_f64().map(|f| f as f32));
impl_native!(String, PinType::String, |v| v.as_str().map(str::to_string));
impl_native!(Handle, PinType::handle(""), |v| v.as_handle().cloned());

impl PinTyped for i32 {
    fn pin_type() -> PinType {
        PinType::Int
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        let wide = value.as_i64().ok_or_else(|| mismatch::<i32>(value))?;
        i32::try_from(wide).map_err(|_| ValueError::OutOfRange(wide))
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> Value {
        Value::Int(self as i64)
    }
}

impl PinTyped for Value {
    fn pin_type() -> PinType {
        PinType::Any
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        Ok(value.clone())
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl<T: PinTyped> PinTyped for Vec<T> {
    fn pin_type() -> PinType {
        PinType::array(T::pin_type())
    }
}

impl<T: FromValue + PinTyped> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        value
            .as_array()
            .ok_or_else(|| mismatch::<Vec<T>>(value))?
            .iter()
            .map(T::from_value)
            .collect()
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::Array(self.into_iter().map(IntoValue::into_value).collect())
    }
}
