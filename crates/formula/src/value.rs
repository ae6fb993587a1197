//! Runtime values of the formula interpreter
//!
//! Formulas compute over JSON, plus two values JSON cannot express:
//! function values (so library functions can be passed to `AGGREGATE`,
//! `PARTIAL` and `FLIP`) and `Undefined`, the result of reading something
//! that is not there. `Undefined` is distinct from `null`: a formula may
//! legitimately produce `null`, but a top-level `Undefined` is an error.

use serde_json::{Number, Value};

use crate::registry::Builtin;

/// A value produced during evaluation
#[derive(Debug, Clone)]
pub enum FormulaValue {
    /// Plain JSON
    Json(Value),
    /// A callable
    Function(Callable),
    /// Missing property or uncomputable result
    Undefined,
}

/// A function value
#[derive(Debug, Clone)]
pub enum Callable {
    /// Library function
    Builtin(&'static Builtin),
    /// `PARTIAL(function, bound...)`: `bound` is prepended to the call's arguments
    Partial {
        /// Wrapped function
        function: Box<Callable>,
        /// Leading arguments
        bound: Vec<FormulaValue>,
    },
    /// `FLIP(function)`: arguments are passed in reverse order
    Flip(Box<Callable>),
}

impl Callable {
    /// Name for error messages
    pub fn describe(&self) -> String {
        match self {
            Callable::Builtin(builtin) => builtin.name.to_string(),
            Callable::Partial { function, .. } => format!("PARTIAL({})", function.describe()),
            Callable::Flip(function) => format!("FLIP({})", function.describe()),
        }
    }
}

impl FormulaValue {
    /// JSON `null`
    pub fn null() -> Self {
        FormulaValue::Json(Value::Null)
    }

    /// The JSON payload, if this is plain JSON
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            FormulaValue::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Numeric payload
    pub fn as_f64(&self) -> Option<f64> {
        self.as_json().and_then(Value::as_f64)
    }

    /// Whether the value is `null` or `Undefined`
    pub fn is_nullish(&self) -> bool {
        matches!(self, FormulaValue::Undefined | FormulaValue::Json(Value::Null))
    }

    /// Spreadsheet-style truthiness: `null`, `false`, `0`, `""` and
    /// `Undefined` are false
    pub fn truthy(&self) -> bool {
        match self {
            FormulaValue::Undefined => false,
            FormulaValue::Function(_) => true,
            FormulaValue::Json(value) => match value {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
                Value::String(s) => !s.is_empty(),
                Value::Array(_) | Value::Object(_) => true,
            },
        }
    }
}

impl From<Value> for FormulaValue {
    fn from(value: Value) -> Self {
        FormulaValue::Json(value)
    }
}

/// Wrap an `f64`, collapsing integral values to JSON integers.
///
/// Non-finite results (division by zero) are `Undefined`.
pub fn number(n: f64) -> FormulaValue {
    if !n.is_finite() {
        return FormulaValue::Undefined;
    }
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        return FormulaValue::Json(Value::from(n as i64));
    }
    Number::from_f64(n).map_or(FormulaValue::Undefined, |n| FormulaValue::Json(Value::Number(n)))
}

/// Text form used by `&`, `CONCATENATE`, `UPPER` and friends
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
