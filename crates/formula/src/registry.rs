//! Static function library
//!
//! Every function a formula can name is registered here with its arity.
//! The parser resolves identifiers against this table, so an unknown name
//! or a wrong argument count is a parse error, never a runtime surprise.
//!
//! | Function | Arguments | Result |
//! |----------|-----------|--------|
//! | `PROPERTY` | object, path | value at the dotted path, or undefined |
//! | `PARTIAL` | function, args... | function with leading arguments bound |
//! | `FLIP` | function | function taking its arguments in reverse |
//! | `AGGREGATE` | list, function | union of `function(item)` over the list, first-seen order |
//! | `SUM` `MIN` `MAX` `AVERAGE` | numbers or lists... | numeric fold |
//! | `ABS` `FLOOR` `CEILING` | number | rounding and sign |
//! | `ROUND` | number, digits? | half away from zero |
//! | `COUNT` | values or lists... | number of non-null values |
//! | `UNIQUE` | list | de-duplicated list |
//! | `FLATTEN` | values or lists... | one flat list |
//! | `CONCATENATE` | values... | joined text |
//! | `UPPER` `LOWER` | text | case mapping |
//! | `LEN` | text or list | length |
//! | `IF` | condition, then, else? | branch |
//! | `AND` `OR` | values... | truthiness fold |
//! | `NOT` | value | negated truthiness |
//! | `EQ` | a, b | deep equality |
//! | `COALESCE` | values... | first non-null |
//! | `HASH` | value | SHA-256 hex digest |

use jellyfish_core::{json_equal, Error, PropertyPath, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::eval::apply;
use crate::value::{number, to_text, Callable, FormulaValue};

/// Implementation signature; arity is checked before the call
pub type BuiltinFn = fn(Vec<FormulaValue>) -> Result<FormulaValue>;

/// A library function
#[derive(Debug)]
pub struct Builtin {
    /// Upper-case name as written in formulas
    pub name: &'static str,
    /// Minimum argument count
    pub min_args: usize,
    /// Maximum argument count; `None` is variadic
    pub max_args: Option<usize>,
    func: BuiltinFn,
}

impl Builtin {
    /// Fail unless `count` arguments are acceptable
    pub fn check_arity(&self, count: usize) -> Result<()> {
        let too_many = self.max_args.map_or(false, |max| count > max);
        if count < self.min_args || too_many {
            let expected = match self.max_args {
                Some(max) if max == self.min_args => format!("{}", max),
                Some(max) => format!("{} to {}", self.min_args, max),
                None => format!("at least {}", self.min_args),
            };
            return Err(Error::invalid_expression(format!(
                "{} takes {} argument(s), got {}",
                self.name, expected, count
            )));
        }
        Ok(())
    }

    /// Invoke with arity checking
    pub fn call(&self, args: Vec<FormulaValue>) -> Result<FormulaValue> {
        self.check_arity(args.len())?;
        (self.func)(args)
    }
}

const fn builtin(name: &'static str, min_args: usize, max_args: Option<usize>, func: BuiltinFn) -> Builtin {
    Builtin {
        name,
        min_args,
        max_args,
        func,
    }
}

static BUILTINS: [Builtin; 26] = [
    builtin("ABS", 1, Some(1), abs),
    builtin("AGGREGATE", 2, Some(2), aggregate),
    builtin("AND", 1, None, and),
    builtin("AVERAGE", 1, None, average),
    builtin("CEILING", 1, Some(1), ceiling),
    builtin("COALESCE", 1, None, coalesce),
    builtin("CONCATENATE", 1, None, concatenate),
    builtin("COUNT", 1, None, count),
    builtin("EQ", 2, Some(2), eq),
    builtin("FLATTEN", 1, None, flatten),
    builtin("FLIP", 1, Some(1), flip),
    builtin("FLOOR", 1, Some(1), floor),
    builtin("HASH", 1, Some(1), hash),
    builtin("IF", 2, Some(3), if_),
    builtin("LEN", 1, Some(1), len),
    builtin("LOWER", 1, Some(1), lower),
    builtin("MAX", 1, None, max),
    builtin("MIN", 1, None, min),
    builtin("NOT", 1, Some(1), not),
    builtin("OR", 1, None, or),
    builtin("PARTIAL", 1, None, partial),
    builtin("PROPERTY", 2, Some(2), property),
    builtin("ROUND", 1, Some(2), round),
    builtin("SUM", 1, None, sum),
    builtin("UNIQUE", 1, Some(1), unique),
    builtin("UPPER", 1, Some(1), upper),
];

/// Resolve a function name (case-sensitive, upper-case)
pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS
        .binary_search_by(|builtin| builtin.name.cmp(name))
        .ok()
        .map(|index| &BUILTINS[index])
}

/// Every registered function name, sorted
pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|builtin| builtin.name)
}

// ============================================================================
// Argument helpers
// ============================================================================

fn type_error(function: &str, expected: &str) -> Error {
    Error::invalid_expression(format!("{} expects {}", function, expected))
}

fn expect_function(function: &str, value: &FormulaValue) -> Result<Callable> {
    match value {
        FormulaValue::Function(callable) => Ok(callable.clone()),
        _ => Err(type_error(function, "a function")),
    }
}

fn flatten_into(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| flatten_into(item, out)),
        other => out.push(other.clone()),
    }
}

fn flattened(args: &[FormulaValue]) -> Vec<Value> {
    let mut out = Vec::new();
    for arg in args {
        if let Some(value) = arg.as_json() {
            flatten_into(value, &mut out);
        }
    }
    out
}

fn numbers(args: &[FormulaValue]) -> Vec<f64> {
    flattened(args).iter().filter_map(Value::as_f64).collect()
}

fn push_unique(out: &mut Vec<Value>, value: Value) {
    if !out.iter().any(|seen| json_equal(seen, &value)) {
        out.push(value);
    }
}

/// Apply `f` to a single numeric argument, passing null/undefined through
fn unary_numeric(name: &str, arg: &FormulaValue, f: impl Fn(f64) -> f64) -> Result<FormulaValue> {
    if arg.is_nullish() {
        return Ok(arg.clone());
    }
    let n = arg.as_f64().ok_or_else(|| type_error(name, "a number"))?;
    Ok(number(f(n)))
}

/// Apply `f` to a single text argument, passing null/undefined through
fn unary_text(arg: &FormulaValue, f: impl Fn(&str) -> String) -> FormulaValue {
    match arg.as_json() {
        Some(Value::Null) | None => arg.clone(),
        Some(value) => FormulaValue::Json(Value::String(f(&to_text(value)))),
    }
}

// ============================================================================
// Functional
// ============================================================================

fn property(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    let path = match args[1].as_json() {
        Some(Value::String(path)) => path
            .parse::<PropertyPath>()
            .map_err(|e| Error::invalid_expression(format!("PROPERTY path '{}': {}", path, e)))?,
        _ => return Err(type_error("PROPERTY", "a text path")),
    };
    Ok(args[0]
        .as_json()
        .and_then(|object| path.get(object))
        .cloned()
        .map_or(FormulaValue::Undefined, FormulaValue::Json))
}

fn partial(mut args: Vec<FormulaValue>) -> Result<FormulaValue> {
    let function = expect_function("PARTIAL", &args[0])?;
    let bound = args.split_off(1);
    Ok(FormulaValue::Function(Callable::Partial {
        function: Box::new(function),
        bound,
    }))
}

fn flip(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    let function = expect_function("FLIP", &args[0])?;
    Ok(FormulaValue::Function(Callable::Flip(Box::new(function))))
}

fn aggregate(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    let projector = expect_function("AGGREGATE", &args[1])?;
    let items: Vec<Value> = match &args[0] {
        FormulaValue::Json(Value::Array(items)) => items.clone(),
        FormulaValue::Json(Value::Null) | FormulaValue::Undefined => Vec::new(),
        FormulaValue::Json(other) => vec![other.clone()],
        FormulaValue::Function(_) => return Err(type_error("AGGREGATE", "a list")),
    };

    let mut out = Vec::new();
    for item in items {
        match apply(&projector, vec![FormulaValue::Json(item)])? {
            FormulaValue::Json(Value::Array(projected)) => {
                for value in projected.into_iter().filter(|v| !v.is_null()) {
                    push_unique(&mut out, value);
                }
            }
            FormulaValue::Json(Value::Null) | FormulaValue::Undefined => {}
            FormulaValue::Json(value) => push_unique(&mut out, value),
            FormulaValue::Function(_) => {
                return Err(type_error("AGGREGATE", "a projector returning values"))
            }
        }
    }
    Ok(FormulaValue::Json(Value::Array(out)))
}

// ============================================================================
// Numeric
// ============================================================================

fn sum(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    Ok(number(numbers(&args).iter().sum()))
}

fn min(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    let values = numbers(&args);
    Ok(number(values.iter().copied().reduce(f64::min).unwrap_or(0.0)))
}

fn max(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    let values = numbers(&args);
    Ok(number(values.iter().copied().reduce(f64::max).unwrap_or(0.0)))
}

fn average(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    let values = numbers(&args);
    if values.is_empty() {
        return Ok(FormulaValue::null());
    }
    Ok(number(values.iter().sum::<f64>() / values.len() as f64))
}

fn abs(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    unary_numeric("ABS", &args[0], f64::abs)
}

fn floor(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    unary_numeric("FLOOR", &args[0], f64::floor)
}

fn ceiling(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    unary_numeric("CEILING", &args[0], f64::ceil)
}

fn round(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    let digits = match args.get(1) {
        None => 0,
        Some(arg) => arg
            .as_f64()
            .filter(|d| d.fract() == 0.0)
            .ok_or_else(|| type_error("ROUND", "an integer digit count"))? as i32,
    };
    let factor = 10f64.powi(digits);
    unary_numeric("ROUND", &args[0], |n| (n * factor).round() / factor)
}

fn count(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    let n = flattened(&args).iter().filter(|v| !v.is_null()).count();
    Ok(number(n as f64))
}

// ============================================================================
// Lists and text
// ============================================================================

fn unique(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    match &args[0] {
        FormulaValue::Json(Value::Array(items)) => {
            let mut out = Vec::new();
            for item in items {
                push_unique(&mut out, item.clone());
            }
            Ok(FormulaValue::Json(Value::Array(out)))
        }
        other => Ok(other.clone()),
    }
}

fn flatten(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    Ok(FormulaValue::Json(Value::Array(flattened(&args))))
}

fn concatenate(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    let text: String = args
        .iter()
        .filter_map(FormulaValue::as_json)
        .map(to_text)
        .collect();
    Ok(FormulaValue::Json(Value::String(text)))
}

fn upper(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    Ok(unary_text(&args[0], str::to_uppercase))
}

fn lower(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    Ok(unary_text(&args[0], str::to_lowercase))
}

fn len(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    let n = match &args[0] {
        FormulaValue::Json(Value::Array(items)) => items.len(),
        FormulaValue::Json(Value::String(s)) => s.chars().count(),
        FormulaValue::Json(Value::Null) | FormulaValue::Undefined => 0,
        FormulaValue::Json(other) => to_text(other).chars().count(),
        FormulaValue::Function(_) => return Err(type_error("LEN", "text or a list")),
    };
    Ok(number(n as f64))
}

// ============================================================================
// Logic
// ============================================================================

fn if_(mut args: Vec<FormulaValue>) -> Result<FormulaValue> {
    let otherwise = if args.len() == 3 {
        args.pop().unwrap_or(FormulaValue::Undefined)
    } else {
        FormulaValue::Json(Value::Bool(false))
    };
    let then = args.pop().unwrap_or(FormulaValue::Undefined);
    Ok(if args[0].truthy() { then } else { otherwise })
}

fn and(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    Ok(FormulaValue::Json(Value::Bool(args.iter().all(FormulaValue::truthy))))
}

fn or(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    Ok(FormulaValue::Json(Value::Bool(args.iter().any(FormulaValue::truthy))))
}

fn not(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    Ok(FormulaValue::Json(Value::Bool(!args[0].truthy())))
}

fn eq(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    let equal = match (&args[0], &args[1]) {
        (FormulaValue::Json(a), FormulaValue::Json(b)) => json_equal(a, b),
        (FormulaValue::Undefined, FormulaValue::Undefined) => true,
        _ => false,
    };
    Ok(FormulaValue::Json(Value::Bool(equal)))
}

fn coalesce(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    Ok(args
        .into_iter()
        .find(|arg| !arg.is_nullish())
        .unwrap_or_else(FormulaValue::null))
}

// ============================================================================
// Hashing
// ============================================================================

/// SHA-256 of text as-is, of anything else as serialized JSON
fn hash(args: Vec<FormulaValue>) -> Result<FormulaValue> {
    let bytes = match &args[0] {
        FormulaValue::Undefined => return Ok(FormulaValue::Undefined),
        FormulaValue::Json(Value::String(text)) => text.as_bytes().to_vec(),
        FormulaValue::Json(value) => serde_json::to_vec(value)?,
        FormulaValue::Function(_) => return Err(type_error("HASH", "a value")),
    };

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest: String = hasher
        .finalize()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect();
    Ok(FormulaValue::Json(Value::String(digest)))
}
