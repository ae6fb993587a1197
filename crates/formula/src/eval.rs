//! Tree-walking evaluator

use std::cmp::Ordering;

use jellyfish_core::{compare_json, json_equal, Error, Result};
use serde_json::Value;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::value::{number, to_text, Callable, FormulaValue};

/// Bindings visible to an expression
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    /// Bound to `input`
    pub input: &'a Value,
    /// Bound to `this`
    pub this: &'a Value,
}

/// Call a function value
pub fn apply(callable: &Callable, mut args: Vec<FormulaValue>) -> Result<FormulaValue> {
    match callable {
        Callable::Builtin(builtin) => builtin.call(args),
        Callable::Partial { function, bound } => {
            let mut full = bound.clone();
            full.append(&mut args);
            apply(function, full)
        }
        Callable::Flip(function) => {
            args.reverse();
            apply(function, args)
        }
    }
}

/// Evaluate an expression tree
pub fn eval(expr: &Expr, scope: Scope<'_>) -> Result<FormulaValue> {
    match expr {
        Expr::Literal(value) => Ok(FormulaValue::Json(value.clone())),
        Expr::Input => Ok(FormulaValue::Json(scope.input.clone())),
        Expr::This => Ok(FormulaValue::Json(scope.this.clone())),
        Expr::Function(builtin) => Ok(FormulaValue::Function(Callable::Builtin(*builtin))),
        Expr::Call { function, args } => function.call(eval_all(args, scope)?),
        Expr::Apply { callee, args } => match eval(callee, scope)? {
            FormulaValue::Function(callable) => apply(&callable, eval_all(args, scope)?),
            _ => Err(Error::invalid_expression("called a value that is not a function")),
        },
        Expr::Member { object, key } => {
            let object = eval(object, scope)?;
            Ok(member(&object, key))
        }
        Expr::Index { object, index } => {
            let object = eval(object, scope)?;
            match eval(index, scope)? {
                FormulaValue::Json(Value::String(key)) => Ok(member(&object, &key)),
                FormulaValue::Json(Value::Number(n)) => Ok(element(&object, n.as_f64())),
                FormulaValue::Undefined => Ok(FormulaValue::Undefined),
                _ => Err(Error::invalid_expression("index must be text or a number")),
            }
        }
        Expr::Unary { op: UnaryOp::Neg, operand } => match eval(operand, scope)? {
            value if value.is_nullish() => Ok(value),
            value => {
                let n = value
                    .as_f64()
                    .ok_or_else(|| Error::invalid_expression("unary '-' expects a number"))?;
                Ok(number(-n))
            }
        },
        Expr::Binary { op, left, right } => {
            let left = eval(left, scope)?;
            let right = eval(right, scope)?;
            binary(*op, left, right)
        }
    }
}

fn eval_all(args: &[Expr], scope: Scope<'_>) -> Result<Vec<FormulaValue>> {
    args.iter().map(|arg| eval(arg, scope)).collect()
}

fn member(object: &FormulaValue, key: &str) -> FormulaValue {
    object
        .as_json()
        .and_then(Value::as_object)
        .and_then(|map| map.get(key))
        .cloned()
        .map_or(FormulaValue::Undefined, FormulaValue::Json)
}

fn element(object: &FormulaValue, index: Option<f64>) -> FormulaValue {
    let Some(index) = index.filter(|i| *i >= 0.0 && i.fract() == 0.0) else {
        return FormulaValue::Undefined;
    };
    object
        .as_json()
        .and_then(Value::as_array)
        .and_then(|items| items.get(index as usize))
        .cloned()
        .map_or(FormulaValue::Undefined, FormulaValue::Json)
}

fn binary(op: BinaryOp, left: FormulaValue, right: FormulaValue) -> Result<FormulaValue> {
    let (left, right) = match (left, right) {
        (FormulaValue::Json(left), FormulaValue::Json(right)) => (left, right),
        (FormulaValue::Function(_), _) | (_, FormulaValue::Function(_)) => {
            return Err(Error::invalid_expression(format!(
                "operator '{}' cannot take a function",
                op.symbol()
            )));
        }
        _ => return Ok(FormulaValue::Undefined),
    };

    let boolean = |b: bool| -> Result<FormulaValue> { Ok(FormulaValue::Json(Value::Bool(b))) };
    let ordering = || compare_json(Some(&left), Some(&right));

    match op {
        BinaryOp::Eq => boolean(json_equal(&left, &right)),
        BinaryOp::Ne => boolean(!json_equal(&left, &right)),
        BinaryOp::Lt => boolean(ordering() == Ordering::Less),
        BinaryOp::Le => boolean(ordering() != Ordering::Greater),
        BinaryOp::Gt => boolean(ordering() == Ordering::Greater),
        BinaryOp::Ge => boolean(ordering() != Ordering::Less),
        BinaryOp::Concat => Ok(FormulaValue::Json(Value::String(
            to_text(&left) + &to_text(&right),
        ))),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            if left.is_null() || right.is_null() {
                return Ok(FormulaValue::null());
            }
            let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
                return Err(Error::invalid_expression(format!(
                    "operator '{}' expects numbers",
                    op.symbol()
                )));
            };
            Ok(number(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                _ => a / b,
            }))
        }
    }
}
