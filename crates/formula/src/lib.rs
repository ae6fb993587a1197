//! Formula evaluator for Jellyfish
//!
//! A small expression language used to compute derived card properties and
//! custom query orderings:
//! - lexer / parser: source text to [`ast::Expr`], rejecting unknown names
//! - registry: the fixed function library (`AGGREGATE`, `PROPERTY`, `HASH`, ...)
//! - eval: a tree-walking interpreter over JSON plus function values
//! - object: `$$formula` properties declared in type schemas
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//!
//! let mentions = jellyfish_formula::evaluate(
//!     "AGGREGATE(input, PARTIAL(FLIP(PROPERTY), 'mentions'))",
//!     &json!([{ "mentions": ["a", "b"] }, { "mentions": ["b", "c"] }]),
//!     &json!(null),
//! )
//! .unwrap();
//! assert_eq!(mentions, json!(["a", "b", "c"]));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod registry;
pub mod value;

use jellyfish_core::{Error, Result};
use serde_json::Value;

pub use eval::Scope;
pub use object::{evaluate_object, formula_properties, FormulaProperty, FORMULA_KEYWORD};
pub use value::{Callable, FormulaValue};

/// A parsed, reusable formula
#[derive(Debug, Clone)]
pub struct Formula {
    source: String,
    expr: ast::Expr,
}

impl Formula {
    /// Parse an expression
    pub fn parse(source: &str) -> Result<Self> {
        Ok(Formula {
            source: source.to_string(),
            expr: parser::parse(source)?,
        })
    }

    /// Expression source
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with `input` and `this` bound.
    ///
    /// A `null` input means the formula is not computable yet and yields
    /// `null`. A result of undefined or a bare function is an error.
    pub fn evaluate(&self, input: &Value, context: &Value) -> Result<Value> {
        if input.is_null() {
            return Ok(Value::Null);
        }
        let scope = Scope {
            input,
            this: context,
        };
        match eval::eval(&self.expr, scope)? {
            FormulaValue::Json(value) => Ok(value),
            FormulaValue::Undefined => Err(Error::invalid_expression(format!(
                "'{}' evaluated to undefined",
                self.source
            ))),
            FormulaValue::Function(callable) => Err(Error::invalid_expression(format!(
                "'{}' evaluated to the function {}",
                self.source,
                callable.describe()
            ))),
        }
    }
}

/// Parse and evaluate in one step
pub fn evaluate(expression: &str, input: &Value, context: &Value) -> Result<Value> {
    Formula::parse(expression)?.evaluate(input, context)
}
