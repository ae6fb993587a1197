//! Computed properties declared in type schemas
//!
//! A property schema carrying a `$$formula` string is derived on write:
//!
//! ```json
//! { "properties": { "data": { "properties": {
//!     "mentions": { "$$formula": "AGGREGATE(input.events, PARTIAL(FLIP(PROPERTY), 'mentions'))" }
//! } } } }
//! ```
//!
//! Each formula sees the object holding the property as `input` and the
//! whole document as `this`. Formulas run depth first in key order, so a
//! later formula observes the results of earlier ones. A `null` result
//! leaves the property as it was.

use jellyfish_core::{PropertyPath, Result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::Formula;

/// Schema keyword marking a computed property
pub const FORMULA_KEYWORD: &str = "$$formula";

/// A `$$formula` declaration found in a schema
#[derive(Debug, Clone)]
pub struct FormulaProperty {
    /// Property to write
    pub path: PropertyPath,
    /// Object bound to `input`
    pub parent: PropertyPath,
    /// Expression source
    pub expression: String,
}

/// Every `$$formula` declared under `properties`, depth first
pub fn formula_properties(schema: &Value) -> Vec<FormulaProperty> {
    let mut out = Vec::new();
    collect(schema, &PropertyPath::root(), &mut out);
    out
}

fn collect(schema: &Value, prefix: &PropertyPath, out: &mut Vec<FormulaProperty>) {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    for (key, sub) in properties {
        let path = prefix.clone().key(key.as_str());
        match sub.get(FORMULA_KEYWORD).and_then(Value::as_str) {
            Some(expression) => out.push(FormulaProperty {
                path,
                parent: prefix.clone(),
                expression: expression.to_string(),
            }),
            None => collect(sub, &path, out),
        }
    }
}

/// Recompute every computed property of `object` declared by `schema`
pub fn evaluate_object(schema: &Value, mut object: Value) -> Result<Value> {
    for property in formula_properties(schema) {
        let formula = Formula::parse(&property.expression)?;
        let input = property.parent.get(&object).cloned().unwrap_or(Value::Null);
        let this = object.clone();

        let result = formula.evaluate(&input, &this)?;
        if result.is_null() {
            continue;
        }

        debug!(target: "jellyfish::formula", path = %property.path, "Computed property");
        if !property.path.set(&mut object, result) {
            warn!(
                target: "jellyfish::formula",
                path = %property.path,
                "Computed property target is not an object; skipped"
            );
        }
    }
    Ok(object)
}
