//! Computed properties through the public API

use crate::common::*;
use jellyfish::{evaluate, evaluate_object, Formula};

#[test]
fn aggregate_unions_in_first_seen_order() {
    let mentions = evaluate(
        "AGGREGATE(input, PARTIAL(FLIP(PROPERTY), 'mentions'))",
        &json!([{ "mentions": ["a", "b"] }, { "mentions": ["b", "c"] }]),
        &Value::Null,
    )
    .unwrap();
    assert_eq!(mentions, json!(["a", "b", "c"]));
}

#[test]
fn null_input_is_not_computable_yet() {
    assert_eq!(evaluate("input.count + 1", &Value::Null, &Value::Null).unwrap(), Value::Null);
}

#[test]
fn undefined_result_is_an_error_but_null_is_not() {
    let err = evaluate("input.missing", &json!({}), &Value::Null).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidExpression);

    let value = evaluate("input.present", &json!({ "present": null }), &Value::Null).unwrap();
    assert_eq!(value, Value::Null);
}

#[test]
fn unknown_function_fails_at_parse_time() {
    let err = Formula::parse("NOPE(input)").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidExpression);
}

#[test]
fn this_sees_sibling_properties() {
    let formula = Formula::parse("input * this.data.factor").unwrap();
    let value = formula.evaluate(&json!(4), &json!({ "data": { "factor": 3 } })).unwrap();
    assert_eq!(value, json!(12));
}

#[test]
fn computed_properties_are_stored_on_write() {
    let db = fresh_db();
    let type_schema = json!({
        "properties": {
            "data": {
                "properties": {
                    "mentions": {
                        "$$formula": "AGGREGATE(input.events, PARTIAL(FLIP(PROPERTY), 'mentions'))"
                    }
                }
            }
        }
    });

    let card = Card::new("thread", "thread").with_data(
        "events",
        json!([{ "mentions": ["ann"] }, { "mentions": ["bob", "ann"] }]),
    );
    let computed = evaluate_object(&type_schema, card.to_value().unwrap()).unwrap();
    let stored = db.insert_element(Card::from_value(computed).unwrap()).unwrap();

    assert_eq!(stored.data["mentions"], json!(["ann", "bob"]));
    let read = db.get_element_by_slug("thread").unwrap().unwrap();
    assert_eq!(read.data["mentions"], json!(["ann", "bob"]));
}
