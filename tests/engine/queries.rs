//! Query shapes
//!
//! Point lookups, pushed-down scans, multi-bucket fan-out, `$$links` gating,
//! `$$sort` and the field filter applied to every result.

use crate::common::*;
use jellyfish::SortDirection;
use proptest::prelude::*;

fn slug_only(card_type: Option<&str>) -> Value {
    let mut properties = json!({ "slug": { "type": "string" } });
    if let Some(card_type) = card_type {
        properties["type"] = json!({ "const": card_type });
    }
    json!({ "type": "object", "properties": properties, "required": ["slug"] })
}

// ============================================================================
// Point lookups
// ============================================================================

#[test]
fn point_lookup_returns_filtered_card() {
    let db = fresh_db();
    insert(&db, "foo", "card", json!({ "secret": "x" }));

    let found = db
        .query(
            &json!({
                "type": "object",
                "properties": { "slug": { "const": "foo" }, "type": { "type": "string" } },
                "required": ["slug"]
            }),
            &QueryOptions::default(),
        )
        .unwrap();
    assert_eq!(found, vec![json!({ "slug": "foo", "type": "card" })]);
}

#[test]
fn point_lookup_with_skip_is_empty() {
    let db = fresh_db();
    insert(&db, "foo", "card", json!({}));
    let found = db
        .query(
            &json!({ "properties": { "slug": { "const": "foo" } }, "required": ["slug"] }),
            &QueryOptions::default().skip(1.0),
        )
        .unwrap();
    assert!(found.is_empty());
}

#[test]
fn point_lookup_by_id_respects_other_constraints() {
    let db = fresh_db();
    let card = insert(&db, "foo", "card", json!({ "status": "open" }));
    let id = card.id.unwrap();

    let closed = json!({
        "properties": {
            "id": { "const": id },
            "data": {
                "type": "object",
                "properties": { "status": { "const": "closed" } },
                "required": ["status"]
            }
        },
        "required": ["id", "data"]
    });
    assert!(db.query(&closed, &QueryOptions::default()).unwrap().is_empty());

    let any = json!({ "properties": { "id": { "const": id } }, "required": ["id"] });
    assert_eq!(db.query(&any, &QueryOptions::default()).unwrap().len(), 1);
}

#[test]
fn point_lookup_agrees_with_scan() {
    let db = fresh_db();
    for (slug, card_type, n) in [("a", "card", 1), ("b", "session", 2), ("c", "execute", 3)] {
        insert(&db, slug, card_type, json!({ "n": n, "hidden": true }));
    }

    for slug in ["a", "b", "c", "missing"] {
        let data = json!({ "type": "object", "properties": { "n": { "type": "number" } } });
        let pinned = json!({
            "type": "object",
            "properties": { "slug": { "const": slug }, "data": data },
            "required": ["slug"]
        });
        let scanned = json!({
            "type": "object",
            "properties": { "slug": { "enum": [slug] }, "data": data },
            "required": ["slug"]
        });
        let by_key = db.query(&pinned, &QueryOptions::default()).unwrap();
        let by_scan = db.query(&scanned, &QueryOptions::default()).unwrap();
        assert_eq!(by_key, by_scan, "slug {}", slug);
    }
}

// ============================================================================
// Scans
// ============================================================================

#[test]
fn fan_out_merges_buckets_in_sort_order() {
    let db = fresh_db();
    insert(&db, "c-card", "card", json!({ "timestamp": 3 }));
    insert(&db, "a-session", "session", json!({ "timestamp": 1 }));
    insert(&db, "d-request", "action-request", json!({ "timestamp": 4 }));
    insert(&db, "b-card", "card", json!({ "timestamp": 2 }));

    let all = db.query(&slug_only(None), &QueryOptions::default()).unwrap();
    assert_eq!(slugs(&all), vec!["a-session", "b-card", "c-card", "d-request"]);

    let page = db
        .query(&slug_only(None), &QueryOptions::default().skip(1.0).limit(2.0))
        .unwrap();
    assert_eq!(slugs(&page), vec!["b-card", "c-card"]);

    let desc = db
        .query(
            &slug_only(None),
            &QueryOptions::default().sort_dir(SortDirection::Desc).limit(1.0),
        )
        .unwrap();
    assert_eq!(slugs(&desc), vec!["d-request"]);
}

#[test]
fn type_enum_scans_only_listed_buckets() {
    let db = fresh_db();
    insert(&db, "a", "card", json!({ "timestamp": 1 }));
    insert(&db, "b", "session", json!({ "timestamp": 2 }));
    insert(&db, "c", "execute", json!({ "timestamp": 3 }));

    let schema = json!({
        "type": "object",
        "properties": { "slug": { "type": "string" }, "type": { "enum": ["card", "execute"] } },
        "required": ["slug"]
    });
    let found = db.query(&schema, &QueryOptions::default()).unwrap();
    assert_eq!(slugs(&found), vec!["a", "c"]);
}

#[test]
fn custom_sort_path() {
    let db = fresh_db();
    insert(&db, "x", "card", json!({ "rank": 2 }));
    insert(&db, "y", "card", json!({ "rank": 1 }));

    let found = db
        .query(&slug_only(Some("card")), &QueryOptions::default().sort_by("data.rank"))
        .unwrap();
    assert_eq!(slugs(&found), vec!["y", "x"]);
}

#[test]
fn integral_float_limit_is_accepted() {
    let db = fresh_db();
    for i in 0..20 {
        insert(&db, &format!("card-{:02}", i), "card", json!({ "timestamp": i }));
    }
    let found = db
        .query(&slug_only(Some("card")), &QueryOptions::default().limit(15.0))
        .unwrap();
    assert_eq!(found.len(), 15);

    for bad in [-1.0, 2.5, f64::NAN, f64::INFINITY] {
        let err = db
            .query(&slug_only(Some("card")), &QueryOptions::default().limit(bad))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidLimit);
    }
}

#[test]
fn additional_properties_true_keeps_everything() {
    let db = fresh_db();
    insert(&db, "foo", "card", json!({ "a": 1 }));
    let found = db
        .query(
            &json!({
                "type": "object",
                "properties": { "slug": { "const": "foo" } },
                "additionalProperties": true
            }),
            &QueryOptions::default(),
        )
        .unwrap();
    assert_eq!(found[0]["data"], json!({ "a": 1 }));
    assert!(found[0].get("id").is_some());
}

#[test]
fn additional_properties_false_prunes_instead_of_rejecting() {
    let db = fresh_db();
    insert(&db, "foo", "card", json!({ "x": 1 }));
    let found = db
        .query(
            &json!({
                "type": "object",
                "properties": { "slug": { "type": "string" }, "type": { "const": "card" } },
                "additionalProperties": false
            }),
            &QueryOptions::default(),
        )
        .unwrap();
    assert_eq!(found, vec![json!({ "slug": "foo", "type": "card" })]);
}

#[test]
fn object_without_properties_drops_nested_keys() {
    let db = fresh_db();
    insert(&db, "foo", "card", json!({ "secret": { "deep": 1 }, "list": [{ "k": 2 }, 3] }));
    let found = db
        .query(
            &json!({
                "type": "object",
                "properties": {
                    "slug": { "const": "foo" },
                    "data": { "type": "object" },
                    "tags": { "type": "array" }
                },
                "required": ["slug"]
            }),
            &QueryOptions::default(),
        )
        .unwrap();
    assert_eq!(found, vec![json!({ "slug": "foo", "data": {}, "tags": [] })]);

    let listed = db
        .query(
            &json!({
                "type": "object",
                "properties": {
                    "slug": { "const": "foo" },
                    "data": { "type": "object", "properties": { "list": { "type": "array" } } }
                },
                "required": ["slug"]
            }),
            &QueryOptions::default(),
        )
        .unwrap();
    assert_eq!(listed[0]["data"], json!({ "list": [{}, 3] }));
}

#[test]
fn invalid_pattern_is_invalid_schema() {
    let db = fresh_db();
    let err = db
        .query(
            &json!({ "properties": { "slug": { "type": "string", "pattern": "(" } } }),
            &QueryOptions::default(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSchema);
}

// ============================================================================
// $$sort
// ============================================================================

#[test]
fn sort_formula_orders_results() {
    let db = fresh_db();
    insert(&db, "low", "card", json!({ "priority": 1 }));
    insert(&db, "high", "card", json!({ "priority": 9 }));
    insert(&db, "mid", "card", json!({ "priority": 5 }));

    let schema = json!({
        "type": "object",
        "properties": { "slug": { "type": "string" }, "type": { "const": "card" } },
        "required": ["slug"],
        "$$sort": "input.data.priority > this.data.priority"
    });
    let found = db.query(&schema, &QueryOptions::default()).unwrap();
    assert_eq!(slugs(&found), vec!["high", "mid", "low"]);

    let page = db.query(&schema, &QueryOptions::default().skip(1.0).limit(1.0)).unwrap();
    assert_eq!(slugs(&page), vec!["mid"]);
}

#[test]
fn sort_formula_must_yield_boolean_or_number() {
    let db = fresh_db();
    insert(&db, "a", "card", json!({}));
    insert(&db, "b", "card", json!({}));

    let schema = json!({
        "properties": { "type": { "const": "card" } },
        "$$sort": "'not an ordering'"
    });
    let err = db.query(&schema, &QueryOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidExpression);
}

// ============================================================================
// Filter fidelity
// ============================================================================

const FIELDS: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn results_never_expose_undeclared_fields(
        stored in prop::collection::vec(prop::collection::vec(any::<bool>(), 4), 1..6),
        declared in prop::collection::vec(any::<bool>(), 4),
    ) {
        let db = fresh_db();
        for (i, present) in stored.iter().enumerate() {
            let mut card = Card::new(format!("card-{}", i), "card");
            for (field, keep) in FIELDS.iter().zip(present) {
                if *keep {
                    card.data.insert(field.to_string(), json!(i));
                }
            }
            db.insert_element(card).unwrap();
        }

        let declared: Vec<&str> = FIELDS
            .iter()
            .zip(&declared)
            .filter(|(_, keep)| **keep)
            .map(|(field, _)| *field)
            .collect();
        let data_properties: serde_json::Map<String, Value> = declared
            .iter()
            .map(|field| (field.to_string(), json!({ "type": "number" })))
            .collect();
        let schema = json!({
            "type": "object",
            "properties": {
                "slug": { "type": "string" },
                "data": { "type": "object", "properties": data_properties }
            },
            "required": ["slug", "data"]
        });

        let results = db.query(&schema, &QueryOptions::default()).unwrap();
        prop_assert_eq!(results.len(), stored.len());
        for row in &results {
            let keys: Vec<&String> = row.as_object().unwrap().keys().collect();
            prop_assert!(keys.iter().all(|k| *k == "slug" || *k == "data"));
            for key in row["data"].as_object().unwrap().keys() {
                prop_assert!(declared.contains(&key.as_str()));
            }
        }
    }
}
