//! Link graph
//!
//! Link cards are mirrored onto both endpoints; `$$links` gates and expands
//! query results through those mirrors and through `data.target` pointers.

use crate::common::*;
use jellyfish::{HAS_ATTACHED_ELEMENT, IS_ATTACHED_TO};

fn slug_schema() -> Value {
    json!({ "type": "object", "properties": { "slug": { "type": "string" } } })
}

fn with_links(card_type: &str, name: &str) -> Value {
    json!({
        "type": "object",
        "properties": { "slug": { "type": "string" }, "type": { "const": card_type } },
        "required": ["slug"],
        "$$links": { name: slug_schema() }
    })
}

#[test]
fn link_is_mirrored_on_both_endpoints() {
    let db = fresh_db();
    let alice = insert(&db, "alice", "user", json!({}));
    let team = insert(&db, "team", "org", json!({}));
    let record = link(&db, "alice-in-team", "is member of", "has member", &alice, &team);

    let alice = db.get_element_by_slug("alice").unwrap().unwrap();
    let team = db.get_element_by_slug("team").unwrap().unwrap();

    let forward = &alice.links["is member of"];
    assert_eq!(forward.len(), 1);
    assert_eq!(forward[0]["$link"], json!(record.id));
    assert_eq!(forward[0]["slug"], json!("team"));
    assert_eq!(team.links["has member"][0]["slug"], json!("alice"));
    assert!(alice.linked_at.contains_key("is member of"));
    assert!(team.linked_at.contains_key("has member"));
}

#[test]
fn deactivating_a_link_removes_both_mirrors() {
    let db = fresh_db();
    let a = insert(&db, "a", "card", json!({}));
    let b = insert(&db, "b", "card", json!({}));
    let record = link(&db, "a-owns-b", "owns", "is owned by", &a, &b);

    db.upsert_element(record.clone().with_active(false)).unwrap();

    let a = db.get_element_by_slug("a").unwrap().unwrap();
    let b = db.get_element_by_slug("b").unwrap().unwrap();
    assert!(a.links.is_empty());
    assert!(b.links.is_empty());
    assert!(a.linked_at.is_empty());
    assert!(b.linked_at.is_empty());

    // Reactivating restores them
    db.upsert_element(record.with_active(true)).unwrap();
    let a = db.get_element_by_slug("a").unwrap().unwrap();
    assert_eq!(a.links["owns"].len(), 1);
}

#[test]
fn links_gate_and_expand_results() {
    let db = fresh_db();
    let a = insert(&db, "a", "card", json!({ "timestamp": 1 }));
    let b = insert(&db, "b", "card", json!({ "timestamp": 2 }));
    insert(&db, "loner", "card", json!({ "timestamp": 3 }));
    link(&db, "a-owns-b", "owns", "is owned by", &a, &b);

    let owners = db.query(&with_links("card", "owns"), &QueryOptions::default()).unwrap();
    assert_eq!(
        owners,
        vec![json!({ "slug": "a", "type": "card", "links": { "owns": [{ "slug": "b" }] } })]
    );

    let owned = db
        .query(&with_links("card", "is owned by"), &QueryOptions::default())
        .unwrap();
    assert_eq!(slugs(&owned), vec!["b"]);
}

#[test]
fn link_sub_schema_filters_targets() {
    let db = fresh_db();
    let a = insert(&db, "a", "card", json!({}));
    let open = insert(&db, "open-task", "task", json!({ "status": "open" }));
    let done = insert(&db, "done-task", "task", json!({ "status": "done" }));
    link(&db, "a-open", "owns", "is owned by", &a, &open);
    link(&db, "a-done", "owns", "is owned by", &a, &done);

    let schema = json!({
        "type": "object",
        "properties": { "slug": { "const": "a" } },
        "$$links": {
            "owns": {
                "type": "object",
                "properties": {
                    "slug": { "type": "string" },
                    "data": {
                        "type": "object",
                        "properties": { "status": { "const": "open" } },
                        "required": ["status"]
                    }
                },
                "required": ["data"]
            }
        }
    });
    let found = db.query(&schema, &QueryOptions::default()).unwrap();
    assert_eq!(found.len(), 1);
    let owned = found[0]["links"]["owns"].as_array().unwrap();
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0]["slug"], json!("open-task"));
}

#[test]
fn attachment_pointers_resolve_both_ways() {
    let db = fresh_db();
    let thread = insert(&db, "thread", "thread", json!({ "timestamp": 1 }));
    let thread_id = thread.id.clone().unwrap();
    insert(&db, "message-1", "message", json!({ "target": thread_id, "timestamp": 2 }));
    insert(&db, "message-2", "message", json!({ "target": thread_id, "timestamp": 3 }));
    insert(&db, "stray", "message", json!({ "target": "elsewhere", "timestamp": 4 }));

    let attached = db
        .query(&with_links("thread", HAS_ATTACHED_ELEMENT), &QueryOptions::default())
        .unwrap();
    assert_eq!(attached.len(), 1);
    let mut elements = slugs(attached[0]["links"][HAS_ATTACHED_ELEMENT].as_array().unwrap());
    elements.sort();
    assert_eq!(elements, vec!["message-1", "message-2"]);

    let parents = db
        .query(&with_links("message", IS_ATTACHED_TO), &QueryOptions::default())
        .unwrap();
    assert_eq!(slugs(&parents), vec!["message-1", "message-2"]);
    assert_eq!(parents[0]["links"][IS_ATTACHED_TO][0]["slug"], json!("thread"));
}

#[test]
fn unknown_link_name_is_an_error() {
    let db = fresh_db();
    insert(&db, "a", "card", json!({}));
    let err = db
        .query(&with_links("card", "is haunted by"), &QueryOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownLinkType);
}

#[test]
fn registered_names_resolve_before_any_link_exists() {
    let db = fresh_db();
    insert(&db, "a", "card", json!({}));
    db.register_link_type("is blocked by", "blocks");

    let found = db
        .query(&with_links("card", "blocks"), &QueryOptions::default())
        .unwrap();
    assert!(found.is_empty());
}

#[test]
fn links_survive_endpoint_upserts() {
    let db = fresh_db();
    let a = insert(&db, "a", "card", json!({}));
    let b = insert(&db, "b", "card", json!({}));
    link(&db, "a-owns-b", "owns", "is owned by", &a, &b);

    // A client writing a stale copy must not wipe the server-owned links
    db.upsert_element(a.with_data("edited", json!(true))).unwrap();

    let a = db.get_element_by_slug("a").unwrap().unwrap();
    assert_eq!(a.data["edited"], json!(true));
    assert_eq!(a.links["owns"].len(), 1);
}
