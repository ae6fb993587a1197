//! Slug and id uniqueness
//!
//! Every write is one conditional replace, so concurrent writers on one slug
//! are serialized by the backend, even when they target different buckets.

use crate::common::*;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn second_insert_with_same_slug_fails() {
    let db = fresh_db();
    insert(&db, "foo", "card", json!({}));
    let err = db.insert_element(Card::new("foo", "card")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ElementAlreadyExists);
}

#[test]
fn concurrent_inserts_same_slug_exactly_one_wins() {
    let db = fresh_db();
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let db = db.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                db.insert_element(Card::new("contended", "card").with_data("writer", json!(i)))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        let kind = result.as_ref().unwrap_err().kind();
        assert_eq!(kind, ErrorKind::ElementAlreadyExists);
    }
}

#[test]
fn concurrent_inserts_distinct_slugs_get_distinct_ids() {
    let db = fresh_db();
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let db = db.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..25)
                    .map(|i| {
                        db.insert_element(Card::new(format!("card-{}-{}", t, i), "card"))
                            .unwrap()
                            .id
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let ids: Vec<String> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), 200);
    assert_eq!(unique.len(), 200);
}

#[test]
fn concurrent_upserts_same_slug_share_one_id() {
    let (db, backend) = db_with_backend(JellyfishConfig::default());
    let barrier = Arc::new(Barrier::new(12));

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let db = db.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                db.upsert_element(Card::new("shared", "card").with_data("writer", json!(i)))
                    .unwrap()
            })
        })
        .collect();

    let stored: Vec<Card> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let ids: HashSet<_> = stored.iter().map(|c| c.id.clone().unwrap()).collect();
    assert_eq!(ids.len(), 1);
    assert_eq!(backend.row_count(Bucket::Cards), 1);
}

#[test]
fn slug_collision_across_buckets_is_rejected() {
    let db = fresh_db();
    insert(&db, "shared-key", "session", json!({}));
    let err = db.insert_element(Card::new("shared-key", "card")).unwrap_err();
    match err {
        Error::ElementAlreadyExists { bucket, key } => {
            assert_eq!(bucket, Bucket::Sessions);
            assert_eq!(key, "shared-key");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn concurrent_card_and_session_same_slug_one_wins() {
    let db = fresh_db();
    for round in 0..500 {
        let slug = format!("race-{}", round);
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = ["card", "session"]
            .into_iter()
            .map(|card_type| {
                let db = db.clone();
                let barrier = Arc::clone(&barrier);
                let card = Card::new(slug.clone(), card_type);
                thread::spawn(move || {
                    barrier.wait();
                    db.insert_element(card)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "round {}", round);
        for result in results.iter().filter(|r| r.is_err()) {
            assert_eq!(result.as_ref().unwrap_err().kind(), ErrorKind::ElementAlreadyExists);
        }

        let found = db.get_element_by_slug(&slug).unwrap().unwrap();
        let stored = results.iter().find_map(|r| r.as_ref().ok()).unwrap();
        assert_eq!(found.id, stored.id);
    }
}

#[test]
fn concurrent_upserts_across_buckets_keep_one_holder() {
    let (db, backend) = db_with_backend(JellyfishConfig::default());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let db = db.clone();
            let barrier = Arc::clone(&barrier);
            let card_type = if i % 2 == 0 { "card" } else { "execute" };
            thread::spawn(move || {
                barrier.wait();
                db.upsert_element(Card::new("contested", card_type).with_data("writer", json!(i)))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.iter().any(|r| r.is_ok()));
    for result in results.iter().filter(|r| r.is_err()) {
        assert_eq!(result.as_ref().unwrap_err().kind(), ErrorKind::ElementAlreadyExists);
    }
    let holders = Bucket::ALL
        .into_iter()
        .filter(|bucket| backend.row_count(*bucket) > 0)
        .count();
    assert_eq!(holders, 1);
}

#[test]
fn upsert_never_changes_slug_or_id() {
    let db = fresh_db();
    let original = insert(&db, "stable", "card", json!({ "v": 1 }));

    let mut edit = original.clone();
    edit.slug = Some("renamed".into());
    edit.data.insert("v".into(), json!(2));
    let stored = db.upsert_element(edit).unwrap();

    assert_eq!(stored.id, original.id);
    assert_eq!(stored.slug.as_deref(), Some("stable"));
    assert_eq!(db.get_element_by_slug("stable").unwrap().unwrap().data["v"], json!(2));
    assert!(db.get_element_by_slug("renamed").unwrap().is_none());
}
