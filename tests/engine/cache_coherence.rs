//! Cache coherence
//!
//! A key lives in exactly one bucket, so caching a card marks its id and
//! slug absent everywhere else. A read that races a write never leaves the
//! older row cached.

use crate::common::*;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn reads_after_upsert_see_the_new_row() {
    let db = fresh_db();
    let card = insert(&db, "foo", "card", json!({ "v": 1 }));

    let mut edit = card.clone();
    edit.data.insert("v".into(), json!(2));
    db.upsert_element(edit).unwrap();

    let by_slug = db.get_element_by_slug("foo").unwrap().unwrap();
    let by_id = db.get_element_by_id(card.id.as_deref().unwrap()).unwrap().unwrap();
    assert_eq!(by_slug.data["v"], json!(2));
    assert_eq!(by_id, by_slug);
}

#[test]
fn other_buckets_report_absent() {
    let db = fresh_db();
    let card = insert(&db, "foo", "session", json!({}));
    let id = card.id.unwrap();

    assert!(db.get_element_by_slug_in(Bucket::Sessions, "foo").unwrap().is_some());
    for bucket in [Bucket::Cards, Bucket::Links, Bucket::Requests] {
        assert!(db.get_element_by_slug_in(bucket, "foo").unwrap().is_none());
        assert!(db.get_element_by_id_in(bucket, &id).unwrap().is_none());
    }
}

#[test]
fn repeated_reads_hit_the_cache() {
    let db = fresh_db();
    insert(&db, "foo", "card", json!({}));

    let before = db.cache_stats();
    for _ in 0..3 {
        db.get_element_by_slug_in(Bucket::Cards, "foo").unwrap();
    }
    let after = db.cache_stats();
    assert_eq!(after.hits - before.hits, 3);
    assert_eq!(after.misses, before.misses);
}

#[test]
fn misses_are_cached_as_absent() {
    let db = fresh_db();
    assert!(db.get_element_by_slug_in(Bucket::Cards, "nope").unwrap().is_none());
    let first = db.cache_stats();
    assert!(db.get_element_by_slug_in(Bucket::Cards, "nope").unwrap().is_none());
    let second = db.cache_stats();
    assert_eq!(second.hits, first.hits + 1);

    // A later insert replaces the absent marker
    insert(&db, "nope", "card", json!({}));
    assert!(db.get_element_by_slug_in(Bucket::Cards, "nope").unwrap().is_some());
}

#[test]
fn disabled_cache_serves_the_same_answers() {
    let config = JellyfishConfig {
        cache_enabled: false,
        ..JellyfishConfig::default()
    };
    let (db, _backend) = db_with_backend(config);
    let card = insert(&db, "foo", "card", json!({ "v": 1 }));

    let mut edit = card.clone();
    edit.data.insert("v".into(), json!(2));
    db.upsert_element(edit).unwrap();

    assert_eq!(db.get_element_by_slug("foo").unwrap().unwrap().data["v"], json!(2));
    assert!(db.get_element_by_slug_in(Bucket::Sessions, "foo").unwrap().is_none());
    let stats = db.cache_stats();
    assert_eq!((stats.hits, stats.misses), (0, 0));
}

#[test]
fn reset_clears_cached_rows() {
    let db = fresh_db();
    insert(&db, "foo", "card", json!({}));
    assert!(db.get_element_by_slug("foo").unwrap().is_some());

    db.reset().unwrap();
    assert!(db.get_element_by_slug("foo").unwrap().is_none());
    insert(&db, "foo", "card", json!({}));
}

#[test]
fn racing_read_never_caches_an_older_row() {
    let (db, backend) = db_with_backend(JellyfishConfig::default());
    // Rows written through a second handle are not in `db`'s cache yet
    let seeder = Jellyfish::connect(backend, JellyfishConfig::default()).unwrap();

    for round in 0..300 {
        let slug = format!("fill-{}", round);
        let seeded = insert(&seeder, &slug, "card", json!({ "v": 1 }));
        let barrier = Arc::new(Barrier::new(2));

        let reader = {
            let db = db.clone();
            let barrier = Arc::clone(&barrier);
            let slug = slug.clone();
            thread::spawn(move || {
                barrier.wait();
                db.get_element_by_slug(&slug).unwrap()
            })
        };
        let writer = {
            let db = db.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                db.upsert_element(seeded.with_data("v", json!(2))).unwrap()
            })
        };
        reader.join().unwrap();
        writer.join().unwrap();

        let cached = db.get_element_by_slug(&slug).unwrap().unwrap();
        assert_eq!(cached.data["v"], json!(2), "round {}", round);
    }
}
