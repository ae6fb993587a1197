//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

pub use jellyfish::{
    Bucket, Card, ChangeStream, Error, ErrorKind, Jellyfish, JellyfishConfig, MemoryBackend,
    QueryOptions, StreamEvent,
};
pub use serde_json::{json, Value};

/// How long stream tests wait for an event before failing
pub const WAIT: Duration = Duration::from_secs(5);

/// Engine over a fresh in-memory backend
pub fn fresh_db() -> Jellyfish {
    Jellyfish::in_memory().expect("in-memory connect")
}

/// Engine plus a handle on its backend for row-level assertions
pub fn db_with_backend(config: JellyfishConfig) -> (Jellyfish, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let db = Jellyfish::connect(backend.clone(), config).expect("connect");
    (db, backend)
}

/// Insert a card with a slug, type and `data` object
pub fn insert(db: &Jellyfish, slug: &str, card_type: &str, data: Value) -> Card {
    let mut card = Card::new(slug, card_type);
    if let Value::Object(map) = data {
        card.data = map;
    }
    db.insert_element(card).expect("insert")
}

/// Insert a link card between two stored cards
pub fn link(db: &Jellyfish, slug: &str, name: &str, inverse: &str, from: &Card, to: &Card) -> Card {
    let link = Card::link(slug, name, inverse, from, to).expect("link card");
    db.insert_element(link).expect("insert link")
}

/// The `slug` of every row, in order
pub fn slugs(rows: &[Value]) -> Vec<String> {
    rows.iter()
        .map(|row| row["slug"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Wait for the next `Change` event, panicking on anything else
pub fn next_change(stream: &ChangeStream) -> (Bucket, Option<Value>, Option<Value>) {
    match stream.recv_timeout(WAIT) {
        Some(StreamEvent::Change {
            bucket,
            before,
            after,
        }) => (bucket, before, after),
        other => panic!("expected a change event, got {:?}", other),
    }
}

/// Drain a stream until it reports `Closed` or goes quiet
pub fn drain(stream: &ChangeStream) -> Vec<StreamEvent> {
    std::iter::from_fn(|| stream.recv_timeout(WAIT)).collect()
}
