//! Change streams
//!
//! Filtered before/after events, partial close and restart, per-bucket
//! errors, and exactly-once `Closed`.

use crate::common::*;
use jellyfish::Backend;
use jellyfish_storage::{Change, Lookup, ReplaceFn, ScanRequest, Subscription, SubscriptionId};
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn card_stream_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "slug": { "type": "string" },
            "type": { "const": "card" },
            "data": {
                "type": "object",
                "properties": { "status": { "const": "open" } },
                "required": ["status"]
            }
        },
        "required": ["slug", "data"]
    })
}

fn closed_count(events: &[StreamEvent]) -> usize {
    events.iter().filter(|e| matches!(e, StreamEvent::Closed)).count()
}

#[test]
fn events_carry_filtered_before_and_after() {
    let db = fresh_db();
    let stream = db.stream(&card_stream_schema()).unwrap();
    assert_eq!(stream.buckets(), &[Bucket::Cards]);

    let card = insert(&db, "task", "card", json!({ "status": "open", "secret": 1 }));
    let (bucket, before, after) = next_change(&stream);
    assert_eq!(bucket, Bucket::Cards);
    assert_eq!(before, None);
    assert_eq!(after, Some(json!({ "slug": "task", "type": "card", "data": { "status": "open" } })));

    db.upsert_element(card.with_data("status", json!("closed"))).unwrap();
    let (_, before, after) = next_change(&stream);
    assert_eq!(before.unwrap()["data"]["status"], json!("open"));
    assert_eq!(after, None);
}

#[test]
fn never_matching_rows_are_not_delivered() {
    let db = fresh_db();
    let stream = db.stream(&card_stream_schema()).unwrap();

    let card = insert(&db, "task", "card", json!({ "status": "draft" }));
    db.upsert_element(card.with_data("status", json!("open"))).unwrap();

    // The draft insert is dropped; the upsert shows no unfiltered `before`
    let (_, before, after) = next_change(&stream);
    assert_eq!(before, None);
    assert_eq!(after.unwrap()["data"], json!({ "status": "open" }));
    assert!(stream.try_recv().is_none());
}

#[test]
fn close_is_idempotent_and_closed_is_sent_once() {
    let db = fresh_db();
    let stream = db.stream(&json!({})).unwrap();
    stream.close();
    stream.close();
    stream.close();

    let events = drain(&stream);
    assert_eq!(closed_count(&events), 1);
    assert!(stream.is_closed());
    assert!(stream.recv().is_none());
}

#[test]
fn close_racing_disconnect_sends_one_closed() {
    let db = fresh_db();
    let stream = db.stream(&json!({})).unwrap();
    let barrier = Arc::new(Barrier::new(5));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let db = db.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                db.disconnect();
            })
        })
        .collect();
    barrier.wait();
    stream.close();
    for handle in handles {
        handle.join().unwrap();
    }

    let events = drain(&stream);
    assert_eq!(closed_count(&events), 1);
}

#[test]
fn partial_close_keeps_sibling_feeds() {
    let db = fresh_db();
    let schema = json!({
        "type": "object",
        "properties": { "slug": { "type": "string" } },
        "required": ["slug"]
    });
    let stream = db.stream(&schema).unwrap();
    assert_eq!(stream.buckets().len(), 4);

    stream.close_stream(Bucket::Sessions);
    insert(&db, "quiet", "session", json!({}));
    insert(&db, "loud", "card", json!({}));

    let (bucket, _, after) = next_change(&stream);
    assert_eq!(bucket, Bucket::Cards);
    assert_eq!(after.unwrap()["slug"], json!("loud"));
    assert!(!stream.is_closed());

    stream.restart_stream(Bucket::Sessions).unwrap();
    insert(&db, "back", "session", json!({}));
    let (bucket, _, after) = next_change(&stream);
    assert_eq!(bucket, Bucket::Sessions);
    assert_eq!(after.unwrap()["slug"], json!("back"));
}

#[test]
fn restart_rejects_unfollowed_bucket_and_closed_stream() {
    let db = fresh_db();
    let stream = db.stream(&card_stream_schema()).unwrap();

    let err = stream.restart_stream(Bucket::Links).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Database);

    stream.close();
    let err = stream.restart_stream(Bucket::Cards).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StreamClosed);
}

#[test]
fn disconnect_closes_open_streams() {
    let db = fresh_db();
    let stream = db.stream(&card_stream_schema()).unwrap();
    db.disconnect();

    let events = drain(&stream);
    assert_eq!(closed_count(&events), 1);
    assert_eq!(db.stream(&json!({})).unwrap_err().kind(), ErrorKind::Database);
}

#[test]
fn link_event_follows_endpoint_updates() {
    let db = fresh_db();
    let a = insert(&db, "a", "card", json!({}));
    let b = insert(&db, "b", "card", json!({}));
    let stream = db
        .stream(&json!({
            "type": "object",
            "properties": { "type": { "const": "link" }, "slug": { "type": "string" } }
        }))
        .unwrap();

    let reader = db.clone();
    let observer = std::thread::spawn(move || {
        let (_, _, after) = next_change(&stream);
        let a = reader.get_element_by_slug("a").unwrap().unwrap();
        let b = reader.get_element_by_slug("b").unwrap().unwrap();
        (after, a.links.contains_key("owns"), b.links.contains_key("is owned by"))
    });

    link(&db, "a-owns-b", "owns", "is owned by", &a, &b);
    let (after, a_linked, b_linked) = observer.join().unwrap();
    assert_eq!(after.unwrap()["slug"], json!("a-owns-b"));
    assert!(a_linked);
    assert!(b_linked);
}

// ============================================================================
// Per-bucket errors
// ============================================================================

/// Memory backend whose session feed cannot be opened
struct NoSessionFeed {
    inner: MemoryBackend,
}

impl Backend for NoSessionFeed {
    fn create_table(&self, bucket: Bucket) -> jellyfish::Result<()> {
        self.inner.create_table(bucket)
    }

    fn has_table(&self, bucket: Bucket) -> bool {
        self.inner.has_table(bucket)
    }

    fn drop_all(&self) -> jellyfish::Result<()> {
        self.inner.drop_all()
    }

    fn get(&self, bucket: Bucket, lookup: Lookup<'_>) -> jellyfish::Result<Option<Value>> {
        self.inner.get(bucket, lookup)
    }

    fn scan(&self, bucket: Bucket, request: &ScanRequest<'_>) -> jellyfish::Result<Vec<Value>> {
        self.inner.scan(bucket, request)
    }

    fn replace(
        &self,
        bucket: Bucket,
        lookup: Lookup<'_>,
        decide: &mut ReplaceFn<'_>,
    ) -> jellyfish::Result<Change> {
        self.inner.replace(bucket, lookup, decide)
    }

    fn subscribe(&self, bucket: Bucket) -> jellyfish::Result<Subscription> {
        if bucket == Bucket::Sessions {
            return Err(Error::database("session feed unavailable"));
        }
        self.inner.subscribe(bucket)
    }

    fn unsubscribe(&self, bucket: Bucket, id: SubscriptionId) {
        self.inner.unsubscribe(bucket, id)
    }
}

#[test]
fn feed_error_is_scoped_to_its_bucket() {
    let backend = Arc::new(NoSessionFeed {
        inner: MemoryBackend::new(),
    });
    let db = Jellyfish::connect(backend, JellyfishConfig::default()).unwrap();
    let stream = db.stream(&json!({ "properties": { "slug": { "type": "string" } } })).unwrap();

    let mut saw_error = false;
    insert(&db, "still-flowing", "card", json!({}));
    loop {
        match stream.recv_timeout(WAIT) {
            Some(StreamEvent::Error { bucket, error }) => {
                assert_eq!(bucket, Bucket::Sessions);
                assert_eq!(error.kind(), ErrorKind::Database);
                saw_error = true;
            }
            Some(StreamEvent::Change { bucket, after, .. }) => {
                assert_eq!(bucket, Bucket::Cards);
                assert_eq!(after.unwrap()["slug"], json!("still-flowing"));
                break;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    // The error may arrive after the change
    if !saw_error {
        match stream.recv_timeout(WAIT) {
            Some(StreamEvent::Error { bucket, .. }) => assert_eq!(bucket, Bucket::Sessions),
            other => panic!("expected the session feed error, got {:?}", other),
        }
    }
    assert!(!stream.is_closed());

    stream.close();
    assert_eq!(closed_count(&drain(&stream)), 1);
}

#[test]
fn quiet_stream_times_out_without_events() {
    let db = fresh_db();
    let stream = db.stream(&card_stream_schema()).unwrap();
    insert(&db, "elsewhere", "session", json!({}));
    assert!(stream.recv_timeout(Duration::from_millis(100)).is_none());
}
