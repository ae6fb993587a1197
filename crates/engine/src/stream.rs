//! Change streams
//!
//! A [`ChangeStream`] merges one backing-store feed per bucket the query
//! schema can match into a single ordered channel of [`StreamEvent`]s.
//!
//! ## Per-bucket feeds
//!
//! Each feed is drained by its own forwarder thread, which runs every change
//! through the query schema. The old and new rows are matched separately; a
//! change neither side of which matches is dropped. Otherwise both sides are
//! materialized (links resolved, fields filtered) and sent as one event, so
//! a row that never matched shows up as `before: None`, never as the raw
//! document.
//!
//! ## Closing
//!
//! A feed failing to open, or failing to transform a change, produces an
//! [`StreamEvent::Error`] tagged with its bucket; sibling feeds keep
//! running. [`StreamEvent::Closed`] is sent exactly once, after every feed
//! has ended. Closing is idempotent and safe at any point after `open`
//! returns, since subscriptions are registered before it does.
//!
//! Lock order: stream slots, then the backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use jellyfish_core::{buckets_for_schema, Bucket, CompiledSchema, Error, Result};
use jellyfish_storage::{Change, Subscription, SubscriptionId};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::database::Engine;
use crate::links::materialize;

/// An event of a merged change stream
#[derive(Debug)]
pub enum StreamEvent {
    /// A row matching the query was written
    Change {
        /// Bucket the write happened in
        bucket: Bucket,
        /// Materialized row before the write, if it matched
        before: Option<Value>,
        /// Materialized row after the write, if it matches
        after: Option<Value>,
    },
    /// One bucket's feed failed; other buckets are unaffected
    Error {
        /// Bucket of the failing feed
        bucket: Bucket,
        /// What went wrong
        error: Error,
    },
    /// Every feed has ended; no further events follow
    Closed,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    subscription: Option<SubscriptionId>,
    closed: bool,
}

/// State shared by a stream handle and its forwarder threads
pub(crate) struct StreamShared {
    engine: Arc<Engine>,
    schema: CompiledSchema,
    buckets: Vec<Bucket>,
    sender: SyncSender<StreamEvent>,
    slots: Mutex<HashMap<Bucket, Slot>>,
    closed_emitted: AtomicBool,
    final_closed: AtomicBool,
}

impl StreamShared {
    /// Subscribe to a bucket's feed and start its forwarder
    fn start(self: &Arc<Self>, bucket: Bucket) -> Result<()> {
        let (generation, subscription) = {
            let mut slots = self.slots.lock();
            if self.final_closed.load(Ordering::Acquire) || self.closed_emitted.load(Ordering::Acquire)
            {
                return Err(Error::StreamClosed);
            }
            let slot = slots.entry(bucket).or_default();
            if let Some(previous) = slot.subscription.take() {
                self.engine.backend.unsubscribe(bucket, previous);
            }
            slot.generation += 1;
            slot.closed = false;
            let subscription = self.engine.backend.subscribe(bucket);
            slot.subscription = subscription.as_ref().ok().map(|s| s.id);
            (slot.generation, subscription)
        };

        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("jellyfish-feed-{}", bucket))
            .spawn(move || shared.forward(bucket, generation, subscription));
        if let Err(e) = spawned {
            self.stop(bucket);
            self.slot_closed(bucket, generation);
            return Err(Error::database(format!("failed to start feed for {}: {}", bucket, e)));
        }
        debug!(target: "jellyfish::stream", %bucket, generation, "Feed started");
        Ok(())
    }

    /// Cancel a bucket's subscription; its forwarder then winds down
    fn stop(&self, bucket: Bucket) {
        let mut slots = self.slots.lock();
        if let Some(id) = slots.get_mut(&bucket).and_then(|slot| slot.subscription.take()) {
            self.engine.backend.unsubscribe(bucket, id);
        }
    }

    pub(crate) fn close(&self) {
        self.final_closed.store(true, Ordering::Release);
        let mut slots = self.slots.lock();
        for (bucket, slot) in slots.iter_mut() {
            if let Some(id) = slot.subscription.take() {
                self.engine.backend.unsubscribe(*bucket, id);
            }
        }
    }

    fn forward(&self, bucket: Bucket, generation: u64, subscription: Result<Subscription>) {
        match subscription {
            Err(error) => {
                warn!(target: "jellyfish::stream", %bucket, error = %error, "Feed failed to open");
                let _ = self.sender.send(StreamEvent::Error { bucket, error });
            }
            Ok(subscription) => {
                for change in subscription.changes.iter() {
                    let event = match self.transform(&change) {
                        Ok(None) => continue,
                        Ok(Some((before, after))) => StreamEvent::Change {
                            bucket,
                            before,
                            after,
                        },
                        Err(error) => {
                            warn!(target: "jellyfish::stream", %bucket, error = %error, "Change not delivered");
                            StreamEvent::Error { bucket, error }
                        }
                    };
                    if self.sender.send(event).is_err() {
                        break;
                    }
                }
                self.engine.backend.unsubscribe(bucket, subscription.id);
            }
        }
        self.slot_closed(bucket, generation);
    }

    /// Filter and materialize both sides of a change
    fn transform(&self, change: &Change) -> Result<Option<(Option<Value>, Option<Value>)>> {
        let matching = |side: &Option<Value>| side.as_ref().filter(|row| self.schema.matches(row)).cloned();
        let old_match = matching(&change.old_val);
        let new_match = matching(&change.new_val);
        if old_match.is_none() && new_match.is_none() {
            return Ok(None);
        }

        let mut sides: [Option<Value>; 2] = [None, None];
        for (slot, row) in sides.iter_mut().zip([old_match, new_match]) {
            if let Some(row) = row {
                *slot = materialize(&*self.engine, &row, &self.schema)?;
            }
        }
        let [before, after] = sides;
        if before.is_none() && after.is_none() {
            return Ok(None);
        }
        Ok(Some((before, after)))
    }

    /// Mark a feed ended; the last one out sends `Closed`
    fn slot_closed(&self, bucket: Bucket, generation: u64) {
        let emit = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(&bucket) else {
                return;
            };
            if slot.generation != generation {
                return;
            }
            slot.closed = true;
            slot.subscription = None;
            slots.values().all(|slot| slot.closed) && !self.closed_emitted.swap(true, Ordering::AcqRel)
        };
        debug!(target: "jellyfish::stream", %bucket, generation, "Feed ended");
        if emit {
            let _ = self.sender.send(StreamEvent::Closed);
            debug!(target: "jellyfish::stream", "Stream closed");
        }
    }
}

/// Merged, schema-filtered change feed
///
/// Dropping the handle closes it.
pub struct ChangeStream {
    shared: Arc<StreamShared>,
    events: Receiver<StreamEvent>,
    finished: AtomicBool,
}

impl ChangeStream {
    pub(crate) fn open(engine: Arc<Engine>, schema: &Value) -> Result<Self> {
        let compiled = CompiledSchema::compile(schema)?;
        let buckets = buckets_for_schema(schema);
        let (sender, events) = mpsc::sync_channel(engine.config.stream_channel_capacity);

        let slots = buckets.iter().map(|b| (*b, Slot::default())).collect();
        let shared = Arc::new(StreamShared {
            engine,
            schema: compiled,
            buckets,
            sender,
            slots: Mutex::new(slots),
            closed_emitted: AtomicBool::new(false),
            final_closed: AtomicBool::new(false),
        });

        for bucket in shared.buckets.clone() {
            if let Err(e) = shared.start(bucket) {
                shared.close();
                return Err(e);
            }
        }
        shared.engine.track_stream(&shared);
        debug!(target: "jellyfish::stream", buckets = ?shared.buckets, "Stream opened");

        Ok(Self {
            shared,
            events,
            finished: AtomicBool::new(false),
        })
    }

    fn observe(&self, event: StreamEvent) -> StreamEvent {
        if matches!(event, StreamEvent::Closed) {
            self.finished.store(true, Ordering::Release);
        }
        event
    }

    /// Block for the next event; `None` once `Closed` has been received
    pub fn recv(&self) -> Option<StreamEvent> {
        if self.finished.load(Ordering::Acquire) {
            return None;
        }
        self.events.recv().ok().map(|event| self.observe(event))
    }

    /// Next event if one is ready
    pub fn try_recv(&self) -> Option<StreamEvent> {
        if self.finished.load(Ordering::Acquire) {
            return None;
        }
        match self.events.try_recv() {
            Ok(event) => Some(self.observe(event)),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<StreamEvent> {
        if self.finished.load(Ordering::Acquire) {
            return None;
        }
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(self.observe(event)),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Blocking iterator over events, ending after `Closed`
    pub fn iter(&self) -> impl Iterator<Item = StreamEvent> + '_ {
        std::iter::from_fn(move || self.recv())
    }

    /// Buckets this stream follows
    pub fn buckets(&self) -> &[Bucket] {
        &self.shared.buckets
    }

    /// Close every feed. `Closed` follows once they have all ended.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Close one bucket's feed, leaving the others running
    pub fn close_stream(&self, bucket: Bucket) {
        self.shared.stop(bucket);
    }

    /// Reopen one bucket's feed.
    ///
    /// # Errors
    ///
    /// `Error::StreamClosed` after [`close`](Self::close) or once `Closed`
    /// has been sent; `Error::Database` for a bucket this stream does not
    /// follow.
    pub fn restart_stream(&self, bucket: Bucket) -> Result<()> {
        if !self.shared.buckets.contains(&bucket) {
            return Err(Error::database(format!("stream does not follow {}", bucket)));
        }
        self.shared.start(bucket)
    }

    /// Whether `Closed` has been sent
    pub fn is_closed(&self) -> bool {
        self.shared.closed_emitted.load(Ordering::Acquire)
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for ChangeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream")
            .field("buckets", &self.shared.buckets)
            .field("closed", &self.is_closed())
            .finish()
    }
}
