//! Backing-store driver contract
//!
//! Jellyfish is agnostic of the concrete table engine. A driver provides,
//! per [`Bucket`]:
//!
//! 1. point lookup by primary key (`slug`) or by the unique `id` index
//! 2. predicate-filtered, ordered scan with skip/limit
//! 3. an atomic conditional replace
//! 4. a change-feed subscription
//!
//! ## Conditional replace
//!
//! [`Backend::replace`] is the only write primitive. The driver locates the
//! current row for a [`Lookup`], hands it to the caller's decision closure
//! and stores the returned document, all as one indivisible step. Two
//! writers racing on the same key are serialized by the driver: the second
//! one sees the first one's row. The write path relies on this to keep
//! slugs and ids unique without ever doing a read-then-write.
//!
//! Slugs and ids are unique across every table, not just within one. The
//! driver checks the other tables in the same atomic step and reports the
//! table already holding the key.
//!
//! ## Missing tables
//!
//! Reads against a table that does not exist return `None`/empty. Writes and
//! subscriptions against a missing table fail with `Error::Database`.

use jellyfish_core::{Bucket, PropertyPath, Result};
use serde_json::Value;
use std::sync::mpsc::Receiver;

/// Identifier of one change-feed subscription
pub type SubscriptionId = u64;

/// Point-lookup key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    /// Unique id index
    Id(&'a str),
    /// Primary key
    Slug(&'a str),
}

impl<'a> Lookup<'a> {
    /// The raw key
    pub fn key(&self) -> &'a str {
        match self {
            Lookup::Id(key) | Lookup::Slug(key) => key,
        }
    }
}

/// Scan ordering direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Smallest first
    #[default]
    Asc,
    /// Largest first
    Desc,
}

/// Row predicate compiled from a query schema
pub type RowFilter<'a> = &'a (dyn Fn(&Value) -> bool + Send + Sync);

/// Parameters of a filtered scan
pub struct ScanRequest<'a> {
    /// Rows failing the predicate are skipped
    pub filter: RowFilter<'a>,
    /// Sort key; `None` keeps primary-key order
    pub sort_by: Option<&'a PropertyPath>,
    /// Sort direction
    pub direction: SortDirection,
    /// Rows to drop from the front of the ordered result
    pub skip: usize,
    /// Maximum rows to return; `None` is unbounded
    pub limit: Option<usize>,
}

/// One change-feed event
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Row before the write (`None` on insert)
    pub old_val: Option<Value>,
    /// Row after the write
    pub new_val: Option<Value>,
}

/// A live change-feed subscription.
///
/// The feed ends (the receiver disconnects) when the subscription is
/// cancelled through [`Backend::unsubscribe`] or the table is dropped.
pub struct Subscription {
    /// Handle for [`Backend::unsubscribe`]
    pub id: SubscriptionId,
    /// Change events in commit order
    pub changes: Receiver<Change>,
}

/// Decision closure of [`Backend::replace`]
///
/// Receives the current row (if any) and returns the row to store, or an
/// error to abort the write without touching the table.
pub type ReplaceFn<'a> = dyn FnMut(Option<&Value>) -> Result<Value> + 'a;

/// Table-oriented backing store
pub trait Backend: Send + Sync {
    /// Create a table; a no-op when it already exists
    fn create_table(&self, bucket: Bucket) -> Result<()>;

    /// Whether a table exists
    fn has_table(&self, bucket: Bucket) -> bool;

    /// Drop every table, ending all subscriptions
    fn drop_all(&self) -> Result<()>;

    /// Point lookup
    fn get(&self, bucket: Bucket, lookup: Lookup<'_>) -> Result<Option<Value>>;

    /// Filtered, ordered scan
    fn scan(&self, bucket: Bucket, request: &ScanRequest<'_>) -> Result<Vec<Value>>;

    /// Atomic conditional replace of the row at `lookup`.
    ///
    /// The stored row must carry string `slug` and `id` fields. The driver
    /// rejects, with `Error::ElementAlreadyExists` naming the holder's
    /// table, a lookup key held by another table and a row whose slug or id
    /// is already held by a different row in any table.
    fn replace(&self, bucket: Bucket, lookup: Lookup<'_>, decide: &mut ReplaceFn<'_>)
        -> Result<Change>;

    /// Open a change feed on a table
    fn subscribe(&self, bucket: Bucket) -> Result<Subscription>;

    /// Cancel a change feed; unknown ids are ignored
    fn unsubscribe(&self, bucket: Bucket, id: SubscriptionId);
}
