//! MemoryBackend: in-process table store
//!
//! This module implements the [`Backend`] trait using:
//! - `BTreeMap<slug, row>` per table for primary-key ordered storage
//! - [`IdIndex`] per table for the unique `id` index
//! - [`KeyOwners`] across tables, so a slug or id is held by one table only
//! - one `parking_lot::RwLock` over all tables and the key owners, so a
//!   conditional replace runs its decision closure, its uniqueness checks
//!   and its write under the same write lock
//! - `std::sync::mpsc` channels for change feeds, fed while the write lock
//!   is still held so every subscriber sees changes in commit order
//!
//! # Design Notes
//!
//! - **No history**: a row stores only its latest value.
//! - **No expiry**: rows are never removed except by [`Backend::drop_all`];
//!   logical deletion is the caller's `active: false`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use jellyfish_core::{compare_json, Bucket, Error, Result};

use crate::backend::{
    Backend, Change, Lookup, ReplaceFn, ScanRequest, SortDirection, Subscription, SubscriptionId,
};
use crate::index::{IdIndex, KeyOwners};

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<String, Value>,
    ids: IdIndex,
    subscribers: Vec<(SubscriptionId, Sender<Change>)>,
}

impl Table {
    fn slug_for(&self, lookup: Lookup<'_>) -> Option<String> {
        match lookup {
            Lookup::Slug(slug) => self.rows.contains_key(slug).then(|| slug.to_string()),
            Lookup::Id(id) => self.ids.get(id).map(str::to_string),
        }
    }

    /// Deliver a change, dropping subscribers whose receiver is gone
    fn notify(&mut self, change: &Change) {
        self.subscribers
            .retain(|(_, sender)| sender.send(change.clone()).is_ok());
    }
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<Bucket, Table>,
    owners: KeyOwners,
}

fn string_field<'a>(row: &'a Value, field: &str) -> Result<&'a str> {
    row.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::MissingPrimaryKey(format!("row has no string '{}'", field)))
}

/// In-memory backing store
///
/// Thread-safe through a single `parking_lot::RwLock`; reads share the
/// lock, writes and subscription changes take it exclusively.
#[derive(Debug)]
pub struct MemoryBackend {
    state: RwLock<State>,
    next_subscription: AtomicU64,
}

impl MemoryBackend {
    /// Create a backend with no tables
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Create a backend with every bucket's table already present
    pub fn with_all_tables() -> Self {
        let backend = Self::new();
        {
            let mut state = backend.state.write();
            for bucket in Bucket::ALL {
                state.tables.entry(bucket).or_default();
            }
        }
        backend
    }

    /// Number of rows in a table (0 when the table is missing)
    pub fn row_count(&self, bucket: Bucket) -> usize {
        self.state.read().tables.get(&bucket).map_or(0, |t| t.rows.len())
    }

    /// Number of live subscriptions on a table
    pub fn subscriber_count(&self, bucket: Bucket) -> usize {
        self.state
            .read()
            .tables
            .get(&bucket)
            .map_or(0, |t| t.subscribers.len())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn create_table(&self, bucket: Bucket) -> Result<()> {
        self.state.write().tables.entry(bucket).or_default();
        Ok(())
    }

    fn has_table(&self, bucket: Bucket) -> bool {
        self.state.read().tables.contains_key(&bucket)
    }

    fn drop_all(&self) -> Result<()> {
        let mut state = self.state.write();
        debug!(target: "jellyfish::backend", tables = state.tables.len(), "Dropping all tables");
        state.tables.clear();
        state.owners.clear();
        Ok(())
    }

    fn get(&self, bucket: Bucket, lookup: Lookup<'_>) -> Result<Option<Value>> {
        let state = self.state.read();
        let Some(table) = state.tables.get(&bucket) else {
            return Ok(None);
        };
        Ok(table
            .slug_for(lookup)
            .and_then(|slug| table.rows.get(&slug))
            .cloned())
    }

    fn scan(&self, bucket: Bucket, request: &ScanRequest<'_>) -> Result<Vec<Value>> {
        let state = self.state.read();
        let Some(table) = state.tables.get(&bucket) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<&Value> = table
            .rows
            .values()
            .filter(|row| (request.filter)(row))
            .collect();

        match request.sort_by {
            Some(path) => rows.sort_by(|a, b| {
                let ord = compare_json(path.get(a), path.get(b));
                match request.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            }),
            None if request.direction == SortDirection::Desc => rows.reverse(),
            None => {}
        }

        Ok(rows
            .into_iter()
            .skip(request.skip)
            .take(request.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn replace(
        &self,
        bucket: Bucket,
        lookup: Lookup<'_>,
        decide: &mut ReplaceFn<'_>,
    ) -> Result<Change> {
        let mut guard = self.state.write();
        let State { tables, owners } = &mut *guard;
        let table = tables
            .get_mut(&bucket)
            .ok_or_else(|| Error::database(format!("table '{}' does not exist", bucket)))?;

        if let Some(holder) = owners.held_elsewhere(bucket, lookup) {
            return Err(Error::ElementAlreadyExists {
                bucket: holder,
                key: lookup.key().to_string(),
            });
        }

        let current_slug = table.slug_for(lookup);
        let old_val = current_slug
            .as_ref()
            .and_then(|slug| table.rows.get(slug))
            .cloned();

        let new_val = decide(old_val.as_ref())?;
        let slug = string_field(&new_val, "slug")?.to_string();
        let id = string_field(&new_val, "id")?.to_string();

        match &current_slug {
            Some(current) if *current != slug => {
                return Err(Error::database(format!(
                    "primary key of '{}' cannot change to '{}'",
                    current, slug
                )));
            }
            None if table.rows.contains_key(&slug) => {
                return Err(Error::ElementAlreadyExists { bucket, key: slug });
            }
            _ => {}
        }

        for key in [Lookup::Slug(&slug), Lookup::Id(&id)] {
            if let Some(holder) = owners.held_elsewhere(bucket, key) {
                return Err(Error::ElementAlreadyExists {
                    bucket: holder,
                    key: key.key().to_string(),
                });
            }
        }
        if table.ids.held_by_other(&id, &slug) {
            return Err(Error::ElementAlreadyExists { bucket, key: id });
        }

        if let Some(old_id) = old_val.as_ref().and_then(|old| old.get("id")).and_then(Value::as_str) {
            if old_id != id {
                table.ids.remove(old_id);
                owners.release_id(old_id);
            }
        }
        owners.claim(bucket, &slug, &id);
        table.ids.insert(id, slug.clone());
        table.rows.insert(slug, new_val.clone());

        let change = Change {
            old_val,
            new_val: Some(new_val),
        };
        table.notify(&change);
        Ok(change)
    }

    fn subscribe(&self, bucket: Bucket) -> Result<Subscription> {
        let mut state = self.state.write();
        let table = state
            .tables
            .get_mut(&bucket)
            .ok_or_else(|| Error::database(format!("table '{}' does not exist", bucket)))?;

        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        let (sender, changes) = mpsc::channel();
        table.subscribers.push((id, sender));
        debug!(target: "jellyfish::backend", %bucket, subscription = id, "Change feed opened");

        Ok(Subscription { id, changes })
    }

    fn unsubscribe(&self, bucket: Bucket, id: SubscriptionId) {
        if let Some(table) = self.state.write().tables.get_mut(&bucket) {
            let before = table.subscribers.len();
            table.subscribers.retain(|(sub, _)| *sub != id);
            if table.subscribers.len() != before {
                debug!(target: "jellyfish::backend", %bucket, subscription = id, "Change feed closed");
            }
        }
    }
}
