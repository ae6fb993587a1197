//! Storage layer for Jellyfish
//!
//! This crate defines the backing-store contract and ships one driver:
//! - `Backend`: point lookup, filtered scan, conditional replace, change feeds
//! - `MemoryBackend`: BTreeMap-based tables behind a single RwLock
//! - `IdIndex`: the unique secondary index on `id`
//! - `KeyOwners`: which table holds each slug and id

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod index;
pub mod memory;

pub use backend::{
    Backend, Change, Lookup, ReplaceFn, RowFilter, ScanRequest, SortDirection, Subscription,
    SubscriptionId,
};
pub use index::{IdIndex, KeyOwners};
pub use memory::MemoryBackend;
