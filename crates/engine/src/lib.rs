//! Query, link and stream engine for Jellyfish
//!
//! This crate orchestrates the lower layers:
//! - Jellyfish: the connected handle (connect, disconnect, reset)
//! - Query engine: point lookups, pushed-down scans, bounded multi-bucket fan-out
//! - Write path: atomic insert/upsert with slug and id uniqueness
//! - Links: `$$links` resolution and endpoint denormalization
//! - Cache: id/slug lookups with cross-bucket exclusivity
//! - Streams: per-bucket change feeds merged into one filtered stream
//!
//! The engine is the only component that knows about:
//! - which bucket answers which query
//! - how link cards are mirrored onto their endpoints
//! - when cached entries go stale

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod database;
pub mod links;
pub mod stream;

pub use cache::{CacheEntry, CacheStats, CardCache};
pub use database::{Jellyfish, JellyfishConfig, QueryOptions, CONFIG_FILE_NAME};
pub use links::{LinkKind, LinkRegistry, HAS_ATTACHED_ELEMENT, IS_ATTACHED_TO};
pub use stream::{ChangeStream, StreamEvent};
