//! Jellyfish - a schema-queried document store
//!
//! Jellyfish layers a JSON-Schema query language, a bidirectional link
//! graph, a read cache and live change feeds over a table-oriented backing
//! store. Records ("cards") are routed to one of four buckets by type.
//!
//! # Quick Start
//!
//! ```
//! use jellyfish::{Card, Jellyfish, QueryOptions};
//! use serde_json::json;
//!
//! let db = Jellyfish::in_memory().unwrap();
//! db.insert_element(Card::new("foo", "card").with_data("timestamp", json!(1)))
//!     .unwrap();
//!
//! let cards = db
//!     .query(
//!         &json!({
//!             "type": "object",
//!             "properties": { "slug": { "type": "string" }, "type": { "const": "card" } },
//!             "required": ["slug"]
//!         }),
//!         &QueryOptions::default(),
//!     )
//!     .unwrap();
//! assert_eq!(cards, vec![json!({ "slug": "foo", "type": "card" })]);
//! ```
//!
//! # Architecture
//!
//! - `jellyfish-core`: cards, buckets, errors, the schema matcher/filter
//! - `jellyfish-storage`: the backend contract and the in-memory backend
//! - `jellyfish-formula`: the formula language for computed properties
//! - `jellyfish-engine`: queries, writes, links, cache and streams

pub use jellyfish_core::{
    bucket_for, buckets_for_schema, merge_schemas, Bucket, Card, CompiledSchema, Error, ErrorKind,
    LinkEndpoint, PropertyPath, Result,
};
pub use jellyfish_engine::{
    CacheStats, ChangeStream, Jellyfish, JellyfishConfig, LinkKind, QueryOptions, StreamEvent,
    CONFIG_FILE_NAME, HAS_ATTACHED_ELEMENT, IS_ATTACHED_TO,
};
pub use jellyfish_formula::{evaluate, evaluate_object, Formula};
pub use jellyfish_storage::{Backend, MemoryBackend, SortDirection};
