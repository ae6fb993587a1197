//! Core types for Jellyfish
//!
//! This crate defines the foundational types used throughout the system:
//! - Card: the generic typed record, plus link endpoints
//! - Bucket: the closed set of physical tables and the type → bucket router
//! - PropertyPath: dotted paths into card documents
//! - compare_json: total ordering used by sorted scans
//! - CompiledSchema: the JSON-Schema subset used for queries and filtering
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bucket;
pub mod card;
pub mod error;
pub mod order;
pub mod path;
pub mod schema;

pub use bucket::{base_type, bucket_for, buckets_for_schema, Bucket};
pub use card::{generate_slug, validate_slug, Card, LinkEndpoint, DEFAULT_VERSION, LINK_TYPE};
pub use error::{Error, ErrorKind, Result};
pub use order::compare_json;
pub use path::{PathParseError, PathSegment, PropertyPath};
pub use schema::{json_equal, merge_schemas, CompiledSchema, SchemaNode, LINKS_KEYWORD, SORT_KEYWORD};
