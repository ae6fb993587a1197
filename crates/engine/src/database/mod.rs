//! The `Jellyfish` handle and connect/disconnect/reset
//!
//! This module provides the main handle that orchestrates:
//! - the backing-store driver and its per-bucket tables
//! - the card cache
//! - the link-type registry
//! - the bounded fan-out pool used by multi-bucket scans
//! - every open change stream
//!
//! Reads live in `query`, writes in `write`; both are `impl Engine` blocks.
//!
//! ## Lifecycle
//!
//! [`Jellyfish::connect`] creates any missing table and loads the link names
//! recorded by existing link cards. [`Jellyfish::disconnect`] closes every
//! open stream; afterwards each operation fails with `Error::Database`.
//! Clones of a handle share one engine.

pub mod config;
mod query;
mod write;

pub use config::{JellyfishConfig, CONFIG_FILE_NAME};
pub use query::QueryOptions;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use jellyfish_core::{Bucket, Card, Error, PropertyPath, Result};
use jellyfish_storage::{Backend, MemoryBackend, ScanRequest, SortDirection};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde_json::Value;
use tracing::info;

use crate::cache::{CacheStats, CardCache};
use crate::links::{LinkRegistry, LinkSource};
use crate::stream::{ChangeStream, StreamShared};

// ============================================================================
// Engine
// ============================================================================

/// State shared by every clone of a handle and by its streams
pub(crate) struct Engine {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) config: JellyfishConfig,
    pub(crate) default_sort: PropertyPath,
    pub(crate) cache: CardCache,
    pub(crate) links: LinkRegistry,
    pub(crate) pool: ThreadPool,
    streams: Mutex<Vec<Weak<StreamShared>>>,
    connected: AtomicBool,
}

impl Engine {
    pub(crate) fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::database("not connected"))
        }
    }

    fn create_tables(&self) -> Result<()> {
        for bucket in Bucket::ALL {
            self.backend.create_table(bucket)?;
        }
        Ok(())
    }

    /// Register the relation names of every stored link card
    fn load_link_types(&self) -> Result<usize> {
        let all = |_: &Value| true;
        let rows = self.backend.scan(
            Bucket::Links,
            &ScanRequest {
                filter: &all,
                sort_by: None,
                direction: SortDirection::Asc,
                skip: 0,
                limit: None,
            },
        )?;
        for row in &rows {
            let name = row.get("name").and_then(Value::as_str).unwrap_or_default();
            let inverse = row
                .pointer("/data/inverseName")
                .and_then(Value::as_str)
                .unwrap_or_default();
            self.links.register(name, inverse);
        }
        Ok(rows.len())
    }

    pub(crate) fn track_stream(&self, stream: &Arc<StreamShared>) {
        let mut streams = self.streams.lock();
        streams.retain(|weak| weak.strong_count() > 0);
        streams.push(Arc::downgrade(stream));
    }

    fn close_streams(&self) -> usize {
        let open: Vec<Arc<StreamShared>> = self
            .streams
            .lock()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();
        for stream in &open {
            stream.close();
        }
        open.len()
    }
}

impl LinkSource for Engine {
    fn registry(&self) -> &LinkRegistry {
        &self.links
    }

    fn get_by_id(&self, id: &str) -> Result<Option<Value>> {
        self.find_by_id(id)
    }

    fn query(&self, schema: &Value) -> Result<Vec<Value>> {
        self.run_query(schema, &QueryOptions::default())
    }
}

// ============================================================================
// Jellyfish
// ============================================================================

/// Handle to a connected engine
///
/// Cheap to clone; all clones share the cache, link registry and streams.
///
/// # Example
///
/// ```
/// use jellyfish_core::Card;
/// use jellyfish_engine::{Jellyfish, QueryOptions};
/// use serde_json::json;
///
/// let db = Jellyfish::in_memory().unwrap();
/// db.insert_element(Card::new("foo", "card")).unwrap();
///
/// let found = db
///     .query(
///         &json!({ "properties": { "slug": { "const": "foo" } }, "required": ["slug"] }),
///         &QueryOptions::default(),
///     )
///     .unwrap();
/// assert_eq!(found, vec![json!({ "slug": "foo" })]);
/// ```
#[derive(Clone)]
pub struct Jellyfish {
    engine: Arc<Engine>,
}

impl Jellyfish {
    /// Connect to a backing store, creating any missing table.
    ///
    /// # Errors
    ///
    /// Fails on an invalid config, when a table cannot be created or when
    /// the fan-out pool cannot be started.
    pub fn connect(backend: Arc<dyn Backend>, config: JellyfishConfig) -> Result<Self> {
        config.validate()?;
        let default_sort = config.default_sort_path()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.fan_out_concurrency)
            .thread_name(|i| format!("jellyfish-scan-{}", i))
            .build()
            .map_err(|e| Error::database(format!("failed to start scan pool: {}", e)))?;

        let engine = Engine {
            backend,
            cache: CardCache::new(config.cache_enabled),
            default_sort,
            links: LinkRegistry::new(),
            pool,
            streams: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            config,
        };
        engine.create_tables()?;
        let link_cards = engine.load_link_types()?;

        info!(
            target: "jellyfish::db",
            fan_out = engine.config.fan_out_concurrency,
            cache = engine.config.cache_enabled,
            link_cards,
            "Connected"
        );
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    /// Connect to a fresh [`MemoryBackend`] with the default config
    pub fn in_memory() -> Result<Self> {
        Self::connect(Arc::new(MemoryBackend::new()), JellyfishConfig::default())
    }

    /// Close every open stream and refuse further operations.
    ///
    /// Calling it again is a no-op.
    pub fn disconnect(&self) {
        if !self.engine.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        let closed = self.engine.close_streams();
        self.engine.cache.reset();
        info!(target: "jellyfish::db", streams = closed, "Disconnected");
    }

    /// Whether the handle still accepts operations
    pub fn is_connected(&self) -> bool {
        self.engine.connected.load(Ordering::Acquire)
    }

    /// Drop and recreate every table, clear the cache and forget registered
    /// link names. Open streams end with `Closed`.
    pub fn reset(&self) -> Result<()> {
        self.engine.ensure_connected()?;
        self.engine.backend.drop_all()?;
        self.engine.create_tables()?;
        self.engine.cache.reset();
        self.engine.links.reset();
        info!(target: "jellyfish::db", "Reset all tables");
        Ok(())
    }

    /// The configuration this handle was connected with
    pub fn config(&self) -> &JellyfishConfig {
        &self.engine.config
    }

    /// Cache hit/miss counters
    pub fn cache_stats(&self) -> CacheStats {
        self.engine.cache.stats()
    }

    /// Make a relation name and its inverse resolvable in `$$links`
    pub fn register_link_type(&self, name: &str, inverse_name: &str) {
        self.engine.links.register(name, inverse_name);
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Card with this id in any bucket
    pub fn get_element_by_id(&self, id: &str) -> Result<Option<Card>> {
        self.engine.ensure_connected()?;
        to_card(self.engine.find_by_id(id)?)
    }

    /// Card with this slug in any bucket
    pub fn get_element_by_slug(&self, slug: &str) -> Result<Option<Card>> {
        self.engine.ensure_connected()?;
        to_card(self.engine.find_by_slug(slug)?)
    }

    /// Card with this id in one bucket
    pub fn get_element_by_id_in(&self, bucket: Bucket, id: &str) -> Result<Option<Card>> {
        self.engine.ensure_connected()?;
        to_card(self.engine.fetch_id(bucket, id)?)
    }

    /// Card with this slug in one bucket
    pub fn get_element_by_slug_in(&self, bucket: Bucket, slug: &str) -> Result<Option<Card>> {
        self.engine.ensure_connected()?;
        to_card(self.engine.fetch_slug(bucket, slug)?)
    }

    /// Cards for a list of ids, in request order, skipping unknown ids
    pub fn get_elements_by_id<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<Card>> {
        self.engine.ensure_connected()?;
        let mut cards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(card) = to_card(self.engine.find_by_id(id.as_ref())?)? {
                cards.push(card);
            }
        }
        Ok(cards)
    }

    /// Run a schema query; see [`QueryOptions`] for paging and ordering
    pub fn query(&self, schema: &Value, options: &QueryOptions) -> Result<Vec<Value>> {
        self.engine.ensure_connected()?;
        self.engine.run_query(schema, options)
    }

    /// Open a change stream over every bucket the schema can match
    pub fn stream(&self, schema: &Value) -> Result<ChangeStream> {
        self.engine.ensure_connected()?;
        ChangeStream::open(Arc::clone(&self.engine), schema)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Create a card. Fails with `ElementAlreadyExists` when the slug is taken.
    pub fn insert_element(&self, card: Card) -> Result<Card> {
        self.engine.ensure_connected()?;
        Card::from_value(self.engine.insert(card)?)
    }

    /// Create a card or replace the one with the same slug (or id).
    ///
    /// The stored id, slug, creation time and links are kept.
    pub fn upsert_element(&self, card: Card) -> Result<Card> {
        self.engine.ensure_connected()?;
        Card::from_value(self.engine.upsert(card)?)
    }
}

impl std::fmt::Debug for Jellyfish {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jellyfish")
            .field("connected", &self.is_connected())
            .field("config", &self.engine.config)
            .finish()
    }
}

fn to_card(row: Option<Value>) -> Result<Option<Card>> {
    row.map(Card::from_value).transpose()
}
