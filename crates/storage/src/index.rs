//! Secondary unique indexes
//!
//! Tables are keyed by slug. `IdIndex` maps each row's id back to its slug
//! so point lookups by id are O(1) and id uniqueness can be enforced on
//! write without scanning. `KeyOwners` maps every slug and id to the table
//! holding it, so a key stays unique across all tables.

use std::collections::HashMap;

use jellyfish_core::Bucket;

use crate::backend::Lookup;

/// Secondary index: id → slug
#[derive(Debug, Default)]
pub struct IdIndex {
    index: HashMap<String, String>,
}

impl IdIndex {
    /// Create a new empty IdIndex
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
        }
    }

    /// Point an id at a slug
    pub fn insert(&mut self, id: impl Into<String>, slug: impl Into<String>) {
        self.index.insert(id.into(), slug.into());
    }

    /// Remove an id
    pub fn remove(&mut self, id: &str) {
        self.index.remove(id);
    }

    /// Slug holding the given id
    pub fn get(&self, id: &str) -> Option<&str> {
        self.index.get(id).map(String::as_str)
    }

    /// Whether the id is taken by a row other than `slug`
    pub fn held_by_other(&self, id: &str, slug: &str) -> bool {
        self.get(id).map_or(false, |owner| owner != slug)
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of indexed ids
    pub fn len(&self) -> usize {
        self.index.len()
    }
}

/// Cross-table index: slug or id → owning table
#[derive(Debug, Default)]
pub struct KeyOwners {
    slugs: HashMap<String, Bucket>,
    ids: HashMap<String, Bucket>,
}

impl KeyOwners {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding the key of a lookup
    pub fn owner(&self, lookup: Lookup<'_>) -> Option<Bucket> {
        match lookup {
            Lookup::Slug(slug) => self.slugs.get(slug).copied(),
            Lookup::Id(id) => self.ids.get(id).copied(),
        }
    }

    /// Table other than `bucket` holding the key of a lookup
    pub fn held_elsewhere(&self, bucket: Bucket, lookup: Lookup<'_>) -> Option<Bucket> {
        self.owner(lookup).filter(|owner| *owner != bucket)
    }

    /// Record a row's slug and id as held by `bucket`
    pub fn claim(&mut self, bucket: Bucket, slug: &str, id: &str) {
        self.slugs.insert(slug.to_string(), bucket);
        self.ids.insert(id.to_string(), bucket);
    }

    /// Forget an id
    pub fn release_id(&mut self, id: &str) {
        self.ids.remove(id);
    }

    /// Forget every key
    pub fn clear(&mut self) {
        self.slugs.clear();
        self.ids.clear();
    }

    /// Number of indexed slugs
    pub fn len(&self) -> usize {
        self.slugs.len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.slugs.is_empty()
    }
}
