//! Card: the generic typed record
//!
//! Cards are stored as JSON documents. This module gives them a typed shape
//! for the write path while keeping `data` free-form.
//!
//! ## Server-owned fields
//!
//! - `id` is generated on insert and never changes.
//! - `slug` is client-chosen (or generated) and never changes after insert.
//! - `links` and `linked_at` are derived from link records and are never
//!   taken from client input.

use crate::bucket::{bucket_for, Bucket};
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Card type of link records
pub const LINK_TYPE: &str = "link";

/// Default card version
pub const DEFAULT_VERSION: &str = "1.0.0";

static SLUG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9-]+$").expect("slug pattern is a valid regex")
});

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn default_active() -> bool {
    true
}

/// A stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    /// Server-generated unique identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Unique human key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    /// Card type, optionally versioned (`user@1.0.0`)
    #[serde(rename = "type", default)]
    pub card_type: String,
    /// Semver of the card contents
    #[serde(default = "default_version")]
    pub version: String,
    /// `false` marks a logically deleted card
    #[serde(default = "default_active")]
    pub active: bool,
    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Visibility markers
    #[serde(default)]
    pub markers: Vec<String>,
    /// Requirements
    #[serde(default)]
    pub requires: Vec<Value>,
    /// Capabilities
    #[serde(default)]
    pub capabilities: Vec<Value>,
    /// Display name (for links: the forward relation name)
    #[serde(default)]
    pub name: Option<String>,
    /// RFC 3339 creation time
    #[serde(default)]
    pub created_at: Option<String>,
    /// RFC 3339 time of the last upsert
    #[serde(default)]
    pub updated_at: Option<String>,
    /// Link name → time of the most recent link of that name
    #[serde(default)]
    pub linked_at: Map<String, Value>,
    /// Link name → denormalized `{ $link, id, slug, type }` entries
    #[serde(default)]
    pub links: BTreeMap<String, Vec<Value>>,
    /// Free-form payload
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// One side of a link record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEndpoint {
    /// Endpoint card id
    pub id: String,
    /// Endpoint card type
    #[serde(rename = "type")]
    pub card_type: String,
}

impl Card {
    /// Create a card with a slug and type and everything else defaulted
    pub fn new(slug: impl Into<String>, card_type: impl Into<String>) -> Self {
        Card {
            slug: Some(slug.into()),
            ..Card::of_type(card_type)
        }
    }

    /// Create a card without a slug (one is generated on insert)
    pub fn of_type(card_type: impl Into<String>) -> Self {
        Card {
            id: None,
            slug: None,
            card_type: card_type.into(),
            version: default_version(),
            active: true,
            tags: Vec::new(),
            markers: Vec::new(),
            requires: Vec::new(),
            capabilities: Vec::new(),
            name: None,
            created_at: None,
            updated_at: None,
            linked_at: Map::new(),
            links: BTreeMap::new(),
            data: Map::new(),
        }
    }

    /// Create a link record between two cards
    pub fn link(
        slug: impl Into<String>,
        name: impl Into<String>,
        inverse_name: impl Into<String>,
        from: &Card,
        to: &Card,
    ) -> Result<Self> {
        let mut link = Card::new(slug, LINK_TYPE);
        link.name = Some(name.into());
        link.data.insert("inverseName".into(), Value::String(inverse_name.into()));
        link.data.insert("from".into(), serde_json::to_value(from.endpoint()?)?);
        link.data.insert("to".into(), serde_json::to_value(to.endpoint()?)?);
        Ok(link)
    }

    /// Set a `data` field
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Set the `active` flag
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Bucket this card is stored in
    pub fn bucket(&self) -> Bucket {
        bucket_for(&self.card_type)
    }

    /// Whether this card is a link record
    pub fn is_link(&self) -> bool {
        self.bucket() == Bucket::Links
    }

    /// `{ id, type }` reference to this card
    pub fn endpoint(&self) -> Result<LinkEndpoint> {
        let id = self
            .id
            .clone()
            .ok_or_else(|| Error::MissingPrimaryKey("card has no id".into()))?;
        Ok(LinkEndpoint {
            id,
            card_type: self.card_type.clone(),
        })
    }

    /// Denormalized reference stored in another card's `links` map
    pub fn link_entry(&self, link_id: &str) -> Value {
        json!({
            "$link": link_id,
            "id": self.id,
            "slug": self.slug,
            "type": self.card_type,
        })
    }

    /// Link record only: `(from, to)` endpoints
    pub fn link_endpoints(&self) -> Option<(LinkEndpoint, LinkEndpoint)> {
        let from = serde_json::from_value(self.data.get("from")?.clone()).ok()?;
        let to = serde_json::from_value(self.data.get("to")?.clone()).ok()?;
        Some((from, to))
    }

    /// Link record only: the reverse relation name
    pub fn inverse_name(&self) -> Option<&str> {
        self.data.get("inverseName").and_then(Value::as_str)
    }

    /// Serialize to a JSON document
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserialize from a JSON document
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Validate a client-supplied slug.
///
/// Slugs are lowercase alphanumerics and dashes, at most `max_length` bytes.
pub fn validate_slug(slug: &str, max_length: usize) -> Result<()> {
    if slug.len() > max_length {
        return Err(Error::InvalidSlug(format!(
            "slug is {} bytes, limit is {}",
            slug.len(),
            max_length
        )));
    }
    if !SLUG_PATTERN.is_match(slug) {
        return Err(Error::InvalidSlug(format!(
            "'{}' must match {}",
            slug,
            SLUG_PATTERN.as_str()
        )));
    }
    Ok(())
}

/// Generate a slug for a card inserted without one
pub fn generate_slug(card_type: &str) -> String {
    let prefix: String = crate::bucket::base_type(card_type)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let prefix = if prefix.is_empty() { "card".to_string() } else { prefix };
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}
