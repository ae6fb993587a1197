//! Link resolution and denormalization
//!
//! ## Resolution
//!
//! A query schema may declare `$$links`, a map of link name to sub-schema.
//! [`evaluate_card`] resolves every declared name for a card and gates the
//! match: a card with no result for any one declared name is dropped.
//!
//! Results for a name are the union of:
//! - entries denormalized into the card's `links[name]` by link records
//! - for `is attached to`, the card its `data.target` points at
//! - for `has attached element`, the cards whose `data.target` is this card
//!
//! Each target is materialized through the sub-schema, recursively
//! resolving nested `$$links`.
//!
//! ## Denormalization
//!
//! A link record `{ name, data: { inverseName, from, to } }` is mirrored on
//! both endpoints: `from.links[name]` and `to.links[inverseName]` each hold
//! a `{ $link, id, slug, type }` reference to the other endpoint.
//! [`add_link`] and [`remove_link`] compute the updated endpoint documents.

pub mod registry;

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use jellyfish_core::{merge_schemas, Card, CompiledSchema, Error, Result};
use serde_json::{json, Map, Value};
use tracing::debug;

pub use registry::{LinkKind, LinkRegistry, HAS_ATTACHED_ELEMENT, IS_ATTACHED_TO};

/// Read access needed to resolve links
pub trait LinkSource {
    /// Known link names
    fn registry(&self) -> &LinkRegistry;

    /// Fetch a card by id from any bucket
    fn get_by_id(&self, id: &str) -> Result<Option<Value>>;

    /// Run a query, returning materialized results
    fn query(&self, schema: &Value) -> Result<Vec<Value>>;
}

fn id_of(value: &Value) -> Option<&str> {
    value.get("id").and_then(Value::as_str)
}

/// Union of results, deduplicated by target id
struct Targets {
    seen: HashSet<String>,
    values: Vec<Value>,
}

impl Targets {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            values: Vec::new(),
        }
    }

    fn claim(&mut self, id: &str) -> bool {
        self.seen.insert(id.to_string())
    }

    fn push_unique(&mut self, value: Value) {
        if let Some(id) = id_of(&value) {
            if !self.claim(id) {
                return;
            }
        } else if self.values.contains(&value) {
            return;
        }
        self.values.push(value);
    }
}

fn resolve_id<S: LinkSource + ?Sized>(
    source: &S,
    id: &str,
    schema: &CompiledSchema,
    targets: &mut Targets,
) -> Result<()> {
    if !targets.claim(id) {
        return Ok(());
    }
    if let Some(target) = source.get_by_id(id)? {
        if let Some(value) = materialize(source, &target, schema)? {
            targets.values.push(value);
        }
    }
    Ok(())
}

/// Resolve one link name for a card.
///
/// # Errors
///
/// `Error::UnknownLinkType` when the name was never registered.
pub fn evaluate<S: LinkSource + ?Sized>(
    source: &S,
    card: &Value,
    name: &str,
    link_schema: &Value,
) -> Result<Vec<Value>> {
    let kind = source
        .registry()
        .kind(name)
        .ok_or_else(|| Error::UnknownLinkType(name.to_string()))?;
    let compiled = CompiledSchema::compile(link_schema)?;
    let mut targets = Targets::new();

    let denormalized = card
        .get("links")
        .and_then(|links| links.get(name))
        .and_then(Value::as_array);
    for entry in denormalized.into_iter().flatten() {
        if let Some(id) = id_of(entry) {
            resolve_id(source, id, &compiled, &mut targets)?;
        }
    }

    match kind {
        LinkKind::Forward => {
            if let Some(target) = card.pointer("/data/target").and_then(Value::as_str) {
                resolve_id(source, target, &compiled, &mut targets)?;
            }
        }
        LinkKind::Reverse => {
            if let Some(id) = id_of(card) {
                let pointing_here = json!({
                    "type": "object",
                    "properties": {
                        "data": {
                            "type": "object",
                            "properties": { "target": { "const": id } },
                            "required": ["target"]
                        }
                    },
                    "required": ["data"]
                });
                for value in source.query(&merge_schemas(link_schema, &pointing_here))? {
                    targets.push_unique(value);
                }
            }
        }
        LinkKind::Record => {}
    }

    debug!(
        target: "jellyfish::links",
        name,
        card = ?id_of(card),
        results = targets.values.len(),
        "Resolved link"
    );
    Ok(targets.values)
}

/// Resolve every declared link; `None` when any of them has no result
pub fn evaluate_card<S: LinkSource + ?Sized>(
    source: &S,
    card: &Value,
    links: &BTreeMap<String, Value>,
) -> Result<Option<Map<String, Value>>> {
    let mut resolved = Map::new();
    for (name, link_schema) in links {
        let results = evaluate(source, card, name, link_schema)?;
        if results.is_empty() {
            return Ok(None);
        }
        resolved.insert(name.clone(), Value::Array(results));
    }
    Ok(Some(resolved))
}

/// Match a card, resolve its declared links and filter it.
///
/// The output's `links` holds exactly the resolved `$$links`.
pub fn materialize<S: LinkSource + ?Sized>(
    source: &S,
    card: &Value,
    schema: &CompiledSchema,
) -> Result<Option<Value>> {
    if !schema.matches(card) {
        return Ok(None);
    }
    let resolved = if schema.links().is_empty() {
        None
    } else {
        match evaluate_card(source, card, schema.links())? {
            Some(resolved) => Some(resolved),
            None => return Ok(None),
        }
    };
    let Some(mut filtered) = schema.filter(card) else {
        return Ok(None);
    };
    if let (Some(resolved), Some(object)) = (resolved, filtered.as_object_mut()) {
        object.insert("links".to_string(), Value::Object(resolved));
    }
    Ok(Some(filtered))
}

// ============================================================================
// Denormalization
// ============================================================================

/// Relation name under which `card` sees `other` through `link`, if any
pub fn parse_card<'a>(link: &'a Card, card: &Value, other: &Value) -> Option<&'a str> {
    let (from, to) = link.link_endpoints()?;
    let card_id = id_of(card)?;
    let other_id = id_of(other)?;
    if card_id == from.id && other_id == to.id {
        link.name.as_deref()
    } else if card_id == to.id && other_id == from.id {
        link.inverse_name()
    } else {
        None
    }
}

fn link_map<'a>(card: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Map<String, Value>> {
    if !matches!(card.get(key), Some(Value::Object(_))) {
        card.insert(key.to_string(), Value::Object(Map::new()));
    }
    card.get_mut(key).and_then(Value::as_object_mut)
}

/// `card` with a reference to `other` added under the relation `link`
/// gives it. Unrelated cards come back unchanged; adding twice is a no-op,
/// and a re-pointed link replaces its earlier entry.
pub fn add_link(link: &Card, card: &Value, other: &Value) -> Value {
    let mut updated = card.clone();
    let (Some(name), Some(link_id)) = (parse_card(link, card, other), link.id.as_deref()) else {
        return updated;
    };
    let Some(object) = updated.as_object_mut() else {
        return updated;
    };

    let Some(links) = link_map(object, "links") else {
        return updated;
    };
    let entries = links
        .entry(name.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !entries.is_array() {
        *entries = Value::Array(Vec::new());
    }
    let entry = json!({
        "$link": link_id,
        "id": other.get("id"),
        "slug": other.get("slug"),
        "type": other.get("type"),
    });
    if let Value::Array(entries) = entries {
        let existing = entries
            .iter()
            .position(|e| e.get("$link").and_then(Value::as_str) == Some(link_id));
        match existing {
            Some(i) if entries[i] == entry => return updated,
            Some(i) => entries[i] = entry,
            None => entries.push(entry),
        }
    }

    let linked_at = link
        .created_at
        .clone()
        .unwrap_or_else(|| Utc::now().to_rfc3339());
    if let Some(times) = link_map(object, "linked_at") {
        times.insert(name.to_string(), Value::String(linked_at));
    }
    updated
}

/// `card` without any reference created by `link`
pub fn remove_link(link: &Card, card: &Value) -> Value {
    let mut updated = card.clone();
    let Some(link_id) = link.id.as_deref() else {
        return updated;
    };
    let Some(links) = updated.get_mut("links").and_then(Value::as_object_mut) else {
        return updated;
    };
    for entries in links.values_mut() {
        if let Value::Array(list) = entries {
            list.retain(|e| e.get("$link").and_then(Value::as_str) != Some(link_id));
        }
    }
    links.retain(|_, entries| !matches!(entries, Value::Array(list) if list.is_empty()));
    let remaining: Vec<String> = links.keys().cloned().collect();
    if let Some(times) = updated.get_mut("linked_at").and_then(Value::as_object_mut) {
        times.retain(|name, _| remaining.contains(name));
    }
    updated
}
