//! Write path: insert and upsert
//!
//! Each write is exactly one [`Backend::replace`] call. The decision closure
//! runs inside the driver's atomic step and sees the current row, so two
//! writers racing on one slug are serialized there:
//!
//! - insert: an existing row fails the write with `ElementAlreadyExists`
//!   (the backend also rejects a slug or id held by another bucket)
//! - upsert: an existing row is replaced, keeping its id, slug, creation
//!   time and server-derived `links`/`linked_at`
//!
//! A client-supplied id is never stored on insert; the server assigns one.
//!
//! ## Link propagation
//!
//! A link card is mirrored onto both endpoints' `links` maps before the
//! link row itself is stored, so anyone who observes the link on a change
//! feed already finds the endpoints updated. The staged row is the exact
//! row the decision closure would store; when the link write then fails the
//! endpoints are restored. Each endpoint update is its own conditional
//! replace and is best effort: an endpoint that cannot be resolved or
//! written is logged and skipped.
//!
//! [`Backend::replace`]: jellyfish_storage::Backend::replace

use chrono::Utc;
use jellyfish_core::{bucket_for, generate_slug, validate_slug, Bucket, Card, Error, LinkEndpoint, Result};
use jellyfish_storage::Lookup;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::Engine;
use crate::links::{add_link, remove_link};

/// Fields kept from the stored row when an upsert replaces it
const SERVER_OWNED: [&str; 5] = ["id", "slug", "created_at", "links", "linked_at"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Insert,
    Upsert,
}

impl Engine {
    pub(crate) fn insert(&self, card: Card) -> Result<Value> {
        self.write(card, WriteMode::Insert)
    }

    pub(crate) fn upsert(&self, card: Card) -> Result<Value> {
        self.write(card, WriteMode::Upsert)
    }

    fn write(&self, mut card: Card, mode: WriteMode) -> Result<Value> {
        if card.card_type.trim().is_empty() {
            return Err(Error::MissingType);
        }
        let bucket = card.bucket();
        if bucket == Bucket::Links && card.link_endpoints().is_none() {
            return Err(Error::database(
                "link cards need data.from and data.to, each with an id and a type",
            ));
        }

        if mode == WriteMode::Insert {
            card.id = None;
            if card.slug.is_none() {
                card.slug = Some(generate_slug(&card.card_type));
            }
        }
        if let Some(slug) = &card.slug {
            validate_slug(slug, self.config.max_slug_length)?;
        }

        let template = card.to_value()?;
        let lookup = match (mode, card.id.as_deref(), card.slug.as_deref()) {
            (WriteMode::Upsert, Some(id), _) => Lookup::Id(id),
            (_, _, Some(slug)) => Lookup::Slug(slug),
            (_, _, None) => {
                return Err(Error::MissingPrimaryKey(
                    "an upsert needs a slug or an id".into(),
                ))
            }
        };

        let now = Utc::now().to_rfc3339();
        let fresh_id = Uuid::new_v4().to_string();
        let new_slug = card.slug.as_deref();
        let mut decide = |current: Option<&Value>| -> Result<Value> {
            let mut row = template.clone();
            let object = row
                .as_object_mut()
                .ok_or_else(|| Error::database("card did not serialize to an object"))?;

            match current {
                Some(_) if mode == WriteMode::Insert => {
                    return Err(Error::ElementAlreadyExists {
                        bucket,
                        key: lookup.key().to_string(),
                    });
                }
                Some(existing) => {
                    for field in SERVER_OWNED {
                        match existing.get(field) {
                            Some(value) => {
                                object.insert(field.to_string(), value.clone());
                            }
                            None => {
                                object.remove(field);
                            }
                        }
                    }
                    object.insert("updated_at".into(), Value::String(now.clone()));
                }
                None => {
                    let slug = new_slug.ok_or_else(|| {
                        Error::MissingPrimaryKey(format!(
                            "no element with id '{}' and no slug to create one",
                            lookup.key()
                        ))
                    })?;
                    object.insert("id".into(), Value::String(fresh_id.clone()));
                    object.insert("slug".into(), Value::String(slug.to_string()));
                    object.insert("created_at".into(), Value::String(now.clone()));
                    object.insert("updated_at".into(), Value::Null);
                    object.insert("links".into(), Value::Object(Map::new()));
                    object.insert("linked_at".into(), Value::Object(Map::new()));
                }
            }
            Ok(row)
        };

        let staged = if bucket == Bucket::Links {
            let previous = self.find_in(&[Bucket::Links], lookup)?.map(|(_, row)| row);
            let row = decide(previous.as_ref())?;
            self.propagate_link(previous.as_ref(), &row);
            Some((previous, row))
        } else {
            None
        };

        let change = match self.backend.replace(bucket, lookup, &mut decide) {
            Ok(change) => change,
            Err(e) => {
                if let Some((previous, row)) = &staged {
                    self.unstage_link(previous.as_ref(), row);
                }
                return Err(e);
            }
        };
        let after = change
            .new_val
            .ok_or_else(|| Error::database("write stored no row"))?;
        self.cache.set(bucket, &after);

        debug!(
            target: "jellyfish::write",
            %bucket,
            ?mode,
            key = lookup.key(),
            created = change.old_val.is_none(),
            "Wrote element"
        );

        if let Some((previous, row)) = &staged {
            // Another writer touched the row between staging and storing
            if change.old_val.as_ref() != previous.as_ref() || row.get("id") != after.get("id") {
                self.unstage_link(None, row);
                self.propagate_link(change.old_val.as_ref(), &after);
            }
        }
        Ok(after)
    }

    // ========================================================================
    // Link propagation
    // ========================================================================

    /// Mirror a link card onto its endpoints
    fn propagate_link(&self, before: Option<&Value>, after: &Value) {
        let link = match Card::from_value(after.clone()) {
            Ok(link) => link,
            Err(e) => {
                warn!(target: "jellyfish::write", error = %e, "Stored link is not a card");
                return;
            }
        };
        self.links.register(
            link.name.as_deref().unwrap_or_default(),
            link.inverse_name().unwrap_or_default(),
        );
        let Some((from, to)) = link.link_endpoints() else {
            return;
        };

        let previous = before
            .and_then(|value| Card::from_value(value.clone()).ok())
            .and_then(|card| card.link_endpoints());
        if let Some((old_from, old_to)) = previous {
            for old in [old_from, old_to] {
                if old.id != from.id && old.id != to.id {
                    self.update_endpoint(&old, |card| remove_link(&link, card));
                }
            }
        }

        if !link.active {
            for endpoint in [&from, &to] {
                self.update_endpoint(endpoint, |card| remove_link(&link, card));
            }
            return;
        }

        let (Some((_, from_card)), Some((_, to_card))) = (self.locate(&from), self.locate(&to)) else {
            warn!(
                target: "jellyfish::write",
                link = ?link.id,
                from = %from.id,
                to = %to.id,
                "Link endpoint not found; propagation skipped"
            );
            return;
        };
        self.update_endpoint(&from, |card| add_link(&link, card, &to_card));
        self.update_endpoint(&to, |card| add_link(&link, card, &from_card));
    }

    /// Undo a staged propagation whose link row was never stored
    fn unstage_link(&self, previous: Option<&Value>, staged: &Value) {
        match previous {
            Some(previous) => self.propagate_link(Some(staged), previous),
            None => {
                let Ok(link) = Card::from_value(staged.clone()) else {
                    return;
                };
                if let Some((from, to)) = link.link_endpoints() {
                    for endpoint in [&from, &to] {
                        self.update_endpoint(endpoint, |card| remove_link(&link, card));
                    }
                }
            }
        }
        debug!(target: "jellyfish::write", link = ?staged.get("id"), "Unstaged link propagation");
    }

    /// Find an endpoint, trying the bucket its type maps to first
    fn locate(&self, endpoint: &LinkEndpoint) -> Option<(Bucket, Value)> {
        let preferred = bucket_for(&endpoint.card_type);
        let mut order = vec![preferred];
        order.extend(Bucket::ALL.into_iter().filter(|b| *b != preferred));
        match self.find_in(&order, Lookup::Id(&endpoint.id)) {
            Ok(found) => found,
            Err(e) => {
                warn!(target: "jellyfish::write", id = %endpoint.id, error = %e, "Endpoint lookup failed");
                None
            }
        }
    }

    /// Rewrite one endpoint through `mutate`, skipping no-op updates
    fn update_endpoint<F>(&self, endpoint: &LinkEndpoint, mutate: F)
    where
        F: Fn(&Value) -> Value,
    {
        let Some((bucket, cached)) = self.locate(endpoint) else {
            return;
        };
        if mutate(&cached) == cached {
            return;
        }

        let result = self.backend.replace(bucket, Lookup::Id(&endpoint.id), &mut |current: Option<&Value>| -> Result<Value> {
            current
                .map(&mutate)
                .ok_or_else(|| Error::database(format!("endpoint '{}' disappeared", endpoint.id)))
        });
        match result {
            Ok(change) => {
                if let Some(row) = &change.new_val {
                    self.cache.set(bucket, row);
                }
                debug!(target: "jellyfish::write", %bucket, id = %endpoint.id, "Updated link endpoint");
            }
            Err(e) => {
                warn!(
                    target: "jellyfish::write",
                    %bucket,
                    id = %endpoint.id,
                    error = %e,
                    "Link endpoint update failed; skipped"
                );
            }
        }
    }
}
