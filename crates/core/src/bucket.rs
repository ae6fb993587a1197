//! Bucket routing
//!
//! A bucket is one physical table of the backing store. Every card type maps
//! to exactly one bucket through [`bucket_for`], a total function over the
//! closed [`Bucket`] enum: types without a dedicated table fall into
//! [`Bucket::Cards`] through an explicit default arm.
//!
//! Card types may carry a version suffix (`session@1.0.0`); routing only
//! looks at the base name.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A physical table of the backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    /// Everything without a dedicated table
    Cards,
    /// Action requests and `execute` results
    Requests,
    /// Link records
    Links,
    /// Sessions
    Sessions,
}

impl Bucket {
    /// Every bucket, in lookup order
    pub const ALL: [Bucket; 4] = [
        Bucket::Cards,
        Bucket::Links,
        Bucket::Requests,
        Bucket::Sessions,
    ];

    /// Table name in the backing store
    pub fn table_name(self) -> &'static str {
        match self {
            Bucket::Cards => "cards",
            Bucket::Requests => "requests",
            Bucket::Links => "links",
            Bucket::Sessions => "sessions",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for Bucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cards" => Ok(Bucket::Cards),
            "requests" => Ok(Bucket::Requests),
            "links" => Ok(Bucket::Links),
            "sessions" => Ok(Bucket::Sessions),
            other => Err(format!("unknown bucket '{}'", other)),
        }
    }
}

/// Strip a `@version` suffix from a card type
pub fn base_type(card_type: &str) -> &str {
    card_type.split('@').next().unwrap_or(card_type)
}

/// Map a card type to the bucket that stores it
pub fn bucket_for(card_type: &str) -> Bucket {
    match base_type(card_type) {
        "action-request" | "execute" => Bucket::Requests,
        "session" => Bucket::Sessions,
        "link" => Bucket::Links,
        _ => Bucket::Cards,
    }
}

/// Buckets a query schema has to scan.
///
/// A schema pinning `properties.type.const` routes to that type's bucket;
/// an `enum` of types routes to the union of their buckets. Anything else
/// fans out to every bucket.
pub fn buckets_for_schema(schema: &Value) -> Vec<Bucket> {
    let type_schema = schema.get("properties").and_then(|p| p.get("type"));

    if let Some(card_type) = type_schema.and_then(|t| t.get("const")).and_then(Value::as_str) {
        return vec![bucket_for(card_type)];
    }

    if let Some(types) = type_schema.and_then(|t| t.get("enum")).and_then(Value::as_array) {
        let mut buckets = Vec::new();
        for card_type in types {
            match card_type.as_str() {
                Some(name) => {
                    let bucket = bucket_for(name);
                    if !buckets.contains(&bucket) {
                        buckets.push(bucket);
                    }
                }
                None => return Bucket::ALL.to_vec(),
            }
        }
        if !buckets.is_empty() {
            buckets.sort();
            return buckets;
        }
    }

    Bucket::ALL.to_vec()
}
