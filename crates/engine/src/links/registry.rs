//! Known link names
//!
//! Two names are built in and resolve through the `data.target` pointer of
//! a card: `is attached to` follows the pointer, `has attached element`
//! finds the cards pointing here. Every other name is backed by link
//! records and resolves through the denormalized `links` map.

use dashmap::DashMap;

/// Forward pointer relation
pub const IS_ATTACHED_TO: &str = "is attached to";

/// Reverse pointer relation
pub const HAS_ATTACHED_ELEMENT: &str = "has attached element";

/// How a link name is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Follow the card's own `data.target`
    Forward,
    /// Cards whose `data.target` is this card's id
    Reverse,
    /// Entries denormalized from link records
    Record,
}

/// Registry of resolvable link names
#[derive(Debug)]
pub struct LinkRegistry {
    kinds: DashMap<String, LinkKind>,
}

fn insert_builtins(kinds: &DashMap<String, LinkKind>) {
    kinds.insert(IS_ATTACHED_TO.to_string(), LinkKind::Forward);
    kinds.insert(HAS_ATTACHED_ELEMENT.to_string(), LinkKind::Reverse);
}

impl LinkRegistry {
    /// Registry holding the built-in names
    pub fn new() -> Self {
        let kinds = DashMap::new();
        insert_builtins(&kinds);
        Self { kinds }
    }

    /// Register a relation and its inverse. Names already known keep
    /// their kind.
    pub fn register(&self, name: &str, inverse_name: &str) {
        for name in [name, inverse_name] {
            if !name.is_empty() {
                self.kinds.entry(name.to_string()).or_insert(LinkKind::Record);
            }
        }
    }

    /// Resolution strategy for a name
    pub fn kind(&self, name: &str) -> Option<LinkKind> {
        self.kinds.get(name).map(|kind| *kind)
    }

    /// Every registered name, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.kinds.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Forget registered names, keeping the built-ins
    pub fn reset(&self) {
        self.kinds.clear();
        insert_builtins(&self.kinds);
    }
}

impl Default for LinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}
