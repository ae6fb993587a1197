//! Engine Integration Tests
//!
//! End-to-end behavior of the `Jellyfish` handle over the in-memory backend:
//! uniqueness under concurrent writers, query shapes, cache coherence, link
//! denormalization and change streams.

#[path = "../common/mod.rs"]
mod common;

mod cache_coherence;
mod formulas;
mod links;
mod queries;
mod streams;
mod uniqueness;
