//! Query engine
//!
//! A query is a JSON schema plus [`QueryOptions`]. Execution takes one of
//! three shapes:
//!
//! 1. **Point lookup**: `properties.id.const` or `properties.slug.const` is
//!    served from the cache or a keyed get, never a scan.
//! 2. **Pushed-down scan**: one bucket, no `$$links`, no `$$sort`. The
//!    backing store filters, sorts and pages.
//! 3. **In-memory merge**: several buckets, or link gating, or a `$$sort`
//!    formula. Buckets are scanned on the fan-out pool and the merged rows
//!    are re-sorted and paged here, because per-bucket order and per-bucket
//!    paging do not compose.
//!
//! Every returned row went through the same matcher and field filter.

use std::cmp::Ordering;

use jellyfish_core::{
    buckets_for_schema, compare_json, Bucket, CompiledSchema, Error, PropertyPath, Result,
};
use jellyfish_formula::Formula;
use jellyfish_storage::{Lookup, ScanRequest, SortDirection};
use rayon::prelude::*;
use serde_json::Value;
use tracing::{debug, trace};

use super::Engine;
use crate::cache::CacheEntry;
use crate::links::materialize;

/// Paging and ordering of a query
///
/// `limit` and `skip` are taken as numbers so that callers passing through
/// JSON input are validated here: negative, fractional, NaN and infinite
/// values are rejected; integral floats such as `15.0` are accepted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Maximum number of results; `None` is unbounded
    pub limit: Option<f64>,
    /// Results to drop from the front; `None` is zero
    pub skip: Option<f64>,
    /// Dotted sort path; `None` uses the configured default
    pub sort_by: Option<String>,
    /// Sort direction for `sort_by`
    pub sort_dir: SortDirection,
}

impl QueryOptions {
    /// Set the result limit
    pub fn limit(mut self, limit: f64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the number of results to skip
    pub fn skip(mut self, skip: f64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Set the sort path
    pub fn sort_by(mut self, path: impl Into<String>) -> Self {
        self.sort_by = Some(path.into());
        self
    }

    /// Set the sort direction
    pub fn sort_dir(mut self, direction: SortDirection) -> Self {
        self.sort_dir = direction;
        self
    }
}

fn whole_count(value: Option<f64>, what: &str, err: fn(String) -> Error) -> Result<Option<usize>> {
    match value {
        None => Ok(None),
        Some(n) if n.is_finite() && n >= 0.0 && n.fract() == 0.0 => Ok(Some(n as usize)),
        Some(n) => Err(err(format!("{} must be a non-negative integer, got {}", what, n))),
    }
}

fn window(rows: Vec<Value>, skip: usize, limit: Option<usize>) -> Vec<Value> {
    rows.into_iter()
        .skip(skip)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

/// Stable merge sort with a fallible comparator
fn merge_sort<F>(rows: Vec<Value>, cmp: &mut F) -> Result<Vec<Value>>
where
    F: FnMut(&Value, &Value) -> Result<Ordering>,
{
    if rows.len() <= 1 {
        return Ok(rows);
    }
    let mut left = rows;
    let right = left.split_off(left.len() / 2);
    let left = merge_sort(left, cmp)?;
    let right = merge_sort(right, cmp)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => cmp(r, l)? == Ordering::Less,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        merged.extend(next);
    }
    Ok(merged)
}

/// Ordering decided by a `$$sort` formula for `(input, this)`
fn formula_ordering(formula: &Formula, left: &Value, right: &Value) -> Result<Ordering> {
    match formula.evaluate(left, right)? {
        Value::Bool(true) => Ok(Ordering::Less),
        Value::Bool(false) => Ok(Ordering::Greater),
        Value::Number(n) => {
            let n = n.as_f64().unwrap_or(0.0);
            Ok(n.partial_cmp(&0.0).unwrap_or(Ordering::Equal))
        }
        other => Err(Error::invalid_expression(format!(
            "$$sort '{}' must yield a boolean or number, got {}",
            formula.source(),
            other
        ))),
    }
}

impl Engine {
    // ========================================================================
    // Keyed reads
    // ========================================================================

    fn fetch(&self, bucket: Bucket, lookup: Lookup<'_>) -> Result<Option<Value>> {
        let cached = match lookup {
            Lookup::Id(id) => self.cache.get_by_id(bucket, id),
            Lookup::Slug(slug) => self.cache.get_by_slug(bucket, slug),
        };
        match cached {
            Some(CacheEntry::Present(value)) => return Ok(Some(value)),
            Some(CacheEntry::Absent) => return Ok(None),
            None => {}
        }

        let row = self.backend.get(bucket, lookup)?;
        match (&row, lookup) {
            (Some(value), _) => self.cache.fill(bucket, value),
            (None, Lookup::Id(id)) => self.cache.fill_missing_id(bucket, id),
            (None, Lookup::Slug(slug)) => self.cache.fill_missing_slug(bucket, slug),
        }
        trace!(target: "jellyfish::query", %bucket, key = lookup.key(), found = row.is_some(), "Fetched");
        Ok(row)
    }

    pub(crate) fn fetch_id(&self, bucket: Bucket, id: &str) -> Result<Option<Value>> {
        self.fetch(bucket, Lookup::Id(id))
    }

    pub(crate) fn fetch_slug(&self, bucket: Bucket, slug: &str) -> Result<Option<Value>> {
        self.fetch(bucket, Lookup::Slug(slug))
    }

    pub(crate) fn find_in(&self, buckets: &[Bucket], lookup: Lookup<'_>) -> Result<Option<(Bucket, Value)>> {
        for &bucket in buckets {
            if let Some(value) = self.fetch(bucket, lookup)? {
                return Ok(Some((bucket, value)));
            }
        }
        Ok(None)
    }

    pub(crate) fn find_by_id(&self, id: &str) -> Result<Option<Value>> {
        Ok(self.find_in(&Bucket::ALL, Lookup::Id(id))?.map(|(_, value)| value))
    }

    pub(crate) fn find_by_slug(&self, slug: &str) -> Result<Option<Value>> {
        Ok(self.find_in(&Bucket::ALL, Lookup::Slug(slug))?.map(|(_, value)| value))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub(crate) fn run_query(&self, schema: &Value, options: &QueryOptions) -> Result<Vec<Value>> {
        let limit = whole_count(options.limit, "limit", Error::InvalidLimit)?;
        let skip = whole_count(options.skip, "skip", Error::InvalidSkip)?.unwrap_or(0);
        let compiled = CompiledSchema::compile(schema)?;

        if limit == Some(0) {
            return Ok(Vec::new());
        }
        if let Some(found) = self.point_lookup(&compiled, skip)? {
            return Ok(found);
        }
        self.scan(&compiled, skip, limit, options)
    }

    /// `Some` when the schema pins an id or slug
    fn point_lookup(&self, schema: &CompiledSchema, skip: usize) -> Result<Option<Vec<Value>>> {
        let lookup = match (schema.pinned("id"), schema.pinned("slug")) {
            (Some(id), _) => Lookup::Id(id),
            (None, Some(slug)) => Lookup::Slug(slug),
            (None, None) => return Ok(None),
        };
        if skip > 0 {
            return Ok(Some(Vec::new()));
        }

        let buckets = buckets_for_schema(schema.source());
        let found = match self.find_in(&buckets, lookup)? {
            Some((_, row)) => materialize(self, &row, schema)?,
            None => None,
        };
        debug!(
            target: "jellyfish::query",
            key = lookup.key(),
            found = found.is_some(),
            "Point lookup"
        );
        Ok(Some(found.into_iter().collect()))
    }

    fn scan(
        &self,
        schema: &CompiledSchema,
        skip: usize,
        limit: Option<usize>,
        options: &QueryOptions,
    ) -> Result<Vec<Value>> {
        let buckets = buckets_for_schema(schema.source());
        let sort_path = match &options.sort_by {
            Some(path) => path.parse::<PropertyPath>().map_err(|e| {
                Error::invalid_schema(format!("Invalid sortBy '{}': {}", path, e))
            })?,
            None => self.default_sort.clone(),
        };
        let sort_formula = schema.sort_expression().map(Formula::parse).transpose()?;

        let gated = !schema.links().is_empty();
        let in_memory = gated || sort_formula.is_some();
        let pushed_down = !in_memory && buckets.len() == 1;

        let (bucket_skip, bucket_limit) = if pushed_down {
            (skip, limit)
        } else if in_memory {
            (0, None)
        } else {
            (0, limit.map(|l| l.saturating_add(skip)))
        };

        let matches = |row: &Value| schema.matches(row);
        let request = ScanRequest {
            filter: &matches,
            sort_by: Some(&sort_path),
            direction: options.sort_dir,
            skip: bucket_skip,
            limit: bucket_limit,
        };

        let per_bucket: Vec<Vec<Value>> = if buckets.len() == 1 {
            vec![self.backend.scan(buckets[0], &request)?]
        } else {
            self.pool.install(|| {
                buckets
                    .par_iter()
                    .map(|bucket| self.backend.scan(*bucket, &request))
                    .collect::<Result<Vec<_>>>()
            })?
        };
        let mut rows: Vec<Value> = per_bucket.into_iter().flatten().collect();

        debug!(
            target: "jellyfish::query",
            buckets = buckets.len(),
            rows = rows.len(),
            pushed_down,
            gated,
            "Scanned"
        );

        if let Some(formula) = &sort_formula {
            rows = merge_sort(rows, &mut |a, b| formula_ordering(formula, a, b))?;
        } else if buckets.len() > 1 {
            rows.sort_by(|a, b| {
                let ord = compare_json(sort_path.get(a), sort_path.get(b));
                match options.sort_dir {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }

        if !gated {
            if !pushed_down {
                rows = window(rows, skip, limit);
            }
            return Ok(rows.iter().filter_map(|row| schema.filter(row)).collect());
        }

        let mut materialized = Vec::new();
        for row in &rows {
            if let Some(value) = materialize(self, row, schema)? {
                materialized.push(value);
            }
        }
        Ok(window(materialized, skip, limit))
    }
}
