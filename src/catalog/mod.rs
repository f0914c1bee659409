//! Collection catalog.
//!
//! A [`Catalog`] answers which collections exist and what they look like.
//! [`DbCatalog`] discovers them in the database; [`StaticCatalog`] serves a
//! fixed list.

mod discovery;
mod static_catalog;

pub use discovery::DbCatalog;
pub use static_catalog::StaticCatalog;

use crate::error::Result;
use crate::types::Collection;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Snapshot of every collection, sorted by id.
    async fn list(&self) -> Result<Vec<Arc<Collection>>>;

    /// Collection with exactly this id, or `NotFound`.
    async fn get(&self, id: &str) -> Result<Arc<Collection>>;

    /// Rebuild the collection set. On failure the previous set is kept.
    async fn refresh(&self) -> Result<()>;
}

/// Include and exclude patterns applied to discovered tables.
///
/// A pattern is either `schema.table` or a bare schema name matching every
/// table of that schema; tables of `main` are named as `main.table`.
/// Matching is case-insensitive. Excludes win.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableFilter {
    includes: Vec<String>,
    excludes: Vec<String>,
}

impl TableFilter {
    pub fn new<I, E>(includes: I, excludes: E) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            includes: includes.into_iter().map(Into::into).collect(),
            excludes: excludes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn admits(&self, schema: &str, table: &str) -> bool {
        let matches = |pattern: &String| pattern_matches(pattern, schema, table);
        if self.excludes.iter().any(matches) {
            return false;
        }
        self.includes.is_empty() || self.includes.iter().any(matches)
    }
}

fn pattern_matches(pattern: &str, schema: &str, table: &str) -> bool {
    let pattern = pattern.trim();
    match pattern.split_once('.') {
        Some((p_schema, p_table)) => {
            p_schema.eq_ignore_ascii_case(schema) && p_table.eq_ignore_ascii_case(table)
        }
        None => pattern.eq_ignore_ascii_case(schema),
    }
}
