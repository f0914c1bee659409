use super::Catalog;
use crate::cache::CollectionCache;
use crate::error::{Error, Result};
use crate::types::Collection;
use async_trait::async_trait;
use std::sync::Arc;

/// Catalog over a fixed set of collections.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    cache: CollectionCache,
}

impl StaticCatalog {
    pub fn new<I>(collections: I) -> Self
    where
        I: IntoIterator<Item = Collection>,
    {
        let cache = CollectionCache::new();
        cache.replace(collections);
        Self { cache }
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn list(&self) -> Result<Vec<Arc<Collection>>> {
        Ok(self.cache.list())
    }

    async fn get(&self, id: &str) -> Result<Arc<Collection>> {
        self.cache
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("collection {id}")))
    }

    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}
