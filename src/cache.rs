//! In-memory collection metadata, replaced as a whole on refresh.

use crate::types::Collection;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

pub(crate) type Snapshot = Arc<BTreeMap<String, Arc<Collection>>>;

/// Map from collection id to its metadata.
///
/// Readers hold the read lock only long enough to clone the snapshot `Arc`;
/// lookups then run on the snapshot with no lock held. A writer waits for
/// those clones at most, and a reader always sees one complete map.
#[derive(Debug, Default)]
pub struct CollectionCache {
    inner: RwLock<Snapshot>,
}

impl CollectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.inner.read())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Collection>> {
        self.snapshot().get(id).cloned()
    }

    /// All collections sorted by id.
    pub fn list(&self) -> Vec<Arc<Collection>> {
        self.snapshot().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Swap in a new set of collections. Later entries win on equal ids.
    pub fn replace<I>(&self, collections: I)
    where
        I: IntoIterator<Item = Collection>,
    {
        let map: BTreeMap<String, Arc<Collection>> = collections
            .into_iter()
            .map(|c| (c.id.clone(), Arc::new(c)))
            .collect();
        *self.inner.write() = Arc::new(map);
    }
}
