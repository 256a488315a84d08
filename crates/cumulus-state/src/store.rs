//! StateStore: redb-backed document persistence for Cumulus.
//!
//! Provides typed CRUD operations over every [`Document`] collection. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use cumulus_core::epoch_secs;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;
use uuid::Uuid;

use crate::document::Document;
use crate::error::{StateError, StateResult};
use crate::tables::ALL_TABLES;
use crate::types::SCHEMA_VERSION;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type CacheKey = (&'static str, String);

/// Read-through cache of decoded documents.
///
/// `epoch` is bumped on every invalidation; a reader only fills the cache
/// if no write happened since it started reading, so a slow reader cannot
/// reinstate a value that a concurrent write just replaced.
#[derive(Default)]
struct Cache {
    entries: HashMap<CacheKey, Arc<dyn Any + Send + Sync>>,
    epoch: u64,
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    cache: Arc<RwLock<Cache>>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::with_database(db)?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::with_database(db)?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn with_database(db: Database) -> StateResult<Self> {
        let store = Self {
            db: Arc::new(db),
            cache: Arc::new(RwLock::new(Cache::default())),
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in ALL_TABLES {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Insert a new document.
    ///
    /// An empty id is replaced by a generated UUID. Timestamps and schema
    /// version are stamped on the document. Fails with `Conflict` if the
    /// id is already taken.
    pub fn insert<T: Document>(&self, doc: &mut T) -> StateResult<()> {
        let now = epoch_secs();
        {
            let meta = doc.meta_mut();
            if meta.id.is_empty() {
                meta.id = Uuid::new_v4().to_string();
            }
            meta.created_at = now;
            meta.updated_at = now;
            meta.schema_version = SCHEMA_VERSION;
        }
        let value = serde_json::to_vec(doc).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
            if table.get(doc.id()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Conflict(format!("{} {}", T::COLLECTION, doc.id())));
            }
            table
                .insert(doc.id(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        self.invalidate(T::COLLECTION, doc.id());
        debug!(collection = T::COLLECTION, id = %doc.id(), "document inserted");
        Ok(())
    }

    /// Overwrite an existing document. Fails with `NotFound` if it is gone.
    pub fn update<T: Document>(&self, doc: &mut T) -> StateResult<()> {
        {
            let meta = doc.meta_mut();
            meta.updated_at = epoch_secs();
            meta.schema_version = SCHEMA_VERSION;
        }
        let value = serde_json::to_vec(doc).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
            if table.get(doc.id()).map_err(map_err!(Read))?.is_none() {
                return Err(StateError::NotFound(format!("{} {}", T::COLLECTION, doc.id())));
            }
            table
                .insert(doc.id(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        self.invalidate(T::COLLECTION, doc.id());
        debug!(collection = T::COLLECTION, id = %doc.id(), "document updated");
        Ok(())
    }

    /// Read-modify-write a document with an infallible mutation.
    pub fn modify<T: Document, R>(&self, id: &str, f: impl FnOnce(&mut T) -> R) -> StateResult<R> {
        let mut doc: T = self.fetch(id)?;
        let out = f(&mut doc);
        self.update(&mut doc)?;
        Ok(out)
    }

    /// Delete a document by id. Returns true if it existed.
    pub fn delete<T: Document>(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        self.invalidate(T::COLLECTION, id);
        debug!(collection = T::COLLECTION, %id, existed, "document deleted");
        Ok(existed)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Get a document by id.
    pub fn get<T: Document>(&self, id: &str) -> StateResult<Option<T>> {
        let epoch = {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.entries.get(&(T::COLLECTION, id.to_string())) {
                if let Some(doc) = hit.downcast_ref::<T>() {
                    return Ok(Some(doc.clone()));
                }
            }
            cache.epoch
        };

        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let doc: T = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                self.remember(epoch, &doc);
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    /// Get a document by id, failing with `NotFound` if it does not exist.
    pub fn fetch<T: Document>(&self, id: &str) -> StateResult<T> {
        self.get(id)?
            .ok_or_else(|| StateError::NotFound(format!("{} {id}", T::COLLECTION)))
    }

    /// List every document of a collection.
    pub fn list<T: Document>(&self) -> StateResult<Vec<T>> {
        self.find(|_: &T| true)
    }

    /// List the documents of a collection matching a predicate.
    pub fn find<T: Document>(&self, predicate: impl Fn(&T) -> bool) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(T::TABLE).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let doc: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if predicate(&doc) {
                results.push(doc);
            }
        }
        Ok(results)
    }

    /// First document matching a predicate, in key order.
    pub fn find_one<T: Document>(&self, predicate: impl Fn(&T) -> bool) -> StateResult<Option<T>> {
        Ok(self.find(predicate)?.into_iter().next())
    }

    /// Resolve a list of ids, skipping the ones that no longer exist.
    ///
    /// Returns the resolved documents and the dangling ids.
    pub fn resolve<T: Document>(&self, ids: &[String]) -> StateResult<(Vec<T>, Vec<String>)> {
        let mut found = Vec::with_capacity(ids.len());
        let mut dangling = Vec::new();
        for id in ids {
            match self.get::<T>(id)? {
                Some(doc) => found.push(doc),
                None => dangling.push(id.clone()),
            }
        }
        Ok((found, dangling))
    }

    // ── Cache ──────────────────────────────────────────────────────

    fn remember<T: Document>(&self, epoch: u64, doc: &T) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if cache.epoch == epoch {
            cache
                .entries
                .insert((T::COLLECTION, doc.id().to_string()), Arc::new(doc.clone()));
        }
    }

    fn invalidate(&self, collection: &'static str, id: &str) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.epoch += 1;
        cache.entries.remove(&(collection, id.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    fn test_region(name: &str) -> Region {
        Region {
            name: name.to_string(),
            description: "test region".to_string(),
            ..Default::default()
        }
    }

    fn test_zone(id: &str, region_id: &str) -> Zone {
        Zone {
            meta: DocumentMeta::with_id(id),
            name: id.to_string(),
            region_id: region_id.to_string(),
            ..Default::default()
        }
    }

    // ── CRUD ───────────────────────────────────────────────────────

    #[test]
    fn insert_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let mut region = test_region("eu-west");

        store.insert(&mut region).unwrap();
        assert!(!region.meta.id.is_empty());
        assert_eq!(region.meta.schema_version, SCHEMA_VERSION);
        assert!(region.meta.created_at > 0);

        let retrieved: Option<Region> = store.get(&region.meta.id).unwrap();
        assert_eq!(retrieved, Some(region));
    }

    #[test]
    fn get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get::<Region>("nope").unwrap().is_none());
        assert!(matches!(
            store.fetch::<Region>("nope"),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn insert_duplicate_id_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert(&mut test_zone("z1", "r1")).unwrap();

        let err = store.insert(&mut test_zone("z1", "r2")).unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
        assert_eq!(store.fetch::<Zone>("z1").unwrap().region_id, "r1");
    }

    #[test]
    fn update_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        let mut zone = test_zone("z1", "r1");
        store.insert(&mut zone).unwrap();

        zone.hosts.push("h1".to_string());
        store.update(&mut zone).unwrap();

        let retrieved: Zone = store.fetch("z1").unwrap();
        assert_eq!(retrieved.hosts, vec!["h1".to_string()]);
    }

    #[test]
    fn update_missing_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.update(&mut test_zone("ghost", "r1")).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn modify_applies_mutation() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert(&mut test_zone("z1", "r1")).unwrap();

        let count = store
            .modify("z1", |z: &mut Zone| {
                z.hosts.push("h1".to_string());
                z.hosts.len()
            })
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(store.fetch::<Zone>("z1").unwrap().hosts.len(), 1);
    }

    #[test]
    fn delete_document() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert(&mut test_zone("z1", "r1")).unwrap();

        assert!(store.delete::<Zone>("z1").unwrap());
        assert!(!store.delete::<Zone>("z1").unwrap());
        assert!(store.get::<Zone>("z1").unwrap().is_none());
    }

    #[test]
    fn find_filters_by_predicate() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert(&mut test_zone("z1", "r1")).unwrap();
        store.insert(&mut test_zone("z2", "r1")).unwrap();
        store.insert(&mut test_zone("z3", "r2")).unwrap();

        let r1: Vec<Zone> = store.find(|z: &Zone| z.region_id == "r1").unwrap();
        assert_eq!(r1.len(), 2);
        assert_eq!(store.list::<Zone>().unwrap().len(), 3);
        assert!(store.find_one(|z: &Zone| z.region_id == "r9").unwrap().is_none());
    }

    #[test]
    fn resolve_separates_dangling_ids() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert(&mut test_zone("z1", "r1")).unwrap();

        let (found, dangling) = store
            .resolve::<Zone>(&["z1".to_string(), "gone".to_string()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(dangling, vec!["gone".to_string()]);
    }

    #[test]
    fn collections_are_independent() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert(&mut test_zone("same-id", "r1")).unwrap();
        let mut region = test_region("eu");
        region.meta.id = "same-id".to_string();
        store.insert(&mut region).unwrap();

        assert!(store.get::<Zone>("same-id").unwrap().is_some());
        assert!(store.get::<Region>("same-id").unwrap().is_some());
    }

    // ── Cache ──────────────────────────────────────────────────────

    #[test]
    fn cache_is_invalidated_on_write() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert(&mut test_zone("z1", "r1")).unwrap();

        // Warm the cache, then write through a clone sharing it.
        let _: Zone = store.fetch("z1").unwrap();
        let other = store.clone();
        other
            .modify("z1", |z: &mut Zone| z.name = "renamed".to_string())
            .unwrap();

        assert_eq!(store.fetch::<Zone>("z1").unwrap().name, "renamed");

        other.delete::<Zone>("z1").unwrap();
        assert!(store.get::<Zone>("z1").unwrap().is_none());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        let id = {
            let store = StateStore::open(&db_path).unwrap();
            let mut region = test_region("prod");
            store.insert(&mut region).unwrap();
            region.meta.id
        };

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let region: Region = store.fetch(&id).unwrap();
        assert_eq!(region.name, "prod");
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list::<Region>().unwrap().is_empty());
        assert!(store.list::<Host>().unwrap().is_empty());
        assert!(store.list::<Instance>().unwrap().is_empty());
        assert!(!store.delete::<Project>("nope").unwrap());
        assert!(!store.delete::<Adapter>("nope").unwrap());
    }
}
