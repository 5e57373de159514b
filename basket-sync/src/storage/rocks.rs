//! RocksDB-backed [`ListStore`].
//!
//! Column families:
//! - `lists`      : `list_id` → bincode [`List`]
//! - `items`      : `item_id` → bincode [`Item`]
//! - `list_items` : `list_id \0 created_at(8 BE) item_id` → empty, prefix-scanned per list
//!
//! Multi-row operations (bulk delete, reorder, cascade delete) go through a
//! single `WriteBatch` so they land atomically.

use async_trait::async_trait;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamily, ColumnFamilyDescriptor, DBCompressionType,
    DBWithThreadMode, Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{apply_update, mint_item, next_index, ListStore, StoreError};
use crate::model::{category_or_default, now_millis, sort_by_index, Item, ItemUpdate, List, NewItem, SortEntry};

const CF_LISTS: &str = "lists";
const CF_ITEMS: &str = "items";
const CF_LIST_ITEMS: &str = "list_items";

const COLUMN_FAMILIES: &[&str] = &[CF_LISTS, CF_ITEMS, CF_LIST_ITEMS];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("basket_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
        }
    }
}

impl StoreConfig {
    /// Small caches, caller-provided directory.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes read-modify-write sequences (index assignment, row updates)
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open the store, creating the database and column families if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened list store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_compression_type(DBCompressionType::Lz4);

        match name {
            CF_LISTS | CF_ITEMS => {
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_LIST_ITEMS => {
                // Keys only, scanned by list prefix
                opts.set_compression_type(DBCompressionType::None);
            }
            _ => {}
        }
        opts
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::DatabaseError("store write lock poisoned".into()))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
        let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(value)
    }

    fn list_prefix(list_id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(list_id.len() + 1);
        key.extend_from_slice(list_id.as_bytes());
        key.push(0);
        key
    }

    /// Creation order within a list: `list_id \0 created_at item_id`.
    fn membership_key(item: &Item) -> Vec<u8> {
        let mut key = Self::list_prefix(&item.list_id);
        key.extend_from_slice(&(item.created_at.max(0) as u64).to_be_bytes());
        key.extend_from_slice(item.id.as_bytes());
        key
    }

    fn load_list(&self, id: &str) -> Result<Option<List>, StoreError> {
        match self.db.get_cf(self.cf(CF_LISTS)?, id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_item(&self, id: &str) -> Result<Option<Item>, StoreError> {
        match self.db.get_cf(self.cf(CF_ITEMS)?, id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_item(&self, item: &Item) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db
            .put_cf_opt(self.cf(CF_ITEMS)?, item.id.as_bytes(), Self::encode(item)?, &write_opts)?;
        Ok(())
    }

    /// Items of a list in creation order.
    fn scan_list(&self, list_id: &str) -> Result<Vec<Item>, StoreError> {
        let cf = self.cf(CF_LIST_ITEMS)?;
        let prefix = Self::list_prefix(list_id);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut items = Vec::new();
        for entry in iter {
            let (key, _) = entry?;
            if !key.starts_with(&prefix) {
                break;
            }
            let id_bytes = &key[prefix.len() + 8..];
            let id = std::str::from_utf8(id_bytes)
                .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
            match self.load_item(id)? {
                Some(item) => items.push(item),
                None => log::warn!("Dangling list index entry for item {id} in list {list_id}"),
            }
        }
        Ok(items)
    }

    /// Read, mutate and write back a single row under the write lock.
    fn modify_item(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut Item),
    ) -> Result<Option<Item>, StoreError> {
        let _guard = self.lock()?;
        let Some(mut item) = self.load_item(id)? else {
            return Ok(None);
        };
        mutate(&mut item);
        self.save_item(&item)?;
        Ok(Some(item))
    }
}

#[async_trait]
impl ListStore for RocksStore {
    async fn create_list(&self, name: &str) -> Result<List, StoreError> {
        let list = List {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            created_at: now_millis(),
        };
        self.db
            .put_cf(self.cf(CF_LISTS)?, list.id.as_bytes(), Self::encode(&list)?)?;
        Ok(list)
    }

    async fn get_list(&self, id: &str) -> Result<Option<List>, StoreError> {
        self.load_list(id)
    }

    async fn get_lists(&self, ids: &[String]) -> Result<Vec<List>, StoreError> {
        let mut lists = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(list) = self.load_list(id)? {
                lists.push(list);
            }
        }
        Ok(lists)
    }

    async fn rename_list(&self, id: &str, name: &str) -> Result<Option<List>, StoreError> {
        let _guard = self.lock()?;
        let Some(mut list) = self.load_list(id)? else {
            return Ok(None);
        };
        list.name = name.trim().to_string();
        self.db
            .put_cf(self.cf(CF_LISTS)?, list.id.as_bytes(), Self::encode(&list)?)?;
        Ok(Some(list))
    }

    async fn delete_list(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.lock()?;
        if self.load_list(id)?.is_none() {
            return Ok(false);
        }
        let items = self.scan_list(id)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_LISTS)?, id.as_bytes());
        for item in &items {
            batch.delete_cf(self.cf(CF_ITEMS)?, item.id.as_bytes());
            batch.delete_cf(self.cf(CF_LIST_ITEMS)?, Self::membership_key(item));
        }
        self.write(batch)?;
        log::info!("Deleted list {id} with {} items", items.len());
        Ok(true)
    }

    async fn insert_item(&self, list_id: &str, item: NewItem) -> Result<Item, StoreError> {
        let _guard = self.lock()?;
        if self.load_list(list_id)?.is_none() {
            return Err(StoreError::ListNotFound(list_id.to_string()));
        }
        let existing = self.scan_list(list_id)?;
        let row = mint_item(list_id, item, next_index(existing.iter()));

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_ITEMS)?, row.id.as_bytes(), Self::encode(&row)?);
        batch.put_cf(self.cf(CF_LIST_ITEMS)?, Self::membership_key(&row), b"");
        self.write(batch)?;
        Ok(row)
    }

    async fn get_item(&self, id: &str) -> Result<Option<Item>, StoreError> {
        self.load_item(id)
    }

    async fn items_for_list(&self, list_id: &str) -> Result<Vec<Item>, StoreError> {
        let mut items = self.scan_list(list_id)?;
        sort_by_index(&mut items);
        Ok(items)
    }

    async fn update_item(&self, update: &ItemUpdate) -> Result<Option<Item>, StoreError> {
        self.modify_item(&update.id, |item| apply_update(item, update))
    }

    async fn set_category(&self, id: &str, category: &str) -> Result<Option<Item>, StoreError> {
        self.modify_item(id, |item| item.category = category_or_default(Some(category)))
    }

    async fn set_completed(
        &self,
        id: &str,
        completed_at: Option<i64>,
    ) -> Result<Option<Item>, StoreError> {
        self.modify_item(id, |item| item.completed_at = completed_at)
    }

    async fn delete_item(&self, id: &str) -> Result<Option<Item>, StoreError> {
        let _guard = self.lock()?;
        let Some(item) = self.load_item(id)? else {
            return Ok(None);
        };
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_ITEMS)?, item.id.as_bytes());
        batch.delete_cf(self.cf(CF_LIST_ITEMS)?, Self::membership_key(&item));
        self.write(batch)?;
        Ok(Some(item))
    }

    async fn delete_items(&self, list_id: &str, ids: &[String]) -> Result<Vec<String>, StoreError> {
        let _guard = self.lock()?;
        let mut batch = WriteBatch::default();
        let mut deleted = Vec::new();
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            match self.load_item(id)? {
                Some(item) if item.list_id == list_id => {
                    batch.delete_cf(self.cf(CF_ITEMS)?, item.id.as_bytes());
                    batch.delete_cf(self.cf(CF_LIST_ITEMS)?, Self::membership_key(&item));
                    deleted.push(item.id);
                }
                Some(_) => log::warn!("Refusing to delete item {id}: not in list {list_id}"),
                None => {}
            }
        }
        if !deleted.is_empty() {
            self.write(batch)?;
        }
        Ok(deleted)
    }

    async fn reorder(&self, list_id: &str, entries: &[SortEntry]) -> Result<usize, StoreError> {
        let by_id: HashMap<&str, &SortEntry> =
            entries.iter().map(|e| (e.id.as_str(), e)).collect();

        let _guard = self.lock()?;
        let mut batch = WriteBatch::default();
        let mut updated = 0;
        for mut item in self.scan_list(list_id)? {
            if let Some(entry) = by_id.get(item.id.as_str()) {
                item.index = entry.index;
                item.category = category_or_default(Some(&entry.category));
                batch.put_cf(self.cf(CF_ITEMS)?, item.id.as_bytes(), Self::encode(&item)?);
                updated += 1;
            }
        }
        if updated > 0 {
            self.write(batch)?;
        }
        Ok(updated)
    }

    async fn recently_completed(
        &self,
        list_id: &str,
        since: i64,
    ) -> Result<Vec<String>, StoreError> {
        let mut done: Vec<Item> = self
            .scan_list(list_id)?
            .into_iter()
            .filter(|i| i.completed_at.is_some_and(|at| at >= since))
            .collect();
        done.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(done.into_iter().map(|i| i.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, RocksStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_store_open() {
        let (_dir, store) = open_temp();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_list_roundtrip_and_rename() {
        let (_dir, store) = open_temp();
        let list = store.create_list(" Weekly shop ").await.unwrap();
        assert_eq!(list.name, "Weekly shop");

        let renamed = store.rename_list(&list.id, "Party").await.unwrap().unwrap();
        assert_eq!(renamed.name, "Party");
        assert_eq!(store.get_list(&list.id).await.unwrap().unwrap().name, "Party");
        assert!(store.rename_list("missing", "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_items_ordered_by_index() {
        let (_dir, store) = open_temp();
        let list = store.create_list("Groceries").await.unwrap();
        let a = store.insert_item(&list.id, NewItem::named("a")).await.unwrap();
        let b = store.insert_item(&list.id, NewItem::named("b")).await.unwrap();
        assert_eq!((a.index, b.index), (0, 1));

        let entries = vec![
            SortEntry { id: b.id.clone(), index: 0, category: "Produce".into() },
            SortEntry { id: a.id.clone(), index: 1, category: "Produce".into() },
        ];
        assert_eq!(store.reorder(&list.id, &entries).await.unwrap(), 2);

        let items = store.items_for_list(&list.id).await.unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, [b.id.as_str(), a.id.as_str()]);
        assert!(items.iter().all(|i| i.category == "Produce"));
    }

    #[tokio::test]
    async fn test_insert_into_missing_list_fails() {
        let (_dir, store) = open_temp();
        let result = store.insert_item("nope", NewItem::named("Milk")).await;
        assert!(matches!(result, Err(StoreError::ListNotFound(_))));
    }

    #[tokio::test]
    async fn test_completion_and_update() {
        let (_dir, store) = open_temp();
        let list = store.create_list("Groceries").await.unwrap();
        let milk = store.insert_item(&list.id, NewItem::named("Milk")).await.unwrap();

        let done = store.set_completed(&milk.id, Some(42)).await.unwrap().unwrap();
        assert_eq!(done.completed_at, Some(42));
        let undone = store.set_completed(&milk.id, None).await.unwrap().unwrap();
        assert_eq!(undone.completed_at, None);

        let update = ItemUpdate {
            id: milk.id.clone(),
            name: "Oat milk".into(),
            category: None,
            quantity: Some(2),
            details: Some("barista".into()),
        };
        let updated = store.update_item(&update).await.unwrap().unwrap();
        assert_eq!(updated.name, "Oat milk");
        assert_eq!(updated.category, "Other");
        assert_eq!(updated.quantity, 2);
        assert_eq!(updated.details.as_deref(), Some("barista"));
    }

    #[tokio::test]
    async fn test_bulk_delete_scoped_to_list() {
        let (_dir, store) = open_temp();
        let list = store.create_list("Groceries").await.unwrap();
        let other = store.create_list("Hardware").await.unwrap();
        let a = store.insert_item(&list.id, NewItem::named("a")).await.unwrap();
        let b = store.insert_item(&list.id, NewItem::named("b")).await.unwrap();
        let c = store.insert_item(&other.id, NewItem::named("c")).await.unwrap();

        let deleted = store
            .delete_items(&list.id, &[a.id.clone(), b.id.clone(), c.id.clone()])
            .await
            .unwrap();
        assert_eq!(deleted, vec![a.id, b.id]);
        assert!(store.items_for_list(&list.id).await.unwrap().is_empty());
        assert_eq!(store.items_for_list(&other.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cascade_delete() {
        let (_dir, store) = open_temp();
        let list = store.create_list("Groceries").await.unwrap();
        let a = store.insert_item(&list.id, NewItem::named("a")).await.unwrap();
        assert!(store.delete_list(&list.id).await.unwrap());
        assert!(store.get_item(&a.id).await.unwrap().is_none());
        assert!(!store.delete_list(&list.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let (list_id, item_id) = {
            let store = RocksStore::open(StoreConfig::for_testing(&path)).unwrap();
            let list = store.create_list("Groceries").await.unwrap();
            let item = store.insert_item(&list.id, NewItem::named("Bread")).await.unwrap();
            store.sync().unwrap();
            (list.id, item.id)
        };

        let store = RocksStore::open(StoreConfig::for_testing(&path)).unwrap();
        let items = store.items_for_list(&list_id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, item_id);
        assert_eq!(items[0].name, "Bread");
    }
}
