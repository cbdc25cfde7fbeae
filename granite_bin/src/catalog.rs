//! The catalog: persistent registry of tables and indexes.
//!
//! The catalog metadata page (logical page 0) maps table and index ids to
//! the pages their metadata records live on. Each table metadata page
//! carries the table's name, first heap page, and schema; each index
//! metadata page carries the index's name, owning table, and key column
//! positions. Everything is magic-prefixed and little-endian.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use substrate::btree::{BPlusTree, KeyManager, UNDEFINED_MAX_SIZE};
use substrate::heap::TableHeap;
use substrate::record::Schema;
use substrate::{
    BufferPoolManager, IndexId, PageId, StorageError, TableId, CATALOG_META_PAGE_ID, PAGE_SIZE,
};

use crate::errors::DbError;

pub const CATALOG_META_MAGIC: u32 = 0x4341_544D; // "CATM"
pub const TABLE_META_MAGIC: u32 = 0x5442_4C4D; // "TBLM"
pub const INDEX_META_MAGIC: u32 = 0x4958_4D44; // "IXMD"

fn corrupted(what: &'static str) -> DbError {
    DbError::Storage(StorageError::Corrupted(what))
}

fn get_u32(buf: &[u8], off: &mut usize) -> Result<u32, DbError> {
    let end = *off + 4;
    if end > buf.len() {
        return Err(corrupted("truncated catalog record"));
    }
    let v = u32::from_le_bytes(buf[*off..end].try_into().unwrap());
    *off = end;
    Ok(v)
}

fn get_i32(buf: &[u8], off: &mut usize) -> Result<i32, DbError> {
    Ok(get_u32(buf, off)? as i32)
}

fn get_string(buf: &[u8], off: &mut usize) -> Result<String, DbError> {
    let len = get_u32(buf, off)? as usize;
    let end = *off + len;
    if end > buf.len() {
        return Err(corrupted("truncated catalog record"));
    }
    let s = std::str::from_utf8(&buf[*off..end])
        .map_err(|_| corrupted("catalog name is not utf-8"))?
        .to_string();
    *off = end;
    Ok(s)
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// The persisted id-to-page registry.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CatalogMeta {
    pub table_meta_pages: BTreeMap<TableId, PageId>,
    pub index_meta_pages: BTreeMap<IndexId, PageId>,
}

impl CatalogMeta {
    pub fn serialize_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&CATALOG_META_MAGIC.to_le_bytes());
        buf.extend_from_slice(&(self.table_meta_pages.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.index_meta_pages.len() as u32).to_le_bytes());
        for (&table_id, &page_id) in &self.table_meta_pages {
            buf.extend_from_slice(&table_id.to_le_bytes());
            buf.extend_from_slice(&page_id.to_le_bytes());
        }
        for (&index_id, &page_id) in &self.index_meta_pages {
            buf.extend_from_slice(&index_id.to_le_bytes());
            buf.extend_from_slice(&page_id.to_le_bytes());
        }
    }

    pub fn deserialize_from(buf: &[u8]) -> Result<Self, DbError> {
        let mut off = 0;
        if get_u32(buf, &mut off)? != CATALOG_META_MAGIC {
            return Err(corrupted("bad catalog metadata magic"));
        }
        let num_tables = get_u32(buf, &mut off)?;
        let num_indexes = get_u32(buf, &mut off)?;
        let mut meta = CatalogMeta::default();
        for _ in 0..num_tables {
            let table_id = get_u32(buf, &mut off)?;
            let page_id = get_i32(buf, &mut off)?;
            meta.table_meta_pages.insert(table_id, page_id);
        }
        for _ in 0..num_indexes {
            let index_id = get_u32(buf, &mut off)?;
            let page_id = get_i32(buf, &mut off)?;
            meta.index_meta_pages.insert(index_id, page_id);
        }
        Ok(meta)
    }

    fn next_table_id(&self) -> TableId {
        self.table_meta_pages
            .keys()
            .next_back()
            .map_or(0, |&id| id + 1)
    }

    fn next_index_id(&self) -> IndexId {
        self.index_meta_pages
            .keys()
            .next_back()
            .map_or(0, |&id| id + 1)
    }
}

#[derive(Debug, Clone)]
pub struct TableMetadata {
    pub table_id: TableId,
    pub table_name: String,
    pub first_page_id: PageId,
    pub schema: Arc<Schema>,
}

impl TableMetadata {
    pub fn serialize_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&TABLE_META_MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.table_id.to_le_bytes());
        put_string(buf, &self.table_name);
        buf.extend_from_slice(&self.first_page_id.to_le_bytes());
        self.schema.serialize_to(buf);
    }

    pub fn deserialize_from(buf: &[u8]) -> Result<Self, DbError> {
        let mut off = 0;
        if get_u32(buf, &mut off)? != TABLE_META_MAGIC {
            return Err(corrupted("bad table metadata magic"));
        }
        let table_id = get_u32(buf, &mut off)?;
        let table_name = get_string(buf, &mut off)?;
        let first_page_id = get_i32(buf, &mut off)?;
        let schema = Schema::deserialize_from(buf, &mut off).map_err(DbError::Storage)?;
        Ok(Self {
            table_id,
            table_name,
            first_page_id,
            schema: Arc::new(schema),
        })
    }
}

#[derive(Debug, Clone)]
pub struct IndexMetadata {
    pub index_id: IndexId,
    pub index_name: String,
    pub table_id: TableId,
    /// Positions of the key columns within the owning table's schema.
    pub key_map: Vec<u32>,
}

impl IndexMetadata {
    pub fn serialize_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&INDEX_META_MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.index_id.to_le_bytes());
        put_string(buf, &self.index_name);
        buf.extend_from_slice(&self.table_id.to_le_bytes());
        buf.extend_from_slice(&(self.key_map.len() as u32).to_le_bytes());
        for &idx in &self.key_map {
            buf.extend_from_slice(&idx.to_le_bytes());
        }
    }

    pub fn deserialize_from(buf: &[u8]) -> Result<Self, DbError> {
        let mut off = 0;
        if get_u32(buf, &mut off)? != INDEX_META_MAGIC {
            return Err(corrupted("bad index metadata magic"));
        }
        let index_id = get_u32(buf, &mut off)?;
        let index_name = get_string(buf, &mut off)?;
        let table_id = get_u32(buf, &mut off)?;
        let key_count = get_u32(buf, &mut off)?;
        let mut key_map = Vec::with_capacity(key_count as usize);
        for _ in 0..key_count {
            key_map.push(get_u32(buf, &mut off)?);
        }
        Ok(Self {
            index_id,
            index_name,
            table_id,
            key_map,
        })
    }
}

pub struct TableInfo {
    meta: TableMetadata,
    heap: TableHeap,
}

impl TableInfo {
    pub fn table_id(&self) -> TableId {
        self.meta.table_id
    }

    pub fn table_name(&self) -> &str {
        &self.meta.table_name
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.meta.schema
    }

    pub fn heap(&self) -> &TableHeap {
        &self.heap
    }
}

pub struct IndexInfo {
    meta: IndexMetadata,
    btree: BPlusTree,
}

impl IndexInfo {
    fn build(
        meta: IndexMetadata,
        table_schema: &Arc<Schema>,
        bpm: Arc<BufferPoolManager>,
    ) -> Result<Self, DbError> {
        let key_schema = Arc::new(table_schema.project(&meta.key_map));
        let km = KeyManager::new(key_schema).map_err(DbError::Storage)?;
        let btree = BPlusTree::new(meta.index_id, bpm, km, UNDEFINED_MAX_SIZE, UNDEFINED_MAX_SIZE)
            .map_err(DbError::Storage)?;
        Ok(Self { meta, btree })
    }

    pub fn index_id(&self) -> IndexId {
        self.meta.index_id
    }

    pub fn index_name(&self) -> &str {
        &self.meta.index_name
    }

    pub fn table_id(&self) -> TableId {
        self.meta.table_id
    }

    pub fn key_map(&self) -> &[u32] {
        &self.meta.key_map
    }

    pub fn btree(&self) -> &BPlusTree {
        &self.btree
    }

    pub fn btree_mut(&mut self) -> &mut BPlusTree {
        &mut self.btree
    }
}

pub struct CatalogManager {
    bpm: Arc<BufferPoolManager>,
    meta: CatalogMeta,
    next_table_id: TableId,
    next_index_id: IndexId,
    tables: HashMap<TableId, TableInfo>,
    table_names: HashMap<String, TableId>,
    indexes: HashMap<IndexId, IndexInfo>,
    /// table name -> index name -> index id
    index_names: HashMap<String, HashMap<String, IndexId>>,
}

impl CatalogManager {
    /// `init` builds a fresh catalog on page 0; otherwise the catalog is
    /// reloaded from the metadata pages.
    pub fn new(bpm: Arc<BufferPoolManager>, init: bool) -> Result<Self, DbError> {
        let mut manager = Self {
            bpm,
            meta: CatalogMeta::default(),
            next_table_id: 0,
            next_index_id: 0,
            tables: HashMap::new(),
            table_names: HashMap::new(),
            indexes: HashMap::new(),
            index_names: HashMap::new(),
        };
        if init {
            manager.flush_catalog_meta_page()?;
            return Ok(manager);
        }
        let bytes = {
            let guard = manager
                .bpm
                .fetch_page(CATALOG_META_PAGE_ID)
                .map_err(DbError::Storage)?;
            let page = guard.read();
            page.data.to_vec()
        };
        manager.meta = CatalogMeta::deserialize_from(&bytes)?;
        manager.next_table_id = manager.meta.next_table_id();
        manager.next_index_id = manager.meta.next_index_id();
        let tables: Vec<(TableId, PageId)> = manager
            .meta
            .table_meta_pages
            .iter()
            .map(|(&t, &p)| (t, p))
            .collect();
        for (table_id, page_id) in tables {
            manager.load_table(table_id, page_id)?;
        }
        let indexes: Vec<(IndexId, PageId)> = manager
            .meta
            .index_meta_pages
            .iter()
            .map(|(&i, &p)| (i, p))
            .collect();
        for (index_id, page_id) in indexes {
            manager.load_index(index_id, page_id)?;
        }
        Ok(manager)
    }

    pub fn create_table(&mut self, table_name: &str, schema: Schema) -> Result<TableId, DbError> {
        if self.table_names.contains_key(table_name) {
            return Err(DbError::TableAlreadyExist);
        }
        let schema = Arc::new(schema);
        let heap = TableHeap::create(Arc::clone(&self.bpm), Arc::clone(&schema))
            .map_err(DbError::Storage)?;
        let table_id = self.next_table_id;
        self.next_table_id += 1;
        let meta = TableMetadata {
            table_id,
            table_name: table_name.to_string(),
            first_page_id: heap.first_page_id(),
            schema,
        };
        let page_id = self.write_meta_page(|buf| meta.serialize_to(buf))?;
        self.meta.table_meta_pages.insert(table_id, page_id);
        self.table_names.insert(table_name.to_string(), table_id);
        self.tables.insert(table_id, TableInfo { meta, heap });
        self.flush_catalog_meta_page()?;
        Ok(table_id)
    }

    pub fn table(&self, table_name: &str) -> Result<&TableInfo, DbError> {
        let table_id = self
            .table_names
            .get(table_name)
            .ok_or(DbError::TableNotExist)?;
        self.tables.get(table_id).ok_or(DbError::TableNotExist)
    }

    pub fn table_by_id(&self, table_id: TableId) -> Result<&TableInfo, DbError> {
        self.tables.get(&table_id).ok_or(DbError::TableNotExist)
    }

    /// Every table, ordered by id for stable listings.
    pub fn tables(&self) -> Vec<&TableInfo> {
        let mut all: Vec<&TableInfo> = self.tables.values().collect();
        all.sort_by_key(|t| t.table_id());
        all
    }

    /// Drops the table, cascading to its indexes, and releases the heap
    /// chain and every metadata page.
    pub fn drop_table(&mut self, table_name: &str) -> Result<(), DbError> {
        let table_id = *self
            .table_names
            .get(table_name)
            .ok_or(DbError::TableNotExist)?;
        let index_names: Vec<String> = self
            .index_names
            .get(table_name)
            .map(|bucket| bucket.keys().cloned().collect())
            .unwrap_or_default();
        for index_name in index_names {
            self.drop_index(table_name, &index_name)?;
        }
        self.index_names.remove(table_name);
        self.table_names.remove(table_name);
        let info = self
            .tables
            .remove(&table_id)
            .ok_or(DbError::TableNotExist)?;
        let page_id = self
            .meta
            .table_meta_pages
            .remove(&table_id)
            .ok_or_else(|| corrupted("table missing from catalog metadata"))?;
        self.bpm.delete_page(page_id).map_err(DbError::Storage)?;
        info.heap().free_heap().map_err(DbError::Storage)?;
        self.flush_catalog_meta_page()?;
        Ok(())
    }

    pub fn create_index(
        &mut self,
        table_name: &str,
        index_name: &str,
        key_columns: &[String],
    ) -> Result<IndexId, DbError> {
        let table_id = *self
            .table_names
            .get(table_name)
            .ok_or(DbError::TableNotExist)?;
        if self
            .index_names
            .get(table_name)
            .is_some_and(|bucket| bucket.contains_key(index_name))
        {
            return Err(DbError::IndexAlreadyExist);
        }
        let table = self.tables.get(&table_id).ok_or(DbError::TableNotExist)?;
        let mut key_map = Vec::with_capacity(key_columns.len());
        for column in key_columns {
            let position = table
                .schema()
                .column_index(column)
                .ok_or(DbError::ColumnNameNotExist)?;
            key_map.push(position as u32);
        }
        let index_id = self.next_index_id;
        self.next_index_id += 1;
        let meta = IndexMetadata {
            index_id,
            index_name: index_name.to_string(),
            table_id,
            key_map,
        };
        let page_id = self.write_meta_page(|buf| meta.serialize_to(buf))?;
        let info = IndexInfo::build(meta, table.schema(), Arc::clone(&self.bpm))?;
        self.meta.index_meta_pages.insert(index_id, page_id);
        self.index_names
            .entry(table_name.to_string())
            .or_default()
            .insert(index_name.to_string(), index_id);
        self.indexes.insert(index_id, info);
        self.flush_catalog_meta_page()?;
        Ok(index_id)
    }

    pub fn index(&self, table_name: &str, index_name: &str) -> Result<&IndexInfo, DbError> {
        if !self.table_names.contains_key(table_name) {
            return Err(DbError::TableNotExist);
        }
        let index_id = self
            .index_names
            .get(table_name)
            .and_then(|bucket| bucket.get(index_name))
            .ok_or(DbError::IndexNotFound)?;
        self.indexes.get(index_id).ok_or(DbError::IndexNotFound)
    }

    pub fn index_by_id(&self, index_id: IndexId) -> Option<&IndexInfo> {
        self.indexes.get(&index_id)
    }

    pub fn index_by_id_mut(&mut self, index_id: IndexId) -> Option<&mut IndexInfo> {
        self.indexes.get_mut(&index_id)
    }

    /// Ids of every index on the table, empty when there are none.
    pub fn table_index_ids(&self, table_name: &str) -> Vec<IndexId> {
        let mut ids: Vec<IndexId> = self
            .index_names
            .get(table_name)
            .map(|bucket| bucket.values().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub fn table_indexes(&self, table_name: &str) -> Result<Vec<&IndexInfo>, DbError> {
        if !self.table_names.contains_key(table_name) {
            return Err(DbError::TableNotExist);
        }
        Ok(self
            .table_index_ids(table_name)
            .iter()
            .filter_map(|id| self.indexes.get(id))
            .collect())
    }

    /// Every `(table name, index)` pair, ordered by index id.
    pub fn all_indexes(&self) -> Vec<(&str, &IndexInfo)> {
        let mut all: Vec<(&str, &IndexInfo)> = Vec::new();
        for (table_name, bucket) in &self.index_names {
            for index_id in bucket.values() {
                if let Some(info) = self.indexes.get(index_id) {
                    all.push((table_name.as_str(), info));
                }
            }
        }
        all.sort_by_key(|(_, info)| info.index_id());
        all
    }

    /// Finds which table owns the named index.
    pub fn find_index_table(&self, index_name: &str) -> Option<String> {
        self.index_names
            .iter()
            .find(|(_, bucket)| bucket.contains_key(index_name))
            .map(|(table, _)| table.clone())
    }

    /// Drops exactly the named index; sibling indexes on the same table
    /// are untouched.
    pub fn drop_index(&mut self, table_name: &str, index_name: &str) -> Result<(), DbError> {
        let bucket = self
            .index_names
            .get_mut(table_name)
            .ok_or(DbError::IndexNotFound)?;
        let index_id = bucket.remove(index_name).ok_or(DbError::IndexNotFound)?;
        let mut info = self
            .indexes
            .remove(&index_id)
            .ok_or(DbError::IndexNotFound)?;
        let page_id = self
            .meta
            .index_meta_pages
            .remove(&index_id)
            .ok_or_else(|| corrupted("index missing from catalog metadata"))?;
        self.bpm.delete_page(page_id).map_err(DbError::Storage)?;
        info.btree_mut().destroy().map_err(DbError::Storage)?;
        self.flush_catalog_meta_page()?;
        Ok(())
    }

    /// Serializes the registry onto the catalog metadata page and flushes
    /// it.
    pub fn flush_catalog_meta_page(&self) -> Result<(), DbError> {
        let mut buf = Vec::new();
        self.meta.serialize_to(&mut buf);
        if buf.len() > PAGE_SIZE {
            return Err(corrupted("catalog metadata exceeds its page"));
        }
        {
            let guard = self
                .bpm
                .fetch_page(CATALOG_META_PAGE_ID)
                .map_err(DbError::Storage)?;
            let mut page = guard.write();
            page.zero();
            page.write_bytes_at(0, &buf);
        }
        self.bpm
            .flush_page(CATALOG_META_PAGE_ID)
            .map_err(DbError::Storage)?;
        Ok(())
    }

    fn write_meta_page(&self, serialize: impl FnOnce(&mut Vec<u8>)) -> Result<PageId, DbError> {
        let mut buf = Vec::new();
        serialize(&mut buf);
        if buf.len() > PAGE_SIZE {
            return Err(corrupted("metadata record exceeds one page"));
        }
        let guard = self.bpm.new_page().map_err(DbError::Storage)?;
        {
            let mut page = guard.write();
            page.write_bytes_at(0, &buf);
        }
        Ok(guard.page_id())
    }

    fn load_table(&mut self, table_id: TableId, page_id: PageId) -> Result<(), DbError> {
        let bytes = {
            let guard = self.bpm.fetch_page(page_id).map_err(DbError::Storage)?;
            let page = guard.read();
            page.data.to_vec()
        };
        let meta = TableMetadata::deserialize_from(&bytes)?;
        if meta.table_id != table_id {
            return Err(corrupted("table metadata id mismatch"));
        }
        let heap = TableHeap::open(
            Arc::clone(&self.bpm),
            meta.first_page_id,
            Arc::clone(&meta.schema),
        );
        self.table_names.insert(meta.table_name.clone(), table_id);
        self.tables.insert(table_id, TableInfo { meta, heap });
        Ok(())
    }

    fn load_index(&mut self, index_id: IndexId, page_id: PageId) -> Result<(), DbError> {
        let bytes = {
            let guard = self.bpm.fetch_page(page_id).map_err(DbError::Storage)?;
            let page = guard.read();
            page.data.to_vec()
        };
        let meta = IndexMetadata::deserialize_from(&bytes)?;
        if meta.index_id != index_id {
            return Err(corrupted("index metadata id mismatch"));
        }
        let table = self
            .tables
            .get(&meta.table_id)
            .ok_or_else(|| corrupted("index references a missing table"))?;
        let table_name = table.table_name().to_string();
        let index_name = meta.index_name.clone();
        let info = IndexInfo::build(meta, table.schema(), Arc::clone(&self.bpm))?;
        self.index_names
            .entry(table_name)
            .or_default()
            .insert(index_name, index_id);
        self.indexes.insert(index_id, info);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use substrate::record::{Column, TypeId};

    #[test]
    fn catalog_meta_round_trips() {
        let mut meta = CatalogMeta::default();
        meta.table_meta_pages.insert(0, 5);
        meta.table_meta_pages.insert(3, 9);
        meta.index_meta_pages.insert(1, 12);
        let mut buf = Vec::new();
        meta.serialize_to(&mut buf);
        let back = CatalogMeta::deserialize_from(&buf).unwrap();
        assert_eq!(back, meta);
        assert_eq!(back.next_table_id(), 4);
        assert_eq!(back.next_index_id(), 2);
    }

    #[test]
    fn table_metadata_round_trips() {
        let schema = Arc::new(Schema::new(vec![
            Column::new_scalar("id", TypeId::Int, 0, false, true),
            Column::new_char("name", 32, 1, true, false),
        ]));
        let meta = TableMetadata {
            table_id: 7,
            table_name: "accounts".to_string(),
            first_page_id: 21,
            schema,
        };
        let mut buf = Vec::new();
        meta.serialize_to(&mut buf);
        let back = TableMetadata::deserialize_from(&buf).unwrap();
        assert_eq!(back.table_id, 7);
        assert_eq!(back.table_name, "accounts");
        assert_eq!(back.first_page_id, 21);
        assert_eq!(*back.schema, *meta.schema);
    }

    #[test]
    fn index_metadata_round_trips() {
        let meta = IndexMetadata {
            index_id: 2,
            index_name: "idx_name".to_string(),
            table_id: 7,
            key_map: vec![1, 0],
        };
        let mut buf = Vec::new();
        meta.serialize_to(&mut buf);
        let back = IndexMetadata::deserialize_from(&buf).unwrap();
        assert_eq!(back.index_id, 2);
        assert_eq!(back.index_name, "idx_name");
        assert_eq!(back.table_id, 7);
        assert_eq!(back.key_map, vec![1, 0]);
    }

    #[test]
    fn bad_magic_is_fatal() {
        let meta = CatalogMeta::default();
        let mut buf = Vec::new();
        meta.serialize_to(&mut buf);
        buf[0] ^= 0x55;
        assert!(CatalogMeta::deserialize_from(&buf).is_err());
    }
}
