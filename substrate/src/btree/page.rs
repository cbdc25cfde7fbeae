//! B+ tree node layouts and the index-roots registry page.
//!
//! Leaf and internal nodes share a common header
//! `{page_type u32, key_size u32, size u32, max_size u32, parent i32}`.
//! Leaves add `next_page_id i32` and store `(key, RowId)` pairs; internal
//! nodes store `(key, child_page_id)` pairs where slot 0's key is unused
//! and only its pointer is valid. Keys are opaque fixed-width byte strings
//! of `key_size` bytes; ordering is the [`KeyManager`]'s business.

use std::cmp::Ordering;

use super::key::KeyManager;
use crate::{Page, PageId, RowId, PAGE_SIZE};

const PAGE_TYPE_OFFSET: usize = 0;
const KEY_SIZE_OFFSET: usize = 4;
const SIZE_OFFSET: usize = 8;
const MAX_SIZE_OFFSET: usize = 12;
const PARENT_OFFSET: usize = 16;
const LEAF_NEXT_OFFSET: usize = 20;

pub const LEAF_HEADER_SIZE: usize = 24;
pub const INTERNAL_HEADER_SIZE: usize = 20;

const PAGE_TYPE_LEAF: u32 = 1;
const PAGE_TYPE_INTERNAL: u32 = 2;

impl Page {
    pub fn bpt_init_leaf(&mut self, key_size: u32, max_size: u32, parent: PageId) {
        self.write_u32_at(PAGE_TYPE_OFFSET, PAGE_TYPE_LEAF);
        self.write_u32_at(KEY_SIZE_OFFSET, key_size);
        self.write_u32_at(SIZE_OFFSET, 0);
        self.write_u32_at(MAX_SIZE_OFFSET, max_size);
        self.write_i32_at(PARENT_OFFSET, parent);
        self.write_i32_at(LEAF_NEXT_OFFSET, crate::INVALID_PAGE_ID);
    }

    pub fn bpt_init_internal(&mut self, key_size: u32, max_size: u32, parent: PageId) {
        self.write_u32_at(PAGE_TYPE_OFFSET, PAGE_TYPE_INTERNAL);
        self.write_u32_at(KEY_SIZE_OFFSET, key_size);
        self.write_u32_at(SIZE_OFFSET, 0);
        self.write_u32_at(MAX_SIZE_OFFSET, max_size);
        self.write_i32_at(PARENT_OFFSET, parent);
    }

    pub fn bpt_is_leaf(&self) -> bool {
        self.read_u32_at(PAGE_TYPE_OFFSET) == PAGE_TYPE_LEAF
    }

    pub fn bpt_key_size(&self) -> u32 {
        self.read_u32_at(KEY_SIZE_OFFSET)
    }

    pub fn bpt_size(&self) -> u32 {
        self.read_u32_at(SIZE_OFFSET)
    }

    pub fn bpt_set_size(&mut self, size: u32) {
        self.write_u32_at(SIZE_OFFSET, size);
    }

    pub fn bpt_max_size(&self) -> u32 {
        self.read_u32_at(MAX_SIZE_OFFSET)
    }

    /// Minimum occupancy for a non-root node. A split leaves the lower
    /// half with `max_size / 2` entries, so that is the floor a node may
    /// legitimately sit at.
    pub fn bpt_min_size(&self) -> u32 {
        self.bpt_max_size() / 2
    }

    pub fn bpt_parent_page_id(&self) -> PageId {
        self.read_i32_at(PARENT_OFFSET)
    }

    pub fn bpt_set_parent_page_id(&mut self, parent: PageId) {
        self.write_i32_at(PARENT_OFFSET, parent);
    }

    // ---- leaf accessors ----

    pub fn leaf_next_page_id(&self) -> PageId {
        self.read_i32_at(LEAF_NEXT_OFFSET)
    }

    pub fn leaf_set_next_page_id(&mut self, next: PageId) {
        self.write_i32_at(LEAF_NEXT_OFFSET, next);
    }

    fn leaf_pair_size(&self) -> usize {
        self.bpt_key_size() as usize + 8
    }

    fn leaf_pair_offset(&self, index: u32) -> usize {
        LEAF_HEADER_SIZE + index as usize * self.leaf_pair_size()
    }

    pub fn leaf_key_at(&self, index: u32) -> &[u8] {
        self.bytes_at(self.leaf_pair_offset(index), self.bpt_key_size() as usize)
    }

    pub fn leaf_rid_at(&self, index: u32) -> RowId {
        let off = self.leaf_pair_offset(index) + self.bpt_key_size() as usize;
        RowId::from_u64(self.read_u64_at(off))
    }

    /// Raw bytes of `count` consecutive pairs starting at `index`.
    pub fn leaf_pair_bytes(&self, index: u32, count: u32) -> &[u8] {
        self.bytes_at(
            self.leaf_pair_offset(index),
            count as usize * self.leaf_pair_size(),
        )
    }

    pub fn leaf_write_pair_bytes(&mut self, index: u32, bytes: &[u8]) {
        debug_assert_eq!(bytes.len() % self.leaf_pair_size(), 0);
        let off = self.leaf_pair_offset(index);
        self.write_bytes_at(off, bytes);
    }

    /// Inserts the pair at `index`, shifting later pairs right.
    pub fn leaf_insert_at(&mut self, index: u32, key: &[u8], rid: RowId) {
        debug_assert_eq!(key.len(), self.bpt_key_size() as usize);
        let size = self.bpt_size();
        debug_assert!(index <= size);
        let pair = self.leaf_pair_size();
        if index < size {
            self.shift_bytes(
                self.leaf_pair_offset(index),
                self.leaf_pair_offset(index + 1),
                (size - index) as usize * pair,
            );
        }
        let off = self.leaf_pair_offset(index);
        self.write_bytes_at(off, key);
        self.write_u64_at(off + key.len(), rid.to_u64());
        self.bpt_set_size(size + 1);
    }

    pub fn leaf_remove_at(&mut self, index: u32) {
        let size = self.bpt_size();
        debug_assert!(index < size);
        if index + 1 < size {
            let pair = self.leaf_pair_size();
            self.shift_bytes(
                self.leaf_pair_offset(index + 1),
                self.leaf_pair_offset(index),
                (size - index - 1) as usize * pair,
            );
        }
        self.bpt_set_size(size - 1);
    }

    /// First index whose key is `>= key`, or `size` when every key is
    /// smaller.
    pub fn leaf_key_index(&self, key: &[u8], km: &KeyManager) -> u32 {
        let mut low = 0;
        let mut high = self.bpt_size();
        while low < high {
            let mid = low + (high - low) / 2;
            match km.compare(self.leaf_key_at(mid), key) {
                Ordering::Less => low = mid + 1,
                _ => high = mid,
            }
        }
        low
    }

    pub fn leaf_lookup(&self, key: &[u8], km: &KeyManager) -> Option<(u32, RowId)> {
        let index = self.leaf_key_index(key, km);
        if index < self.bpt_size() && km.compare(self.leaf_key_at(index), key) == Ordering::Equal {
            Some((index, self.leaf_rid_at(index)))
        } else {
            None
        }
    }

    // ---- internal accessors ----

    fn internal_pair_size(&self) -> usize {
        self.bpt_key_size() as usize + 4
    }

    fn internal_pair_offset(&self, index: u32) -> usize {
        INTERNAL_HEADER_SIZE + index as usize * self.internal_pair_size()
    }

    pub fn internal_key_at(&self, index: u32) -> &[u8] {
        self.bytes_at(self.internal_pair_offset(index), self.bpt_key_size() as usize)
    }

    pub fn internal_set_key_at(&mut self, index: u32, key: &[u8]) {
        debug_assert_eq!(key.len(), self.bpt_key_size() as usize);
        let off = self.internal_pair_offset(index);
        self.write_bytes_at(off, key);
    }

    pub fn internal_child_at(&self, index: u32) -> PageId {
        let off = self.internal_pair_offset(index) + self.bpt_key_size() as usize;
        self.read_i32_at(off)
    }

    pub fn internal_set_child_at(&mut self, index: u32, child: PageId) {
        let off = self.internal_pair_offset(index) + self.bpt_key_size() as usize;
        self.write_i32_at(off, child);
    }

    pub fn internal_pair_bytes(&self, index: u32, count: u32) -> &[u8] {
        self.bytes_at(
            self.internal_pair_offset(index),
            count as usize * self.internal_pair_size(),
        )
    }

    pub fn internal_write_pair_bytes(&mut self, index: u32, bytes: &[u8]) {
        debug_assert_eq!(bytes.len() % self.internal_pair_size(), 0);
        let off = self.internal_pair_offset(index);
        self.write_bytes_at(off, bytes);
    }

    pub fn internal_insert_at(&mut self, index: u32, key: &[u8], child: PageId) {
        let size = self.bpt_size();
        debug_assert!(index <= size);
        let pair = self.internal_pair_size();
        if index < size {
            self.shift_bytes(
                self.internal_pair_offset(index),
                self.internal_pair_offset(index + 1),
                (size - index) as usize * pair,
            );
        }
        self.internal_set_key_at(index, key);
        self.internal_set_child_at(index, child);
        self.bpt_set_size(size + 1);
    }

    /// Inserts a child at position 0. The displaced first entry takes
    /// `separator` as its key, since slot 0's key is unused.
    pub fn internal_insert_front(&mut self, child: PageId, separator: &[u8]) {
        let size = self.bpt_size();
        let pair = self.internal_pair_size();
        self.shift_bytes(
            self.internal_pair_offset(0),
            self.internal_pair_offset(1),
            size as usize * pair,
        );
        self.internal_set_child_at(0, child);
        let zero = vec![0u8; self.bpt_key_size() as usize];
        self.internal_set_key_at(0, &zero);
        self.internal_set_key_at(1, separator);
        self.bpt_set_size(size + 1);
    }

    pub fn internal_remove_at(&mut self, index: u32) {
        let size = self.bpt_size();
        debug_assert!(index < size);
        if index + 1 < size {
            let pair = self.internal_pair_size();
            self.shift_bytes(
                self.internal_pair_offset(index + 1),
                self.internal_pair_offset(index),
                (size - index - 1) as usize * pair,
            );
        }
        self.bpt_set_size(size - 1);
    }

    /// Position of the given child pointer, if present.
    pub fn internal_child_index(&self, child: PageId) -> Option<u32> {
        (0..self.bpt_size()).find(|&i| self.internal_child_at(i) == child)
    }

    /// The child whose key range covers `key`: the greatest `i >= 1` with
    /// `key(i) <= key`, or child 0 when there is none.
    pub fn internal_lookup(&self, key: &[u8], km: &KeyManager) -> PageId {
        let mut low = 1;
        let mut high = self.bpt_size();
        while low < high {
            let mid = low + (high - low) / 2;
            match km.compare(self.internal_key_at(mid), key) {
                Ordering::Greater => high = mid,
                _ => low = mid + 1,
            }
        }
        self.internal_child_at(low - 1)
    }
}

// ---- index roots page ----

const ROOTS_COUNT_OFFSET: usize = 0;
const ROOTS_HEADER_SIZE: usize = 4;
const ROOTS_ENTRY_SIZE: usize = 8;

/// Entries the singleton roots page can hold.
pub const MAX_INDEX_ROOTS: u32 = ((PAGE_SIZE - ROOTS_HEADER_SIZE) / ROOTS_ENTRY_SIZE) as u32;

impl Page {
    fn roots_count(&self) -> u32 {
        self.read_u32_at(ROOTS_COUNT_OFFSET)
    }

    fn roots_entry_offset(index: u32) -> usize {
        ROOTS_HEADER_SIZE + index as usize * ROOTS_ENTRY_SIZE
    }

    fn roots_find(&self, index_id: crate::IndexId) -> Option<u32> {
        (0..self.roots_count())
            .find(|&i| self.read_u32_at(Self::roots_entry_offset(i)) == index_id)
    }

    pub fn roots_get(&self, index_id: crate::IndexId) -> Option<PageId> {
        let slot = self.roots_find(index_id)?;
        Some(self.read_i32_at(Self::roots_entry_offset(slot) + 4))
    }

    /// Inserts or updates the entry. False when the page is full.
    pub fn roots_set(&mut self, index_id: crate::IndexId, root: PageId) -> bool {
        let slot = match self.roots_find(index_id) {
            Some(slot) => slot,
            None => {
                let count = self.roots_count();
                if count >= MAX_INDEX_ROOTS {
                    return false;
                }
                self.write_u32_at(ROOTS_COUNT_OFFSET, count + 1);
                count
            }
        };
        let off = Self::roots_entry_offset(slot);
        self.write_u32_at(off, index_id);
        self.write_i32_at(off + 4, root);
        true
    }

    pub fn roots_remove(&mut self, index_id: crate::IndexId) -> bool {
        let Some(slot) = self.roots_find(index_id) else {
            return false;
        };
        let count = self.roots_count();
        if slot + 1 < count {
            self.shift_bytes(
                Self::roots_entry_offset(slot + 1),
                Self::roots_entry_offset(slot),
                (count - slot - 1) as usize * ROOTS_ENTRY_SIZE,
            );
        }
        self.write_u32_at(ROOTS_COUNT_OFFSET, count - 1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Column, Field, Row, Schema, TypeId};
    use crate::INVALID_PAGE_ID;
    use std::sync::Arc;

    fn int_key_manager() -> KeyManager {
        let schema = Arc::new(Schema::new(vec![Column::new_scalar(
            "k",
            TypeId::Int,
            0,
            false,
            false,
        )]));
        KeyManager::new(schema).unwrap()
    }

    fn key(km: &KeyManager, v: i32) -> Vec<u8> {
        km.encode(&Row::new(vec![Field::Int(v)])).unwrap()
    }

    #[test]
    fn leaf_pairs_insert_in_sorted_positions() {
        let km = int_key_manager();
        let mut page = Page::new(7);
        page.bpt_init_leaf(km.key_size(), 16, INVALID_PAGE_ID);
        for v in [30, 10, 20] {
            let k = key(&km, v);
            let idx = page.leaf_key_index(&k, &km);
            page.leaf_insert_at(idx, &k, RowId::new(1, v as u32));
        }
        assert_eq!(page.bpt_size(), 3);
        let decoded: Vec<i32> = (0..3)
            .map(|i| match km.decode(page.leaf_key_at(i)).unwrap().field(0) {
                Field::Int(v) => *v,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(decoded, vec![10, 20, 30]);
        assert_eq!(page.leaf_rid_at(1), RowId::new(1, 20));
    }

    #[test]
    fn leaf_lookup_finds_exact_matches_only() {
        let km = int_key_manager();
        let mut page = Page::new(7);
        page.bpt_init_leaf(km.key_size(), 16, INVALID_PAGE_ID);
        for v in [2, 4, 6] {
            let k = key(&km, v);
            let idx = page.leaf_key_index(&k, &km);
            page.leaf_insert_at(idx, &k, RowId::new(0, v as u32));
        }
        assert!(page.leaf_lookup(&key(&km, 4), &km).is_some());
        assert!(page.leaf_lookup(&key(&km, 5), &km).is_none());
    }

    #[test]
    fn internal_lookup_partitions_the_key_space() {
        let km = int_key_manager();
        let mut page = Page::new(9);
        page.bpt_init_internal(km.key_size(), 16, INVALID_PAGE_ID);
        // children: [p10) [10,20) [20,inf)
        let zero = vec![0u8; km.key_size() as usize];
        page.internal_insert_at(0, &zero, 100);
        page.internal_insert_at(1, &key(&km, 10), 200);
        page.internal_insert_at(2, &key(&km, 20), 300);
        assert_eq!(page.internal_lookup(&key(&km, 5), &km), 100);
        assert_eq!(page.internal_lookup(&key(&km, 10), &km), 200);
        assert_eq!(page.internal_lookup(&key(&km, 19), &km), 200);
        assert_eq!(page.internal_lookup(&key(&km, 42), &km), 300);
        assert_eq!(page.internal_child_index(200), Some(1));
        assert_eq!(page.internal_child_index(999), None);
    }

    #[test]
    fn internal_insert_front_keeps_separators() {
        let km = int_key_manager();
        let mut page = Page::new(9);
        page.bpt_init_internal(km.key_size(), 16, INVALID_PAGE_ID);
        let zero = vec![0u8; km.key_size() as usize];
        page.internal_insert_at(0, &zero, 100);
        page.internal_insert_at(1, &key(&km, 10), 200);
        page.internal_insert_front(50, &key(&km, 5));
        assert_eq!(page.bpt_size(), 3);
        assert_eq!(page.internal_child_at(0), 50);
        assert_eq!(page.internal_child_at(1), 100);
        assert_eq!(page.internal_child_at(2), 200);
        assert_eq!(km.compare(page.internal_key_at(1), &key(&km, 5)), Ordering::Equal);
        assert_eq!(km.compare(page.internal_key_at(2), &key(&km, 10)), Ordering::Equal);
    }

    #[test]
    fn roots_page_set_get_remove() {
        let mut page = Page::new(1);
        assert_eq!(page.roots_get(3), None);
        assert!(page.roots_set(3, 40));
        assert!(page.roots_set(5, 50));
        assert_eq!(page.roots_get(3), Some(40));
        assert!(page.roots_set(3, 41));
        assert_eq!(page.roots_get(3), Some(41));
        assert!(page.roots_remove(3));
        assert_eq!(page.roots_get(3), None);
        assert_eq!(page.roots_get(5), Some(50));
        assert!(!page.roots_remove(3));
    }
}
