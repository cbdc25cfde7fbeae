//! B+ tree index over buffer-pool pages.
//!
//! Classic algorithm: descent releases each internal page before latching
//! its child; leaf mutations hold the leaf's write latch; structural
//! changes (split, coalesce, redistribute, root adjustment) latch every
//! participating page before mutating. Page deletions happen only after
//! all guards on the page are dropped, so the pool's pin==0 precondition
//! holds by construction. Keys are unique; inserting a duplicate is a
//! rejected no-op.

pub mod key;
pub mod page;

pub use key::KeyManager;

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{Result, StorageError};
use crate::{
    substrate_debug_log, BufferPoolManager, IndexId, PageGuard, PageId, RowId,
    INDEX_ROOTS_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE,
};

/// Passing this as a max size derives the node fan-out from the key width.
pub const UNDEFINED_MAX_SIZE: u32 = 0;

pub struct BPlusTree {
    index_id: IndexId,
    bpm: Arc<BufferPoolManager>,
    km: KeyManager,
    root_page_id: PageId,
    leaf_max_size: u32,
    internal_max_size: u32,
}

impl BPlusTree {
    /// Opens the tree registered under `index_id` in the roots page,
    /// starting empty when no root is recorded yet.
    pub fn new(
        index_id: IndexId,
        bpm: Arc<BufferPoolManager>,
        km: KeyManager,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        let root_page_id = {
            let guard = bpm.fetch_page(INDEX_ROOTS_PAGE_ID)?;
            let root = guard.read().roots_get(index_id);
            root.unwrap_or(INVALID_PAGE_ID)
        };
        let key_size = km.key_size() as usize;
        let leaf_max_size = if leaf_max_size == UNDEFINED_MAX_SIZE {
            ((PAGE_SIZE - page::LEAF_HEADER_SIZE) / (key_size + 8)) as u32
        } else {
            leaf_max_size
        };
        let internal_max_size = if internal_max_size == UNDEFINED_MAX_SIZE {
            ((PAGE_SIZE - page::INTERNAL_HEADER_SIZE) / (key_size + 4)) as u32
        } else {
            internal_max_size
        };
        debug_assert!(leaf_max_size >= 2 && internal_max_size >= 3);
        Ok(Self {
            index_id,
            bpm,
            km,
            root_page_id,
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn index_id(&self) -> IndexId {
        self.index_id
    }

    pub fn key_manager(&self) -> &KeyManager {
        &self.km
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id == INVALID_PAGE_ID
    }

    /// Point lookup.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<RowId>> {
        if self.is_empty() {
            return Ok(None);
        }
        let bpm = Arc::clone(&self.bpm);
        let guard = self.find_leaf(&bpm, Some(key))?;
        let page = guard.read();
        Ok(page.leaf_lookup(key, &self.km).map(|(_, rid)| rid))
    }

    /// Inserts the pair. False when the key is already present; the tree
    /// is unchanged in that case.
    pub fn insert(&mut self, key: &[u8], rid: RowId) -> Result<bool> {
        if self.is_empty() {
            self.start_new_tree(key, rid)?;
            return Ok(true);
        }
        let bpm = Arc::clone(&self.bpm);
        let leaf_guard = self.find_leaf(&bpm, Some(key))?;
        let leaf_id = leaf_guard.page_id();
        {
            let page = leaf_guard.read();
            if page.leaf_lookup(key, &self.km).is_some() {
                return Ok(false);
            }
        }
        let size = leaf_guard.read().bpt_size();
        if size < self.leaf_max_size {
            let mut page = leaf_guard.write();
            let index = page.leaf_key_index(key, &self.km);
            page.leaf_insert_at(index, key, rid);
            return Ok(true);
        }

        // The leaf is full: split it, then push the new leaf's first key
        // up to the parent.
        let new_guard = bpm.new_page()?;
        let new_leaf_id = new_guard.page_id();
        let middle_key = {
            let mut old = leaf_guard.write();
            let mut new_leaf = new_guard.write();
            new_leaf.bpt_init_leaf(
                self.km.key_size(),
                self.leaf_max_size,
                old.bpt_parent_page_id(),
            );
            let mid = size / 2;
            let moved = size - mid;
            let bytes = old.leaf_pair_bytes(mid, moved).to_vec();
            new_leaf.leaf_write_pair_bytes(0, &bytes);
            new_leaf.bpt_set_size(moved);
            old.bpt_set_size(mid);
            new_leaf.leaf_set_next_page_id(old.leaf_next_page_id());
            old.leaf_set_next_page_id(new_leaf_id);
            new_leaf.leaf_key_at(0).to_vec()
        };
        {
            let target = if self.km.compare(key, &middle_key) == Ordering::Less {
                &leaf_guard
            } else {
                &new_guard
            };
            let mut page = target.write();
            let index = page.leaf_key_index(key, &self.km);
            page.leaf_insert_at(index, key, rid);
        }
        drop(new_guard);
        drop(leaf_guard);
        self.insert_into_parent(leaf_id, &middle_key, new_leaf_id)?;
        Ok(true)
    }

    /// Removes the key. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &[u8]) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let bpm = Arc::clone(&self.bpm);
        let leaf_id = {
            let leaf_guard = self.find_leaf(&bpm, Some(key))?;
            let found = {
                let page = leaf_guard.read();
                page.leaf_lookup(key, &self.km).map(|(index, _)| index)
            };
            let Some(index) = found else {
                return Ok(());
            };
            leaf_guard.write().leaf_remove_at(index);
            leaf_guard.page_id()
        };
        self.handle_underflow(leaf_id)
    }

    /// Deallocates every page of the tree and clears its roots-page entry.
    pub fn destroy(&mut self) -> Result<()> {
        if self.root_page_id != INVALID_PAGE_ID {
            self.destroy_subtree(self.root_page_id)?;
            self.root_page_id = INVALID_PAGE_ID;
        }
        let guard = self.bpm.fetch_page(INDEX_ROOTS_PAGE_ID)?;
        guard.write().roots_remove(self.index_id);
        Ok(())
    }

    /// Debug probe matching the test harness: no frame may stay pinned
    /// once an operation has returned.
    pub fn check(&self) -> bool {
        let all_unpinned = self.bpm.check_all_unpinned();
        if !all_unpinned {
            substrate_debug_log!("[BPlusTree::check] leaked pin detected");
        }
        all_unpinned
    }

    /// Iterates from the leftmost entry.
    pub fn iter(&self) -> Result<BTreeIterator> {
        if self.is_empty() {
            return Ok(BTreeIterator::end(&self.bpm, &self.km));
        }
        let bpm = Arc::clone(&self.bpm);
        let guard = self.find_leaf(&bpm, None)?;
        Ok(BTreeIterator {
            bpm: Arc::clone(&self.bpm),
            km: self.km.clone(),
            page_id: guard.page_id(),
            index: 0,
        })
    }

    /// Iterates from the first entry `>= key`.
    pub fn iter_from(&self, key: &[u8]) -> Result<BTreeIterator> {
        if self.is_empty() {
            return Ok(BTreeIterator::end(&self.bpm, &self.km));
        }
        let bpm = Arc::clone(&self.bpm);
        let guard = self.find_leaf(&bpm, Some(key))?;
        let page = guard.read();
        let index = page.leaf_key_index(key, &self.km);
        if index < page.bpt_size() {
            Ok(BTreeIterator {
                bpm: Arc::clone(&self.bpm),
                km: self.km.clone(),
                page_id: guard.page_id(),
                index,
            })
        } else {
            // Past the last entry of this leaf: start at the next one.
            Ok(BTreeIterator {
                bpm: Arc::clone(&self.bpm),
                km: self.km.clone(),
                page_id: page.leaf_next_page_id(),
                index: 0,
            })
        }
    }

    /// Validates order, balance, occupancy, and parent pointers across the
    /// whole tree.
    pub fn check_integrity(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let bpm = Arc::clone(&self.bpm);
        let mut leaf_depth = None;
        self.check_node(&bpm, self.root_page_id, INVALID_PAGE_ID, 0, &mut leaf_depth, None, None)?;
        let mut previous: Option<Vec<u8>> = None;
        for entry in self.iter()? {
            let (key, _) = entry?;
            if let Some(prev) = &previous {
                if self.km.compare(prev, &key) != Ordering::Less {
                    return Err(StorageError::Corrupted("leaf chain is not increasing"));
                }
            }
            previous = Some(key);
        }
        Ok(())
    }

    fn find_leaf<'a>(
        &self,
        bpm: &'a BufferPoolManager,
        key: Option<&[u8]>,
    ) -> Result<PageGuard<'a>> {
        let mut current = self.root_page_id;
        loop {
            let guard = bpm.fetch_page(current)?;
            let child = {
                let page = guard.read();
                if page.bpt_is_leaf() {
                    None
                } else {
                    Some(match key {
                        Some(k) => page.internal_lookup(k, &self.km),
                        None => page.internal_child_at(0),
                    })
                }
            };
            match child {
                None => return Ok(guard),
                Some(child) => {
                    drop(guard);
                    current = child;
                }
            }
        }
    }

    fn start_new_tree(&mut self, key: &[u8], rid: RowId) -> Result<()> {
        let bpm = Arc::clone(&self.bpm);
        let guard = bpm.new_page()?;
        {
            let mut page = guard.write();
            page.bpt_init_leaf(self.km.key_size(), self.leaf_max_size, INVALID_PAGE_ID);
            page.leaf_insert_at(0, key, rid);
        }
        self.root_page_id = guard.page_id();
        drop(guard);
        self.update_roots_entry()
    }

    /// Registers `new_id` (whose smallest key is `key`) as the right
    /// sibling of `old_id`, growing a new root or splitting the parent as
    /// needed.
    fn insert_into_parent(&mut self, old_id: PageId, key: &[u8], new_id: PageId) -> Result<()> {
        let bpm = Arc::clone(&self.bpm);
        let parent_id = {
            let guard = bpm.fetch_page(old_id)?;
            let parent = guard.read().bpt_parent_page_id();
            parent
        };

        if parent_id == INVALID_PAGE_ID {
            // The split node was the root: grow the tree by one level.
            let root_guard = bpm.new_page()?;
            let root_id = root_guard.page_id();
            {
                let mut root = root_guard.write();
                root.bpt_init_internal(
                    self.km.key_size(),
                    self.internal_max_size,
                    INVALID_PAGE_ID,
                );
                let zero = vec![0u8; self.km.key_size() as usize];
                root.internal_insert_at(0, &zero, old_id);
                root.internal_insert_at(1, key, new_id);
            }
            drop(root_guard);
            for id in [old_id, new_id] {
                bpm.fetch_page(id)?.write().bpt_set_parent_page_id(root_id);
            }
            self.root_page_id = root_id;
            return self.update_roots_entry();
        }

        let parent_guard = bpm.fetch_page(parent_id)?;
        let parent_size = parent_guard.read().bpt_size();
        if parent_size < self.internal_max_size {
            {
                let mut parent = parent_guard.write();
                let index = parent
                    .internal_child_index(old_id)
                    .ok_or(StorageError::Corrupted("node missing from its parent"))?;
                parent.internal_insert_at(index + 1, key, new_id);
            }
            drop(parent_guard);
            bpm.fetch_page(new_id)?.write().bpt_set_parent_page_id(parent_id);
            return Ok(());
        }

        // The parent is full too: split it and recurse.
        let sibling_guard = bpm.new_page()?;
        let sibling_id = sibling_guard.page_id();
        let (middle_key, moved_children, old_in_left) = {
            let mut parent = parent_guard.write();
            let mut sibling = sibling_guard.write();
            sibling.bpt_init_internal(
                self.km.key_size(),
                self.internal_max_size,
                parent.bpt_parent_page_id(),
            );
            let mid = parent_size / 2;
            let moved = parent_size - mid;
            let bytes = parent.internal_pair_bytes(mid, moved).to_vec();
            sibling.internal_write_pair_bytes(0, &bytes);
            sibling.bpt_set_size(moved);
            parent.bpt_set_size(mid);
            let middle_key = sibling.internal_key_at(0).to_vec();
            let moved_children: Vec<PageId> =
                (0..moved).map(|i| sibling.internal_child_at(i)).collect();
            let old_in_left = parent.internal_child_index(old_id).is_some();
            (middle_key, moved_children, old_in_left)
        };
        drop(sibling_guard);
        drop(parent_guard);
        for child in &moved_children {
            bpm.fetch_page(*child)?
                .write()
                .bpt_set_parent_page_id(sibling_id);
        }
        let target_id = if old_in_left { parent_id } else { sibling_id };
        {
            let guard = bpm.fetch_page(target_id)?;
            let mut target = guard.write();
            let index = target
                .internal_child_index(old_id)
                .ok_or(StorageError::Corrupted("split lost a child pointer"))?;
            target.internal_insert_at(index + 1, key, new_id);
        }
        bpm.fetch_page(new_id)?.write().bpt_set_parent_page_id(target_id);
        self.insert_into_parent(parent_id, &middle_key, sibling_id)
    }

    /// Rebalances after a removal: shortens the tree at the root, leaves a
    /// node alone at or above minimum occupancy, and otherwise merges with
    /// or borrows from an immediate sibling.
    fn handle_underflow(&mut self, page_id: PageId) -> Result<()> {
        let bpm = Arc::clone(&self.bpm);
        let (size, min_size, parent_id) = {
            let guard = bpm.fetch_page(page_id)?;
            let page = guard.read();
            (page.bpt_size(), page.bpt_min_size(), page.bpt_parent_page_id())
        };
        if parent_id == INVALID_PAGE_ID {
            return self.adjust_root(page_id);
        }
        if size >= min_size {
            return Ok(());
        }
        self.coalesce_or_redistribute(page_id, parent_id)
    }

    fn coalesce_or_redistribute(&mut self, node_id: PageId, parent_id: PageId) -> Result<()> {
        let bpm = Arc::clone(&self.bpm);
        let (index, sibling_id) = {
            let guard = bpm.fetch_page(parent_id)?;
            let parent = guard.read();
            let index = parent
                .internal_child_index(node_id)
                .ok_or(StorageError::Corrupted("node missing from its parent"))?;
            let sibling_id = if index == 0 {
                parent.internal_child_at(1)
            } else {
                parent.internal_child_at(index - 1)
            };
            (index, sibling_id)
        };
        let (node_size, max_size) = {
            let guard = bpm.fetch_page(node_id)?;
            let page = guard.read();
            (page.bpt_size(), page.bpt_max_size())
        };
        let sibling_size = {
            let guard = bpm.fetch_page(sibling_id)?;
            let size = guard.read().bpt_size();
            size
        };
        if node_size + sibling_size > max_size {
            self.redistribute(node_id, sibling_id, parent_id, index)
        } else {
            self.coalesce(node_id, sibling_id, parent_id, index)
        }
    }

    /// Moves one entry from the sibling's adjacent end and rewrites the
    /// parent's separator to the new boundary key.
    fn redistribute(
        &mut self,
        node_id: PageId,
        sibling_id: PageId,
        parent_id: PageId,
        index: u32,
    ) -> Result<()> {
        let bpm = Arc::clone(&self.bpm);
        let node_guard = bpm.fetch_page(node_id)?;
        let sibling_guard = bpm.fetch_page(sibling_id)?;
        let parent_guard = bpm.fetch_page(parent_id)?;
        let is_leaf = node_guard.read().bpt_is_leaf();
        let mut moved_child = INVALID_PAGE_ID;
        if is_leaf {
            if index == 0 {
                // Right sibling: its first pair becomes our last.
                let (key, rid) = {
                    let sibling = sibling_guard.read();
                    (sibling.leaf_key_at(0).to_vec(), sibling.leaf_rid_at(0))
                };
                {
                    let mut node = node_guard.write();
                    let size = node.bpt_size();
                    node.leaf_insert_at(size, &key, rid);
                }
                sibling_guard.write().leaf_remove_at(0);
                let separator = sibling_guard.read().leaf_key_at(0).to_vec();
                parent_guard.write().internal_set_key_at(1, &separator);
            } else {
                // Left sibling: its last pair becomes our first.
                let (key, rid) = {
                    let sibling = sibling_guard.read();
                    let last = sibling.bpt_size() - 1;
                    (sibling.leaf_key_at(last).to_vec(), sibling.leaf_rid_at(last))
                };
                {
                    let mut sibling = sibling_guard.write();
                    let last = sibling.bpt_size() - 1;
                    sibling.leaf_remove_at(last);
                }
                node_guard.write().leaf_insert_at(0, &key, rid);
                parent_guard.write().internal_set_key_at(index, &key);
            }
        } else if index == 0 {
            let separator = parent_guard.read().internal_key_at(1).to_vec();
            let (next_separator, child) = {
                let sibling = sibling_guard.read();
                (sibling.internal_key_at(1).to_vec(), sibling.internal_child_at(0))
            };
            {
                let mut node = node_guard.write();
                let size = node.bpt_size();
                node.internal_insert_at(size, &separator, child);
            }
            sibling_guard.write().internal_remove_at(0);
            parent_guard.write().internal_set_key_at(1, &next_separator);
            moved_child = child;
        } else {
            let separator = parent_guard.read().internal_key_at(index).to_vec();
            let (last_key, child) = {
                let sibling = sibling_guard.read();
                let last = sibling.bpt_size() - 1;
                (sibling.internal_key_at(last).to_vec(), sibling.internal_child_at(last))
            };
            {
                let mut sibling = sibling_guard.write();
                let last = sibling.bpt_size() - 1;
                sibling.internal_remove_at(last);
            }
            node_guard.write().internal_insert_front(child, &separator);
            parent_guard.write().internal_set_key_at(index, &last_key);
            moved_child = child;
        }
        if moved_child != INVALID_PAGE_ID {
            bpm.fetch_page(moved_child)?
                .write()
                .bpt_set_parent_page_id(node_id);
        }
        Ok(())
    }

    /// Merges the pair of siblings into the left one, removes the parent's
    /// separator, and recurses upward when the parent underflows.
    fn coalesce(
        &mut self,
        node_id: PageId,
        sibling_id: PageId,
        parent_id: PageId,
        index: u32,
    ) -> Result<()> {
        // Merge right into left: index 0 means our sibling is to the right.
        let (left_id, right_id, separator_index) = if index == 0 {
            (node_id, sibling_id, 1)
        } else {
            (sibling_id, node_id, index)
        };
        let bpm = Arc::clone(&self.bpm);
        {
            let left_guard = bpm.fetch_page(left_id)?;
            let right_guard = bpm.fetch_page(right_id)?;
            let parent_guard = bpm.fetch_page(parent_id)?;
            let is_leaf = left_guard.read().bpt_is_leaf();
            if is_leaf {
                let mut left = left_guard.write();
                let right = right_guard.read();
                let left_size = left.bpt_size();
                let right_size = right.bpt_size();
                let bytes = right.leaf_pair_bytes(0, right_size).to_vec();
                left.leaf_write_pair_bytes(left_size, &bytes);
                left.bpt_set_size(left_size + right_size);
                left.leaf_set_next_page_id(right.leaf_next_page_id());
            } else {
                let separator = parent_guard.read().internal_key_at(separator_index).to_vec();
                let moved_children: Vec<PageId> = {
                    let right = right_guard.read();
                    (0..right.bpt_size()).map(|i| right.internal_child_at(i)).collect()
                };
                {
                    let mut left = left_guard.write();
                    let right = right_guard.read();
                    let left_size = left.bpt_size();
                    let right_size = right.bpt_size();
                    let bytes = right.internal_pair_bytes(0, right_size).to_vec();
                    left.internal_write_pair_bytes(left_size, &bytes);
                    // The right node's slot-0 key was unused; the parent's
                    // separator is the real boundary.
                    left.internal_set_key_at(left_size, &separator);
                    left.bpt_set_size(left_size + right_size);
                }
                for child in moved_children {
                    bpm.fetch_page(child)?
                        .write()
                        .bpt_set_parent_page_id(left_id);
                }
            }
            parent_guard.write().internal_remove_at(separator_index);
        }
        self.bpm.delete_page(right_id)?;
        self.handle_underflow(parent_id)
    }

    /// Shortens the tree: an emptied leaf root clears the tree; an
    /// internal root with a single child hands the root to that child.
    fn adjust_root(&mut self, root_id: PageId) -> Result<()> {
        let bpm = Arc::clone(&self.bpm);
        let (is_leaf, size) = {
            let guard = bpm.fetch_page(root_id)?;
            let page = guard.read();
            (page.bpt_is_leaf(), page.bpt_size())
        };
        if is_leaf && size == 0 {
            bpm.delete_page(root_id)?;
            self.root_page_id = INVALID_PAGE_ID;
            self.update_roots_entry()
        } else if !is_leaf && size == 1 {
            let child = {
                let guard = bpm.fetch_page(root_id)?;
                let child = guard.read().internal_child_at(0);
                child
            };
            bpm.fetch_page(child)?
                .write()
                .bpt_set_parent_page_id(INVALID_PAGE_ID);
            bpm.delete_page(root_id)?;
            self.root_page_id = child;
            self.update_roots_entry()
        } else {
            Ok(())
        }
    }

    fn update_roots_entry(&self) -> Result<()> {
        let guard = self.bpm.fetch_page(INDEX_ROOTS_PAGE_ID)?;
        if !guard.write().roots_set(self.index_id, self.root_page_id) {
            return Err(StorageError::Corrupted("index roots page is full"));
        }
        Ok(())
    }

    fn destroy_subtree(&self, page_id: PageId) -> Result<()> {
        let children: Vec<PageId> = {
            let guard = self.bpm.fetch_page(page_id)?;
            let page = guard.read();
            if page.bpt_is_leaf() {
                Vec::new()
            } else {
                (0..page.bpt_size()).map(|i| page.internal_child_at(i)).collect()
            }
        };
        for child in children {
            self.destroy_subtree(child)?;
        }
        self.bpm.delete_page(page_id)
    }

    #[allow(clippy::too_many_arguments)]
    fn check_node(
        &self,
        bpm: &BufferPoolManager,
        page_id: PageId,
        expected_parent: PageId,
        depth: u32,
        leaf_depth: &mut Option<u32>,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> Result<()> {
        let guard = bpm.fetch_page(page_id)?;
        let page = guard.read();
        if page.bpt_parent_page_id() != expected_parent {
            return Err(StorageError::Corrupted("parent pointer mismatch"));
        }
        let size = page.bpt_size();
        let is_root = expected_parent == INVALID_PAGE_ID;
        if is_root {
            if size == 0 {
                return Err(StorageError::Corrupted("empty root"));
            }
        } else if size < page.bpt_min_size() || size > page.bpt_max_size() {
            return Err(StorageError::Corrupted("node occupancy out of bounds"));
        }
        let in_bounds = |key: &[u8]| {
            lower.map_or(true, |lo| self.km.compare(lo, key) != Ordering::Greater)
                && upper.map_or(true, |hi| self.km.compare(key, hi) == Ordering::Less)
        };
        if page.bpt_is_leaf() {
            match leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(d) if *d != depth => {
                    return Err(StorageError::Corrupted("leaves at unequal depth"));
                }
                _ => {}
            }
            for i in 0..size {
                if !in_bounds(page.leaf_key_at(i)) {
                    return Err(StorageError::Corrupted("leaf key outside its partition"));
                }
            }
            return Ok(());
        }
        for i in 1..size {
            if !in_bounds(page.internal_key_at(i)) {
                return Err(StorageError::Corrupted("separator outside its partition"));
            }
            if i >= 2
                && self.km.compare(page.internal_key_at(i - 1), page.internal_key_at(i))
                    != Ordering::Less
            {
                return Err(StorageError::Corrupted("separators not increasing"));
            }
        }
        let entries: Vec<(PageId, Option<Vec<u8>>, Option<Vec<u8>>)> = (0..size)
            .map(|i| {
                let child_lower = if i == 0 {
                    lower.map(|k| k.to_vec())
                } else {
                    Some(page.internal_key_at(i).to_vec())
                };
                let child_upper = if i + 1 < size {
                    Some(page.internal_key_at(i + 1).to_vec())
                } else {
                    upper.map(|k| k.to_vec())
                };
                (page.internal_child_at(i), child_lower, child_upper)
            })
            .collect();
        drop(page);
        drop(guard);
        for (child, child_lower, child_upper) in entries {
            self.check_node(
                bpm,
                child,
                page_id,
                depth + 1,
                leaf_depth,
                child_lower.as_deref(),
                child_upper.as_deref(),
            )?;
        }
        Ok(())
    }
}

/// Forward iteration over leaf entries. Pages are fetched per step and
/// released immediately, so an idle iterator holds no pins.
pub struct BTreeIterator {
    bpm: Arc<BufferPoolManager>,
    km: KeyManager,
    page_id: PageId,
    index: u32,
}

impl BTreeIterator {
    fn end(bpm: &Arc<BufferPoolManager>, km: &KeyManager) -> Self {
        Self {
            bpm: Arc::clone(bpm),
            km: km.clone(),
            page_id: INVALID_PAGE_ID,
            index: 0,
        }
    }

    /// Decodes a raw key yielded by the iterator.
    pub fn decode_key(&self, key: &[u8]) -> Result<crate::record::Row> {
        self.km.decode(key)
    }
}

impl Iterator for BTreeIterator {
    type Item = Result<(Vec<u8>, RowId)>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.page_id != INVALID_PAGE_ID {
            let guard = match self.bpm.fetch_page(self.page_id) {
                Ok(guard) => guard,
                Err(e) => {
                    self.page_id = INVALID_PAGE_ID;
                    return Some(Err(e));
                }
            };
            let page = guard.read();
            if self.index < page.bpt_size() {
                let item = (
                    page.leaf_key_at(self.index).to_vec(),
                    page.leaf_rid_at(self.index),
                );
                self.index += 1;
                if self.index >= page.bpt_size() {
                    self.page_id = page.leaf_next_page_id();
                    self.index = 0;
                }
                return Some(Ok(item));
            }
            self.page_id = page.leaf_next_page_id();
            self.index = 0;
        }
        None
    }
}
