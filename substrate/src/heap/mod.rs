//! The table heap: a singly linked chain of slotted pages rooted at
//! `first_page_id`.
//!
//! Inserts walk the chain looking for a page with room and append a fresh
//! page at the tail when none has any. Tuples, not pages, are the unit of
//! deletion; the chain is only torn down when the table is dropped.

pub mod page;

pub use page::MAX_TUPLE_SIZE;

use std::sync::Arc;

use crate::error::{Result, StorageError};
use crate::record::{Row, Schema};
use crate::{BufferPoolManager, PageId, RowId, INVALID_PAGE_ID};

pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    first_page_id: PageId,
    schema: Arc<Schema>,
}

impl TableHeap {
    /// Creates an empty heap with one allocated page.
    pub fn create(bpm: Arc<BufferPoolManager>, schema: Arc<Schema>) -> Result<Self> {
        let first_page_id = {
            let guard = bpm.new_page()?;
            guard.write().table_init(INVALID_PAGE_ID);
            guard.page_id()
        };
        Ok(Self {
            bpm,
            first_page_id,
            schema,
        })
    }

    /// Reopens a heap persisted at `first_page_id`.
    pub fn open(bpm: Arc<BufferPoolManager>, first_page_id: PageId, schema: Arc<Schema>) -> Self {
        Self {
            bpm,
            first_page_id,
            schema,
        }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Inserts the row and stores its new RowId back into it.
    pub fn insert_tuple(&self, row: &mut Row) -> Result<()> {
        let mut bytes = Vec::with_capacity(row.serialized_size(&self.schema));
        row.serialize_to(&mut bytes, &self.schema);
        if bytes.len() > MAX_TUPLE_SIZE {
            return Err(StorageError::TupleTooLarge);
        }

        let mut current = self.first_page_id;
        loop {
            let guard = self.bpm.fetch_page(current)?;
            let (fits, next) = {
                let page = guard.read();
                (page.table_can_hold(bytes.len()), page.table_next_page_id())
            };
            if fits {
                let slot = guard
                    .write()
                    .table_insert_tuple(&bytes)
                    .ok_or(StorageError::Corrupted("page refused a fitting tuple"))?;
                row.set_rid(RowId::new(current, slot));
                return Ok(());
            }
            if next != INVALID_PAGE_ID {
                drop(guard);
                current = next;
                continue;
            }
            // Tail reached: chain in a fresh page and insert there.
            let new_guard = self.bpm.new_page()?;
            let new_page_id = new_guard.page_id();
            new_guard.write().table_init(current);
            guard.write().table_set_next_page_id(new_page_id);
            drop(guard);
            let slot = new_guard
                .write()
                .table_insert_tuple(&bytes)
                .ok_or(StorageError::TupleTooLarge)?;
            row.set_rid(RowId::new(new_page_id, slot));
            return Ok(());
        }
    }

    /// Materializes the row stored at `rid`, or None if it was deleted.
    pub fn get_tuple(&self, rid: RowId) -> Result<Option<Row>> {
        let guard = self.bpm.fetch_page(rid.page_id())?;
        let page = guard.read();
        let Some(bytes) = page.table_get_tuple(rid.slot()) else {
            return Ok(None);
        };
        let mut off = 0;
        let mut row = Row::deserialize_from(bytes, &mut off, &self.schema)?;
        row.set_rid(rid);
        Ok(Some(row))
    }

    /// Rewrites the row at `rid`. Returns the RowId the row now lives at:
    /// unchanged when the page could take the new body, fresh when the
    /// tuple had to move. Callers must re-register index entries after a
    /// move.
    pub fn update_tuple(&self, row: &Row, rid: RowId) -> Result<RowId> {
        let mut bytes = Vec::with_capacity(row.serialized_size(&self.schema));
        row.serialize_to(&mut bytes, &self.schema);
        if bytes.len() > MAX_TUPLE_SIZE {
            return Err(StorageError::TupleTooLarge);
        }
        {
            let guard = self.bpm.fetch_page(rid.page_id())?;
            let updated = {
                let in_place = guard.read().table_get_tuple(rid.slot()).is_some();
                in_place && guard.write().table_update_tuple(rid.slot(), &bytes)
            };
            if updated {
                return Ok(rid);
            }
            let live = guard.read().table_get_tuple(rid.slot()).is_some();
            if !live {
                return Err(StorageError::InvalidPage(rid.page_id()));
            }
        }
        let mut moved = row.clone();
        self.insert_tuple(&mut moved)?;
        self.apply_delete(rid)?;
        Ok(moved.rid())
    }

    /// Tombstones the tuple; the body stays until `apply_delete`.
    pub fn mark_delete(&self, rid: RowId) -> Result<bool> {
        let guard = self.bpm.fetch_page(rid.page_id())?;
        let result = guard.write().table_mark_delete(rid.slot());
        Ok(result)
    }

    pub fn rollback_delete(&self, rid: RowId) -> Result<bool> {
        let guard = self.bpm.fetch_page(rid.page_id())?;
        let result = guard.write().table_rollback_delete(rid.slot());
        Ok(result)
    }

    /// Reclaims the slot for reuse by later inserts.
    pub fn apply_delete(&self, rid: RowId) -> Result<()> {
        let guard = self.bpm.fetch_page(rid.page_id())?;
        if !guard.write().table_apply_delete(rid.slot()) {
            return Err(StorageError::InvalidPage(rid.page_id()));
        }
        Ok(())
    }

    /// Deallocates every page in the chain. The heap is unusable after.
    pub fn free_heap(&self) -> Result<()> {
        let mut current = self.first_page_id;
        while current != INVALID_PAGE_ID {
            let next = {
                let guard = self.bpm.fetch_page(current)?;
                let next = guard.read().table_next_page_id();
                next
            };
            self.bpm.delete_page(current)?;
            current = next;
        }
        Ok(())
    }

    pub fn iter(&self) -> TableIterator<'_> {
        let first = self.first_live_row().ok().flatten();
        TableIterator {
            heap: self,
            next_row: first,
        }
    }

    fn first_live_row(&self) -> Result<Option<Row>> {
        let mut current = self.first_page_id;
        while current != INVALID_PAGE_ID {
            let guard = self.bpm.fetch_page(current)?;
            let page = guard.read();
            if let Some(slot) = page.table_first_tuple_slot() {
                drop(page);
                return self.get_tuple(RowId::new(current, slot));
            }
            let next = page.table_next_page_id();
            drop(page);
            drop(guard);
            current = next;
        }
        Ok(None)
    }

    /// The live row following `rid` in chain order, if any.
    fn row_after(&self, rid: RowId) -> Result<Option<Row>> {
        let mut current = rid.page_id();
        let mut slot_after = Some(rid.slot());
        while current != INVALID_PAGE_ID {
            let guard = self.bpm.fetch_page(current)?;
            let page = guard.read();
            let found = match slot_after {
                Some(prev) => page.table_next_tuple_slot(prev),
                None => page.table_first_tuple_slot(),
            };
            if let Some(slot) = found {
                drop(page);
                return self.get_tuple(RowId::new(current, slot));
            }
            let next = page.table_next_page_id();
            drop(page);
            drop(guard);
            current = next;
            slot_after = None;
        }
        Ok(None)
    }
}

/// Forward iteration over live tuples. Each page is visited under a shared
/// latch; rows inserted behind the cursor are not revisited. The iterator
/// owns a materialized copy of the upcoming row, so cloning it deep-copies
/// that row.
#[derive(Clone)]
pub struct TableIterator<'a> {
    heap: &'a TableHeap,
    next_row: Option<Row>,
}

impl Iterator for TableIterator<'_> {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        let current = self.next_row.take()?;
        self.next_row = self.heap.row_after(current.rid()).ok().flatten();
        Some(current)
    }
}
