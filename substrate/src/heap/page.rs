//! The slotted table page layout.
//!
//! Header: `{prev_page_id i32, next_page_id i32, free_space_pointer u32,
//! tuple_count u32}`. The slot directory `{offset u32, size u32}` grows
//! down the page from the header; tuple bodies grow up from the page end.
//! Bit 31 of a slot's size is the tombstone flag; a zeroed slot is dead
//! and may be reused by a later insert. Body space freed by a delete is
//! reclaimed only when the whole page is released at table drop.

use crate::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

const PREV_PAGE_OFFSET: usize = 0;
const NEXT_PAGE_OFFSET: usize = 4;
const FREE_POINTER_OFFSET: usize = 8;
const TUPLE_COUNT_OFFSET: usize = 12;
const HEADER_SIZE: usize = 16;
const SLOT_SIZE: usize = 8;

const TOMBSTONE_FLAG: u32 = 1 << 31;
const SIZE_MASK: u32 = TOMBSTONE_FLAG - 1;

/// Largest tuple body an empty page can accept.
pub const MAX_TUPLE_SIZE: usize = PAGE_SIZE - HEADER_SIZE - SLOT_SIZE;

impl Page {
    pub fn table_init(&mut self, prev_page_id: PageId) {
        self.write_i32_at(PREV_PAGE_OFFSET, prev_page_id);
        self.write_i32_at(NEXT_PAGE_OFFSET, INVALID_PAGE_ID);
        self.write_u32_at(FREE_POINTER_OFFSET, PAGE_SIZE as u32);
        self.write_u32_at(TUPLE_COUNT_OFFSET, 0);
    }

    pub fn table_prev_page_id(&self) -> PageId {
        self.read_i32_at(PREV_PAGE_OFFSET)
    }

    pub fn table_set_prev_page_id(&mut self, id: PageId) {
        self.write_i32_at(PREV_PAGE_OFFSET, id);
    }

    pub fn table_next_page_id(&self) -> PageId {
        self.read_i32_at(NEXT_PAGE_OFFSET)
    }

    pub fn table_set_next_page_id(&mut self, id: PageId) {
        self.write_i32_at(NEXT_PAGE_OFFSET, id);
    }

    pub fn table_tuple_count(&self) -> u32 {
        self.read_u32_at(TUPLE_COUNT_OFFSET)
    }

    fn free_space_pointer(&self) -> u32 {
        self.read_u32_at(FREE_POINTER_OFFSET)
    }

    fn slot(&self, index: u32) -> (u32, u32) {
        let base = HEADER_SIZE + index as usize * SLOT_SIZE;
        (self.read_u32_at(base), self.read_u32_at(base + 4))
    }

    fn set_slot(&mut self, index: u32, offset: u32, raw_size: u32) {
        let base = HEADER_SIZE + index as usize * SLOT_SIZE;
        self.write_u32_at(base, offset);
        self.write_u32_at(base + 4, raw_size);
    }

    fn slot_is_dead(offset: u32, raw_size: u32) -> bool {
        offset == 0 && raw_size == 0
    }

    fn slot_is_live(offset: u32, raw_size: u32) -> bool {
        !Self::slot_is_dead(offset, raw_size) && raw_size & TOMBSTONE_FLAG == 0
    }

    /// Whether a tuple of `size` bytes would fit, counting a fresh slot
    /// entry unless a dead one can be reused.
    pub fn table_can_hold(&self, size: usize) -> bool {
        let count = self.table_tuple_count();
        let has_dead = (0..count).any(|i| {
            let (off, raw) = self.slot(i);
            Self::slot_is_dead(off, raw)
        });
        let dir_end =
            HEADER_SIZE + count as usize * SLOT_SIZE + if has_dead { 0 } else { SLOT_SIZE };
        size <= SIZE_MASK as usize && dir_end + size <= self.free_space_pointer() as usize
    }

    /// Stores the tuple body and returns its slot, reusing a dead slot if
    /// one exists.
    pub fn table_insert_tuple(&mut self, data: &[u8]) -> Option<u32> {
        if data.is_empty() || !self.table_can_hold(data.len()) {
            return None;
        }
        let count = self.table_tuple_count();
        let reuse = (0..count).find(|&i| {
            let (off, raw) = self.slot(i);
            Self::slot_is_dead(off, raw)
        });
        let new_offset = self.free_space_pointer() - data.len() as u32;
        self.write_bytes_at(new_offset as usize, data);
        self.write_u32_at(FREE_POINTER_OFFSET, new_offset);
        let slot = match reuse {
            Some(slot) => slot,
            None => {
                self.write_u32_at(TUPLE_COUNT_OFFSET, count + 1);
                count
            }
        };
        self.set_slot(slot, new_offset, data.len() as u32);
        Some(slot)
    }

    /// The tuple body, or None for dead, tombstoned, or out-of-range slots.
    pub fn table_get_tuple(&self, slot: u32) -> Option<&[u8]> {
        if slot >= self.table_tuple_count() {
            return None;
        }
        let (offset, raw) = self.slot(slot);
        if !Self::slot_is_live(offset, raw) {
            return None;
        }
        Some(self.bytes_at(offset as usize, (raw & SIZE_MASK) as usize))
    }

    /// Tombstones the slot in place. The body stays for rollback.
    pub fn table_mark_delete(&mut self, slot: u32) -> bool {
        if slot >= self.table_tuple_count() {
            return false;
        }
        let (offset, raw) = self.slot(slot);
        if !Self::slot_is_live(offset, raw) {
            return false;
        }
        self.set_slot(slot, offset, raw | TOMBSTONE_FLAG);
        true
    }

    pub fn table_rollback_delete(&mut self, slot: u32) -> bool {
        if slot >= self.table_tuple_count() {
            return false;
        }
        let (offset, raw) = self.slot(slot);
        if Self::slot_is_dead(offset, raw) || raw & TOMBSTONE_FLAG == 0 {
            return false;
        }
        self.set_slot(slot, offset, raw & SIZE_MASK);
        true
    }

    /// Reclaims the slot for reuse. Accepts both live and tombstoned
    /// tuples.
    pub fn table_apply_delete(&mut self, slot: u32) -> bool {
        if slot >= self.table_tuple_count() {
            return false;
        }
        let (offset, raw) = self.slot(slot);
        if Self::slot_is_dead(offset, raw) {
            return false;
        }
        self.set_slot(slot, 0, 0);
        true
    }

    /// Rewrites the tuple in place when the new body fits in the old one,
    /// or into fresh body space otherwise. False means the caller must
    /// relocate the tuple to another page.
    pub fn table_update_tuple(&mut self, slot: u32, data: &[u8]) -> bool {
        if data.is_empty() || data.len() > SIZE_MASK as usize || slot >= self.table_tuple_count() {
            return false;
        }
        let (offset, raw) = self.slot(slot);
        if !Self::slot_is_live(offset, raw) {
            return false;
        }
        let old_size = (raw & SIZE_MASK) as usize;
        if data.len() <= old_size {
            self.write_bytes_at(offset as usize, data);
            self.set_slot(slot, offset, data.len() as u32);
            return true;
        }
        let dir_end = HEADER_SIZE + self.table_tuple_count() as usize * SLOT_SIZE;
        let free_pointer = self.free_space_pointer() as usize;
        if dir_end + data.len() > free_pointer {
            return false;
        }
        let new_offset = (free_pointer - data.len()) as u32;
        self.write_bytes_at(new_offset as usize, data);
        self.write_u32_at(FREE_POINTER_OFFSET, new_offset);
        self.set_slot(slot, new_offset, data.len() as u32);
        true
    }

    pub fn table_first_tuple_slot(&self) -> Option<u32> {
        (0..self.table_tuple_count()).find(|&i| {
            let (off, raw) = self.slot(i);
            Self::slot_is_live(off, raw)
        })
    }

    pub fn table_next_tuple_slot(&self, slot: u32) -> Option<u32> {
        ((slot + 1)..self.table_tuple_count()).find(|&i| {
            let (off, raw) = self.slot(i);
            Self::slot_is_live(off, raw)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_page() -> Page {
        let mut page = Page::new(0);
        page.table_init(INVALID_PAGE_ID);
        page
    }

    #[test]
    fn insert_then_get_returns_the_body() {
        let mut page = fresh_page();
        let a = page.table_insert_tuple(b"first").unwrap();
        let b = page.table_insert_tuple(b"second").unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(page.table_get_tuple(a).unwrap(), b"first");
        assert_eq!(page.table_get_tuple(b).unwrap(), b"second");
        assert_eq!(page.table_tuple_count(), 2);
    }

    #[test]
    fn mark_rollback_and_apply_delete() {
        let mut page = fresh_page();
        let slot = page.table_insert_tuple(b"payload").unwrap();
        assert!(page.table_mark_delete(slot));
        assert!(page.table_get_tuple(slot).is_none());
        assert!(!page.table_mark_delete(slot));
        assert!(page.table_rollback_delete(slot));
        assert_eq!(page.table_get_tuple(slot).unwrap(), b"payload");
        assert!(page.table_mark_delete(slot));
        assert!(page.table_apply_delete(slot));
        assert!(!page.table_apply_delete(slot));
        assert!(page.table_get_tuple(slot).is_none());
    }

    #[test]
    fn dead_slots_are_reused() {
        let mut page = fresh_page();
        page.table_insert_tuple(b"aaa").unwrap();
        let victim = page.table_insert_tuple(b"bbb").unwrap();
        page.table_insert_tuple(b"ccc").unwrap();
        page.table_apply_delete(victim);
        let slot = page.table_insert_tuple(b"ddd").unwrap();
        assert_eq!(slot, victim);
        assert_eq!(page.table_tuple_count(), 3);
        assert_eq!(page.table_get_tuple(slot).unwrap(), b"ddd");
    }

    #[test]
    fn update_in_place_when_smaller() {
        let mut page = fresh_page();
        let slot = page.table_insert_tuple(b"long payload").unwrap();
        assert!(page.table_update_tuple(slot, b"tiny"));
        assert_eq!(page.table_get_tuple(slot).unwrap(), b"tiny");
    }

    #[test]
    fn update_grows_into_free_space() {
        let mut page = fresh_page();
        let slot = page.table_insert_tuple(b"ab").unwrap();
        assert!(page.table_update_tuple(slot, b"a considerably longer body"));
        assert_eq!(
            page.table_get_tuple(slot).unwrap(),
            b"a considerably longer body"
        );
    }

    #[test]
    fn update_fails_when_page_is_out_of_space() {
        let mut page = fresh_page();
        let big = vec![7u8; MAX_TUPLE_SIZE - 64];
        let slot = page.table_insert_tuple(&big).unwrap();
        let bigger = vec![9u8; MAX_TUPLE_SIZE];
        assert!(!page.table_update_tuple(slot, &bigger));
        assert_eq!(page.table_get_tuple(slot).unwrap(), &big[..]);
    }

    #[test]
    fn page_rejects_tuples_beyond_capacity() {
        let mut page = fresh_page();
        assert!(page.table_insert_tuple(&vec![1u8; MAX_TUPLE_SIZE + 1]).is_none());
        assert!(page.table_insert_tuple(&vec![1u8; MAX_TUPLE_SIZE]).is_some());
        assert!(page.table_insert_tuple(b"x").is_none());
    }

    #[test]
    fn slot_iteration_skips_deleted_tuples() {
        let mut page = fresh_page();
        for body in [&b"a"[..], b"b", b"c", b"d"] {
            page.table_insert_tuple(body).unwrap();
        }
        page.table_mark_delete(0);
        page.table_apply_delete(2);
        assert_eq!(page.table_first_tuple_slot(), Some(1));
        assert_eq!(page.table_next_tuple_slot(1), Some(3));
        assert_eq!(page.table_next_tuple_slot(3), None);
    }
}
