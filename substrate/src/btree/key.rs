//! Fixed-width index keys.
//!
//! A key is a row projected onto the index's key columns, serialized with
//! the row codec and zero-padded to the `key_size` chosen at index
//! creation. Comparison decodes both sides against the key schema and
//! compares field by field, so CHAR keys order lexicographically and
//! numeric keys numerically regardless of padding.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{Result, StorageError};
use crate::record::{Row, Schema};

/// Widths a key may be rounded up to.
const KEY_SIZE_STEPS: [u32; 6] = [8, 16, 32, 64, 128, 256];

#[derive(Clone)]
pub struct KeyManager {
    key_schema: Arc<Schema>,
    key_size: u32,
}

impl KeyManager {
    /// Derives the key width from the widest possible serialized key row.
    pub fn new(key_schema: Arc<Schema>) -> Result<Self> {
        let widest: usize = key_schema
            .columns()
            .iter()
            .map(|c| 1 + c.max_value_size())
            .sum();
        let key_size = KEY_SIZE_STEPS
            .into_iter()
            .find(|&s| s as usize >= widest)
            .ok_or(StorageError::Corrupted("key columns exceed maximum key width"))?;
        Ok(Self {
            key_schema,
            key_size,
        })
    }

    /// Uses an explicit width instead of deriving one. The width must
    /// still fit the widest possible key row.
    pub fn with_key_size(key_schema: Arc<Schema>, key_size: u32) -> Result<Self> {
        let derived = Self::new(Arc::clone(&key_schema))?;
        if key_size < derived.key_size {
            return Err(StorageError::Corrupted("key width too small for schema"));
        }
        Ok(Self {
            key_schema,
            key_size,
        })
    }

    pub fn key_size(&self) -> u32 {
        self.key_size
    }

    pub fn key_schema(&self) -> &Arc<Schema> {
        &self.key_schema
    }

    /// Serializes a key row into a zero-padded key buffer.
    pub fn encode(&self, row: &Row) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.key_size as usize);
        row.serialize_to(&mut buf, &self.key_schema);
        if buf.len() > self.key_size as usize {
            return Err(StorageError::Corrupted("key row wider than key size"));
        }
        buf.resize(self.key_size as usize, 0);
        Ok(buf)
    }

    pub fn decode(&self, key: &[u8]) -> Result<Row> {
        let mut off = 0;
        Row::deserialize_from(key, &mut off, &self.key_schema)
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let left = match self.decode(a) {
            Ok(row) => row,
            Err(_) => return Ordering::Equal,
        };
        let right = match self.decode(b) {
            Ok(row) => row,
            Err(_) => return Ordering::Equal,
        };
        for (l, r) in left.fields().iter().zip(right.fields()) {
            let ord = l.compare(r);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Column, Field, TypeId};

    fn manager(columns: Vec<Column>) -> KeyManager {
        KeyManager::new(Arc::new(Schema::new(columns))).unwrap()
    }

    #[test]
    fn int_keys_round_to_eight_bytes() {
        let km = manager(vec![Column::new_scalar("k", TypeId::Int, 0, false, false)]);
        assert_eq!(km.key_size(), 8);
    }

    #[test]
    fn char_keys_round_up_past_their_length() {
        let km = manager(vec![Column::new_char("k", 20, 0, false, false)]);
        // 1 null byte + 4 length prefix + 20 payload = 25 -> 32
        assert_eq!(km.key_size(), 32);
    }

    #[test]
    fn encode_then_decode_preserves_fields() {
        let km = manager(vec![
            Column::new_scalar("a", TypeId::Int, 0, false, false),
            Column::new_char("b", 8, 1, true, false),
        ]);
        let row = Row::new(vec![Field::Int(-3), Field::Char("xy".to_string())]);
        let key = km.encode(&row).unwrap();
        assert_eq!(key.len(), km.key_size() as usize);
        let back = km.decode(&key).unwrap();
        assert_eq!(back.fields(), row.fields());
    }

    #[test]
    fn comparison_is_field_wise_not_byte_wise() {
        let km = manager(vec![Column::new_scalar("k", TypeId::Int, 0, false, false)]);
        let a = km.encode(&Row::new(vec![Field::Int(-1)])).unwrap();
        let b = km.encode(&Row::new(vec![Field::Int(1)])).unwrap();
        // Byte-wise, -1 (0xFFFFFFFF) would sort after 1.
        assert_eq!(km.compare(&a, &b), Ordering::Less);
        assert_eq!(km.compare(&b, &a), Ordering::Greater);
        assert_eq!(km.compare(&a, &a), Ordering::Equal);
    }

    #[test]
    fn composite_keys_compare_in_column_order() {
        let km = manager(vec![
            Column::new_char("name", 8, 0, false, false),
            Column::new_scalar("n", TypeId::Int, 1, false, false),
        ]);
        let a = km
            .encode(&Row::new(vec![Field::Char("ab".into()), Field::Int(9)]))
            .unwrap();
        let b = km
            .encode(&Row::new(vec![Field::Char("ab".into()), Field::Int(10)]))
            .unwrap();
        let c = km
            .encode(&Row::new(vec![Field::Char("ac".into()), Field::Int(0)]))
            .unwrap();
        assert_eq!(km.compare(&a, &b), Ordering::Less);
        assert_eq!(km.compare(&b, &c), Ordering::Less);
    }

    #[test]
    fn undersized_explicit_width_is_rejected() {
        let schema = Arc::new(Schema::new(vec![Column::new_char("k", 40, 0, false, false)]));
        assert!(KeyManager::with_key_size(schema, 16).is_err());
    }
}
