//! Table schemas: an ordered list of columns.

use super::{get_u32, get_u8, Column};
use crate::error::{Result, StorageError};

pub const SCHEMA_MAGIC: u32 = 0x5343_484D; // "SCHM"

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<Column>,
    /// Whether this schema owns its column storage. A projection borrows
    /// its parent's columns conceptually and clears the flag; the flag is
    /// persisted but has no on-disk meaning beyond round-tripping.
    is_manage: bool,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            is_manage: true,
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// A schema over the selected column positions, in the given order.
    pub fn project(&self, indices: &[u32]) -> Schema {
        Schema {
            columns: indices
                .iter()
                .map(|&i| self.columns[i as usize].clone())
                .collect(),
            is_manage: false,
        }
    }

    pub fn serialized_size(&self) -> usize {
        4 + 4 + self.columns.iter().map(Column::serialized_size).sum::<usize>() + 1
    }

    pub fn serialize_to(&self, buf: &mut Vec<u8>) -> usize {
        let start = buf.len();
        buf.extend_from_slice(&SCHEMA_MAGIC.to_le_bytes());
        buf.extend_from_slice(&(self.columns.len() as u32).to_le_bytes());
        for column in &self.columns {
            column.serialize_to(buf);
        }
        buf.push(self.is_manage as u8);
        buf.len() - start
    }

    pub fn deserialize_from(buf: &[u8], off: &mut usize) -> Result<Schema> {
        if get_u32(buf, off)? != SCHEMA_MAGIC {
            return Err(StorageError::Corrupted("bad schema magic"));
        }
        let count = get_u32(buf, off)? as usize;
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            columns.push(Column::deserialize_from(buf, off)?);
        }
        let is_manage = get_u8(buf, off)? != 0;
        Ok(Schema { columns, is_manage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TypeId;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            Column::new_scalar("id", TypeId::Int, 0, false, true),
            Column::new_char("name", 32, 1, true, false),
            Column::new_scalar("balance", TypeId::Float, 2, true, false),
        ])
    }

    #[test]
    fn schemas_round_trip() {
        let schema = sample_schema();
        let mut buf = Vec::new();
        let written = schema.serialize_to(&mut buf);
        assert_eq!(written, schema.serialized_size());
        let mut off = 0;
        let back = Schema::deserialize_from(&buf, &mut off).unwrap();
        assert_eq!(back, schema);
        assert_eq!(off, written);
    }

    #[test]
    fn column_lookup_by_name() {
        let schema = sample_schema();
        assert_eq!(schema.column_index("name"), Some(1));
        assert_eq!(schema.column_index("missing"), None);
    }

    #[test]
    fn projection_keeps_order_and_drops_ownership() {
        let schema = sample_schema();
        let key = schema.project(&[2, 0]);
        assert_eq!(key.column_count(), 2);
        assert_eq!(key.column(0).name(), "balance");
        assert_eq!(key.column(1).name(), "id");
        assert!(!key.is_manage);
    }
}
