//! Column definitions.

use super::{get_bytes, get_u32, get_u8, TypeId};
use crate::error::{Result, StorageError};

pub const COLUMN_MAGIC: u32 = 0x434F_4C55; // "COLU"

/// One column of a table schema.
///
/// INT and FLOAT columns have a fixed four-byte payload; CHAR columns carry
/// an explicit maximum length chosen at table creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    type_id: TypeId,
    length: u32,
    table_ind: u32,
    nullable: bool,
    unique: bool,
}

impl Column {
    /// Builds an INT or FLOAT column. Not for CHAR.
    pub fn new_scalar(
        name: impl Into<String>,
        type_id: TypeId,
        table_ind: u32,
        nullable: bool,
        unique: bool,
    ) -> Self {
        debug_assert_ne!(type_id, TypeId::Char, "use new_char for CHAR columns");
        Self {
            name: name.into(),
            type_id,
            length: 4,
            table_ind,
            nullable,
            unique,
        }
    }

    /// Builds a CHAR column with the given maximum length.
    pub fn new_char(
        name: impl Into<String>,
        length: u32,
        table_ind: u32,
        nullable: bool,
        unique: bool,
    ) -> Self {
        debug_assert!(length > 0, "CHAR column needs a positive length");
        Self {
            name: name.into(),
            type_id: TypeId::Char,
            length,
            table_ind,
            nullable,
            unique,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn table_ind(&self) -> u32 {
        self.table_ind
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Upper bound on the serialized size of one value of this column,
    /// including the CHAR length prefix.
    pub fn max_value_size(&self) -> usize {
        match self.type_id {
            TypeId::Int | TypeId::Float => 4,
            TypeId::Char => 4 + self.length as usize,
        }
    }

    pub fn serialized_size(&self) -> usize {
        4 + 4 + self.name.len() + 4 + 4 + 4 + 1 + 1
    }

    pub fn serialize_to(&self, buf: &mut Vec<u8>) -> usize {
        let start = buf.len();
        buf.extend_from_slice(&COLUMN_MAGIC.to_le_bytes());
        buf.extend_from_slice(&(self.name.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        buf.extend_from_slice(&self.type_id.to_u32().to_le_bytes());
        buf.extend_from_slice(&self.length.to_le_bytes());
        buf.extend_from_slice(&self.table_ind.to_le_bytes());
        buf.push(self.nullable as u8);
        buf.push(self.unique as u8);
        buf.len() - start
    }

    pub fn deserialize_from(buf: &[u8], off: &mut usize) -> Result<Column> {
        if get_u32(buf, off)? != COLUMN_MAGIC {
            return Err(StorageError::Corrupted("bad column magic"));
        }
        let name_len = get_u32(buf, off)? as usize;
        let name = std::str::from_utf8(get_bytes(buf, off, name_len)?)
            .map_err(|_| StorageError::Corrupted("column name is not utf-8"))?
            .to_string();
        let type_id = TypeId::from_u32(get_u32(buf, off)?)?;
        let length = get_u32(buf, off)?;
        let table_ind = get_u32(buf, off)?;
        let nullable = get_u8(buf, off)? != 0;
        let unique = get_u8(buf, off)? != 0;
        Ok(Column {
            name,
            type_id,
            length,
            table_ind,
            nullable,
            unique,
        })
    }
}
