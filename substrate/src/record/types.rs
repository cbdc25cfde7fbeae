//! Column types and field values.

use std::cmp::Ordering;

use super::{get_bytes, get_f32, get_i32, get_u32};
use crate::error::{Result, StorageError};

/// The supported column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeId {
    Int,
    Float,
    Char,
}

impl TypeId {
    pub fn to_u32(self) -> u32 {
        match self {
            TypeId::Int => 1,
            TypeId::Float => 2,
            TypeId::Char => 3,
        }
    }

    pub fn from_u32(raw: u32) -> Result<Self> {
        match raw {
            1 => Ok(TypeId::Int),
            2 => Ok(TypeId::Float),
            3 => Ok(TypeId::Char),
            _ => Err(StorageError::Corrupted("unknown type tag")),
        }
    }
}

/// A single column value. Null values keep their column type so that a
/// deserialized row can be re-serialized unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Int(i32),
    Float(f32),
    Char(String),
    Null(TypeId),
}

impl Field {
    pub fn type_id(&self) -> TypeId {
        match self {
            Field::Int(_) => TypeId::Int,
            Field::Float(_) => TypeId::Float,
            Field::Char(_) => TypeId::Char,
            Field::Null(t) => *t,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null(_))
    }

    /// Bytes this field occupies in a serialized row. Null fields occupy
    /// none; their absence is recorded in the row's null bitmap.
    pub fn serialized_size(&self) -> usize {
        match self {
            Field::Int(_) | Field::Float(_) => 4,
            Field::Char(s) => 4 + s.len(),
            Field::Null(_) => 0,
        }
    }

    pub fn serialize_to(&self, buf: &mut Vec<u8>) -> usize {
        match self {
            Field::Int(v) => {
                buf.extend_from_slice(&v.to_le_bytes());
                4
            }
            Field::Float(v) => {
                buf.extend_from_slice(&v.to_le_bytes());
                4
            }
            Field::Char(s) => {
                buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
                4 + s.len()
            }
            Field::Null(_) => 0,
        }
    }

    pub fn deserialize_from(
        buf: &[u8],
        off: &mut usize,
        type_id: TypeId,
        is_null: bool,
    ) -> Result<Field> {
        if is_null {
            return Ok(Field::Null(type_id));
        }
        match type_id {
            TypeId::Int => Ok(Field::Int(get_i32(buf, off)?)),
            TypeId::Float => Ok(Field::Float(get_f32(buf, off)?)),
            TypeId::Char => {
                let len = get_u32(buf, off)? as usize;
                let raw = get_bytes(buf, off, len)?;
                let s = std::str::from_utf8(raw)
                    .map_err(|_| StorageError::Corrupted("char field is not utf-8"))?;
                Ok(Field::Char(s.to_string()))
            }
        }
    }

    /// Total order used by the B+ tree and the executor's predicates.
    /// Null sorts before every non-null value of the same type.
    pub fn compare(&self, other: &Field) -> Ordering {
        debug_assert_eq!(self.type_id(), other.type_id(), "comparing mixed types");
        match (self, other) {
            (Field::Null(_), Field::Null(_)) => Ordering::Equal,
            (Field::Null(_), _) => Ordering::Less,
            (_, Field::Null(_)) => Ordering::Greater,
            (Field::Int(a), Field::Int(b)) => a.cmp(b),
            (Field::Float(a), Field::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Field::Char(a), Field::Char(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => self.type_id().to_u32().cmp(&other.type_id().to_u32()),
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{v}"),
            Field::Float(v) => write!(f, "{v}"),
            Field::Char(s) => write!(f, "{s}"),
            Field::Null(_) => write!(f, "null"),
        }
    }
}
