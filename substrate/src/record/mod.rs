//! The record codec: typed fields, columns, schemas, and rows with
//! bit-exact serialization.
//!
//! Every serializer appends to a byte vector and returns the number of
//! bytes written; every deserializer consumes exactly that many bytes and
//! validates its magic prefix. All integers are little-endian.

pub mod column;
pub mod row;
pub mod schema;
pub mod types;

pub use column::Column;
pub use row::Row;
pub use schema::Schema;
pub use types::{Field, TypeId};

use crate::error::{Result, StorageError};

pub(crate) fn get_u8(buf: &[u8], off: &mut usize) -> Result<u8> {
    let end = *off + 1;
    if end > buf.len() {
        return Err(StorageError::Corrupted("truncated record data"));
    }
    let v = buf[*off];
    *off = end;
    Ok(v)
}

pub(crate) fn get_u32(buf: &[u8], off: &mut usize) -> Result<u32> {
    let end = *off + 4;
    if end > buf.len() {
        return Err(StorageError::Corrupted("truncated record data"));
    }
    let v = u32::from_le_bytes(buf[*off..end].try_into().unwrap());
    *off = end;
    Ok(v)
}

pub(crate) fn get_i32(buf: &[u8], off: &mut usize) -> Result<i32> {
    Ok(get_u32(buf, off)? as i32)
}

pub(crate) fn get_f32(buf: &[u8], off: &mut usize) -> Result<f32> {
    Ok(f32::from_le_bytes(get_u32(buf, off)?.to_le_bytes()))
}

pub(crate) fn get_bytes<'a>(buf: &'a [u8], off: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = *off + len;
    if end > buf.len() {
        return Err(StorageError::Corrupted("truncated record data"));
    }
    let v = &buf[*off..end];
    *off = end;
    Ok(v)
}
