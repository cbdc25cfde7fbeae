//! Rows: an ordered list of fields plus the RowId they live at.
//!
//! On-disk layout: a null bitmap of one byte per field (non-zero means
//! null), followed by the serialized non-null fields in schema order.

use super::{get_u8, Field, Schema};
use crate::error::Result;
use crate::RowId;

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    rid: RowId,
    fields: Vec<Field>,
}

impl Row {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            rid: RowId::INVALID,
            fields,
        }
    }

    pub fn rid(&self) -> RowId {
        self.rid
    }

    pub fn set_rid(&mut self, rid: RowId) {
        self.rid = rid;
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> &Field {
        &self.fields[index]
    }

    /// The fields at the given positions, as a new row. Used to build
    /// index keys from table rows.
    pub fn project(&self, indices: &[u32]) -> Row {
        Row::new(
            indices
                .iter()
                .map(|&i| self.fields[i as usize].clone())
                .collect(),
        )
    }

    pub fn serialized_size(&self, schema: &Schema) -> usize {
        debug_assert_eq!(self.fields.len(), schema.column_count());
        self.fields.len() + self.fields.iter().map(Field::serialized_size).sum::<usize>()
    }

    pub fn serialize_to(&self, buf: &mut Vec<u8>, schema: &Schema) -> usize {
        debug_assert_eq!(
            self.fields.len(),
            schema.column_count(),
            "row width does not match schema"
        );
        let start = buf.len();
        for field in &self.fields {
            buf.push(field.is_null() as u8);
        }
        for field in &self.fields {
            field.serialize_to(buf);
        }
        buf.len() - start
    }

    pub fn deserialize_from(buf: &[u8], off: &mut usize, schema: &Schema) -> Result<Row> {
        let count = schema.column_count();
        let mut nulls = Vec::with_capacity(count);
        for _ in 0..count {
            nulls.push(get_u8(buf, off)? != 0);
        }
        let mut fields = Vec::with_capacity(count);
        for (i, is_null) in nulls.into_iter().enumerate() {
            fields.push(Field::deserialize_from(
                buf,
                off,
                schema.column(i).type_id(),
                is_null,
            )?);
        }
        Ok(Row::new(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Column, TypeId};
    use rand::prelude::*;

    fn sample_schema() -> Schema {
        Schema::new(vec![
            Column::new_scalar("id", TypeId::Int, 0, false, true),
            Column::new_char("name", 24, 1, true, false),
            Column::new_scalar("balance", TypeId::Float, 2, true, false),
        ])
    }

    fn random_row(rng: &mut StdRng) -> Row {
        let name = if rng.gen_bool(0.2) {
            Field::Null(TypeId::Char)
        } else {
            let len = rng.gen_range(0..=24);
            let s: String = (0..len).map(|_| rng.gen_range('a'..='z')).collect();
            Field::Char(s)
        };
        let balance = if rng.gen_bool(0.2) {
            Field::Null(TypeId::Float)
        } else {
            Field::Float(rng.gen_range(-999.0..999.0))
        };
        Row::new(vec![Field::Int(rng.gen()), name, balance])
    }

    #[test]
    fn rows_round_trip_including_nulls() {
        let schema = sample_schema();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let row = random_row(&mut rng);
            let mut buf = Vec::new();
            let written = row.serialize_to(&mut buf, &schema);
            assert_eq!(written, row.serialized_size(&schema));
            let mut off = 0;
            let back = Row::deserialize_from(&buf, &mut off, &schema).unwrap();
            assert_eq!(back.fields(), row.fields());
            assert_eq!(off, written);
        }
    }

    #[test]
    fn projection_selects_fields_in_order() {
        let row = Row::new(vec![
            Field::Int(7),
            Field::Char("x".to_string()),
            Field::Float(1.0),
        ]);
        let key = row.project(&[1, 0]);
        assert_eq!(key.fields().len(), 2);
        assert_eq!(key.field(0), &Field::Char("x".to_string()));
        assert_eq!(key.field(1), &Field::Int(7));
    }

    #[test]
    fn truncated_row_is_rejected() {
        let schema = sample_schema();
        let row = Row::new(vec![
            Field::Int(1),
            Field::Char("abcdef".to_string()),
            Field::Float(2.0),
        ]);
        let mut buf = Vec::new();
        row.serialize_to(&mut buf, &schema);
        buf.truncate(buf.len() - 3);
        let mut off = 0;
        assert!(Row::deserialize_from(&buf, &mut off, &schema).is_err());
    }
}
