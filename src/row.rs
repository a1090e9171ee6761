//! data rows with typed column access.

use core::{fmt, ops::Range};

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use super::{
    column::Column,
    error::{Error, InvalidColumnIndex, WrongType},
    types::FromSql,
};

/// key for looking a column up in a row: a zero-based index or a column name.
pub trait RowIndex: fmt::Display {
    #[doc(hidden)]
    fn __idx(&self, columns: &[Column]) -> Option<usize>;
}

impl RowIndex for usize {
    fn __idx(&self, columns: &[Column]) -> Option<usize> {
        (*self < columns.len()).then_some(*self)
    }
}

impl RowIndex for &str {
    fn __idx(&self, columns: &[Column]) -> Option<usize> {
        if let Some(idx) = columns.iter().position(|c| c.name() == *self) {
            return Some(idx);
        }
        // fall back to case insensitive matching the way the server folds
        // unquoted identifiers.
        columns.iter().position(|c| c.name().eq_ignore_ascii_case(self))
    }
}

impl<T: RowIndex> RowIndex for &T {
    fn __idx(&self, columns: &[Column]) -> Option<usize> {
        (*self).__idx(columns)
    }
}

/// A row of data returned from the database by a query.
///
/// each column value is an owned slice of the row's wire buffer; typed access
/// goes through the binary codec.
pub struct Row {
    columns: Arc<[Column]>,
    body: Bytes,
    ranges: Vec<Option<Range<usize>>>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[Column]>, body: Bytes, ranges: Vec<Option<Range<usize>>>) -> Self {
        Self {
            columns,
            body,
            ranges,
        }
    }

    /// build a row from per-column buffers.
    pub(crate) fn from_values<I>(columns: Arc<[Column]>, values: I) -> Self
    where
        I: IntoIterator<Item = Option<Bytes>>,
    {
        let mut body = BytesMut::new();
        let mut ranges = Vec::with_capacity(columns.len());
        for value in values {
            match value {
                Some(value) => {
                    let start = body.len();
                    body.put_slice(&value);
                    ranges.push(Some(start..body.len()));
                }
                None => ranges.push(None),
            }
        }
        Self::new(columns, body.freeze(), ranges)
    }

    /// Returns information about the columns of data in the row.
    #[inline]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Determines if the row contains no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of values in the row.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true when the value at the given index is sql `NULL`.
    pub fn is_null(&self, idx: usize) -> bool {
        self.ranges.get(idx).map(|r| r.is_none()).unwrap_or(true)
    }

    // Get the raw bytes for the column at the given index.
    fn col_buffer(&self, idx: usize) -> Option<&[u8]> {
        self.ranges[idx].clone().map(|range| &self.body[range])
    }

    /// Deserializes a value from the row.
    ///
    /// The value can be specified either by its numeric index in the row, or
    /// by its column name.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds or if the value cannot be
    /// converted to the specified type.
    #[inline]
    pub fn get<'r, T>(&'r self, idx: impl RowIndex) -> T
    where
        T: FromSql<'r>,
    {
        self.try_get(&idx)
            .unwrap_or_else(|e| panic!("error retrieving column {idx}: {e}"))
    }

    /// Like [`Row::get`], but returns a `Result` rather than panicking.
    pub fn try_get<'r, T>(&'r self, idx: impl RowIndex) -> Result<T, Error>
    where
        T: FromSql<'r>,
    {
        let idx = idx
            .__idx(self.columns())
            .ok_or_else(|| InvalidColumnIndex(idx.to_string()))?;

        let ty = self.columns[idx].r#type();
        if !T::accepts(ty) {
            return Err(WrongType::new::<T>(ty.clone()).into());
        }

        T::from_sql_nullable(ty, self.col_buffer(idx)).map_err(Into::into)
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Row").field("columns", &self.columns()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::{Format, Type};

    fn columns() -> Arc<[Column]> {
        Arc::from(vec![
            Column::new("id", Type::INT4, 0, Format::Binary),
            Column::new("name", Type::TEXT, 1, Format::Binary),
            Column::new("blob", Type::BYTEA, 2, Format::Binary),
        ])
    }

    fn sample() -> Row {
        Row::from_values(
            columns(),
            vec![
                Some(Bytes::from_static(&[0, 0, 0, 7])),
                Some(Bytes::from_static(b"seven")),
                None,
            ],
        )
    }

    #[test]
    fn typed_access() {
        let row = sample();
        assert_eq!(row.get::<i32>(0), 7);
        assert_eq!(row.get::<String>("name"), "seven");
        assert_eq!(row.get::<&str>("NAME"), "seven");
        assert_eq!(row.get::<Option<Bytes>>("blob"), None);
        assert!(row.is_null(2));
        assert!(!row.is_null(0));
    }

    #[test]
    fn wrong_type() {
        let row = sample();
        assert!(row.try_get::<i64>(0).is_err());
    }

    #[test]
    fn bad_index() {
        let row = sample();
        assert!(row.try_get::<i32>(9).is_err());
        assert!(row.try_get::<i32>("missing").is_err());
    }

    #[test]
    fn null_into_non_option() {
        let row = sample();
        assert!(row.try_get::<Bytes>("blob").is_err());
    }
}
