//! Rows and column metadata.
//!
//! A [`Row`] owns its decoded values and shares its column list with the
//! other rows of the same result set, so it stays valid after the
//! connection has moved on.

use std::sync::Arc;

use sqlwire_protocol::{ColMetaData, Collation, ColumnData, RawRow, TypeId};
use sqlwire_types::{FromSql, SqlValue, TypeError, decode_value};

use crate::error::{Error, Result};

/// A result set column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    data: ColumnData,
}

impl Column {
    pub(crate) fn new(data: ColumnData) -> Self {
        Self { data }
    }

    /// Column name; empty for unnamed expressions.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// Wire type of the column.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.data.type_info.type_id
    }

    /// SQL name of the column type, e.g. `nvarchar`.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.data.type_info.type_id.sql_name()
    }

    /// Declared maximum length in bytes.
    #[must_use]
    pub fn max_length(&self) -> u32 {
        self.data.type_info.max_length
    }

    /// Precision of `decimal`/`numeric` columns.
    #[must_use]
    pub fn precision(&self) -> u8 {
        self.data.type_info.precision
    }

    /// Scale of `decimal`/`numeric` and fractional-second temporal columns.
    #[must_use]
    pub fn scale(&self) -> u8 {
        self.data.type_info.scale
    }

    /// Collation of character columns.
    #[must_use]
    pub fn collation(&self) -> Option<&Collation> {
        self.data.type_info.collation.as_ref()
    }

    /// Whether the column accepts NULL.
    #[must_use]
    pub fn nullable(&self) -> bool {
        self.data.is_nullable()
    }
}

/// Columns shared by every row of a result set.
pub(crate) fn columns_of(meta: &ColMetaData) -> Arc<[Column]> {
    meta.columns.iter().cloned().map(Column::new).collect()
}

/// Something a row can be indexed with: a position or a column name.
pub trait RowIndex: sealed::Sealed {
    /// Resolve to a position in `columns`.
    fn index_of(&self, columns: &[Column]) -> Option<usize>;

    /// Description for error messages.
    fn describe(&self) -> String;
}

impl RowIndex for usize {
    fn index_of(&self, columns: &[Column]) -> Option<usize> {
        (*self < columns.len()).then_some(*self)
    }

    fn describe(&self) -> String {
        format!("index {self}")
    }
}

impl RowIndex for &str {
    fn index_of(&self, columns: &[Column]) -> Option<usize> {
        columns
            .iter()
            .position(|c| c.name().eq_ignore_ascii_case(self))
    }

    fn describe(&self) -> String {
        format!("column '{self}'")
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for usize {}
    impl Sealed for &str {}
}

/// A row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Decode a row against its result set's metadata.
    pub(crate) fn decode(
        columns: Arc<[Column]>,
        meta: &ColMetaData,
        raw: RawRow,
    ) -> std::result::Result<Self, TypeError> {
        if let Some((index, err)) = raw.errors.first() {
            let name = columns.get(*index).map_or("", Column::name);
            return Err(TypeError::InvalidValue(format!("column {index} ({name}): {err}")));
        }
        let values = meta
            .columns
            .iter()
            .zip(raw.values.iter())
            .map(|(col, value)| decode_value(&col.type_info, value.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { columns, values })
    }

    /// Build a row from already decoded values.
    #[must_use]
    pub fn from_values(columns: Arc<[Column]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// Columns of the result set this row belongs to.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The raw value at `idx`.
    #[must_use]
    pub fn get_value<I: RowIndex>(&self, idx: I) -> Option<&SqlValue> {
        idx.index_of(&self.columns)
            .and_then(|i| self.values.get(i))
    }

    /// Read a non-NULL value.
    ///
    /// NULL is a conversion error; use [`try_get`](Self::try_get) for
    /// nullable columns.
    pub fn get<T: FromSql, I: RowIndex>(&self, idx: I) -> Result<T> {
        let value = self.lookup(&idx)?;
        Ok(T::from_sql(value)?)
    }

    /// Read a value, mapping NULL to `None`.
    pub fn try_get<T: FromSql, I: RowIndex>(&self, idx: I) -> Result<Option<T>> {
        let value = self.lookup(&idx)?;
        Ok(T::from_sql_nullable(value)?)
    }

    fn lookup<I: RowIndex>(&self, idx: &I) -> Result<&SqlValue> {
        idx.index_of(&self.columns)
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| Error::Conversion(format!("no {} in row", idx.describe())))
    }

    /// Take the first value out of the row.
    pub fn into_first<T: FromSql>(self) -> Result<Option<T>> {
        match self.values.first() {
            Some(value) => Ok(T::from_sql_nullable(value)?),
            None => Ok(None),
        }
    }

    /// The decoded values in column order.
    #[must_use]
    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    /// Iterate over the values in column order.
    pub fn iter(&self) -> std::slice::Iter<'_, SqlValue> {
        self.values.iter()
    }
}

impl IntoIterator for Row {
    type Item = SqlValue;
    type IntoIter = std::vec::IntoIter<SqlValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = &'a SqlValue;
    type IntoIter = std::slice::Iter<'a, SqlValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
