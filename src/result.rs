//! Immutable query results.

use crate::value::{NULL, Value};
use serde::{Serialize, Serializer};
use serde::ser::SerializeStruct;
use std::sync::Arc;

/// Descriptive information about one result column.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ColumnMetadata {
    pub decimal_digits: i32,
    pub data_type_name: String,
    pub size: i64,
}

#[derive(Debug, Default)]
struct ResultSet {
    columns: Vec<String>,
    metadata: Vec<ColumnMetadata>,
    rows: Vec<Vec<Value>>,
    affected_rows: u64,
}

/// Snapshot of a completed query.
///
/// The data sits behind an `Arc`, so cloning is O(1) whatever the number of
/// rows and a result can travel between worker and completion contexts freely.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    inner: Arc<ResultSet>,
}

impl QueryResult {
    /// A result with no columns and no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result that only reports how many rows a statement touched.
    pub fn affected(affected_rows: u64) -> Self {
        Self {
            inner: Arc::new(ResultSet {
                affected_rows,
                ..ResultSet::default()
            }),
        }
    }

    /// Build a result set.
    ///
    /// # Panics
    ///
    /// If `metadata` is not parallel to `columns`, or a row does not have
    /// one value per column.
    pub fn new(
        columns: Vec<String>,
        metadata: Vec<ColumnMetadata>,
        rows: Vec<Vec<Value>>,
        affected_rows: u64,
    ) -> Self {
        assert_eq!(
            columns.len(),
            metadata.len(),
            "column metadata must be parallel to the column names"
        );
        assert!(
            rows.iter().all(|row| row.len() == columns.len()),
            "every row must hold one value per column"
        );

        Self {
            inner: Arc::new(ResultSet {
                columns,
                metadata,
                rows,
                affected_rows,
            }),
        }
    }

    /// Value by column name. O(columns).
    ///
    /// Unknown columns and out-of-range rows yield the shared NULL.
    pub fn get(&self, column: &str, row: usize) -> &Value {
        match self.column_index(column) {
            Some(index) => self.get_at(index, row),
            None => {
                tracing::warn!("Column `{}` not found.", column);
                &NULL
            }
        }
    }

    /// Value by column index. O(1).
    pub fn get_at(&self, column: usize, row: usize) -> &Value {
        if let Some(value) = self.inner.rows.get(row).and_then(|r| r.get(column)) {
            return value;
        }

        tracing::warn!(
            "Failed to find column {} row {}. Dataset is of size {}/{}.",
            column,
            row,
            self.inner.columns.len(),
            self.inner.rows.len()
        );
        &NULL
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.inner.columns.iter().position(|c| c == column)
    }

    pub fn columns(&self) -> &[String] {
        &self.inner.columns
    }

    pub fn row(&self, row: usize) -> Option<&[Value]> {
        self.inner.rows.get(row).map(Vec::as_slice)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Value]> {
        self.inner.rows.iter().map(Vec::as_slice)
    }

    pub fn row_count(&self) -> usize {
        self.inner.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.inner.columns.len()
    }

    /// No rows.
    pub fn is_empty(&self) -> bool {
        self.inner.rows.is_empty()
    }

    pub fn columns_metadata(&self) -> &[ColumnMetadata] {
        &self.inner.metadata
    }

    pub fn column_metadata(&self, column: usize) -> Option<&ColumnMetadata> {
        self.inner.metadata.get(column)
    }

    pub fn column_metadata_by_name(&self, column: &str) -> Option<&ColumnMetadata> {
        self.column_index(column)
            .and_then(|index| self.column_metadata(index))
    }

    pub fn affected_rows(&self) -> u64 {
        self.inner.affected_rows
    }

    /// Whether two handles share the same underlying data.
    pub fn ptr_eq(&self, other: &QueryResult) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Serialize for QueryResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("QueryResult", 3)?;
        state.serialize_field("columns", &self.inner.columns)?;
        state.serialize_field("rows", &self.inner.rows)?;
        state.serialize_field("affected_rows", &self.inner.affected_rows)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> QueryResult {
        QueryResult::new(
            vec!["id".into(), "name".into()],
            vec![
                ColumnMetadata {
                    decimal_digits: 0,
                    data_type_name: "INTEGER".into(),
                    size: 10,
                },
                ColumnMetadata {
                    decimal_digits: 0,
                    data_type_name: "VARCHAR".into(),
                    size: 64,
                },
            ],
            vec![
                vec![Value::Int64(1), Value::from("ada")],
                vec![Value::Int64(2), Value::from("grace")],
            ],
            2,
        )
    }

    #[test]
    fn test_lookup_by_name_and_index() {
        let result = sample();
        assert_eq!(result.column_count(), 2);
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.get("name", 0), &Value::from("ada"));
        assert_eq!(result.get_at(0, 1), &Value::Int64(2));
        assert_eq!(result.affected_rows(), 2);
        assert_eq!(result.column_index("name"), Some(1));
        assert_eq!(
            result.column_metadata_by_name("id").map(|m| m.size),
            Some(10)
        );
    }

    #[test]
    fn test_misses_return_null() {
        let result = sample();
        assert!(result.get("missing_col", 0).is_null());
        assert!(result.get("name", 2).is_null());
        assert!(result.get_at(5, 0).is_null());
        assert!(result.row(9).is_none());
        assert!(result.column_metadata(2).is_none());
        assert!(result.column_metadata_by_name("missing").is_none());
    }

    #[test]
    fn test_clone_shares_storage() {
        let result = sample();
        let copy = result.clone();
        assert!(copy.ptr_eq(&result));
        assert_eq!(copy.get("id", 1), &Value::Int64(2));
    }

    #[test]
    fn test_affected_only_result() {
        let result = QueryResult::affected(7);
        assert_eq!(result.column_count(), 0);
        assert!(result.is_empty());
        assert_eq!(result.affected_rows(), 7);
        assert!(QueryResult::empty().columns_metadata().is_empty());
    }

    #[test]
    #[should_panic(expected = "one value per column")]
    fn test_ragged_rows_rejected() {
        QueryResult::new(
            vec!["a".into()],
            vec![ColumnMetadata::default()],
            vec![vec![Value::Null, Value::Null]],
            0,
        );
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "columns": ["id", "name"],
                "rows": [[1, "ada"], [2, "grace"]],
                "affected_rows": 2
            })
        );
    }
}
