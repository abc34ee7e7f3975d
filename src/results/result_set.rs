use std::sync::Arc;

use super::row::DbRow;
use crate::types::RowValues;

/// Outcome of executing one statement.
///
/// Statements that produce columns fill `results`; other statements only report
/// `rows_affected`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<DbRow>,
    /// Rows returned (queries) or changed (DML)
    pub rows_affected: usize,
    column_names: Option<Arc<Vec<String>>>,
}

impl ResultSet {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            results: Vec::with_capacity(capacity),
            rows_affected: 0,
            column_names: None,
        }
    }

    /// Result of a statement that returned no columns.
    #[must_use]
    pub fn affected(rows_affected: usize) -> ResultSet {
        ResultSet {
            rows_affected,
            ..ResultSet::default()
        }
    }

    /// Build a result set from column names and row values in one go.
    #[must_use]
    pub fn from_rows(column_names: Vec<String>, rows: Vec<Vec<RowValues>>) -> ResultSet {
        let mut set = ResultSet::with_capacity(rows.len());
        set.set_column_names(Arc::new(column_names));
        for row in rows {
            set.add_row_values(row);
        }
        set
    }

    pub fn set_column_names(&mut self, column_names: Arc<Vec<String>>) {
        self.column_names = Some(column_names);
    }

    #[must_use]
    pub fn get_column_names(&self) -> Option<&Arc<Vec<String>>> {
        self.column_names.as_ref()
    }

    /// Whether the statement produced a column set (a SELECT-like statement).
    #[must_use]
    pub fn has_columns(&self) -> bool {
        self.column_names.is_some()
    }

    /// Add a row; ignored until column names are set.
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        if let Some(column_names) = &self.column_names {
            self.results
                .push(DbRow::new(Arc::clone(column_names), row_values));
            self.rows_affected += 1;
        }
    }

    /// First column of the first row, the usual shape of `COUNT(*)` answers.
    #[must_use]
    pub fn scalar(&self) -> Option<&RowValues> {
        self.results.first().and_then(|row| row.get_by_index(0))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_share_column_names() {
        let set = ResultSet::from_rows(
            vec!["ID".into(), "Name".into()],
            vec![
                vec![RowValues::Int(1), RowValues::Text("a".into())],
                vec![RowValues::Int(2), RowValues::Null],
            ],
        );
        assert_eq!(set.len(), 2);
        assert_eq!(set.rows_affected, 2);
        assert!(set.has_columns());
        assert_eq!(set.results[1].get("Name"), Some(&RowValues::Null));
        assert_eq!(set.results[0].get("Missing"), None);
        assert_eq!(set.scalar(), Some(&RowValues::Int(1)));
    }

    #[test]
    fn affected_has_no_columns() {
        let set = ResultSet::affected(3);
        assert!(!set.has_columns());
        assert!(set.is_empty());
        assert_eq!(set.rows_affected, 3);
        assert_eq!(set.scalar(), None);
    }
}
