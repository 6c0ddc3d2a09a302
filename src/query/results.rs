//! Result set handling and iteration.
//!
//! This module provides types for handling query results: row counts of
//! DML statements and buffered rows of queries.

use crate::error::{ConversionError, QueryError};
use crate::transport::{QueryPayload, QueryResult};
use crate::types::{ColumnMetadata, SqlType, TypeMapper};
use std::collections::VecDeque;
use std::sync::Arc;

/// Query result that is either a row count or buffered rows.
#[derive(Debug)]
pub struct ResultSet {
    /// Server-side query id
    query_id: String,
    /// Result type
    inner: ResultSetInner,
}

#[derive(Debug)]
enum ResultSetInner {
    /// Row count result (INSERT, UPDATE, DELETE, MERGE)
    RowCount { count: i64 },
    /// DDL or session statement
    Status { message: String },
    /// Buffered rows (SELECT, SHOW)
    Rows {
        columns: Arc<Vec<ColumnMetadata>>,
        /// Rows not yet consumed by `next_row`
        remaining: VecDeque<Vec<Option<String>>>,
        /// Index of the next row
        position: usize,
        total_rows: i64,
    },
}

impl ResultSet {
    /// Create a result set from a transport query result.
    pub(crate) fn from_transport_result(result: QueryResult) -> Result<Self, QueryError> {
        let inner = match result.payload {
            QueryPayload::RowCount(count) => ResultSetInner::RowCount { count },
            QueryPayload::Status(message) => ResultSetInner::Status { message },
            QueryPayload::ResultSet(data) => {
                let columns = ColumnMetadata::from_rowtype(&data.columns)
                    .map_err(|e| QueryError::ExecutionFailed(e.to_string()))?;
                ResultSetInner::Rows {
                    columns: Arc::new(columns),
                    remaining: data.rows.into(),
                    position: 0,
                    total_rows: data.total_rows,
                }
            }
            QueryPayload::Described(_) => {
                return Err(QueryError::InvalidState(
                    "Describe result cannot be read as a result set".to_string(),
                ))
            }
        };

        Ok(Self {
            query_id: result.query_id,
            inner,
        })
    }

    /// Server-side query id.
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    /// Get the row count if this is a row count result.
    pub fn row_count(&self) -> Option<i64> {
        match &self.inner {
            ResultSetInner::RowCount { count } => Some(*count),
            _ => None,
        }
    }

    /// Status message of a DDL or session statement.
    pub fn status_message(&self) -> Option<&str> {
        match &self.inner {
            ResultSetInner::Status { message } => Some(message),
            _ => None,
        }
    }

    /// Check if this result carries rows.
    pub fn has_rows(&self) -> bool {
        matches!(&self.inner, ResultSetInner::Rows { .. })
    }

    /// Column metadata, empty for row count and status results.
    pub fn columns(&self) -> &[ColumnMetadata] {
        match &self.inner {
            ResultSetInner::Rows { columns, .. } => columns,
            _ => &[],
        }
    }

    /// Total row count reported by the server.
    pub fn total_rows(&self) -> Option<i64> {
        match &self.inner {
            ResultSetInner::Rows { total_rows, .. } => Some(*total_rows),
            _ => None,
        }
    }

    /// Advance the cursor and return the next row.
    pub fn next_row(&mut self) -> Option<Row> {
        match &mut self.inner {
            ResultSetInner::Rows {
                columns,
                remaining,
                position,
                ..
            } => {
                let values = remaining.pop_front()?;
                let row = Row {
                    index: *position,
                    columns: Arc::clone(columns),
                    values,
                };
                *position += 1;
                Some(row)
            }
            _ => None,
        }
    }

    /// Iterate over the rows not yet consumed, without moving the cursor.
    pub fn rows(&self) -> impl Iterator<Item = Row> + '_ {
        let (columns, remaining, position) = match &self.inner {
            ResultSetInner::Rows {
                columns,
                remaining,
                position,
                ..
            } => (Some(columns), Some(remaining), *position),
            _ => (None, None, 0),
        };

        remaining
            .into_iter()
            .flatten()
            .enumerate()
            .filter_map(move |(offset, values)| {
                columns.map(|columns| Row {
                    index: position + offset,
                    columns: Arc::clone(columns),
                    values: values.clone(),
                })
            })
    }

    /// Consume the result set and return all remaining rows.
    ///
    /// # Errors
    /// Returns `QueryError::NoResultSet` if this is not a row result.
    pub fn fetch_all(mut self) -> Result<Vec<Row>, QueryError> {
        if !self.has_rows() {
            return Err(QueryError::NoResultSet(
                "Cannot fetch rows from row count result".to_string(),
            ));
        }

        let mut rows = Vec::new();
        while let Some(row) = self.next_row() {
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Column reference by position (0-based) or by name (case-insensitive).
pub trait ColumnIndex {
    /// Resolve to a position within `columns`.
    fn position(&self, columns: &[ColumnMetadata]) -> Result<usize, ConversionError>;
}

impl ColumnIndex for usize {
    fn position(&self, columns: &[ColumnMetadata]) -> Result<usize, ConversionError> {
        if *self < columns.len() {
            Ok(*self)
        } else {
            Err(ConversionError::ColumnOutOfBounds(self.to_string()))
        }
    }
}

impl ColumnIndex for &str {
    fn position(&self, columns: &[ColumnMetadata]) -> Result<usize, ConversionError> {
        columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(self))
            .ok_or_else(|| ConversionError::ColumnOutOfBounds(self.to_string()))
    }
}

/// One row of a result set.
#[derive(Debug, Clone)]
pub struct Row {
    index: usize,
    columns: Arc<Vec<ColumnMetadata>>,
    values: Vec<Option<String>>,
}

impl Row {
    /// Position of this row in the result.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check whether a value is NULL.
    pub fn is_null(&self, column: impl ColumnIndex) -> Result<bool, ConversionError> {
        let position = column.position(&self.columns)?;
        Ok(self.values.get(position).map_or(true, Option::is_none))
    }

    /// Raw string value, `None` for NULL.
    pub fn get_raw(&self, column: impl ColumnIndex) -> Result<Option<&str>, ConversionError> {
        let position = column.position(&self.columns)?;
        Ok(self.values.get(position).and_then(|value| value.as_deref()))
    }

    pub fn get_string(&self, column: impl ColumnIndex) -> Result<String, ConversionError> {
        let (_, raw) = self.non_null(column)?;
        Ok(raw.to_string())
    }

    pub fn get_i64(&self, column: impl ColumnIndex) -> Result<i64, ConversionError> {
        let (position, raw) = self.non_null(column)?;
        TypeMapper::decode_i64(self.sql_type(position), raw)
            .map_err(|message| self.conversion_failed(position, message))
    }

    pub fn get_f64(&self, column: impl ColumnIndex) -> Result<f64, ConversionError> {
        let (position, raw) = self.non_null(column)?;
        TypeMapper::decode_f64(self.sql_type(position), raw)
            .map_err(|message| self.conversion_failed(position, message))
    }

    pub fn get_bool(&self, column: impl ColumnIndex) -> Result<bool, ConversionError> {
        let (position, raw) = self.non_null(column)?;
        TypeMapper::decode_bool(raw).map_err(|message| self.conversion_failed(position, message))
    }

    fn sql_type(&self, position: usize) -> &SqlType {
        &self.columns[position].data_type
    }

    fn non_null(&self, column: impl ColumnIndex) -> Result<(usize, &str), ConversionError> {
        let position = column.position(&self.columns)?;
        match self.values.get(position).and_then(|value| value.as_deref()) {
            Some(raw) => Ok((position, raw)),
            None => Err(ConversionError::UnexpectedNull {
                row: self.index,
                column: position,
            }),
        }
    }

    fn conversion_failed(&self, position: usize, message: String) -> ConversionError {
        ConversionError::ValueConversionFailed {
            row: self.index,
            column: position,
            message,
        }
    }
}
