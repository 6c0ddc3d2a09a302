//! Column metadata built from result rowtypes.

use crate::error::ConversionError;
use crate::transport::ColumnInfo;
use crate::types::SqlType;

/// Column metadata of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMetadata {
    /// Column name
    pub name: String,
    /// SQL data type
    pub data_type: SqlType,
    /// Whether the column is nullable
    pub nullable: bool,
}

impl ColumnMetadata {
    /// Build metadata from a rowtype entry.
    pub fn from_column_info(column: &ColumnInfo) -> Result<Self, ConversionError> {
        Ok(Self {
            name: column.name.clone(),
            data_type: SqlType::from_rowtype(
                &column.type_name,
                column.precision,
                column.scale,
                column.length,
            )?,
            nullable: column.nullable,
        })
    }

    /// Build metadata for all columns of a rowtype.
    pub fn from_rowtype(columns: &[ColumnInfo]) -> Result<Vec<Self>, ConversionError> {
        columns.iter().map(Self::from_column_info).collect()
    }
}
