//! SQL types of result columns and decoding of their values.

mod mapping;
mod schema;

pub use mapping::{SqlType, TypeMapper};
pub use schema::ColumnMetadata;
