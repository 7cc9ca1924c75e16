use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical column types of the option table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Symbol,
    Text,
    Char,
    Date,
    Timestamp,
    Double,
    Long,
    Int,
}

impl ColumnType {
    /// Physical Polars dtype used in warehouse files.
    pub fn dtype(self) -> DataType {
        match self {
            ColumnType::Symbol | ColumnType::Text | ColumnType::Char => DataType::String,
            ColumnType::Date => DataType::Date,
            ColumnType::Timestamp => DataType::Datetime(TimeUnit::Milliseconds, None),
            ColumnType::Double => DataType::Float64,
            ColumnType::Long => DataType::UInt64,
            ColumnType::Int => DataType::UInt32,
        }
    }

    /// Type keyword in rendered DDL.
    pub fn keyword(self) -> &'static str {
        match self {
            ColumnType::Symbol => "SYMBOL",
            ColumnType::Text => "STRING",
            ColumnType::Char => "CHAR",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Double => "DOUBLE",
            ColumnType::Long => "LONG",
            ColumnType::Int => "INT",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
}

/// Declared shape of a stored table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnDef>,
}

/// Column layout of the option bar table, in storage order.
pub const OPTION_BAR_COLUMNS: [(&str, ColumnType); 16] = [
    ("symbol", ColumnType::Symbol),
    ("contract", ColumnType::Symbol),
    ("date", ColumnType::Date),
    ("timestamp", ColumnType::Timestamp),
    ("type", ColumnType::Char),
    ("strike", ColumnType::Double),
    ("expiry", ColumnType::Date),
    ("open", ColumnType::Double),
    ("high", ColumnType::Double),
    ("low", ColumnType::Double),
    ("close", ColumnType::Double),
    ("volume", ColumnType::Long),
    ("open_interest", ColumnType::Long),
    ("vwap", ColumnType::Double),
    ("transactions", ColumnType::Long),
    ("flags", ColumnType::Int),
];

impl TableSchema {
    /// The option bar table schema under the given table name.
    pub fn option_bars(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: OPTION_BAR_COLUMNS
                .iter()
                .map(|(name, ty)| ColumnDef {
                    name: (*name).to_string(),
                    ty: *ty,
                })
                .collect(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Polars schema matching this table.
    pub fn polars_schema(&self) -> Schema {
        Schema::from_iter(
            self.columns
                .iter()
                .map(|c| Field::new(c.name.as_str().into(), c.ty.dtype())),
        )
    }

    /// First difference between `self` (expected) and `actual`.
    pub fn diff(&self, actual: &TableSchema) -> Option<SchemaError> {
        for expected in &self.columns {
            match actual.column(&expected.name) {
                None => return Some(SchemaError::MissingColumn(expected.name.clone())),
                Some(found) if found.ty != expected.ty => {
                    return Some(SchemaError::TypeMismatch {
                        column: expected.name.clone(),
                        expected: expected.ty.to_string(),
                        actual: found.ty.to_string(),
                    })
                }
                Some(_) => {}
            }
        }
        actual
            .columns
            .iter()
            .find(|c| self.column(&c.name).is_none())
            .map(|c| SchemaError::UnexpectedColumn(c.name.clone()))
    }

    /// Validate a DataFrame read from the warehouse against this schema.
    pub fn validate(&self, df: &DataFrame) -> Result<(), SchemaError> {
        let actual = df.schema();

        for field in self.polars_schema().iter_fields() {
            let actual_dtype = actual
                .get(field.name())
                .ok_or_else(|| SchemaError::MissingColumn(field.name().to_string()))?;
            if actual_dtype != field.dtype() {
                return Err(SchemaError::TypeMismatch {
                    column: field.name().to_string(),
                    expected: format!("{:?}", field.dtype()),
                    actual: format!("{actual_dtype:?}"),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("missing column: {0}")]
    MissingColumn(String),

    #[error("unexpected column: {0}")]
    UnexpectedColumn(String),

    #[error("type mismatch in column {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },
}
