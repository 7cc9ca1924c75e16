//! Database and table lifecycle.
//!
//! `ensure_*` calls are idempotent and never drop data. Re-partitioning is
//! the only destructive operation and takes an explicit [`Destructive`] token.

use super::{PartitionScheme, Session, StoreError, TableState};
use crate::data::{SchemaError, TableSchema};
use crate::query::builder::{Ident, SchemaStatement};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("database '{database}' is partitioned as {actual}, expected {expected}")]
    PartitionMismatch {
        database: String,
        expected: PartitionScheme,
        actual: PartitionScheme,
    },

    #[error("database '{0}' does not exist; create the partition scheme first")]
    MissingDatabase(String),

    #[error("table '{table}' schema mismatch at '{column}': expected {expected}, found {actual}")]
    SchemaMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
}

impl LifecycleError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LifecycleError::Store(e) if e.is_transient())
    }
}

/// Confirmation token for operations that drop data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destructive {
    Confirmed,
}

/// What an `ensure_*` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Created,
    Existing,
}

/// Owns the database/table names and their expected shape.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    database: Ident,
    table: Ident,
    schema: TableSchema,
}

impl LifecycleManager {
    pub fn new(database: &str, table: &str) -> Result<Self, StoreError> {
        let table = Ident::new(table)?;
        Ok(Self {
            database: Ident::new(database)?,
            schema: TableSchema::option_bars(table.as_str()),
            table,
        })
    }

    pub fn database(&self) -> &Ident {
        &self.database
    }

    pub fn table(&self) -> &Ident {
        &self.table
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn run(&self, session: &Session, statement: SchemaStatement) -> Result<(), LifecycleError> {
        debug!(statement = %statement.render(), "ddl");
        session.call(move |store| store.execute(&statement))?;
        Ok(())
    }

    /// Create the database with `scheme` if absent.
    pub fn ensure_partition(
        &self,
        session: &Session,
        scheme: PartitionScheme,
    ) -> Result<Ensured, LifecycleError> {
        let database = self.database.clone();
        match session.call(move |store| store.database(&database))? {
            Some(actual) if actual == scheme => Ok(Ensured::Existing),
            Some(actual) => Err(LifecycleError::PartitionMismatch {
                database: self.database.to_string(),
                expected: scheme,
                actual,
            }),
            None => {
                self.run(
                    session,
                    SchemaStatement::CreateDatabase {
                        database: self.database.clone(),
                        scheme,
                    },
                )?;
                info!(database = %self.database, %scheme, "created database");
                Ok(Ensured::Created)
            }
        }
    }

    /// Create the table if absent; reject an existing table of another shape.
    pub fn ensure_schema(&self, session: &Session) -> Result<Ensured, LifecycleError> {
        let database = self.database.clone();
        if session.call(move |store| store.database(&database))?.is_none() {
            return Err(LifecycleError::MissingDatabase(self.database.to_string()));
        }

        let (database, table) = (self.database.clone(), self.table.clone());
        match session.call(move |store| store.table_state(&database, &table))? {
            TableState::Present(actual) => match self.schema.diff(&actual) {
                None => Ok(Ensured::Existing),
                Some(diff) => Err(self.mismatch(diff)),
            },
            TableState::Partial => Err(LifecycleError::SchemaMismatch {
                table: self.table.to_string(),
                column: "*".into(),
                expected: "schema record".into(),
                actual: "data without schema record".into(),
            }),
            TableState::Missing => {
                self.run(
                    session,
                    SchemaStatement::CreateTable {
                        database: self.database.clone(),
                        table: self.table.clone(),
                        schema: self.schema.clone(),
                    },
                )?;
                info!(database = %self.database, table = %self.table, "created table");
                Ok(Ensured::Created)
            }
        }
    }

    /// `ensure_partition` then `ensure_schema`.
    pub fn ensure_all(
        &self,
        session: &Session,
        scheme: PartitionScheme,
    ) -> Result<(), LifecycleError> {
        self.ensure_partition(session, scheme)?;
        self.ensure_schema(session)?;
        Ok(())
    }

    /// Drop the database and recreate it with `scheme`. All stored data is lost.
    pub fn recreate(
        &self,
        session: &Session,
        scheme: PartitionScheme,
        _confirm: Destructive,
    ) -> Result<(), LifecycleError> {
        warn!(database = %self.database, %scheme, "dropping database for re-partitioning");
        self.run(
            session,
            SchemaStatement::DropDatabase {
                database: self.database.clone(),
            },
        )?;
        self.ensure_all(session, scheme)
    }

    fn mismatch(&self, diff: SchemaError) -> LifecycleError {
        let (column, expected, actual) = match diff {
            SchemaError::MissingColumn(c) => (c, "present".to_string(), "missing".to_string()),
            SchemaError::UnexpectedColumn(c) => (c, "absent".to_string(), "present".to_string()),
            SchemaError::TypeMismatch {
                column,
                expected,
                actual,
            } => (column, expected, actual),
        };
        LifecycleError::SchemaMismatch {
            table: self.table.to_string(),
            column,
            expected,
            actual,
        }
    }
}
