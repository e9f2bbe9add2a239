//! Table and secondary-index bootstrap from entity metadata.
//!
//! Creation is idempotent: the table statement carries `IF NOT EXISTS`, and
//! an index that already exists is reported as such rather than failing.

use serde::Serialize;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::error::{MapperError, Result};
use crate::metadata::EntityMetadata;
use crate::query;
use crate::transport::QueryResult;

/// What one bootstrap run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    /// The table did not exist before this run.
    pub table_created: bool,
    pub indexes_created: Vec<String>,
    pub indexes_existing: Vec<String>,
}

/// Creates tables and indexes on a [`Connection`].
pub struct SchemaBootstrapper<'a> {
    conn: &'a mut Connection,
}

impl<'a> SchemaBootstrapper<'a> {
    #[must_use]
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Create the table, then every requested index.
    ///
    /// # Errors
    /// Returns the first store error other than "already exists".
    pub fn ensure(&mut self, meta: &EntityMetadata) -> Result<SchemaReport> {
        let mut report = SchemaReport {
            table_created: self.ensure_table(meta)?,
            ..SchemaReport::default()
        };
        for (name, column) in meta.index_requests() {
            if self.ensure_index(meta, name, column)? {
                report.indexes_created.push(name.to_owned());
            } else {
                report.indexes_existing.push(name.to_owned());
            }
        }
        info!(
            table = meta.table(),
            table_created = report.table_created,
            indexes_created = report.indexes_created.len(),
            indexes_existing = report.indexes_existing.len(),
            "Schema ensured"
        );
        Ok(report)
    }

    /// Returns `true` when the table was created by this call.
    ///
    /// # Errors
    /// Returns the translated store error.
    pub fn ensure_table(&mut self, meta: &EntityMetadata) -> Result<bool> {
        let cql = query::create_table(meta);
        debug!(table = meta.table(), cql = %cql, "Creating table");
        match self.conn.query(&cql, &[]) {
            Ok(QueryResult::SchemaChange { .. }) => Ok(true),
            Ok(_) => Ok(false),
            Err(MapperError::Store(e)) if e.is_already_exists() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Returns `true` when the index was created by this call.
    ///
    /// # Errors
    /// Returns the translated store error.
    pub fn ensure_index(&mut self, meta: &EntityMetadata, name: &str, column: &str) -> Result<bool> {
        let cql = query::create_index(meta, name, column);
        match self.conn.query(&cql, &[]) {
            Ok(_) => {
                info!(table = meta.table(), index = name, column, "Created index");
                Ok(true)
            }
            Err(MapperError::Store(e)) if e.is_already_exists() => {
                debug!(table = meta.table(), index = name, "Index already exists");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
