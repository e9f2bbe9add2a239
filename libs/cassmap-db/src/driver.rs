//! Storage drivers: the seam between record mapping and a concrete store.

use tracing::{info, warn};

use crate::codec::Value;
use crate::connection::Connection;
use crate::error::{MapperError, Result};
use crate::metadata::EntityMetadata;
use crate::query::{self, Criteria, LoadOptions, Statement};
use crate::schema::{SchemaBootstrapper, SchemaReport};
use crate::transport::{QueryResult, Row};

/// Row-level operations a mapper needs.
pub trait StorageDriver {
    /// First row matching a key or key prefix.
    ///
    /// # Errors
    /// Returns store or connection failures.
    fn load(&mut self, meta: &EntityMetadata, key: &[Value]) -> Result<Option<Row>>;

    /// # Errors
    /// Returns store or connection failures.
    fn load_where(&mut self, meta: &EntityMetadata, criteria: &Criteria, opts: &LoadOptions) -> Result<Vec<Row>>;

    /// Upsert the given (field index, value) pairs, key columns included.
    ///
    /// # Errors
    /// Returns store or connection failures.
    fn save(&mut self, meta: &EntityMetadata, values: &[(usize, &Value)]) -> Result<()>;

    /// # Errors
    /// Returns store or connection failures.
    fn delete(&mut self, meta: &EntityMetadata, key: &[Value]) -> Result<()>;

    /// # Errors
    /// Returns `InvalidCriteria` for empty criteria, or store failures.
    fn delete_where(&mut self, meta: &EntityMetadata, criteria: &Criteria) -> Result<()>;

    /// Create the backing table and indexes if missing.
    ///
    /// # Errors
    /// Returns store or connection failures.
    fn ensure_schema(&mut self, meta: &EntityMetadata) -> Result<SchemaReport>;
}

/// Drivers that can adjust counter columns in place.
pub trait CounterStore: StorageDriver {
    /// # Errors
    /// Returns store or connection failures.
    fn increment(&mut self, meta: &EntityMetadata, idx: usize, by: i64, key: &[Value]) -> Result<()>;

    /// # Errors
    /// Returns store or connection failures.
    fn decrement(&mut self, meta: &EntityMetadata, idx: usize, by: i64, key: &[Value]) -> Result<()>;
}

impl<D: StorageDriver + ?Sized> StorageDriver for &mut D {
    fn load(&mut self, meta: &EntityMetadata, key: &[Value]) -> Result<Option<Row>> {
        (**self).load(meta, key)
    }

    fn load_where(&mut self, meta: &EntityMetadata, criteria: &Criteria, opts: &LoadOptions) -> Result<Vec<Row>> {
        (**self).load_where(meta, criteria, opts)
    }

    fn save(&mut self, meta: &EntityMetadata, values: &[(usize, &Value)]) -> Result<()> {
        (**self).save(meta, values)
    }

    fn delete(&mut self, meta: &EntityMetadata, key: &[Value]) -> Result<()> {
        (**self).delete(meta, key)
    }

    fn delete_where(&mut self, meta: &EntityMetadata, criteria: &Criteria) -> Result<()> {
        (**self).delete_where(meta, criteria)
    }

    fn ensure_schema(&mut self, meta: &EntityMetadata) -> Result<SchemaReport> {
        (**self).ensure_schema(meta)
    }
}

impl<D: CounterStore + ?Sized> CounterStore for &mut D {
    fn increment(&mut self, meta: &EntityMetadata, idx: usize, by: i64, key: &[Value]) -> Result<()> {
        (**self).increment(meta, idx, by, key)
    }

    fn decrement(&mut self, meta: &EntityMetadata, idx: usize, by: i64, key: &[Value]) -> Result<()> {
        (**self).decrement(meta, idx, by, key)
    }
}

/// Cassandra-backed driver over a failover [`Connection`].
pub struct CassandraDriver {
    conn: Connection,
    auto_create_tables: bool,
}

impl CassandraDriver {
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        let auto_create_tables = conn.settings().auto_create_tables;
        Self {
            conn,
            auto_create_tables,
        }
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    #[must_use]
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Execute, creating the table and retrying once if the server reports
    /// it missing.
    fn run(&mut self, meta: &EntityMetadata, stmt: &Statement) -> Result<QueryResult> {
        match self.conn.query(&stmt.cql, &stmt.params) {
            Err(MapperError::Store(e)) if self.auto_create_tables && e.is_missing_table(meta.table()) => {
                info!(table = meta.table(), "Table missing, creating it before retrying");
                SchemaBootstrapper::new(&mut self.conn).ensure(meta)?;
                self.conn.query(&stmt.cql, &stmt.params).inspect_err(|e| {
                    warn!(table = meta.table(), error = %e, "Statement failed after table creation");
                })
            }
            other => other,
        }
    }
}

impl StorageDriver for CassandraDriver {
    fn load(&mut self, meta: &EntityMetadata, key: &[Value]) -> Result<Option<Row>> {
        let stmt = query::select_by_key(meta, key)?;
        Ok(self.run(meta, &stmt)?.into_rows().into_iter().next())
    }

    fn load_where(&mut self, meta: &EntityMetadata, criteria: &Criteria, opts: &LoadOptions) -> Result<Vec<Row>> {
        let stmt = query::select_where(meta, criteria, opts)?;
        Ok(self.run(meta, &stmt)?.into_rows())
    }

    fn save(&mut self, meta: &EntityMetadata, values: &[(usize, &Value)]) -> Result<()> {
        let stmt = query::upsert(meta, values)?;
        self.run(meta, &stmt).map(drop)
    }

    fn delete(&mut self, meta: &EntityMetadata, key: &[Value]) -> Result<()> {
        let stmt = query::delete_by_key(meta, key)?;
        self.run(meta, &stmt).map(drop)
    }

    fn delete_where(&mut self, meta: &EntityMetadata, criteria: &Criteria) -> Result<()> {
        let stmt = query::delete_where(meta, criteria)?;
        self.run(meta, &stmt).map(drop)
    }

    fn ensure_schema(&mut self, meta: &EntityMetadata) -> Result<SchemaReport> {
        SchemaBootstrapper::new(&mut self.conn).ensure(meta)
    }
}

impl CounterStore for CassandraDriver {
    fn increment(&mut self, meta: &EntityMetadata, idx: usize, by: i64, key: &[Value]) -> Result<()> {
        let stmt = query::counter_update(meta, idx, by, false, key)?;
        self.run(meta, &stmt).map(drop)
    }

    fn decrement(&mut self, meta: &EntityMetadata, idx: usize, by: i64, key: &[Value]) -> Result<()> {
        let stmt = query::counter_update(meta, idx, by, true, key)?;
        self.run(meta, &stmt).map(drop)
    }
}
