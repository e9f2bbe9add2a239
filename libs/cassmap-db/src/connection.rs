//! A logical connection to a cluster: host selection, bounded retry with
//! failover, and the prepared-statement cache.
//!
//! One host is bound at a time and stays bound until its retry budget runs
//! out. Each transient failure tears the transport down (dropping every
//! cached statement) and charges the bound host. A host whose budget hits
//! zero joins the dead set; once the dead set covers the whole pool it is
//! cleared at the cost of one all-hosts attempt, and when those are spent
//! the pool reports `ConnectionExhausted` until budgets are reset.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::seq::IndexedRandom;
use serde::Serialize;

use crate::codec::{self, ColumnType, Value};
use crate::consistency::Consistency;
use crate::error::{MapperError, Result};
use crate::statement::{PreparedStatement, StatementCache};
use crate::transport::{
    Connector, Credentials, QueryResult, Timeouts, Transport, WireError, WireErrorKind,
};
use crate::translate::{StoreError, StoreErrorKind, translate};

/// Resolved settings for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub hosts: Vec<String>,
    pub port: u16,
    pub keyspace: Option<String>,
    pub timeouts: Timeouts,
    pub host_retry_attempts: u32,
    pub all_hosts_attempts: u32,
    pub consistency: Consistency,
    pub statement_cache_capacity: Option<usize>,
    pub credentials: Option<Credentials>,
    /// Create missing tables on first use.
    pub auto_create_tables: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            hosts: vec!["localhost".to_owned()],
            port: 9042,
            keyspace: None,
            timeouts: Timeouts::default(),
            host_retry_attempts: 2,
            all_hosts_attempts: 1,
            consistency: Consistency::Quorum,
            statement_cache_capacity: None,
            credentials: None,
            auto_create_tables: true,
        }
    }
}

/// Outcome of a single attempt against the bound host.
#[derive(Debug)]
enum Attempt<T> {
    Success(T),
    /// Charge the host and try again.
    Retryable(StoreError),
    /// Surface to the caller as is.
    Fatal(MapperError),
}

macro_rules! attempt {
    ($e:expr) => {
        match $e {
            Attempt::Success(v) => v,
            Attempt::Retryable(e) => return Attempt::Retryable(e),
            Attempt::Fatal(e) => return Attempt::Fatal(e),
        }
    };
}

/// `system.local` summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterInfo {
    pub host: String,
    pub cluster_name: Option<String>,
    pub release_version: Option<String>,
    pub partitioner: Option<String>,
}

pub struct Connection {
    settings: ConnectionSettings,
    hosts: Vec<String>,
    connector: Arc<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    /// Host the connection is bound to, kept across reconnects.
    host: Option<String>,
    /// Bumped on every successful open and keyspace switch so older statements are detectable.
    session: u64,
    dead_hosts: BTreeSet<String>,
    host_attempts_left: u32,
    all_hosts_left: u32,
    cache: StatementCache,
    keyspace: Option<String>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("hosts", &self.hosts)
            .field("port", &self.settings.port)
            .field("keyspace", &self.keyspace)
            .field("host", &self.host)
            .field("connected", &self.transport.is_some())
            .field("dead_hosts", &self.dead_hosts)
            .finish_non_exhaustive()
    }
}

fn keyspace_not_found(keyspace: &str, cause: &str) -> MapperError {
    MapperError::Store(StoreError::chained(
        StoreErrorKind::NotFound,
        &format!("The keyspace `{keyspace}` could not be found"),
        cause,
    ))
}

impl Connection {
    #[must_use]
    pub fn new(settings: ConnectionSettings, connector: Arc<dyn Connector>) -> Self {
        let mut hosts: Vec<String> = Vec::with_capacity(settings.hosts.len());
        for h in &settings.hosts {
            if !hosts.contains(h) {
                hosts.push(h.clone());
            }
        }
        Self {
            hosts,
            connector,
            transport: None,
            host: None,
            session: 0,
            dead_hosts: BTreeSet::new(),
            host_attempts_left: settings.host_retry_attempts.max(1),
            all_hosts_left: settings.all_hosts_attempts.max(1),
            cache: StatementCache::new(settings.statement_cache_capacity),
            keyspace: settings.keyspace.clone(),
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    #[must_use]
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn add_host(&mut self, host: impl Into<String>) {
        let host = host.into();
        if !self.hosts.contains(&host) {
            self.hosts.push(host);
        }
    }

    /// The host serving requests, while connected.
    #[must_use]
    pub fn current_host(&self) -> Option<&str> {
        self.transport.as_ref().and(self.host.as_deref())
    }

    #[must_use]
    pub fn dead_hosts(&self) -> &BTreeSet<String> {
        &self.dead_hosts
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    #[must_use]
    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    #[must_use]
    pub fn consistency(&self) -> Consistency {
        self.settings.consistency
    }

    #[must_use]
    pub fn cached_statements(&self) -> usize {
        self.cache.len()
    }

    /// Remaining (per-host, all-hosts) retry budget.
    #[must_use]
    pub fn budgets(&self) -> (u32, u32) {
        (self.host_attempts_left, self.all_hosts_left)
    }

    /// Restore both budgets and forget dead hosts.
    pub fn reset_budgets(&mut self) {
        self.host_attempts_left = self.settings.host_retry_attempts.max(1);
        self.all_hosts_left = self.settings.all_hosts_attempts.max(1);
        self.dead_hosts.clear();
        tracing::debug!(hosts = ?self.hosts, "Retry budgets reset");
    }

    /// Close the transport, unbind the host and drop cached statements.
    pub fn disconnect(&mut self) {
        self.drop_transport();
        self.host = None;
    }

    fn drop_transport(&mut self) {
        self.cache.clear();
        if let Some(mut t) = self.transport.take() {
            t.close();
        }
    }

    /// Make sure a transport is open, binding a host if none is bound.
    fn socket(&mut self) -> Attempt<()> {
        if self.transport.is_some() {
            return Attempt::Success(());
        }
        let host = match self.host.clone().filter(|h| !self.dead_hosts.contains(h)) {
            Some(h) => h,
            None => {
                let available: Vec<&String> =
                    self.hosts.iter().filter(|h| !self.dead_hosts.contains(*h)).collect();
                let Some(chosen) = available.choose(&mut rand::rng()) else {
                    return Attempt::Fatal(MapperError::ConnectionExhausted(
                        "All hosts in pool are down".to_owned(),
                    ));
                };
                (*chosen).clone()
            }
        };
        self.host = Some(host.clone());

        tracing::debug!(host = %host, port = self.settings.port, "Opening transport");
        let mut transport = match self.connector.open(
            &host,
            self.settings.port,
            &self.settings.timeouts,
            self.settings.credentials.as_ref(),
        ) {
            Ok(t) => t,
            Err(e) => return Self::classify(&e),
        };
        if let Some(ks) = &self.keyspace {
            if let Err(e) = transport.use_keyspace(ks) {
                transport.close();
                let translated = translate(&e);
                if translated.is_permanent() {
                    return Attempt::Fatal(keyspace_not_found(ks, &e.message));
                }
                return Attempt::Retryable(translated);
            }
        }
        self.session = self.session.wrapping_add(1);
        self.transport = Some(transport);
        Attempt::Success(())
    }

    fn classify<T>(e: &WireError) -> Attempt<T> {
        let translated = translate(e);
        if translated.is_permanent() {
            Attempt::Fatal(MapperError::Store(translated))
        } else {
            Attempt::Retryable(translated)
        }
    }

    /// Run `f` against the open transport.
    fn call<T>(
        &mut self,
        f: impl FnOnce(&mut dyn Transport) -> std::result::Result<T, WireError>,
    ) -> Attempt<T> {
        attempt!(self.socket());
        let Some(transport) = self.transport.as_deref_mut() else {
            return Attempt::Retryable(StoreError::new(StoreErrorKind::Unknown(0), "transport closed"));
        };
        match f(transport) {
            Ok(v) => Attempt::Success(v),
            Err(e) => Self::classify(&e),
        }
    }

    /// Charge a transient failure. Returns the error to surface once the
    /// budgets are spent.
    fn record_failure(&mut self, err: &StoreError) -> Option<MapperError> {
        tracing::warn!(
            host = ?self.host,
            status = err.status(),
            error = %err.message,
            "Transient store failure"
        );
        self.drop_transport();
        self.host_attempts_left = self.host_attempts_left.saturating_sub(1);
        if self.host_attempts_left > 0 {
            return None;
        }

        if let Some(dead) = self.host.take() {
            tracing::warn!(host = %dead, "Host marked dead");
            self.dead_hosts.insert(dead);
        }
        self.host_attempts_left = self.settings.host_retry_attempts.max(1);

        if self.hosts.iter().all(|h| self.dead_hosts.contains(h)) {
            self.all_hosts_left = self.all_hosts_left.saturating_sub(1);
            if self.all_hosts_left == 0 {
                return Some(MapperError::ConnectionExhausted(format!(
                    "All hosts in pool are down: {}",
                    err.message
                )));
            }
            tracing::warn!(
                remaining = self.all_hosts_left,
                "Every host failed, clearing dead hosts"
            );
            self.dead_hosts.clear();
        }
        None
    }

    /// Retry `op` until it succeeds, fails permanently or exhausts the budgets.
    fn run<T>(&mut self, mut op: impl FnMut(&mut Self) -> Attempt<T>) -> Result<T> {
        loop {
            match op(self) {
                Attempt::Success(v) => {
                    self.host_attempts_left = self.settings.host_retry_attempts.max(1);
                    return Ok(v);
                }
                Attempt::Fatal(e) => return Err(e),
                Attempt::Retryable(e) => {
                    if let Some(fatal) = self.record_failure(&e) {
                        return Err(fatal);
                    }
                }
            }
        }
    }

    fn try_prepare(&mut self, query: &str) -> Attempt<PreparedStatement> {
        attempt!(self.socket());
        let (Some(host), session) = (self.host.clone(), self.session) else {
            return Attempt::Retryable(StoreError::new(StoreErrorKind::Unknown(0), "no bound host"));
        };
        if let Some(stmt) = self.cache.get(query, &host).filter(|s| s.session == session) {
            tracing::debug!(host = %host, query, "Prepared statement cache hit");
            return Attempt::Success(stmt);
        }
        tracing::debug!(host = %host, query, "Preparing statement");
        let handle = attempt!(self.call(|t| t.prepare(query)));
        let stmt = PreparedStatement {
            query: query.to_owned(),
            handle,
            host,
            session,
        };
        self.cache.insert(stmt.clone());
        Attempt::Success(stmt)
    }

    fn is_current(&self, stmt: &PreparedStatement) -> bool {
        stmt.is_valid_for(self.current_host(), self.session)
    }

    fn try_execute(
        &mut self,
        stmt: &mut PreparedStatement,
        params: &[Option<Vec<u8>>],
        consistency: Consistency,
    ) -> Attempt<QueryResult> {
        attempt!(self.socket());
        if !self.is_current(stmt) {
            tracing::debug!(from = %stmt.host, to = ?self.host, "Re-preparing statement for active host");
            *stmt = attempt!(self.try_prepare(&stmt.query));
        }
        let Some(transport) = self.transport.as_deref_mut() else {
            return Attempt::Retryable(StoreError::new(StoreErrorKind::Unknown(0), "transport closed"));
        };
        match transport.execute(&stmt.handle, params, consistency) {
            Ok(r) => Attempt::Success(r),
            Err(e) if e.kind == WireErrorKind::Unprepared => {
                tracing::debug!(query = %stmt.query, "Server lost statement, re-preparing");
                self.cache.remove(&stmt.query, &stmt.host);
                *stmt = attempt!(self.try_prepare(&stmt.query));
                let handle = stmt.handle.clone();
                self.call(|t| t.execute(&handle, params, consistency))
            }
            Err(e) => Self::classify(&e),
        }
    }

    /// Prepare `query` on the active host, reusing the cache when possible.
    ///
    /// # Errors
    /// Returns the translated store error or `ConnectionExhausted`.
    pub fn prepare(&mut self, query: &str) -> Result<PreparedStatement> {
        self.run(|c| c.try_prepare(query))
    }

    /// Execute a prepared statement, re-preparing it if the active host changed.
    ///
    /// # Errors
    /// Returns the translated store error or `ConnectionExhausted`.
    pub fn execute(
        &mut self,
        stmt: &PreparedStatement,
        params: &[Option<Vec<u8>>],
        consistency: Consistency,
    ) -> Result<QueryResult> {
        let mut stmt = stmt.clone();
        tracing::debug!(query = %stmt.query, params = params.len(), "Executing statement");
        self.run(|c| c.try_execute(&mut stmt, params, consistency))
    }

    /// Prepare and execute at the configured consistency.
    ///
    /// # Errors
    /// Returns the translated store error or `ConnectionExhausted`.
    pub fn query(&mut self, query: &str, params: &[Option<Vec<u8>>]) -> Result<QueryResult> {
        let stmt = self.prepare(query)?;
        self.execute(&stmt, params, self.settings.consistency)
    }

    /// Switch keyspace. Cached statements are dropped. On failure the
    /// previous keyspace stays in effect.
    ///
    /// # Errors
    /// Returns a 404-class store error when the keyspace does not exist.
    pub fn set_keyspace(&mut self, keyspace: &str) -> Result<()> {
        let previous = self.keyspace.replace(keyspace.to_owned());
        self.cache.clear();
        self.session = self.session.wrapping_add(1);
        if self.transport.is_none() {
            return Ok(());
        }
        let ks = keyspace.to_owned();
        let applied = self.run(|c| {
            attempt!(c.socket());
            let Some(t) = c.transport.as_deref_mut() else {
                return Attempt::Retryable(StoreError::new(StoreErrorKind::Unknown(0), "transport closed"));
            };
            match t.use_keyspace(&ks) {
                Ok(()) => Attempt::Success(()),
                Err(e) if translate(&e).is_permanent() => {
                    Attempt::Fatal(keyspace_not_found(&ks, &e.message))
                }
                Err(e) => Attempt::Retryable(translate(&e)),
            }
        });
        if applied.is_err() {
            self.keyspace = previous;
        }
        applied
    }

    /// Cluster name, version and partitioner of the node serving requests.
    ///
    /// # Errors
    /// Returns the translated store error or `ConnectionExhausted`.
    pub fn cluster_info(&mut self) -> Result<ClusterInfo> {
        let rows = self
            .query(
                "SELECT cluster_name, release_version, partitioner FROM system.local",
                &[],
            )?
            .into_rows();
        let host = self.host.clone().unwrap_or_default();
        let mut info = ClusterInfo {
            host,
            cluster_name: None,
            release_version: None,
            partitioner: None,
        };
        if let Some(row) = rows.into_iter().next() {
            for (name, cell) in row {
                let text = match codec::unpack(cell.as_deref(), ColumnType::Varchar)
                    .map_err(|e| MapperError::codec(&name, e))?
                {
                    Value::Text(s) => Some(s),
                    _ => None,
                };
                match name.as_str() {
                    "cluster_name" => info.cluster_name = text,
                    "release_version" => info.release_version = text,
                    "partitioner" => info.partitioner = text,
                    _ => {}
                }
            }
        }
        Ok(info)
    }

    /// Names of all keyspaces in the cluster.
    ///
    /// # Errors
    /// Returns the translated store error or `ConnectionExhausted`.
    pub fn keyspaces(&mut self) -> Result<Vec<String>> {
        let rows = self
            .query("SELECT keyspace_name FROM system_schema.keyspaces", &[])?
            .into_rows();
        let mut names = Vec::with_capacity(rows.len());
        for row in rows {
            for (name, cell) in row {
                if let Value::Text(s) = codec::unpack(cell.as_deref(), ColumnType::Varchar)
                    .map_err(|e| MapperError::codec(&name, e))?
                {
                    names.push(s);
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.drop_transport();
    }
}
