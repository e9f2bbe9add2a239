//! Prepared statements and the per-connection cache keyed by (query, host).

use moka::sync::Cache;

use crate::transport::PreparedHandle;

/// A query compiled on one specific host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    pub query: String,
    pub handle: PreparedHandle,
    pub host: String,
    /// Transport session that produced the handle.
    pub session: u64,
}

impl PreparedStatement {
    /// Valid only while `current` is still the host (and socket) that prepared it.
    #[must_use]
    pub fn is_valid_for(&self, current: Option<&str>, session: u64) -> bool {
        current == Some(self.host.as_str()) && self.session == session
    }
}

type Key = (String, String);

/// Statement cache. Unbounded unless a capacity is given, in which case
/// moka's admission policy picks what to evict.
#[derive(Debug)]
pub struct StatementCache {
    entries: Cache<Key, PreparedStatement>,
}

impl StatementCache {
    #[must_use]
    pub fn new(capacity: Option<usize>) -> Self {
        let entries = match capacity.filter(|c| *c > 0) {
            Some(cap) => Cache::builder().max_capacity(cap as u64).build(),
            None => Cache::builder().build(),
        };
        Self { entries }
    }

    #[must_use]
    pub fn get(&self, query: &str, host: &str) -> Option<PreparedStatement> {
        self.entries
            .get(&(query.to_owned(), host.to_owned()))
            .filter(|s| s.host == host)
    }

    pub fn insert(&self, stmt: PreparedStatement) {
        let key = (stmt.query.clone(), stmt.host.clone());
        self.entries.insert(key, stmt);
    }

    pub fn remove(&self, query: &str, host: &str) {
        self.entries.invalidate(&(query.to_owned(), host.to_owned()));
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        usize::try_from(self.entries.entry_count()).unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
