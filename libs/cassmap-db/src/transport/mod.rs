//! The request/response boundary to a single cluster node.
//!
//! A [`Connector`] opens a [`Transport`] to one host. The transport speaks
//! prepare/execute/keyspace and hands back raw cells; everything above it
//! (failover, caching, decoding) lives in [`crate::connection`].

mod frame;
pub mod native;

use std::time::Duration;

use thiserror::Error;

use crate::consistency::Consistency;

pub use native::NativeConnector;

/// Socket timeouts applied by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub send: Duration,
    pub receive: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(200),
            send: Duration::from_secs(1),
            receive: Duration::from_secs(1),
        }
    }
}

/// Username/password pair for the password authenticator.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Server-assigned handle for a prepared query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedHandle {
    pub id: Vec<u8>,
}

/// One result row: column names paired with raw cell bytes.
pub type Row = Vec<(String, Option<Vec<u8>>)>;

/// Outcome of an executed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    Void,
    Rows(Vec<Row>),
    SetKeyspace(String),
    SchemaChange {
        change: String,
        target: String,
        keyspace: String,
    },
}

impl QueryResult {
    /// Rows of a `Rows` result, empty for anything else.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Self::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }
}

/// Failure classes reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireErrorKind {
    NotFound,
    InvalidRequest,
    AlreadyExists,
    Unprepared,
    Unavailable,
    TimedOut,
    Application,
    Authentication,
    Authorization,
    SchemaDisagreement,
    /// Socket-level failure other than a timeout.
    Io,
    /// Any other server error code, passed through.
    Other(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WireError {
    pub kind: WireErrorKind,
    pub message: String,
}

impl WireError {
    #[must_use]
    pub fn new(kind: WireErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::new(WireErrorKind::Application, message)
    }
}

impl From<std::io::Error> for WireError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => WireErrorKind::TimedOut,
            _ => WireErrorKind::Io,
        };
        Self::new(kind, e.to_string())
    }
}

/// An open link to one node.
pub trait Transport: Send {
    /// Compile `query` on the server.
    ///
    /// # Errors
    /// Returns the server or socket failure.
    fn prepare(&mut self, query: &str) -> Result<PreparedHandle, WireError>;

    /// Run a prepared statement with already-encoded parameters.
    ///
    /// # Errors
    /// Returns the server or socket failure.
    fn execute(
        &mut self,
        handle: &PreparedHandle,
        params: &[Option<Vec<u8>>],
        consistency: Consistency,
    ) -> Result<QueryResult, WireError>;

    /// Switch the session keyspace.
    ///
    /// # Errors
    /// Returns the server or socket failure.
    fn use_keyspace(&mut self, keyspace: &str) -> Result<(), WireError>;

    fn close(&mut self);
}

/// Opens transports. One connector serves every host of a connection.
pub trait Connector: Send + Sync {
    /// # Errors
    /// Returns `WireError` when the host is unreachable or rejects the handshake.
    fn open(
        &self,
        host: &str,
        port: u16,
        timeouts: &Timeouts,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn Transport>, WireError>;
}
