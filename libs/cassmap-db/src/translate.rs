//! Translation of transport failures into the store error taxonomy.

use cassmap_errors::{ErrDef, catalog::defs};
use thiserror::Error;

use crate::transport::{WireError, WireErrorKind};

/// Store-level failure class. Each maps to an HTTP-like status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    NotFound,
    InvalidRequest,
    Unavailable,
    TimedOut,
    Application,
    Authentication,
    Authorization,
    SchemaDisagreement,
    /// Anything else; carries the lower-level code through.
    Unknown(u16),
}

impl StoreErrorKind {
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::InvalidRequest => 400,
            Self::Unavailable => 503,
            Self::TimedOut => 408,
            Self::Application | Self::SchemaDisagreement => 500,
            Self::Authentication => 401,
            Self::Authorization => 403,
            Self::Unknown(code) => code,
        }
    }

    #[must_use]
    pub const fn err_def(self) -> ErrDef {
        match self {
            Self::NotFound => defs::NOT_FOUND,
            Self::InvalidRequest => defs::INVALID_REQUEST,
            Self::Unavailable => defs::UNAVAILABLE,
            Self::TimedOut => defs::TIMED_OUT,
            Self::Application => defs::APPLICATION,
            Self::Authentication => defs::AUTHENTICATION,
            Self::Authorization => defs::AUTHORIZATION,
            Self::SchemaDisagreement => defs::SCHEMA_DISAGREEMENT,
            Self::Unknown(code) => defs::UNKNOWN.with_status(code),
        }
    }

    /// Fixed description of the class, prefixed by the cause when chained.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::NotFound => "A specific column was requested that does not exist.",
            Self::InvalidRequest => {
                "Invalid request could mean keyspace or column family does not exist, \
                 required parameters are missing, or a parameter is malformed."
            }
            Self::Unavailable => "Not all the replicas required could be created and/or read",
            Self::TimedOut => {
                "The node responsible for the write or read did not respond within the \
                 configured timeout. The request may be too large, the node oversaturated, \
                 or the node down before the failure detector noticed."
            }
            Self::Application => {
                "Internal server error or protocol mismatch between client and server."
            }
            Self::Authentication => {
                "Invalid authentication request (user does not exist or credentials invalid)"
            }
            Self::Authorization => {
                "Invalid authorization request (user does not have access to keyspace)"
            }
            Self::SchemaDisagreement => "Schemas are not in agreement across all nodes",
            Self::Unknown(_) => "",
        }
    }
}

/// A translated store failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    /// Cause message first, then this layer's message.
    pub message: String,
    /// Message of the wrapped lower-level error, if any.
    pub cause: Option<String>,
    /// True when the server reported that the object already exists.
    pub already_exists: bool,
}

impl StoreError {
    #[must_use]
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            already_exists: false,
        }
    }

    /// Wrap `cause`, keeping its message ahead of `message` when they differ.
    #[must_use]
    pub fn chained(kind: StoreErrorKind, message: &str, cause: &str) -> Self {
        let full = if cause.is_empty() || cause == message {
            message.to_owned()
        } else if message.is_empty() {
            cause.to_owned()
        } else {
            format!("{cause}\n{message}")
        };
        Self {
            kind,
            message: full,
            cause: (!cause.is_empty()).then(|| cause.to_owned()),
            already_exists: false,
        }
    }

    #[must_use]
    pub const fn status(&self) -> u16 {
        self.kind.status()
    }

    /// Permanent failures surface immediately; everything else may be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self.kind, StoreErrorKind::InvalidRequest)
    }

    /// The server said the table is not defined. Matches both the legacy
    /// "unconfigured columnfamily" and the newer "unconfigured table" wording.
    #[must_use]
    pub fn is_missing_table(&self, table: &str) -> bool {
        let msg = self.message.to_ascii_lowercase();
        let table = table.to_ascii_lowercase();
        [
            format!("unconfigured columnfamily {table}"),
            format!("unconfigured table {table}"),
        ]
        .iter()
        .any(|needle| {
            msg.match_indices(needle.as_str()).any(|(at, _)| {
                // Reject prefixes of longer table names.
                msg[at + needle.len()..]
                    .chars()
                    .next()
                    .is_none_or(|c| !(c.is_ascii_alphanumeric() || c == '_'))
            })
        })
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        self.already_exists || self.message.to_ascii_lowercase().contains("already exists")
    }
}

/// Translate a transport failure into a store error.
#[must_use]
pub fn translate(e: &WireError) -> StoreError {
    let kind = match e.kind {
        WireErrorKind::NotFound => StoreErrorKind::NotFound,
        WireErrorKind::InvalidRequest
        | WireErrorKind::AlreadyExists
        | WireErrorKind::Unprepared => StoreErrorKind::InvalidRequest,
        WireErrorKind::Unavailable => StoreErrorKind::Unavailable,
        WireErrorKind::TimedOut => StoreErrorKind::TimedOut,
        WireErrorKind::Application => StoreErrorKind::Application,
        WireErrorKind::Authentication => StoreErrorKind::Authentication,
        WireErrorKind::Authorization => StoreErrorKind::Authorization,
        WireErrorKind::SchemaDisagreement => StoreErrorKind::SchemaDisagreement,
        WireErrorKind::Io => StoreErrorKind::Unknown(0),
        WireErrorKind::Other(code) => StoreErrorKind::Unknown(code),
    };
    let mut out = StoreError::chained(kind, kind.description(), &e.message);
    out.already_exists = e.kind == WireErrorKind::AlreadyExists;
    out
}
