use cassmap_errors::{ErrDef, Problem, Violation, catalog::defs};
use thiserror::Error;

use crate::codec::CodecError;
use crate::translate::StoreError;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, MapperError>;

/// Typed error for every mapper, connection and configuration operation.
#[derive(Debug, Error)]
pub enum MapperError {
    #[error("Invalid load: {0}")]
    InvalidLoad(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("{0}")]
    ConnectionExhausted(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid or empty criteria specified: {0}")]
    InvalidCriteria(String),

    #[error("Key column '{0}' has no value")]
    MissingKey(String),

    #[error("Unknown field '{field}' on entity '{entity}'")]
    UnknownField { entity: String, field: String },

    #[error("Invalid entity metadata: {0}")]
    InvalidMetadata(String),

    #[error("Validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Codec error on column '{column}': {source}")]
    Codec {
        column: String,
        #[source]
        source: CodecError,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error(transparent)]
    Config(#[from] figment::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MapperError {
    pub(crate) fn codec(column: &str, source: CodecError) -> Self {
        Self::Codec {
            column: column.to_owned(),
            source,
        }
    }

    fn err_def(&self) -> ErrDef {
        match self {
            Self::InvalidLoad(_) | Self::MissingKey(_) => defs::INVALID_LOAD,
            Self::NotFound(_) => defs::NOT_FOUND,
            Self::UnsupportedOperation(_) => defs::UNSUPPORTED_OPERATION,
            Self::ConnectionExhausted(_) => defs::CONNECTION_EXHAUSTED,
            Self::Store(e) => e.kind.err_def(),
            Self::InvalidCriteria(_) | Self::UnknownField { .. } => defs::INVALID_CRITERIA,
            Self::Validation { .. } => defs::VALIDATION,
            Self::Codec { .. } => defs::CODEC,
            Self::InvalidMetadata(_) => defs::METADATA,
            Self::InvalidConfig(_) | Self::EnvVar(_) | Self::Config(_) => defs::CONFIG,
            Self::Other(_) => defs::APPLICATION,
        }
    }

    /// HTTP-like status of this failure.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.err_def().status
    }

    /// True when a point lookup found nothing, at either layer.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Store(e) => e.status() == 404,
            _ => false,
        }
    }

    /// Render as a problem-details payload.
    pub fn to_problem(&self) -> Problem {
        let mut p = self.err_def().as_problem(self.to_string());
        match self {
            Self::Store(e) => {
                if let Some(cause) = &e.cause {
                    p = p.with_cause(cause.clone());
                }
            }
            Self::Validation { field, message } => {
                p = p.with_errors(vec![Violation {
                    field: field.clone(),
                    message: message.clone(),
                }]);
            }
            Self::Codec { source, .. } => p = p.with_cause(source.to_string()),
            _ => {}
        }
        p
    }

    /// Like [`MapperError::to_problem`], naming the entity table and the
    /// host that served the failing request.
    pub fn to_problem_in(&self, table: Option<&str>, host: Option<&str>) -> Problem {
        cassmap_errors::finalize(self.to_problem(), table, host)
    }
}
