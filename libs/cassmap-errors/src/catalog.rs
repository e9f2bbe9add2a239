//! Error catalog: one static `ErrDef` per failure class the mapper reports.

use crate::problem::Problem;
use http::StatusCode;

/// Static error definition from the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrDef {
    pub status: u16,
    pub title: &'static str,
    pub code: &'static str,
    pub type_url: &'static str,
}

impl ErrDef {
    /// Convert this error definition into a Problem with the given detail
    #[inline]
    pub fn as_problem(&self, detail: impl Into<String>) -> Problem {
        // Passthrough codes from the store are not always valid HTTP statuses
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Problem::new(status, self.title, detail.into())
            .with_code(self.code)
            .with_type(self.type_url)
    }

    /// Same definition with a different status, used for passthrough codes.
    #[must_use]
    pub const fn with_status(self, status: u16) -> Self {
        Self { status, ..self }
    }
}

macro_rules! err_def {
    ($name:ident, $status:expr, $title:literal, $code:literal) => {
        pub const $name: ErrDef = ErrDef {
            status: $status,
            title: $title,
            code: $code,
            type_url: concat!("https://errors.cassmap.dev/", $code),
        };
    };
}

/// Catalog entries. Store-level classes first, then mapper-level ones.
pub mod defs {
    use super::ErrDef;

    err_def!(NOT_FOUND, 404, "Not Found", "NOT_FOUND");
    err_def!(INVALID_REQUEST, 400, "Invalid Request", "INVALID_REQUEST");
    err_def!(UNAVAILABLE, 503, "Unavailable", "UNAVAILABLE");
    err_def!(TIMED_OUT, 408, "Timed Out", "TIMED_OUT");
    err_def!(APPLICATION, 500, "Application Error", "APPLICATION_ERROR");
    err_def!(AUTHENTICATION, 401, "Authentication Failure", "AUTHENTICATION_FAILURE");
    err_def!(AUTHORIZATION, 403, "Authorization Failure", "AUTHORIZATION_FAILURE");
    err_def!(SCHEMA_DISAGREEMENT, 500, "Schema Disagreement", "SCHEMA_DISAGREEMENT");
    err_def!(UNKNOWN, 500, "Unknown Store Error", "UNKNOWN");

    err_def!(INVALID_LOAD, 400, "Invalid Load", "INVALID_LOAD");
    err_def!(UNSUPPORTED_OPERATION, 405, "Unsupported Operation", "UNSUPPORTED_OPERATION");
    err_def!(CONNECTION_EXHAUSTED, 503, "Connection Exhausted", "CONNECTION_EXHAUSTED");
    err_def!(INVALID_CRITERIA, 400, "Invalid Criteria", "INVALID_CRITERIA");
    err_def!(VALIDATION, 422, "Validation Failed", "VALIDATION_FAILED");
    err_def!(CODEC, 500, "Codec Error", "CODEC_ERROR");
    err_def!(METADATA, 500, "Invalid Metadata", "INVALID_METADATA");
    err_def!(CONFIG, 500, "Invalid Configuration", "INVALID_CONFIG");
}
