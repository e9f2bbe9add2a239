//! Error catalog and diagnostic payloads shared by the cassmap crates
//!
//! This crate holds pure data types with no storage or transport
//! dependencies. It includes:
//! - RFC 9457 Problem Details (`Problem`) used to render mapper failures
//! - Static error catalog entries (`ErrDef`) carrying an HTTP-like status
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod catalog;
pub mod problem;

pub use catalog::ErrDef;
pub use problem::{Problem, Violation};

/// Attach the failing entity and the host that served the request to a Problem.
///
/// Either part may be absent; an empty `instance` means "no specific entity".
pub fn finalize(mut p: Problem, entity: Option<&str>, host: Option<&str>) -> Problem {
    if let Some(entity) = entity {
        p = p.with_instance(format!("cassmap://entity/{entity}"));
    }
    if let Some(host) = host {
        p = p.with_host(host);
    }
    p
}
