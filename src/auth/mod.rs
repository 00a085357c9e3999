//! Authentication
//!
//! JWT bearer credentials backed by an on-disk subject registry, with an
//! optional HTTP Basic fallback. Authentication failures are deliberately
//! uniform: callers cannot distinguish an unknown subject from a bad
//! signature.

pub mod basic;
pub mod jwt;
pub mod registry;

pub use basic::BasicAuthenticator;
pub use jwt::JwtAuthenticator;
pub use registry::{JwtSubject, SubjectRegistry};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid subject")]
    InvalidSubject,

    #[error("certificate missing for subject \"{0}\"")]
    CertificateMissing(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("registry io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry format error: {0}")]
    Format(String),
}
