// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
// Error taxonomy for the mirror synchronizer.
//
// Kept as a flat, string-payload enum (rather than nested structured
// variants) to match the rest of this codebase's error style.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MirrorError>;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("no backend registered for scheme {0:?}")]
    NoBackend(String),

    #[error("PKI material missing: {0}")]
    PkiMissing(String),

    #[error("PKI material invalid: {0}")]
    PkiInvalid(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("remote peer returned an error: {0}")]
    Remote(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<std::io::Error> for MirrorError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => MirrorError::NotFound(e.to_string()),
            std::io::ErrorKind::PermissionDenied => MirrorError::Permission(e.to_string()),
            _ => MirrorError::Io(e.to_string()),
        }
    }
}

impl From<Box<bincode::ErrorKind>> for MirrorError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        MirrorError::Io(format!("wire encoding error: {e}"))
    }
}
