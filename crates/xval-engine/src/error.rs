//! Errors that abort a sweep before or while the matrix is assembled.

use crate::catalog::CatalogError;
use crate::matrix::DuplicateCell;
use std::path::PathBuf;

/// A sweep either returns a complete matrix or one of these.
///
/// Failures of individual pairs never show up here; they are recorded in
/// the pair's verdict.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("pattern '{0}' did not match any clients")]
    NoClients(String),

    #[error("pattern '{0}' did not match any validators")]
    NoValidators(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("failed to prepare log directory {path}: {source}")]
    LogLayout {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    DuplicateCell(#[from] DuplicateCell),
}
