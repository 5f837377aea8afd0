//! lookalike-store — Persistence for known faces.
//!
//! Known faces live in SQLite; the flat CSV layout used by earlier
//! deployments (`name,embedding_0,…`) can be imported into it.

pub mod csv;
pub mod sqlite;

use std::path::PathBuf;
use thiserror::Error;

pub use crate::csv::{export_csv, import_csv, parse_csv, write_csv, CsvError, LegacyRow};
pub use crate::sqlite::{FaceStore, FaceSummary};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("label '{0}' is reserved for unrecognized faces")]
    ReservedLabel(String),
    #[error("embedding has {actual} values but stored faces have {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("{}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: CsvError,
    },
}
