// src/error.rs

//! Error types for the larder crate

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by catalog acquisition and the catalog index loaders
#[derive(Error, Debug)]
pub enum Error {
    /// The build callback failed. The cache state is left consistent and
    /// a later acquire may retry the build.
    #[error("catalog rebuild failed: {0}")]
    Build(anyhow::Error),

    /// The wait for the catalog was cancelled through its token
    #[error("catalog acquire cancelled")]
    Cancelled,

    /// Failed to read a catalog index file
    #[error("failed to read catalog index '{path}': {source}")]
    CatalogRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A catalog index file did not parse
    #[error("invalid catalog index '{path}': {source}")]
    CatalogParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A catalog index stream did not parse
    #[error("invalid catalog index: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
