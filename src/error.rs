//! Crate-level error taxonomy.
//!
//! Each layer owns a focused error type (`QueryError` in [`crate::query`],
//! `GraphError` in [`crate::graph`], `AnnotateError` in [`crate::annotate`]);
//! this module aggregates them for the coordinator-facing surface.

use thiserror::Error;

use crate::annotate::AnnotateError;
use crate::graph::GraphError;

/// Top-level error for ingest, search, and watcher operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Annotate(#[from] AnnotateError),
}

pub type Result<T> = std::result::Result<T, Error>;
