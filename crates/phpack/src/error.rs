//! Error taxonomy for a bundling run
//!
//! Merge-phase errors are accumulated, never propagated: one file failing
//! to merge must not abort its siblings. Assembly and snapshot patching are
//! fatal — a corrupted length-prefixed rewrite must never be emitted.

use std::path::PathBuf;

use thiserror::Error;

use crate::lexer::LexError;

/// Everything that can go wrong while bundling.
#[derive(Debug, Error)]
pub enum BundleError {
    /// Source could not be tokenized; fatal to that file's merge only.
    #[error("cannot tokenize {path}: {source}")]
    Lex {
        path: PathBuf,
        #[source]
        source: LexError,
    },

    /// Missing or unreadable include target; the inclusion degrades to
    /// verbatim text and the run continues.
    #[error("include target not found: {0}")]
    FileNotFound(PathBuf),

    /// Inclusion nesting exceeded the configured guard.
    #[error("include depth limit ({limit}) exceeded at {path}")]
    DepthExceeded { path: PathBuf, limit: usize },

    /// No `start('...')` directive found in the entry file; the artifact
    /// is still produced but its bootstrap is likely incomplete.
    #[error("no start('...') directive found in entry file {0}")]
    UnresolvedEntryPoint(PathBuf),

    /// The serialized snapshot did not match the length-prefixed field
    /// shape; always fatal.
    #[error("snapshot rewrite failed: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BundleError {
    /// Errors that abort the run, as opposed to merge-phase errors that
    /// only degrade the output.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BundleError::Snapshot(_) | BundleError::Io(_))
    }
}
