//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// Transparent wrapper for errors of the companion archive writer
    #[error(transparent)]
    #[diagnostic(transparent)]
    PakError(#[from] modpak_pak::error::Error),

    /// An output file could not be moved into place
    #[error("unable to move {path} into place")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The chunks handed to the writer cannot form a valid container
    #[error("container layout violation: {0}")]
    #[diagnostic(help("this is a bug in the build pipeline, no output was written"))]
    LayoutViolation(String),

    /// The build was cancelled before the container was complete
    #[error("container build was cancelled")]
    Cancelled,
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
