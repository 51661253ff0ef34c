//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// a reference points past the end of one of the package tables
    #[error("{table} index {index} is out of range for a table of {len} entries")]
    #[diagnostic(help("the package is probably corrupt or was cooked for another engine version"))]
    IndexOutOfRange {
        table: &'static str,
        index: i64,
        len: usize,
    },

    /// the data ended before a field could be read
    #[error("unexpected end of data reading {what} at offset {offset}")]
    Truncated { what: &'static str, offset: usize },

    /// file is not a cooked legacy package
    #[error("invalid package: {0}")]
    InvalidPackage(String),

    /// a name does not fit the 15 bit length of a name batch header
    #[error("name of {len} characters exceeds the name batch limit of {max}")]
    NameTooLong { len: usize, max: usize },

    /// the package was saved by an engine version that cannot be converted
    #[error("unsupported package version ue4={ue4} ue5={ue5}")]
    UnsupportedVersion { ue4: i32, ue5: i32 },
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
