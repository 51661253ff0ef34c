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

    /// an entry was written without a name being started first
    #[error("no entry has been started")]
    NoEntryStarted,

    /// two entries share the same path
    #[error("duplicate entry {0}")]
    DuplicateEntry(String),

    /// the entry does not fit the 32 bit fields of the encoded index
    #[error("entry {0} is too large for the encoded index")]
    EntryTooLarge(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
