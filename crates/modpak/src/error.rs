//! Error types that can be emitted from the build pipeline

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Error type for the build pipeline
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`walkdir::Error`]
    #[error(transparent)]
    WalkError(#[from] walkdir::Error),

    /// Transparent wrapper for [`serde_json::Error`]
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    /// An asset could not be resolved or converted
    #[error(transparent)]
    #[diagnostic(transparent)]
    AssetError(#[from] modpak_asset::error::Error),

    /// The container could not be written
    #[error(transparent)]
    #[diagnostic(transparent)]
    ContainerError(#[from] modpak_iostore::error::Error),

    /// The companion archive could not be written
    #[error(transparent)]
    #[diagnostic(transparent)]
    PakError(#[from] modpak_pak::error::Error),

    #[error("{} contains no files", .0.display())]
    EmptyInput(PathBuf),

    #[error("{} already exists", .0.display())]
    #[diagnostic(help("pass --overwrite to replace it"))]
    OutputExists(PathBuf),

    #[error("{} is not a valid UTF-8 path", .0.display())]
    InvalidPath(PathBuf),

    /// An optional helper is missing, the build continues without it
    #[error("optional collaborator missing: {0}")]
    MissingCollaborator(String),

    /// The asset bridge answered with an error or not at all
    #[error("asset bridge failed: {0}")]
    BridgeError(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
