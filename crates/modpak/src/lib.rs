//! Repackages extracted game mods into IoStore containers.
//!
//! A build walks a directory of cooked legacy files, groups them into packages, converts every
//! package to the zen format and writes `<name>_9999999_P.utoc`, `.ucas` and `.pak`, see
//! [`build::Pipeline`]. Mods made only of audio or movie files are written as a single legacy
//! archive instead.

pub mod bridge;
pub mod build;
pub mod classifier;
pub mod commands;
pub mod context;
pub mod error;
pub mod naming;
pub mod report;
