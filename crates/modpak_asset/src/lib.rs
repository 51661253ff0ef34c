//! This library resolves cooked legacy packages (`.uasset` + `.uexp`) and converts them into
//! **zen** packages, the per-package format stored in IoStore containers.
//!
//! # Legacy Package Format Documentation
//!
//! A cooked legacy package is split in two files. The `.uasset` holds the package summary and the
//! tables describing its objects, the `.uexp` holds the serialized export data and ends with the
//! package tag.
//!
//! Objects refer to each other through *package indices*: `0` is null, positive values select
//! export `n - 1` and negative values select import `-n - 1`. Names are stored as an index into
//! the name map plus an instance number. Every one of these references is checked against the
//! table it points into, so damaged or hostile packages fail with
//! [`error::Error::IndexOutOfRange`] instead of reading out of bounds.
//!
//! ## File Structure
//!
//! | Section               | Description                                                      |
//! |-----------------------|------------------------------------------------------------------|
//! | Summary               | Tag `0x9E2A83C1`, file versions, table counts and offsets        |
//! | Name map              | Strings, each followed by two 16 bit hashes                      |
//! | Import map            | Objects referenced from other packages                           |
//! | Export map            | Objects stored in this package and their `.uexp` serial ranges   |
//! | Depends map           | Unused by cooked packages                                        |
//! | Preload dependencies  | Package indices grouped per export by dependency kind            |
//! | Data resources        | Optional bulk data payload descriptions                          |
//!
//! ### Import Record
//!
//! | Offset (bytes) | Field                  | Description                                           |
//! |----------------|------------------------|-------------------------------------------------------|
//! | 0x0000         | Class Package          | 8 bytes: name reference                               |
//! | 0x0008         | Class Name             | 8 bytes: name reference                               |
//! | 0x0010         | Outer                  | 4 bytes: package index                                |
//! | 0x0014         | Object Name            | 8 bytes: name reference                               |
//! | 0x001C         | Import Optional        | 4 bytes: boolean                                      |
//!
//! # Zen Package Format
//!
//! A zen package replaces the `.uasset` with a compact header that is stored in front of the
//! export data in the package's export bundle chunk. Imports are no longer paths: objects of
//! compiled-in `/Script/` packages are identified by the hash of their path, objects of other
//! packages by the index of the imported package and the hash of the export inside it. See
//! [`zen::ZenPackage::write_header`] for the header layout.
//!
//! ## Additional Information
//!
//! - **File Extensions**: `.uasset`, `.umap`, `.uexp`
//! - **Endianness**: Little-endian for all multi-byte integers
//! - **Hashing**: CityHash64 over lowercased names, see [`cityhash`]
//!

pub mod cityhash;
pub mod error;
pub mod ids;
pub mod legacy;
pub mod names;
pub mod read;
#[cfg(any(test, feature = "fixtures"))]
pub mod testing;
pub mod zen;

pub use legacy::LegacyPackage;
pub use zen::{ConversionReport, ZenConverter, ZenPackage};
