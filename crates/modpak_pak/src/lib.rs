//! This library creates the small legacy **PAK** archives that are installed next to an IoStore
//! container.
//!
//! # PAK Archive Format Documentation
//!
//! Games that load IoStore containers still mount a legacy `.pak` with the same stem as the
//! `.utoc`/`.ucas` pair. For a converted mod the archive only carries a single `chunknames` entry
//! listing the relative paths packaged into the container. It is written uncompressed and
//! unencrypted on purpose: loaders only use it as a mount aid.
//!
//! Only version 11 (`Fnv64BugFix`) is produced.
//!
//! ## File Structure
//!
//! A PAK file consists of the entry data, a primary index, the secondary indices and a fixed
//! size footer.
//!
//! | Section               | Description                                                      |
//! |-----------------------|------------------------------------------------------------------|
//! | Entry data            | For each entry: an inline entry header followed by its bytes     |
//! | Primary index         | Mount point, entry count, path hash seed, encoded entries        |
//! | Path hash index       | FNV-64 path hashes to encoded entry offsets                      |
//! | Full directory index  | Directory names to file names to encoded entry offsets           |
//! | Footer                | 221 bytes, see below                                             |
//!
//! ### Inline Entry Header
//!
//! | Offset (bytes) | Field                  | Description                                           |
//! |----------------|------------------------|-------------------------------------------------------|
//! | 0x0000         | Offset                 | 8 bytes: always zero for the inline copy              |
//! | 0x0008         | Size                   | 8 bytes: stored size                                  |
//! | 0x0010         | Uncompressed Size      | 8 bytes: size once decompressed                       |
//! | 0x0018         | Compression            | 4 bytes: index into the footer method names, 0 = none |
//! | 0x001C         | Hash                   | 20 bytes: SHA-1 of the stored bytes                   |
//! | 0x0030         | Flags                  | 1 byte: bit 0 is set for encrypted entries            |
//! | 0x0031         | Block Size             | 4 bytes: compression block size                       |
//!
//! ### Footer
//!
//! | Offset (bytes) | Field                  | Description                                           |
//! |----------------|------------------------|-------------------------------------------------------|
//! | 0x0000         | Encryption Key Guid    | 16 bytes                                              |
//! | 0x0010         | Encrypted Index        | 1 byte                                                |
//! | 0x0011         | Magic                  | 4 bytes: 0x5A6F12E1                                   |
//! | 0x0015         | Version                | 4 bytes: 11                                           |
//! | 0x0019         | Index Offset           | 8 bytes                                               |
//! | 0x0021         | Index Size             | 8 bytes                                               |
//! | 0x0029         | Index Hash             | 20 bytes: SHA-1 of the primary index                  |
//! | 0x003D         | Compression Methods    | 5 × 32 bytes: NUL padded method names                 |
//!
//! ## Additional Information
//!
//! - **File Extension**: `.pak`
//! - **Endianness**: Little-endian for all multi-byte integers
//!

pub mod error;
pub mod hash;
pub mod types;
pub mod write;

pub use write::{PakWriter, PakWriterOptions};
