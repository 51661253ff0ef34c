//! This library creates **IoStore** containers, the `.utoc`/`.ucas` pairs Unreal Engine 5 games
//! load their packages from.
//!
//! # IoStore Container Format Documentation
//!
//! A container stores *chunks*: the export bundle of every package (its zen header followed by the
//! export data), bulk data, shader libraries and one container header describing the packages.
//! Chunk data lives in the `.ucas`, split into blocks of 128 KiB that are stored either raw or
//! compressed. The `.utoc` is the table of contents locating every chunk and block. A small legacy
//! PAK with the same stem is written next to them, see [`modpak_pak`].
//!
//! Only the layout read by Unreal Engine 5.3 (TOC version 5, container header version 3) is
//! produced. Containers are never encrypted or signed.
//!
//! ## File Structure
//!
//! | Section               | Description                                                      |
//! |-----------------------|------------------------------------------------------------------|
//! | Header                | 144 bytes, see below                                             |
//! | Chunk ids             | 12 bytes per chunk                                               |
//! | Offsets and lengths   | 10 bytes per chunk: 40 bit big endian offset and length          |
//! | Compression blocks    | 12 bytes per block                                               |
//! | Method names          | 32 bytes per compression method                                  |
//! | Directory index       | Mount point and file tree, see [`directory_index`]               |
//! | Chunk metas           | 33 bytes per chunk: 32 byte hash field and flags                 |
//!
//! ### Header
//!
//! | Offset (bytes) | Field                  | Description                                           |
//! |----------------|------------------------|-------------------------------------------------------|
//! | 0x0000         | Magic                  | 16 bytes: `-==--==--==--==-`                          |
//! | 0x0010         | Version                | 1 byte: 5, then 3 reserved bytes                      |
//! | 0x0014         | Header Size            | 4 bytes: 144                                          |
//! | 0x0018         | Entry Count            | 4 bytes: number of chunks                             |
//! | 0x001C         | Block Entry Count      | 4 bytes                                               |
//! | 0x0020         | Block Entry Size       | 4 bytes: 12                                           |
//! | 0x0024         | Method Name Count      | 4 bytes                                               |
//! | 0x0028         | Method Name Length     | 4 bytes: 32                                           |
//! | 0x002C         | Block Size             | 4 bytes: 0x20000                                      |
//! | 0x0030         | Directory Index Size   | 4 bytes                                               |
//! | 0x0034         | Partition Count        | 4 bytes: 1                                            |
//! | 0x0038         | Container Id           | 8 bytes: CityHash64 of the lowercased container name  |
//! | 0x0040         | Encryption Key Guid    | 16 bytes: zero                                        |
//! | 0x0050         | Container Flags        | 1 byte: 1 compressed, 8 indexed, then 3 reserved      |
//! | 0x0054         | Perfect Hash Seeds     | 4 bytes: 0                                            |
//! | 0x0058         | Partition Size         | 8 bytes: `u64::MAX`                                   |
//! | 0x0060         | Chunks Without Hash    | 4 bytes: 0                                            |
//! | 0x0064         | Reserved               | 44 bytes                                              |
//!
//! ### Chunk Id
//!
//! | Offset (bytes) | Field                  | Description                                           |
//! |----------------|------------------------|-------------------------------------------------------|
//! | 0x0000         | Id                     | 8 bytes: package id, container id or name hash        |
//! | 0x0008         | Index                  | 2 bytes: big endian                                   |
//! | 0x000A         | Padding                | 1 byte                                                |
//! | 0x000B         | Type                   | 1 byte: see [`chunk::ChunkType`]                      |
//!
//! ### Compression Block
//!
//! | Offset (bytes) | Field                  | Description                                           |
//! |----------------|------------------------|-------------------------------------------------------|
//! | 0x0000         | Offset                 | 5 bytes: position in the `.ucas`                      |
//! | 0x0005         | Compressed Size        | 3 bytes                                               |
//! | 0x0008         | Uncompressed Size      | 3 bytes                                               |
//! | 0x000B         | Method                 | 1 byte: 0 raw, otherwise method name index + 1        |
//!
//! Each chunk starts on a block boundary of the uncompressed address space, so its first block is
//! `offset / block size`. Blocks are padded to 16 bytes inside the `.ucas`.
//!
//! ## Additional Information
//!
//! - **File Extensions**: `.utoc`, `.ucas`, `.pak`
//! - **Endianness**: Little-endian unless noted otherwise
//! - **Hashing**: BLAKE3 truncated to 160 bits for chunk hashes
//!

pub mod chunk;
pub mod codec;
pub mod container_header;
pub mod directory_index;
pub mod error;
pub mod planner;
pub mod types;
pub mod write;

pub use codec::{BlockCodec, CompressionMethod};
pub use planner::{CompressionPlanner, CompressionTally};
pub use write::{ContainerOptions, ContainerWriter, PlannedContainer};
