//! Chunk identifiers and the categories that drive the compression policy.

use std::fmt;

use modpak_asset::cityhash::city_hash64_lower_utf16;
use modpak_asset::ids::PackageId;

/// On-disk chunk type stored in the last byte of a [`ChunkId`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ChunkType {
    ExportBundleData = 1,
    BulkData = 2,
    OptionalBulkData = 3,
    MemoryMappedBulkData = 4,
    ContainerHeader = 6,
    ShaderCodeLibrary = 8,
}

/// Role of a chunk in the build, assigned once by classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkCategory {
    ContainerHeader,
    BulkData,
    ShaderLibrary,
    ExportBundleData,
    CompanionNames,
}

impl ChunkCategory {
    /// Whether blocks of this category may be stored compressed.
    pub const fn compression_allowed(self) -> bool {
        match self {
            ChunkCategory::ContainerHeader | ChunkCategory::CompanionNames => false,
            ChunkCategory::BulkData
            | ChunkCategory::ShaderLibrary
            | ChunkCategory::ExportBundleData => true,
        }
    }

    /// Whether a chunk of this category may be stored with the given on-disk type.
    pub const fn accepts(self, chunk_type: ChunkType) -> bool {
        matches!(
            (self, chunk_type),
            (ChunkCategory::ContainerHeader, ChunkType::ContainerHeader)
                | (ChunkCategory::ExportBundleData, ChunkType::ExportBundleData)
                | (ChunkCategory::ShaderLibrary, ChunkType::ShaderCodeLibrary)
                | (
                    ChunkCategory::BulkData,
                    ChunkType::BulkData
                        | ChunkType::OptionalBulkData
                        | ChunkType::MemoryMappedBulkData
                )
        )
    }
}

impl fmt::Display for ChunkCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChunkCategory::ContainerHeader => "container header",
            ChunkCategory::BulkData => "bulk data",
            ChunkCategory::ShaderLibrary => "shader library",
            ChunkCategory::ExportBundleData => "export bundle",
            ChunkCategory::CompanionNames => "chunk names",
        })
    }
}

/// Identifies a chunk inside a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId {
    pub id: u64,
    pub index: u16,
    pub chunk_type: ChunkType,
}

impl ChunkId {
    pub const SIZE: usize = 12;

    pub const fn new(id: u64, index: u16, chunk_type: ChunkType) -> Self {
        ChunkId {
            id,
            index,
            chunk_type,
        }
    }

    /// Chunk of a package, e.g. its export bundle or bulk data.
    pub const fn package(package_id: PackageId, chunk_type: ChunkType) -> Self {
        ChunkId::new(package_id.0, 0, chunk_type)
    }

    /// The container header chunk of the container with the given id.
    pub const fn container_header(container_id: u64) -> Self {
        ChunkId::new(container_id, 0, ChunkType::ContainerHeader)
    }

    /// Shader library chunks are keyed by the hash of the library name.
    pub fn shader_library(library_name: &str) -> Self {
        ChunkId::new(
            city_hash64_lower_utf16(library_name),
            0,
            ChunkType::ShaderCodeLibrary,
        )
    }

    /// Serialized form: the id in little endian, the index in big endian, padding, then the type.
    pub fn to_bytes(&self) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        bytes[..8].copy_from_slice(&self.id.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.index.to_be_bytes());
        bytes[11] = self.chunk_type as u8;
        bytes
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}:{}:{:?}", self.id, self.index, self.chunk_type)
    }
}

/// Id of a container, derived from its name.
pub fn container_id(name: &str) -> u64 {
    city_hash64_lower_utf16(name)
}
