//! The container header chunk: the package store of a container.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use modpak_asset::ids::PackageId;

pub const CONTAINER_HEADER_SIGNATURE: u32 = 0x496F_436E;

/// `NoExportInfo`, the version read by Unreal Engine 5.3
pub const CONTAINER_HEADER_VERSION: u32 = 3;

const STORE_ENTRY_SIZE: usize = 16;

/// What the loader needs to know about a package before reading it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreEntry {
    pub imported_packages: Vec<PackageId>,
    pub shader_map_hashes: Vec<[u8; 20]>,
}

/// Package store of a container, written as its [`crate::chunk::ChunkType::ContainerHeader`] chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerHeader {
    pub container_id: u64,
    pub packages: Vec<(PackageId, StoreEntry)>,
}

impl ContainerHeader {
    pub fn new(container_id: u64) -> Self {
        ContainerHeader {
            container_id,
            packages: Vec::new(),
        }
    }

    pub fn add_package(&mut self, package_id: PackageId, entry: StoreEntry) {
        self.packages.push((package_id, entry));
    }

    /// Store entries hold two `(count, offset)` array views each, the offset being relative to the
    /// view itself. The arrays follow the entries.
    fn store_entries(&self) -> io::Result<Vec<u8>> {
        let entries_size = self.packages.len() * STORE_ENTRY_SIZE;
        let mut entries = Vec::with_capacity(entries_size);
        let mut data = Vec::new();

        for (index, (_, entry)) in self.packages.iter().enumerate() {
            let view = index * STORE_ENTRY_SIZE;

            entries.write_u32::<LittleEndian>(entry.imported_packages.len() as u32)?;
            entries.write_u32::<LittleEndian>(match entry.imported_packages.is_empty() {
                true => 0,
                false => (entries_size + data.len() - view) as u32,
            })?;
            for package_id in &entry.imported_packages {
                data.write_u64::<LittleEndian>(package_id.0)?;
            }

            let view = view + 8;
            entries.write_u32::<LittleEndian>(entry.shader_map_hashes.len() as u32)?;
            entries.write_u32::<LittleEndian>(match entry.shader_map_hashes.is_empty() {
                true => 0,
                false => (entries_size + data.len() - view) as u32,
            })?;
            for hash in &entry.shader_map_hashes {
                data.write_all(hash)?;
            }
        }

        entries.extend_from_slice(&data);
        Ok(entries)
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(CONTAINER_HEADER_SIGNATURE)?;
        out.write_u32::<LittleEndian>(CONTAINER_HEADER_VERSION)?;
        out.write_u64::<LittleEndian>(self.container_id)?;

        out.write_i32::<LittleEndian>(self.packages.len() as i32)?;
        for (package_id, _) in &self.packages {
            out.write_u64::<LittleEndian>(package_id.0)?;
        }

        let store_entries = self.store_entries()?;
        out.write_i32::<LittleEndian>(store_entries.len() as i32)?;
        out.write_all(&store_entries)?;

        // optional segment package ids and store entries
        out.write_i32::<LittleEndian>(0)?;
        out.write_i32::<LittleEndian>(0)?;
        // redirects name map
        out.write_u32::<LittleEndian>(0)?;
        // localized packages, package redirects
        out.write_i32::<LittleEndian>(0)?;
        out.write_i32::<LittleEndian>(0)?;

        Ok(out)
    }
}
