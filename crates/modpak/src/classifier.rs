//! Decides what every extracted file becomes inside the container.
//!
//! Classification only looks at paths, so the same input always yields the same chunks.

use std::collections::{BTreeMap, HashSet};

use itertools::Itertools;
use modpak_asset::cityhash::city_hash64_lower_utf16;
use modpak_iostore::chunk::{ChunkCategory, ChunkId, ChunkType};
use modpak_iostore::write::CHUNK_NAMES_ENTRY;
use tracing::{debug, warn};

/// Path standing in for the container header, which the build synthesizes
pub const CONTAINER_HEADER_RECORD: &str = "<container header>";

/// Payloads of audio and movie mods, which the game reads from legacy archives only
const MEDIA_EXTENSIONS: [&str; 5] = ["bnk", "wem", "bik", "bk2", "mp4"];

/// A file of the extracted mod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntry {
    /// Path relative to the input directory, `/` separated
    pub path: String,
    pub bytes: Vec<u8>,
}

impl ExtractedEntry {
    pub fn kind(&self) -> EntryKind {
        EntryKind::of(&self.path)
    }

    pub fn category(&self) -> ChunkCategory {
        classify(&self.path)
    }
}

/// What a file is, judged by its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// `.uasset` or `.umap`
    PackageHeader,
    /// `.uexp`
    PackageExports,
    /// `.ubulk`, `.uptnl` or `.m.ubulk`, with the chunk type they are stored as
    Bulk(ChunkType),
    ShaderLibrary,
    Media,
    Other,
}

impl EntryKind {
    pub fn of(path: &str) -> EntryKind {
        let file_name = file_name(path).to_ascii_lowercase();
        if file_name.ends_with(".m.ubulk") {
            return EntryKind::Bulk(ChunkType::MemoryMappedBulkData);
        }

        match file_name.rsplit_once('.').map(|(_, extension)| extension) {
            Some("uasset" | "umap") => EntryKind::PackageHeader,
            Some("uexp") => EntryKind::PackageExports,
            Some("ubulk") => EntryKind::Bulk(ChunkType::BulkData),
            Some("uptnl") => EntryKind::Bulk(ChunkType::OptionalBulkData),
            Some("ushaderbytecode" | "ushadercode") => EntryKind::ShaderLibrary,
            Some(extension) if MEDIA_EXTENSIONS.contains(&extension) => EntryKind::Media,
            _ => EntryKind::Other,
        }
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Category of the entry at `path`. Unknown files are packaged as bulk data.
pub fn classify(path: &str) -> ChunkCategory {
    match path {
        CONTAINER_HEADER_RECORD => ChunkCategory::ContainerHeader,
        CHUNK_NAMES_ENTRY => ChunkCategory::CompanionNames,
        _ => match EntryKind::of(path) {
            EntryKind::PackageHeader | EntryKind::PackageExports => ChunkCategory::ExportBundleData,
            EntryKind::ShaderLibrary => ChunkCategory::ShaderLibrary,
            EntryKind::Bulk(_) | EntryKind::Media | EntryKind::Other => ChunkCategory::BulkData,
        },
    }
}

/// Engine name of the package a file belongs to
///
/// `<Project>/Content/Hero/T_Hero.uasset` is `/Game/Hero/T_Hero`, `Engine/Content/...` mounts at
/// `/Engine` and plugin content at `/<Plugin>`. Files outside a `Content` directory have none.
pub fn package_name(path: &str) -> Option<String> {
    let components = path
        .split('/')
        .filter(|component| !component.is_empty())
        .collect::<Vec<_>>();
    let content = components
        .iter()
        .position(|component| component.eq_ignore_ascii_case("Content"))?;
    let root = match content {
        0 => return None,
        1 if components[0].eq_ignore_ascii_case("Engine") => "Engine",
        1 => "Game",
        _ => components[content - 1],
    };
    let (file, directories) = components[content + 1..].split_last()?;
    let stem = file.split('.').next().filter(|stem| !stem.is_empty())?;

    Some(format!(
        "/{}",
        std::iter::once(root)
            .chain(directories.iter().copied())
            .chain(std::iter::once(stem))
            .join("/")
    ))
}

/// Files stored as chunks of one package, as indices into the entry list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageGroup {
    pub name: String,
    pub header: usize,
    pub exports: Option<usize>,
    pub bulk: Vec<(ChunkType, usize)>,
}

/// The entries of a mod sorted by how they are packaged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Sorted by package name
    pub packages: Vec<PackageGroup>,
    pub shader_libraries: Vec<usize>,
    /// Everything without a package, stored as bulk data keyed by its path
    pub loose: Vec<usize>,
    /// Files that cannot be stored: duplicate package files or chunk ids, and `.uasset`/`.uexp`
    /// without a package
    pub orphans: Vec<usize>,
}

#[derive(Default)]
struct PartialGroup {
    header: Option<usize>,
    exports: Option<usize>,
    bulk: Vec<(ChunkType, usize)>,
}

impl Classification {
    pub fn new(entries: &[ExtractedEntry]) -> Self {
        let mut classification = Classification::default();
        let mut groups: BTreeMap<String, PartialGroup> = BTreeMap::new();

        for (index, entry) in entries.iter().enumerate() {
            if entry.category() == ChunkCategory::CompanionNames {
                debug!(path = %entry.path, "chunk names are written by the build");
                continue;
            }

            let kind = entry.kind();
            let name = match kind {
                EntryKind::ShaderLibrary => {
                    classification.shader_libraries.push(index);
                    continue;
                }
                EntryKind::PackageHeader | EntryKind::PackageExports => {
                    match package_name(&entry.path) {
                        Some(name) => name,
                        None => {
                            warn!(path = %entry.path, "package outside of a content directory");
                            classification.orphans.push(index);
                            continue;
                        }
                    }
                }
                EntryKind::Bulk(_) => match package_name(&entry.path) {
                    Some(name) => name,
                    None => {
                        classification.loose.push(index);
                        continue;
                    }
                },
                EntryKind::Media | EntryKind::Other => {
                    classification.loose.push(index);
                    continue;
                }
            };

            let group = groups.entry(name).or_default();
            let slot = match kind {
                EntryKind::Bulk(chunk_type) => {
                    if group.bulk.iter().any(|(existing, _)| *existing == chunk_type) {
                        warn!(path = %entry.path, "duplicate bulk data, packaging it loose");
                        classification.loose.push(index);
                    } else {
                        group.bulk.push((chunk_type, index));
                    }
                    continue;
                }
                EntryKind::PackageHeader => &mut group.header,
                _ => &mut group.exports,
            };
            match slot {
                Some(_) => {
                    warn!(path = %entry.path, "duplicate package file");
                    classification.orphans.push(index);
                }
                None => *slot = Some(index),
            }
        }

        for (name, mut group) in groups {
            match group.header {
                Some(header) => {
                    group.bulk.sort();
                    classification.packages.push(PackageGroup {
                        name,
                        header,
                        exports: group.exports,
                        bulk: group.bulk,
                    });
                }
                None => {
                    warn!(package = %name, "no package header, bulk data is packaged loose");
                    classification.orphans.extend(group.exports);
                    classification
                        .loose
                        .extend(group.bulk.into_iter().map(|(_, index)| index));
                }
            }
        }

        classification
            .shader_libraries
            .sort_by(|a, b| entries[*a].path.cmp(&entries[*b].path));
        classification
            .loose
            .sort_by(|a, b| entries[*a].path.cmp(&entries[*b].path));

        // the first path in order keeps a contested chunk id
        let mut ids = HashSet::new();
        for (indices, id_of) in [
            (&mut classification.shader_libraries, shader_library_id as fn(&str) -> ChunkId),
            (&mut classification.loose, loose_chunk_id),
        ] {
            indices.retain(|index| {
                let path = &entries[*index].path;
                let unique = ids.insert(id_of(path));
                if !unique {
                    warn!(path = %path, "another file already has this chunk id");
                    classification.orphans.push(*index);
                }
                unique
            });
        }

        classification.orphans.sort();
        classification
    }
}

/// Whether the mod only carries audio or movie files, which stay in a legacy archive.
pub fn is_media_only(entries: &[ExtractedEntry]) -> bool {
    !entries.is_empty() && entries.iter().all(|entry| entry.kind() == EntryKind::Media)
}

/// Id of a shader library chunk, keyed by the library's file stem
pub fn shader_library_id(path: &str) -> ChunkId {
    let name = file_name(path);
    ChunkId::shader_library(name.split('.').next().unwrap_or(name))
}

/// Id of a file stored without a package
pub fn loose_chunk_id(path: &str) -> ChunkId {
    ChunkId::new(city_hash64_lower_utf16(path), 0, ChunkType::BulkData)
}

#[cfg(test)]
mod test {
    use modpak_iostore::chunk::{ChunkCategory, ChunkType};
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::classifier::{
        classify, is_media_only, package_name, shader_library_id, Classification, EntryKind,
        ExtractedEntry, PackageGroup, CONTAINER_HEADER_RECORD,
    };

    fn entry(path: &str) -> ExtractedEntry {
        ExtractedEntry {
            path: path.into(),
            bytes: Vec::new(),
        }
    }

    #[test]
    fn categories() {
        for (path, category) in [
            (CONTAINER_HEADER_RECORD, ChunkCategory::ContainerHeader),
            ("chunknames", ChunkCategory::CompanionNames),
            ("Mod/Content/T_Hero.uasset", ChunkCategory::ExportBundleData),
            ("Mod/Content/Maps/Arena.umap", ChunkCategory::ExportBundleData),
            ("Mod/Content/T_Hero.uexp", ChunkCategory::ExportBundleData),
            ("Mod/Content/T_Hero.ubulk", ChunkCategory::BulkData),
            ("Mod/Content/T_Hero.uptnl", ChunkCategory::BulkData),
            ("Mod/Content/T_Hero.m.ubulk", ChunkCategory::BulkData),
            ("Mod/Content/ShaderArchive-Mod-PCD3D_SM6.ushaderbytecode", ChunkCategory::ShaderLibrary),
            ("Mod/Content/Notes.txt", ChunkCategory::BulkData),
            ("Mod/Content/NoExtension", ChunkCategory::BulkData),
        ] {
            assert_eq!(classify(path), category, "{path}");
        }
    }

    #[test]
    fn bulk_kinds() {
        assert_eq!(EntryKind::of("A/Content/T.UBULK"), EntryKind::Bulk(ChunkType::BulkData));
        assert_eq!(
            EntryKind::of("A/Content/T.uptnl"),
            EntryKind::Bulk(ChunkType::OptionalBulkData)
        );
        assert_eq!(
            EntryKind::of("A/Content/T.m.ubulk"),
            EntryKind::Bulk(ChunkType::MemoryMappedBulkData)
        );
        assert_eq!(EntryKind::of("A/Content/Hero.wem"), EntryKind::Media);
    }

    #[test]
    fn package_names() {
        assert_eq!(
            package_name("Marvel/Content/Hero/T_Hero.uasset").as_deref(),
            Some("/Game/Hero/T_Hero")
        );
        assert_eq!(
            package_name("Marvel/Content/Hero/T_Hero.m.ubulk").as_deref(),
            Some("/Game/Hero/T_Hero")
        );
        assert_eq!(
            package_name("Engine/Content/EngineMaterials/Grid.uasset").as_deref(),
            Some("/Engine/EngineMaterials/Grid")
        );
        assert_eq!(
            package_name("Marvel/Plugins/Skins/Content/Hero.uasset").as_deref(),
            Some("/Skins/Hero")
        );
        assert_eq!(package_name("Content/Hero.uasset"), None);
        assert_eq!(package_name("Marvel/Content"), None);
        assert_eq!(package_name("Marvel/Config/DefaultGame.ini"), None);
    }

    #[traced_test]
    #[test]
    fn grouping() {
        let entries = [
            "Mod/Content/B/T_B.uasset",
            "Mod/Content/A/T_A.uexp",
            "Mod/Content/A/T_A.uptnl",
            "Mod/Content/A/T_A.uasset",
            "Mod/Content/A/T_A.ubulk",
            "Mod/Content/Orphan.ubulk",
            "Mod/Content/ShaderArchive-Mod.ushaderbytecode",
            "Mod/readme.txt",
            "Mod/Content/Lonely.uexp",
        ]
        .map(entry);

        let classification = Classification::new(&entries);
        assert_eq!(
            classification.packages,
            vec![
                PackageGroup {
                    name: "/Game/A/T_A".into(),
                    header: 3,
                    exports: Some(1),
                    bulk: vec![(ChunkType::BulkData, 4), (ChunkType::OptionalBulkData, 2)],
                },
                PackageGroup {
                    name: "/Game/B/T_B".into(),
                    header: 0,
                    exports: None,
                    bulk: vec![],
                },
            ]
        );
        assert_eq!(classification.shader_libraries, vec![6]);
        // sorted by path
        assert_eq!(classification.loose, vec![5, 7]);
        assert_eq!(classification.orphans, vec![8]);
        assert!(logs_contain("bulk data is packaged loose"));
    }

    #[traced_test]
    #[test]
    fn duplicate_shader_libraries_are_orphans() {
        let entries = [
            "Mod/Content/Zeta/ShaderArchive-Mod.ushaderbytecode",
            "Mod/Content/Alpha/ShaderArchive-Mod.ushaderbytecode",
            "Mod/Content/ShaderArchive-Other.ushaderbytecode",
            "Mod/Config/Tweaks.ini",
            "Mod/config/tweaks.ini",
        ]
        .map(entry);

        let classification = Classification::new(&entries);
        assert_eq!(classification.shader_libraries, vec![1, 2]);
        assert_eq!(classification.loose, vec![3]);
        assert_eq!(classification.orphans, vec![0, 4]);
        assert!(logs_contain("another file already has this chunk id"));
    }

    #[test]
    fn media_only_mods() {
        assert!(is_media_only(&[entry("Mod/Content/WwiseAudio/Hero.bnk"), entry("Mod/Content/WwiseAudio/1234.wem")]));
        assert!(!is_media_only(&[entry("Mod/Content/WwiseAudio/Hero.bnk"), entry("Mod/Content/T.uasset")]));
        assert!(!is_media_only(&[]));
    }

    #[test]
    fn shader_ids_use_the_file_stem() {
        assert_eq!(
            shader_library_id("Mod/Content/ShaderArchive-Mod-PCD3D_SM6.ushaderbytecode"),
            modpak_iostore::chunk::ChunkId::shader_library("ShaderArchive-Mod-PCD3D_SM6")
        );
    }
}
