//! Conversion of legacy packages into zen packages, the per-package format of IoStore containers.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::ids::{public_export_hash, ObjectRef, PackageId, PackageIndex, PackageObjectIndex};
use crate::legacy::{LegacyPackage, RF_PUBLIC};
use crate::names::{MappedName, NameMap};

/// Serialized size of the zen package summary
pub const SUMMARY_SIZE: usize = 52;

/// Serialized size of an [`ZenExport`]
pub const EXPORT_MAP_ENTRY_SIZE: usize = 72;

/// Serialized size of a [`BulkDataMapEntry`]
pub const BULK_DATA_MAP_ENTRY_SIZE: usize = 32;

/// Counters shared by every conversion of one build
#[derive(Debug, Default)]
pub struct ConversionReport {
    converted: AtomicUsize,
    dropped_references: AtomicUsize,
}

impl ConversionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn converted(&self) -> usize {
        self.converted.load(Ordering::Relaxed)
    }

    /// Preload dependencies left out because they did not resolve in the converted package
    pub fn dropped_references(&self) -> usize {
        self.dropped_references.load(Ordering::Relaxed)
    }
}

/// Phase of an export an entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ExportCommand {
    Create = 0,
    Serialize = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportBundleEntry {
    pub local_export_index: u32,
    pub command: ExportCommand,
}

/// Export map entry
#[derive(Debug, Clone, PartialEq)]
pub struct ZenExport {
    pub cooked_serial_offset: u64,
    pub cooked_serial_size: u64,
    pub object_name: MappedName,
    pub outer: PackageObjectIndex,
    pub class: PackageObjectIndex,
    pub super_index: PackageObjectIndex,
    pub template: PackageObjectIndex,
    pub public_export_hash: u64,
    pub object_flags: u32,
    pub filter_flags: u8,
}

/// Dependencies of one export: where its entries start and how many there are of each kind,
/// indexed by `[command of this export][command of the dependency]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DependencyBundleHeader {
    pub first_entry_index: i32,
    pub entry_count: [[u32; 2]; 2],
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkDataMapEntry {
    pub serial_offset: i64,
    pub duplicate_serial_offset: i64,
    pub serial_size: i64,
    pub flags: u32,
}

/// A converted package header
#[derive(Debug, Clone, PartialEq)]
pub struct ZenPackage {
    pub package_id: PackageId,
    pub package_name: String,
    pub name: MappedName,
    pub package_flags: u32,
    pub cooked_header_size: u32,
    pub names: NameMap,
    pub bulk_data_map: Vec<BulkDataMapEntry>,
    pub imported_public_export_hashes: Vec<u64>,
    pub imports: Vec<PackageObjectIndex>,
    pub exports: Vec<ZenExport>,
    pub export_bundle_entries: Vec<ExportBundleEntry>,
    pub dependency_bundle_headers: Vec<DependencyBundleHeader>,
    pub dependency_bundle_entries: Vec<PackageIndex>,
    pub imported_packages: Vec<String>,
}

impl ZenPackage {
    /// Ids of the packages this one imports from, as listed in the container header.
    pub fn imported_package_ids(&self) -> Vec<PackageId> {
        self.imported_packages
            .iter()
            .map(|name| PackageId::from_name(name))
            .collect()
    }

    /// Serializes the header
    ///
    /// | Section                         | Description                                         |
    /// |---------------------------------|-----------------------------------------------------|
    /// | Summary                         | 52 bytes: sizes, package name and section offsets   |
    /// | Name batch                      | Names, padded to 8 bytes                            |
    /// | Bulk data map                   | 8 byte size followed by 32 byte entries             |
    /// | Imported public export hashes   | 8 bytes each                                        |
    /// | Import map                      | 8 bytes each                                        |
    /// | Export map                      | 72 bytes each                                       |
    /// | Export bundle entries           | 8 bytes each: export index, command                 |
    /// | Dependency bundle headers       | 20 bytes each                                       |
    /// | Dependency bundle entries       | 4 bytes each: package index                         |
    /// | Imported package names          | Name batch followed by a 4 byte number per name     |
    pub fn write_header(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        self.names.write_batch(&mut body)?;
        while (SUMMARY_SIZE + body.len()) % 8 != 0 {
            body.push(0);
        }

        let bulk_data_map_size = self.bulk_data_map.len() * BULK_DATA_MAP_ENTRY_SIZE;
        body.write_i64::<LittleEndian>(bulk_data_map_size as i64)?;
        for entry in &self.bulk_data_map {
            body.write_i64::<LittleEndian>(entry.serial_offset)?;
            body.write_i64::<LittleEndian>(entry.duplicate_serial_offset)?;
            body.write_i64::<LittleEndian>(entry.serial_size)?;
            body.write_u32::<LittleEndian>(entry.flags)?;
            body.write_u32::<LittleEndian>(0)?;
        }

        let offset = |body: &Vec<u8>| (SUMMARY_SIZE + body.len()) as i32;

        let imported_public_export_hashes_offset = offset(&body);
        for hash in &self.imported_public_export_hashes {
            body.write_u64::<LittleEndian>(*hash)?;
        }

        let import_map_offset = offset(&body);
        for import in &self.imports {
            body.write_u64::<LittleEndian>(import.0)?;
        }

        let export_map_offset = offset(&body);
        for export in &self.exports {
            body.write_u64::<LittleEndian>(export.cooked_serial_offset)?;
            body.write_u64::<LittleEndian>(export.cooked_serial_size)?;
            export.object_name.write(&mut body)?;
            for index in [export.outer, export.class, export.super_index, export.template] {
                body.write_u64::<LittleEndian>(index.0)?;
            }
            body.write_u64::<LittleEndian>(export.public_export_hash)?;
            body.write_u32::<LittleEndian>(export.object_flags)?;
            body.write_u8(export.filter_flags)?;
            body.write_all(&[0; 3])?;
        }

        let export_bundle_entries_offset = offset(&body);
        for entry in &self.export_bundle_entries {
            body.write_u32::<LittleEndian>(entry.local_export_index)?;
            body.write_u32::<LittleEndian>(entry.command as u32)?;
        }

        let dependency_bundle_headers_offset = offset(&body);
        for header in &self.dependency_bundle_headers {
            body.write_i32::<LittleEndian>(header.first_entry_index)?;
            for count in header.entry_count.iter().flatten() {
                body.write_u32::<LittleEndian>(*count)?;
            }
        }

        let dependency_bundle_entries_offset = offset(&body);
        for entry in &self.dependency_bundle_entries {
            body.write_i32::<LittleEndian>(entry.0)?;
        }

        let imported_package_names_offset = offset(&body);
        NameMap::new(self.imported_packages.clone()).write_batch(&mut body)?;
        for _ in &self.imported_packages {
            body.write_i32::<LittleEndian>(0)?;
        }

        let mut header = Vec::with_capacity(SUMMARY_SIZE + body.len());
        // no versioning info
        header.write_u32::<LittleEndian>(0)?;
        header.write_u32::<LittleEndian>((SUMMARY_SIZE + body.len()) as u32)?;
        self.name.write(&mut header)?;
        header.write_u32::<LittleEndian>(self.package_flags)?;
        header.write_u32::<LittleEndian>(self.cooked_header_size)?;
        for section in [
            imported_public_export_hashes_offset,
            import_map_offset,
            export_map_offset,
            export_bundle_entries_offset,
            dependency_bundle_headers_offset,
            dependency_bundle_entries_offset,
            imported_package_names_offset,
        ] {
            header.write_i32::<LittleEndian>(section)?;
        }
        header.extend_from_slice(&body);

        Ok(header)
    }

    /// Export bundle chunk payload: the header followed by the export data of the `.uexp`.
    pub fn export_bundle(&self, export_data: &[u8]) -> Result<Vec<u8>> {
        let mut chunk = self.write_header()?;
        chunk.extend_from_slice(export_data);
        Ok(chunk)
    }
}

/// Converts legacy packages, recording dropped references in a shared [`ConversionReport`]
pub struct ZenConverter<'r> {
    report: &'r ConversionReport,
}

impl<'r> ZenConverter<'r> {
    pub fn new(report: &'r ConversionReport) -> Self {
        ZenConverter { report }
    }

    #[instrument(skip(self, package), err)]
    pub fn convert(&self, package: &LegacyPackage, package_name: &str) -> Result<ZenPackage> {
        let mut names = package.names.clone();
        let name = MappedName {
            index: names.find_or_add(package_name),
            number: 0,
        };

        let mut imported_packages: Vec<String> = Vec::new();
        let mut imported_public_export_hashes = Vec::new();
        let mut imports = Vec::with_capacity(package.imports.len());
        for index in 0..package.imports.len() {
            let path = package.import_path(index)?;
            let import = if path.package.starts_with("/Script/") {
                PackageObjectIndex::script_import(&path.full())
            } else {
                let slot = match imported_packages.iter().position(|name| *name == path.package) {
                    Some(slot) => slot,
                    None => {
                        imported_packages.push(path.package.clone());
                        imported_packages.len() - 1
                    }
                };
                if path.relative.is_empty() {
                    // the package object itself is never loaded through the import map
                    PackageObjectIndex::NULL
                } else {
                    imported_public_export_hashes.push(public_export_hash(&path.relative()));
                    PackageObjectIndex::package_import(
                        slot as u32,
                        (imported_public_export_hashes.len() - 1) as u32,
                    )
                }
            };
            imports.push(import);
        }

        let to_zen = |index: PackageIndex| -> Result<PackageObjectIndex> {
            Ok(match package.resolve_index(index)? {
                ObjectRef::Null => PackageObjectIndex::NULL,
                ObjectRef::Import(import) => imports[import],
                ObjectRef::Export(export) => PackageObjectIndex::export(export),
            })
        };

        let mut exports = Vec::with_capacity(package.exports.len());
        for (index, export) in package.exports.iter().enumerate() {
            let public_export_hash =
                if export.object_flags & RF_PUBLIC != 0 || export.generate_public_hash {
                    public_export_hash(&package.export_path(index, package_name)?.relative())
                } else {
                    0
                };
            let serial = |value: i64| {
                u64::try_from(value).map_err(|_| {
                    Error::InvalidPackage(format!("export {index} has a negative serial range"))
                })
            };

            exports.push(ZenExport {
                cooked_serial_offset: serial(export.serial_offset)?,
                cooked_serial_size: serial(export.serial_size)?,
                object_name: export.object_name.into(),
                outer: to_zen(export.outer)?,
                class: to_zen(export.class)?,
                super_index: to_zen(export.super_index)?,
                template: to_zen(export.template)?,
                public_export_hash,
                object_flags: export.object_flags,
                filter_flags: match (export.not_for_client, export.not_for_server) {
                    (true, _) => 1,
                    (false, true) => 2,
                    (false, false) => 0,
                },
            });
        }

        let export_bundle_entries = [ExportCommand::Create, ExportCommand::Serialize]
            .into_iter()
            .flat_map(|command| {
                (0..exports.len()).map(move |index| ExportBundleEntry {
                    local_export_index: index as u32,
                    command,
                })
            })
            .collect::<Vec<_>>();

        let mut dependency_bundle_headers = Vec::with_capacity(exports.len());
        let mut dependency_bundle_entries = Vec::new();
        let mut dropped = 0;
        for index in 0..package.exports.len() {
            let dependencies = package.export_dependencies(index)?;
            let mut header = DependencyBundleHeader {
                first_entry_index: dependency_bundle_entries.len() as i32,
                ..Default::default()
            };

            use ExportCommand::{Create, Serialize};
            for ((command, dependency_command), group) in [
                ((Create, Create), dependencies.create_before_create),
                ((Create, Serialize), dependencies.serialize_before_create),
                ((Serialize, Create), dependencies.create_before_serialize),
                ((Serialize, Serialize), dependencies.serialize_before_serialize),
            ] {
                for dependency in group {
                    if resolves(*dependency, &imports, exports.len()) {
                        dependency_bundle_entries.push(*dependency);
                        header.entry_count[command as usize][dependency_command as usize] += 1;
                    } else {
                        warn!(
                            package = package_name,
                            export = index,
                            dependency = dependency.0,
                            "dropping preload dependency that does not resolve"
                        );
                        self.report.dropped_references.fetch_add(1, Ordering::Relaxed);
                        dropped += 1;
                    }
                }
            }
            dependency_bundle_headers.push(header);
        }

        let bulk_data_map = package
            .data_resources
            .iter()
            .map(|resource| BulkDataMapEntry {
                serial_offset: resource.serial_offset,
                duplicate_serial_offset: resource.duplicate_serial_offset,
                serial_size: resource.serial_size,
                flags: resource.legacy_bulk_data_flags,
            })
            .collect();

        self.report.converted.fetch_add(1, Ordering::Relaxed);
        debug!(
            exports = exports.len(),
            imports = imports.len(),
            imported_packages = imported_packages.len(),
            dropped,
            "converted package"
        );

        Ok(ZenPackage {
            package_id: PackageId::from_name(package_name),
            package_name: package_name.to_string(),
            name,
            package_flags: package.summary.package_flags,
            cooked_header_size: package.summary.total_header_size as u32,
            names,
            bulk_data_map,
            imported_public_export_hashes,
            imports,
            exports,
            export_bundle_entries,
            dependency_bundle_headers,
            dependency_bundle_entries,
            imported_packages,
        })
    }
}

/// Whether a dependency points at something the converted package can load.
fn resolves(dependency: PackageIndex, imports: &[PackageObjectIndex], export_count: usize) -> bool {
    match dependency.decode() {
        ObjectRef::Null => false,
        ObjectRef::Export(export) => export < export_count,
        ObjectRef::Import(import) => imports
            .get(import)
            .is_some_and(|import| *import != PackageObjectIndex::NULL),
    }
}
