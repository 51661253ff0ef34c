//! Legacy cooked packages: a `.uasset` header followed by a `.uexp` holding the export data.

use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::ids::{ObjectRef, PackageIndex};
use crate::names::{NameMap, NameRef};
use crate::read::PackageReader;

/// Magic at the start of every `.uasset` and at the end of every `.uexp`
pub const PACKAGE_FILE_TAG: u32 = 0x9E2A_83C1;

/// Package flag set on cooked packages without editor only data
pub const PKG_FILTER_EDITOR_ONLY: u32 = 0x8000_0000;

/// Object flag marking exports that other packages may import
pub const RF_PUBLIC: u32 = 0x1;

/// UE4 file version of every package this crate understands
pub const FILE_VERSION_UE4: i32 = 522;

/// UE5 file version assumed for unversioned packages
pub const FILE_VERSION_UE5: i32 = 1010;

mod ue5_version {
    pub const INITIAL_VERSION: i32 = 1000;
    pub const NAMES_REFERENCED_FROM_EXPORT_DATA: i32 = 1001;
    pub const PAYLOAD_TOC: i32 = 1002;
    pub const OPTIONAL_RESOURCES: i32 = 1003;
    pub const REMOVE_OBJECT_EXPORT_PACKAGE_GUID: i32 = 1005;
    pub const TRACK_OBJECT_EXPORT_IS_INHERITED: i32 = 1006;
    pub const ADD_SOFTOBJECTPATH_LIST: i32 = 1008;
    pub const DATA_RESOURCES: i32 = 1009;
    pub const SCRIPT_SERIALIZATION_OFFSET: i32 = 1010;
    pub const LATEST: i32 = 1012;
}

/// The fields of the package summary needed for conversion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageSummary {
    pub legacy_file_version: i32,
    pub file_version_ue4: i32,
    pub file_version_ue5: i32,
    pub unversioned: bool,
    pub total_header_size: i32,
    pub package_name: String,
    pub package_flags: u32,
    pub name_count: i32,
    pub name_offset: i32,
    pub export_count: i32,
    pub export_offset: i32,
    pub import_count: i32,
    pub import_offset: i32,
    pub bulk_data_start_offset: i64,
    pub preload_dependency_count: i32,
    pub preload_dependency_offset: i32,
    pub names_referenced_from_export_data_count: i32,
    pub data_resource_offset: i32,
}

impl PackageSummary {
    pub fn filter_editor_only(&self) -> bool {
        self.package_flags & PKG_FILTER_EDITOR_ONLY != 0
    }

    fn read(reader: &mut PackageReader) -> Result<Self> {
        let tag = reader.u32("package tag")?;
        if tag != PACKAGE_FILE_TAG {
            return Err(Error::InvalidPackage(format!(
                "package tag {tag:#010X} does not match {PACKAGE_FILE_TAG:#010X}"
            )));
        }

        let mut summary = PackageSummary {
            legacy_file_version: reader.i32("legacy file version")?,
            ..Default::default()
        };
        if !(-8..=-7).contains(&summary.legacy_file_version) {
            return Err(Error::InvalidPackage(format!(
                "legacy file version {} is not supported",
                summary.legacy_file_version
            )));
        }

        reader.i32("legacy UE3 version")?;
        summary.file_version_ue4 = reader.i32("UE4 file version")?;
        if summary.legacy_file_version <= -8 {
            summary.file_version_ue5 = reader.i32("UE5 file version")?;
        }
        let licensee = reader.i32("licensee version")?;

        let custom_versions = reader.count("custom version count", 20)?;
        reader.skip(custom_versions * 20, "custom versions")?;

        summary.unversioned =
            summary.file_version_ue4 == 0 && summary.file_version_ue5 == 0 && licensee == 0;
        if summary.unversioned {
            summary.file_version_ue4 = FILE_VERSION_UE4;
            summary.file_version_ue5 = if summary.legacy_file_version <= -8 {
                FILE_VERSION_UE5
            } else {
                0
            };
        }
        let ue5_supported = summary.file_version_ue5 == 0
            || (ue5_version::INITIAL_VERSION..=ue5_version::LATEST)
                .contains(&summary.file_version_ue5);
        if summary.file_version_ue4 != FILE_VERSION_UE4 || !ue5_supported {
            return Err(Error::UnsupportedVersion {
                ue4: summary.file_version_ue4,
                ue5: summary.file_version_ue5,
            });
        }
        let ue5 = summary.file_version_ue5;

        summary.total_header_size = reader.i32("total header size")?;
        summary.package_name = reader.fstring("package name")?;
        summary.package_flags = reader.u32("package flags")?;
        summary.name_count = reader.i32("name count")?;
        summary.name_offset = reader.i32("name offset")?;
        if ue5 >= ue5_version::ADD_SOFTOBJECTPATH_LIST {
            reader.i32("soft object path count")?;
            reader.i32("soft object path offset")?;
        }
        if !summary.filter_editor_only() {
            reader.fstring("localization id")?;
        }
        reader.i32("gatherable text count")?;
        reader.i32("gatherable text offset")?;
        summary.export_count = reader.i32("export count")?;
        summary.export_offset = reader.i32("export offset")?;
        summary.import_count = reader.i32("import count")?;
        summary.import_offset = reader.i32("import offset")?;
        reader.i32("depends offset")?;
        reader.i32("soft package reference count")?;
        reader.i32("soft package reference offset")?;
        reader.i32("searchable names offset")?;
        reader.i32("thumbnail table offset")?;
        reader.guid("package guid")?;
        if !summary.filter_editor_only() {
            reader.guid("persistent guid")?;
        }

        let generations = reader.count("generation count", 8)?;
        reader.skip(generations * 8, "generations")?;
        for what in ["saved by engine version", "compatible engine version"] {
            reader.skip(3 * 2 + 4, what)?;
            reader.fstring(what)?;
        }

        reader.u32("compression flags")?;
        let compressed_chunks = reader.i32("compressed chunk count")?;
        if compressed_chunks != 0 {
            return Err(Error::InvalidPackage(
                "packages with compressed chunks are not supported".into(),
            ));
        }
        reader.u32("package source")?;
        let additional_packages = reader.count("additional packages to cook", 4)?;
        for _ in 0..additional_packages {
            reader.fstring("additional package to cook")?;
        }
        if summary.legacy_file_version > -7 {
            reader.i32("texture allocations")?;
        }
        reader.i32("asset registry offset")?;
        summary.bulk_data_start_offset = reader.i64("bulk data start offset")?;
        reader.i32("world tile info offset")?;
        let chunk_ids = reader.count("chunk id count", 4)?;
        reader.skip(chunk_ids * 4, "chunk ids")?;
        summary.preload_dependency_count = reader.i32("preload dependency count")?;
        summary.preload_dependency_offset = reader.i32("preload dependency offset")?;
        if ue5 >= ue5_version::NAMES_REFERENCED_FROM_EXPORT_DATA {
            summary.names_referenced_from_export_data_count =
                reader.i32("names referenced from export data")?;
        }
        if ue5 >= ue5_version::PAYLOAD_TOC {
            reader.i64("payload toc offset")?;
        }
        if ue5 >= ue5_version::DATA_RESOURCES {
            summary.data_resource_offset = reader.i32("data resource offset")?;
        }

        if summary.total_header_size < 0 || summary.total_header_size as usize > reader.len() {
            return Err(Error::InvalidPackage(format!(
                "header size {} does not match the {} byte package",
                summary.total_header_size,
                reader.len()
            )));
        }

        Ok(summary)
    }
}

/// An object referenced from another package
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectImport {
    pub class_package: NameRef,
    pub class_name: NameRef,
    pub outer: PackageIndex,
    pub object_name: NameRef,
    pub package_name: Option<NameRef>,
    pub import_optional: bool,
}

/// Number of preload dependencies of each kind, stored consecutively in this order
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DependencyCounts {
    pub serialize_before_serialize: i32,
    pub create_before_serialize: i32,
    pub serialize_before_create: i32,
    pub create_before_create: i32,
}

impl DependencyCounts {
    fn total(&self) -> Option<usize> {
        let counts = [
            self.serialize_before_serialize,
            self.create_before_serialize,
            self.serialize_before_create,
            self.create_before_create,
        ];
        counts
            .iter()
            .try_fold(0usize, |sum, count| Some(sum + usize::try_from(*count).ok()?))
    }
}

/// An object stored in this package
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectExport {
    pub class: PackageIndex,
    pub super_index: PackageIndex,
    pub template: PackageIndex,
    pub outer: PackageIndex,
    pub object_name: NameRef,
    pub object_flags: u32,
    pub serial_size: i64,
    pub serial_offset: i64,
    pub forced_export: bool,
    pub not_for_client: bool,
    pub not_for_server: bool,
    pub is_inherited_instance: bool,
    pub package_flags: u32,
    pub not_always_loaded_for_editor_game: bool,
    pub is_asset: bool,
    pub generate_public_hash: bool,
    pub first_export_dependency: i32,
    pub dependency_counts: DependencyCounts,
}

/// Preload dependencies of one export, grouped by kind
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExportDependencies<'a> {
    pub serialize_before_serialize: &'a [PackageIndex],
    pub create_before_serialize: &'a [PackageIndex],
    pub serialize_before_create: &'a [PackageIndex],
    pub create_before_create: &'a [PackageIndex],
}

/// Bulk data payload description stored in the header of newer packages
#[derive(Debug, Clone, PartialEq)]
pub struct DataResource {
    pub flags: u32,
    pub serial_offset: i64,
    pub duplicate_serial_offset: i64,
    pub serial_size: i64,
    pub raw_size: i64,
    pub outer: PackageIndex,
    pub legacy_bulk_data_flags: u32,
}

/// Path of an object: the package it lives in and the names below it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPath {
    pub package: String,
    pub relative: Vec<String>,
}

impl ObjectPath {
    /// `/Script/Engine.Texture2D` style path
    pub fn full(&self) -> String {
        let mut path = self.package.clone();
        for (depth, name) in self.relative.iter().enumerate() {
            path.push(if depth == 0 { '.' } else { ':' });
            path.push_str(name);
        }
        path
    }

    /// Path below the package, `/Texture2D` style, the form public export hashes use
    pub fn relative(&self) -> String {
        self.relative
            .iter()
            .fold(String::new(), |path, name| path + "/" + name)
    }
}

/// A parsed `.uasset` header
///
/// Cross references between the tables are kept as indices. They are validated while parsing and
/// again by every accessor, so a damaged package produces an [`Error::IndexOutOfRange`] rather
/// than a panic.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyPackage {
    pub summary: PackageSummary,
    pub names: NameMap,
    pub imports: Vec<ObjectImport>,
    pub exports: Vec<ObjectExport>,
    pub preload_dependencies: Vec<PackageIndex>,
    pub data_resources: Vec<DataResource>,
}

impl LegacyPackage {
    /// Parses the header of a cooked package.
    #[instrument(skip_all, err, fields(size = data.len()))]
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = PackageReader::new(data);
        let summary = PackageSummary::read(&mut reader)?;
        let ue5 = summary.file_version_ue5;

        reader.seek(summary.name_offset as i64, "name map")?;
        let name_count = reader.check_count(summary.name_count, "name count", 8)?;
        let mut names = Vec::with_capacity(name_count);
        for _ in 0..name_count {
            names.push(reader.fstring("name")?);
            // case preserving and non case preserving hashes
            reader.u16("name hash")?;
            reader.u16("name hash")?;
        }
        let names = NameMap::new(names);

        let read_name = |reader: &mut PackageReader, what: &'static str| -> Result<NameRef> {
            let index = reader.i32(what)?;
            let number = reader.i32(what)?;
            names.reference(index, number)
        };

        reader.seek(summary.import_offset as i64, "import map")?;
        let import_count = reader.check_count(summary.import_count, "import count", 28)?;
        let mut imports = Vec::with_capacity(import_count);
        for _ in 0..import_count {
            imports.push(ObjectImport {
                class_package: read_name(&mut reader, "import class package")?,
                class_name: read_name(&mut reader, "import class name")?,
                outer: PackageIndex(reader.i32("import outer")?),
                object_name: read_name(&mut reader, "import object name")?,
                package_name: match summary.filter_editor_only() {
                    true => None,
                    false => Some(read_name(&mut reader, "import package name")?),
                },
                import_optional: ue5 >= ue5_version::OPTIONAL_RESOURCES
                    && reader.bool32("import optional")?,
            });
        }

        reader.seek(summary.export_offset as i64, "export map")?;
        let export_count = reader.check_count(summary.export_count, "export count", 72)?;
        let mut exports = Vec::with_capacity(export_count);
        for _ in 0..export_count {
            let class = PackageIndex(reader.i32("export class")?);
            let super_index = PackageIndex(reader.i32("export super")?);
            let template = PackageIndex(reader.i32("export template")?);
            let outer = PackageIndex(reader.i32("export outer")?);
            let object_name = read_name(&mut reader, "export object name")?;
            let object_flags = reader.u32("export object flags")?;
            let serial_size = reader.i64("export serial size")?;
            let serial_offset = reader.i64("export serial offset")?;
            let forced_export = reader.bool32("forced export")?;
            let not_for_client = reader.bool32("not for client")?;
            let not_for_server = reader.bool32("not for server")?;
            if ue5 < ue5_version::REMOVE_OBJECT_EXPORT_PACKAGE_GUID {
                reader.guid("export package guid")?;
            }
            let is_inherited_instance = ue5 >= ue5_version::TRACK_OBJECT_EXPORT_IS_INHERITED
                && reader.bool32("inherited instance")?;
            let package_flags = reader.u32("export package flags")?;
            let not_always_loaded_for_editor_game = reader.bool32("not always loaded")?;
            let is_asset = reader.bool32("is asset")?;
            let generate_public_hash =
                ue5 >= ue5_version::OPTIONAL_RESOURCES && reader.bool32("generate public hash")?;
            let first_export_dependency = reader.i32("first export dependency")?;
            let dependency_counts = DependencyCounts {
                serialize_before_serialize: reader.i32("dependency count")?,
                create_before_serialize: reader.i32("dependency count")?,
                serialize_before_create: reader.i32("dependency count")?,
                create_before_create: reader.i32("dependency count")?,
            };
            if ue5 >= ue5_version::SCRIPT_SERIALIZATION_OFFSET {
                reader.i64("script serialization start")?;
                reader.i64("script serialization end")?;
            }

            exports.push(ObjectExport {
                class,
                super_index,
                template,
                outer,
                object_name,
                object_flags,
                serial_size,
                serial_offset,
                forced_export,
                not_for_client,
                not_for_server,
                is_inherited_instance,
                package_flags,
                not_always_loaded_for_editor_game,
                is_asset,
                generate_public_hash,
                first_export_dependency,
                dependency_counts,
            });
        }

        let mut preload_dependencies = Vec::new();
        // -1 marks packages saved without preload dependencies
        if summary.preload_dependency_count > 0 {
            reader.seek(
                summary.preload_dependency_offset as i64,
                "preload dependencies",
            )?;
            let count = reader.check_count(
                summary.preload_dependency_count,
                "preload dependency count",
                4,
            )?;
            for _ in 0..count {
                preload_dependencies.push(PackageIndex(reader.i32("preload dependency")?));
            }
        } else if summary.preload_dependency_count < -1 {
            return Err(Error::InvalidPackage(format!(
                "preload dependency count {} is negative",
                summary.preload_dependency_count
            )));
        }

        let mut data_resources = Vec::new();
        if summary.data_resource_offset > 0 {
            reader.seek(summary.data_resource_offset as i64, "data resources")?;
            let version = reader.u32("data resource version")?;
            if version != 1 {
                return Err(Error::InvalidPackage(format!(
                    "data resource version {version} is not supported"
                )));
            }
            let count = reader.count("data resource count", 44)?;
            for _ in 0..count {
                data_resources.push(DataResource {
                    flags: reader.u32("data resource flags")?,
                    serial_offset: reader.i64("data resource offset")?,
                    duplicate_serial_offset: reader.i64("data resource duplicate offset")?,
                    serial_size: reader.i64("data resource size")?,
                    raw_size: reader.i64("data resource raw size")?,
                    outer: PackageIndex(reader.i32("data resource outer")?),
                    legacy_bulk_data_flags: reader.u32("data resource bulk data flags")?,
                });
            }
        }

        let package = LegacyPackage {
            summary,
            names,
            imports,
            exports,
            preload_dependencies,
            data_resources,
        };
        package.validate()?;

        debug!(
            name = package.summary.package_name.as_str(),
            names = package.names.len(),
            imports = package.imports.len(),
            exports = package.exports.len(),
            "parsed legacy package"
        );
        Ok(package)
    }

    fn validate(&self) -> Result<()> {
        for import in &self.imports {
            self.resolve_index(import.outer)?;
        }
        for (index, export) in self.exports.iter().enumerate() {
            for reference in [
                export.class,
                export.super_index,
                export.template,
                export.outer,
            ] {
                self.resolve_index(reference)?;
            }
            self.export_dependencies(index)?;
        }
        for dependency in &self.preload_dependencies {
            self.resolve_index(*dependency)?;
        }
        for resource in &self.data_resources {
            self.resolve_index(resource.outer)?;
        }
        Ok(())
    }

    pub fn import(&self, index: usize) -> Result<&ObjectImport> {
        self.imports.get(index).ok_or(Error::IndexOutOfRange {
            table: "import",
            index: index as i64,
            len: self.imports.len(),
        })
    }

    pub fn export(&self, index: usize) -> Result<&ObjectExport> {
        self.exports.get(index).ok_or(Error::IndexOutOfRange {
            table: "export",
            index: index as i64,
            len: self.exports.len(),
        })
    }

    /// Decodes a package index, checking it against the current table sizes.
    pub fn resolve_index(&self, index: PackageIndex) -> Result<ObjectRef> {
        let reference = index.decode();
        match reference {
            ObjectRef::Null => {}
            ObjectRef::Import(import) => {
                self.import(import)?;
            }
            ObjectRef::Export(export) => {
                self.export(export)?;
            }
        }
        Ok(reference)
    }

    /// Name of the object a package index points at, `None` for null references.
    pub fn object_name(&self, index: PackageIndex) -> Result<Option<String>> {
        let name = match self.resolve_index(index)? {
            ObjectRef::Null => return Ok(None),
            ObjectRef::Import(import) => self.import(import)?.object_name,
            ObjectRef::Export(export) => self.export(export)?.object_name,
        };
        self.names.resolve(name).map(Some)
    }

    /// Walks the outer chain of an import up to the package that contains it.
    pub fn import_path(&self, index: usize) -> Result<ObjectPath> {
        let mut relative = Vec::new();
        let mut current = index;
        // a chain can never be longer than the table it lives in
        for _ in 0..=self.imports.len() {
            let import = self.import(current)?;
            let name = self.names.resolve(import.object_name)?;
            match self.resolve_index(import.outer)? {
                ObjectRef::Null => {
                    relative.reverse();
                    return Ok(ObjectPath {
                        package: name,
                        relative,
                    });
                }
                ObjectRef::Import(outer) => {
                    relative.push(name);
                    current = outer;
                }
                ObjectRef::Export(_) => {
                    return Err(Error::InvalidPackage(format!(
                        "import {index} is nested in an export"
                    )));
                }
            }
        }
        Err(Error::InvalidPackage(format!(
            "outer chain of import {index} is cyclic"
        )))
    }

    /// Walks the outer chain of an export up to this package.
    pub fn export_path(&self, index: usize, package_name: &str) -> Result<ObjectPath> {
        let mut relative = Vec::new();
        let mut current = index;
        for _ in 0..=self.exports.len() {
            let export = self.export(current)?;
            relative.push(self.names.resolve(export.object_name)?);
            match self.resolve_index(export.outer)? {
                ObjectRef::Null => {
                    relative.reverse();
                    return Ok(ObjectPath {
                        package: package_name.to_string(),
                        relative,
                    });
                }
                ObjectRef::Export(outer) => current = outer,
                ObjectRef::Import(_) => {
                    return Err(Error::InvalidPackage(format!(
                        "export {index} is nested in an import"
                    )));
                }
            }
        }
        Err(Error::InvalidPackage(format!(
            "outer chain of export {index} is cyclic"
        )))
    }

    /// Preload dependencies of one export, checked against the dependency array.
    pub fn export_dependencies(&self, index: usize) -> Result<ExportDependencies<'_>> {
        let export = self.export(index)?;
        let counts = export.dependency_counts;
        let total = counts.total().ok_or_else(|| {
            Error::InvalidPackage(format!("export {index} has a negative dependency count"))
        })?;
        if total == 0 {
            return Ok(ExportDependencies::default());
        }

        let first = export.first_export_dependency;
        let len = self.preload_dependencies.len();
        if first < 0 || first as usize + total > len {
            return Err(Error::IndexOutOfRange {
                table: "preload dependency",
                index: first as i64 + total as i64 - 1,
                len,
            });
        }

        let all = &self.preload_dependencies[first as usize..first as usize + total];
        let (serialize_before_serialize, rest) =
            all.split_at(counts.serialize_before_serialize as usize);
        let (create_before_serialize, rest) = rest.split_at(counts.create_before_serialize as usize);
        let (serialize_before_create, create_before_create) =
            rest.split_at(counts.serialize_before_create as usize);
        Ok(ExportDependencies {
            serialize_before_serialize,
            create_before_serialize,
            serialize_before_create,
            create_before_create,
        })
    }

    /// The export data in a `.uexp`, checked against the serial ranges of every export.
    pub fn export_data<'d>(&self, uexp: &'d [u8]) -> Result<&'d [u8]> {
        let body = match uexp.len().checked_sub(4) {
            Some(end) if uexp[end..] == PACKAGE_FILE_TAG.to_le_bytes() => &uexp[..end],
            _ => uexp,
        };

        let header_size = self.summary.total_header_size as i64;
        for (index, export) in self.exports.iter().enumerate() {
            let start = export.serial_offset.checked_sub(header_size);
            let end = start.and_then(|start| start.checked_add(export.serial_size));
            match (start, end) {
                (Some(start), Some(end))
                    if start >= 0 && export.serial_size >= 0 && end <= body.len() as i64 => {}
                _ => {
                    return Err(Error::IndexOutOfRange {
                        table: "export data",
                        index: export.serial_offset.saturating_add(export.serial_size),
                        len: header_size as usize + body.len(),
                    })
                }
            }
            debug!(
                index,
                offset = export.serial_offset,
                size = export.serial_size,
                "export data range"
            );
        }
        Ok(body)
    }

    /// Class name of the main asset of the package, e.g. `Texture2D`.
    pub fn asset_class(&self) -> Result<Option<String>> {
        match self.exports.iter().find(|export| export.is_asset) {
            Some(export) => self.object_name(export.class),
            None => Ok(None),
        }
    }
}
