//! Writer for small synthetic cooked packages, used by tests here and in dependent crates.

use crate::legacy::{
    FILE_VERSION_UE4, FILE_VERSION_UE5, PACKAGE_FILE_TAG, PKG_FILTER_EDITOR_ONLY, RF_PUBLIC,
};

const RF_STANDALONE: u32 = 0x2;

/// Serialized size of one export record at the fixture's file version
const EXPORT_RECORD_SIZE: usize = 112;

#[derive(Debug, Clone, Default)]
pub struct FixtureImport {
    pub class_package: String,
    pub class_name: String,
    pub outer: i32,
    pub object_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct FixtureExport {
    pub class: i32,
    pub super_index: i32,
    pub template: i32,
    pub outer: i32,
    pub object_name: String,
    pub object_flags: u32,
    pub is_asset: bool,
    pub data: Vec<u8>,
    pub serialize_before_serialize: Vec<i32>,
    pub create_before_serialize: Vec<i32>,
    pub serialize_before_create: Vec<i32>,
    pub create_before_create: Vec<i32>,
}

/// Description of a cooked package, turned into `.uasset`/`.uexp` bytes by [`LegacyPackageFixture::build`]
#[derive(Debug, Clone, Default)]
pub struct LegacyPackageFixture {
    pub package_name: String,
    pub unversioned: bool,
    pub imports: Vec<FixtureImport>,
    pub exports: Vec<FixtureExport>,
}

#[derive(Default)]
struct Offsets {
    total_header_size: i32,
    name_count: i32,
    name_offset: i32,
    export_count: i32,
    export_offset: i32,
    import_count: i32,
    import_offset: i32,
    depends_offset: i32,
    bulk_data_start_offset: i64,
    preload_dependency_count: i32,
    preload_dependency_offset: i32,
}

fn put_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_i64(out: &mut Vec<u8>, value: i64) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_fstring(out: &mut Vec<u8>, value: &str) {
    if value.is_empty() {
        put_i32(out, 0);
        return;
    }
    put_i32(out, value.len() as i32 + 1);
    out.extend_from_slice(value.as_bytes());
    out.push(0);
}

impl LegacyPackageFixture {
    /// A texture package: one public `Texture2D` asset export with `data_len` bytes of data.
    pub fn texture(package_name: &str, data_len: usize) -> Self {
        Self::asset(package_name, "Texture2D", data_len)
    }

    /// A package with one public asset export of the engine class `class_name`.
    pub fn asset(package_name: &str, class_name: &str, data_len: usize) -> Self {
        let script_import = |class_name: &str, outer: i32, object_name: &str| FixtureImport {
            class_package: "/Script/CoreUObject".into(),
            class_name: class_name.into(),
            outer,
            object_name: object_name.into(),
        };

        LegacyPackageFixture {
            package_name: package_name.into(),
            unversioned: false,
            imports: vec![
                script_import("Package", 0, "/Script/CoreUObject"),
                script_import("Package", 0, "/Script/Engine"),
                script_import("Class", -2, class_name),
                FixtureImport {
                    class_package: "/Script/Engine".into(),
                    class_name: class_name.into(),
                    outer: -2,
                    object_name: format!("Default__{class_name}"),
                },
            ],
            exports: vec![FixtureExport {
                class: -3,
                template: -4,
                object_name: package_name.rsplit('/').next().unwrap_or(package_name).into(),
                object_flags: RF_PUBLIC | RF_STANDALONE,
                is_asset: true,
                data: (0..data_len).map(|i| (i % 251) as u8).collect(),
                serialize_before_create: vec![-4],
                create_before_create: vec![-3],
                ..FixtureExport::default()
            }],
        }
    }

    /// Adds an import of a public export of another package, returning its package index.
    pub fn import_from(&mut self, package_name: &str, class_name: &str, object_name: &str) -> i32 {
        self.imports.push(FixtureImport {
            class_package: "/Script/CoreUObject".into(),
            class_name: "Package".into(),
            outer: 0,
            object_name: package_name.into(),
        });
        let outer = -(self.imports.len() as i32);
        self.imports.push(FixtureImport {
            class_package: "/Script/Engine".into(),
            class_name: class_name.into(),
            outer,
            object_name: object_name.into(),
        });
        -(self.imports.len() as i32)
    }

    /// Returns the `.uasset` and `.uexp` bytes.
    pub fn build(&self) -> (Vec<u8>, Vec<u8>) {
        let mut names: Vec<String> = Vec::new();
        let mut name = |value: &str| -> i32 {
            match names.iter().position(|existing| existing == value) {
                Some(index) => index as i32,
                None => {
                    names.push(value.to_string());
                    names.len() as i32 - 1
                }
            }
        };

        name("None");
        name(&self.package_name);
        let imports = self
            .imports
            .iter()
            .map(|import| {
                (
                    name(&import.class_package),
                    name(&import.class_name),
                    name(&import.object_name),
                )
            })
            .collect::<Vec<_>>();
        let export_names = self
            .exports
            .iter()
            .map(|export| name(&export.object_name))
            .collect::<Vec<_>>();

        let mut name_map = Vec::new();
        for value in &names {
            put_fstring(&mut name_map, value);
            put_u32(&mut name_map, 0);
        }

        let mut import_map = Vec::new();
        for (import, (class_package, class_name, object_name)) in self.imports.iter().zip(imports) {
            for index in [class_package, class_name] {
                put_i32(&mut import_map, index);
                put_i32(&mut import_map, 0);
            }
            put_i32(&mut import_map, import.outer);
            put_i32(&mut import_map, object_name);
            put_i32(&mut import_map, 0);
            // optional import
            put_u32(&mut import_map, 0);
        }

        let mut preload = Vec::new();
        let mut first_dependencies = Vec::new();
        for export in &self.exports {
            let groups = [
                &export.serialize_before_serialize,
                &export.create_before_serialize,
                &export.serialize_before_create,
                &export.create_before_create,
            ];
            let total = groups.iter().map(|group| group.len()).sum::<usize>();
            first_dependencies.push(match total {
                0 => -1,
                _ => (preload.len() / 4) as i32,
            });
            for dependency in groups.into_iter().flatten() {
                put_i32(&mut preload, *dependency);
            }
        }

        let mut depends = Vec::new();
        for _ in &self.exports {
            put_i32(&mut depends, 0);
        }

        let summary_size = self.summary(&Offsets::default()).len();
        let name_offset = summary_size;
        let import_offset = name_offset + name_map.len();
        let export_offset = import_offset + import_map.len();
        let depends_offset = export_offset + self.exports.len() * EXPORT_RECORD_SIZE;
        let preload_offset = depends_offset + depends.len();
        let total_header_size = preload_offset + preload.len();

        let mut export_map = Vec::new();
        let mut serial_offset = total_header_size as i64;
        for ((export, object_name), first_dependency) in self
            .exports
            .iter()
            .zip(export_names)
            .zip(first_dependencies)
        {
            for index in [export.class, export.super_index, export.template, export.outer] {
                put_i32(&mut export_map, index);
            }
            put_i32(&mut export_map, object_name);
            put_i32(&mut export_map, 0);
            put_u32(&mut export_map, export.object_flags);
            put_i64(&mut export_map, export.data.len() as i64);
            put_i64(&mut export_map, serial_offset);
            // forced export, not for client, not for server, inherited instance
            for _ in 0..4 {
                put_u32(&mut export_map, 0);
            }
            put_u32(&mut export_map, 0);
            put_u32(&mut export_map, 0);
            put_u32(&mut export_map, export.is_asset as u32);
            put_u32(&mut export_map, 0);
            put_i32(&mut export_map, first_dependency);
            for group in [
                &export.serialize_before_serialize,
                &export.create_before_serialize,
                &export.serialize_before_create,
                &export.create_before_create,
            ] {
                put_i32(&mut export_map, group.len() as i32);
            }
            put_i64(&mut export_map, 0);
            put_i64(&mut export_map, 0);
            serial_offset += export.data.len() as i64;
        }

        let summary = self.summary(&Offsets {
            total_header_size: total_header_size as i32,
            name_count: names.len() as i32,
            name_offset: name_offset as i32,
            export_count: self.exports.len() as i32,
            export_offset: export_offset as i32,
            import_count: self.imports.len() as i32,
            import_offset: import_offset as i32,
            depends_offset: depends_offset as i32,
            bulk_data_start_offset: serial_offset,
            preload_dependency_count: (preload.len() / 4) as i32,
            preload_dependency_offset: preload_offset as i32,
        });

        let mut uasset = summary;
        for section in [name_map, import_map, export_map, depends, preload] {
            uasset.extend_from_slice(&section);
        }

        let mut uexp = self
            .exports
            .iter()
            .flat_map(|export| export.data.iter().copied())
            .collect::<Vec<_>>();
        put_u32(&mut uexp, PACKAGE_FILE_TAG);

        (uasset, uexp)
    }

    fn summary(&self, offsets: &Offsets) -> Vec<u8> {
        let mut out = Vec::new();
        put_u32(&mut out, PACKAGE_FILE_TAG);
        put_i32(&mut out, -8);
        put_i32(&mut out, 864);
        match self.unversioned {
            true => out.extend_from_slice(&[0; 12]),
            false => {
                put_i32(&mut out, FILE_VERSION_UE4);
                put_i32(&mut out, FILE_VERSION_UE5);
                put_i32(&mut out, 0);
            }
        }
        // custom versions
        put_i32(&mut out, 0);
        put_i32(&mut out, offsets.total_header_size);
        put_fstring(&mut out, &self.package_name);
        put_u32(&mut out, PKG_FILTER_EDITOR_ONLY);
        put_i32(&mut out, offsets.name_count);
        put_i32(&mut out, offsets.name_offset);
        // soft object paths, gatherable text
        out.extend_from_slice(&[0; 16]);
        put_i32(&mut out, offsets.export_count);
        put_i32(&mut out, offsets.export_offset);
        put_i32(&mut out, offsets.import_count);
        put_i32(&mut out, offsets.import_offset);
        put_i32(&mut out, offsets.depends_offset);
        // soft package references, searchable names, thumbnails
        out.extend_from_slice(&[0; 16]);
        // guid
        out.extend_from_slice(&[0; 16]);
        // one generation
        put_i32(&mut out, 1);
        put_i32(&mut out, offsets.export_count);
        put_i32(&mut out, offsets.name_count);
        for _ in 0..2 {
            for part in [5u16, 3, 0] {
                out.extend_from_slice(&part.to_le_bytes());
            }
            put_u32(&mut out, 0);
            put_fstring(&mut out, "");
        }
        // compression flags, compressed chunks, package source, additional packages
        out.extend_from_slice(&[0; 16]);
        // asset registry
        put_i32(&mut out, 0);
        put_i64(&mut out, offsets.bulk_data_start_offset);
        // world tile info, chunk ids
        out.extend_from_slice(&[0; 8]);
        put_i32(&mut out, offsets.preload_dependency_count);
        put_i32(&mut out, offsets.preload_dependency_offset);
        put_i32(&mut out, offsets.name_count);
        // payload toc
        put_i64(&mut out, 0);
        // data resources
        put_i32(&mut out, 0);
        out
    }
}
