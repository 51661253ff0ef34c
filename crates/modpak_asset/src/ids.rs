//! Identifiers shared between legacy and zen packages.

use std::fmt;

use crate::cityhash::city_hash64_lower_utf16;

/// Identifies a package inside a container, derived from its long package name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageId(pub u64);

impl PackageId {
    /// Hash of the lowercased package name, e.g. `/Game/Hero/Hero_Body`
    pub fn from_name(name: &str) -> Self {
        PackageId(city_hash64_lower_utf16(name))
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// Reference into a legacy package's import or export table
///
/// Zero is null, positive values are `export + 1` and negative values are `-(import + 1)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PackageIndex(pub i32);

/// Decoded form of a [`PackageIndex`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRef {
    Null,
    Import(usize),
    Export(usize),
}

impl PackageIndex {
    pub const NULL: PackageIndex = PackageIndex(0);

    pub fn from_import(index: usize) -> Self {
        PackageIndex(-(index as i32) - 1)
    }

    pub fn from_export(index: usize) -> Self {
        PackageIndex(index as i32 + 1)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn decode(self) -> ObjectRef {
        match self.0 {
            0 => ObjectRef::Null,
            i if i > 0 => ObjectRef::Export((i - 1) as usize),
            // widen first so i32::MIN cannot overflow
            i => ObjectRef::Import((-(i as i64) - 1) as usize),
        }
    }
}

const INDEX_BITS: u32 = 62;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;

/// Object reference used by zen packages: a 2-bit kind and a 62-bit payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackageObjectIndex(pub u64);

/// Kind stored in the top two bits of a [`PackageObjectIndex`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageObjectKind {
    Export = 0,
    ScriptImport = 1,
    PackageImport = 2,
    Null = 3,
}

impl PackageObjectIndex {
    pub const NULL: PackageObjectIndex = PackageObjectIndex(u64::MAX);

    pub fn export(index: usize) -> Self {
        PackageObjectIndex(index as u64)
    }

    /// Import of a compiled-in object, identified by the hash of its path
    pub fn script_import(object_path: &str) -> Self {
        PackageObjectIndex(
            (PackageObjectKind::ScriptImport as u64) << INDEX_BITS
                | import_hash_from_object_path(object_path),
        )
    }

    /// Import of a public export of another package
    pub fn package_import(imported_package: u32, public_export_hash: u32) -> Self {
        PackageObjectIndex(
            (PackageObjectKind::PackageImport as u64) << INDEX_BITS
                | (imported_package as u64) << 32
                | public_export_hash as u64,
        )
    }

    pub fn kind(self) -> PackageObjectKind {
        match self.0 >> INDEX_BITS {
            0 => PackageObjectKind::Export,
            1 => PackageObjectKind::ScriptImport,
            2 => PackageObjectKind::PackageImport,
            _ => PackageObjectKind::Null,
        }
    }

    pub fn value(self) -> u64 {
        self.0 & INDEX_MASK
    }
}

/// Hash of an object path with `.` and `:` normalised to `/`, masked to 62 bits
pub fn import_hash_from_object_path(object_path: &str) -> u64 {
    let normalised = object_path.replace(['.', ':'], "/");
    city_hash64_lower_utf16(&normalised) & INDEX_MASK
}

/// Hash identifying a public export relative to its package, e.g. `/hero_body`
pub fn public_export_hash(package_relative_path: &str) -> u64 {
    city_hash64_lower_utf16(&package_relative_path.replace(['.', ':'], "/"))
}
