//! Package name maps and their zen "name batch" serialization.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};

use crate::cityhash::city_hash64;
use crate::error::{Error, Result};

/// Identifies the hash algorithm of a name batch
pub const NAME_HASH_VERSION: u64 = 0xC164_0000;

/// Longest name a batch header can describe, the top bit is the wide flag
pub const MAX_NAME_LEN: usize = 0x7FFF;

/// Reference into a [`NameMap`]: index plus an instance number, where zero means "no number"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NameRef {
    pub index: u32,
    pub number: u32,
}

/// Ordered table of the names used by one package
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameMap {
    names: Vec<String>,
}

impl NameMap {
    pub fn new(names: Vec<String>) -> Self {
        NameMap { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Looks up a name entry, failing for indices beyond the current table size.
    pub fn get(&self, index: i64) -> Result<&str> {
        if index < 0 || index as u64 >= self.names.len() as u64 {
            return Err(Error::IndexOutOfRange {
                table: "name",
                index,
                len: self.names.len(),
            });
        }
        Ok(&self.names[index as usize])
    }

    /// Builds a checked reference from the raw index and number stored in a package.
    pub fn reference(&self, index: i32, number: i32) -> Result<NameRef> {
        self.get(index as i64)?;
        Ok(NameRef {
            index: index as u32,
            number: number as u32,
        })
    }

    /// Display form of a reference: `Name` or `Name_{number - 1}`
    pub fn resolve(&self, name: NameRef) -> Result<String> {
        let base = self.get(name.index as i64)?;
        Ok(match name.number {
            0 => base.to_string(),
            number => format!("{base}_{}", number - 1),
        })
    }

    /// Index of `name`, appending it when it is not in the table yet.
    pub fn find_or_add(&mut self, name: &str) -> u32 {
        match self.names.iter().position(|existing| existing == name) {
            Some(index) => index as u32,
            None => {
                self.names.push(name.to_string());
                (self.names.len() - 1) as u32
            }
        }
    }

    /// Writes the table as a name batch
    ///
    /// | Field             | Description                                                 |
    /// |-------------------|-------------------------------------------------------------|
    /// | Count             | 4 bytes, nothing follows when zero                          |
    /// | String Bytes      | 4 bytes: size of the string data section                    |
    /// | Hash Version      | 8 bytes: [`NAME_HASH_VERSION`]                              |
    /// | Hashes            | 8 bytes each: CityHash64 of the lowercased name             |
    /// | Headers           | 2 bytes each, big endian: bit 15 wide flag, low bits length |
    /// | Strings           | 8 bit or UTF-16 characters, no terminators                  |
    pub fn write_batch<W: Write>(&self, mut writer: W) -> Result<()> {
        let encoded = self.names.iter().map(|name| encode(name)).collect::<Vec<_>>();
        if let Some(entry) = encoded.iter().find(|entry| entry.len > MAX_NAME_LEN) {
            return Err(Error::NameTooLong {
                len: entry.len,
                max: MAX_NAME_LEN,
            });
        }

        writer.write_u32::<LittleEndian>(self.names.len() as u32)?;
        if encoded.is_empty() {
            return Ok(());
        }

        let mut strings = Vec::new();
        for entry in &encoded {
            if entry.wide && strings.len() % 2 == 1 {
                strings.push(0);
            }
            strings.extend_from_slice(&entry.bytes);
        }

        writer.write_u32::<LittleEndian>(strings.len() as u32)?;
        writer.write_u64::<LittleEndian>(NAME_HASH_VERSION)?;
        for entry in &encoded {
            writer.write_u64::<LittleEndian>(entry.hash)?;
        }
        for entry in &encoded {
            writer.write_u8((entry.wide as u8) << 7 | (entry.len >> 8) as u8)?;
            writer.write_u8((entry.len & 0xff) as u8)?;
        }
        writer.write_all(&strings)?;
        Ok(())
    }
}

struct EncodedName {
    wide: bool,
    len: usize,
    hash: u64,
    bytes: Vec<u8>,
}

fn encode(name: &str) -> EncodedName {
    if name.is_ascii() {
        EncodedName {
            wide: false,
            len: name.len(),
            hash: city_hash64(name.to_ascii_lowercase().as_bytes()),
            bytes: name.as_bytes().to_vec(),
        }
    } else {
        let to_bytes = |value: &str| {
            value
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect::<Vec<_>>()
        };
        let bytes = to_bytes(name);
        EncodedName {
            wide: true,
            len: bytes.len() / 2,
            hash: city_hash64(&to_bytes(&name.to_lowercase())),
            bytes,
        }
    }
}

/// Name reference inside a zen package header, always into the package's own name batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappedName {
    pub index: u32,
    pub number: u32,
}

impl MappedName {
    pub const SIZE: usize = 8;

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.index)?;
        writer.write_u32::<LittleEndian>(self.number)
    }
}

impl From<NameRef> for MappedName {
    fn from(value: NameRef) -> Self {
        MappedName {
            index: value.index,
            number: value.number,
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::cityhash::city_hash64;
    use crate::error::{Error, Result};
    use crate::names::{NameMap, NameRef, MAX_NAME_LEN};

    #[test]
    fn lookups_are_bounds_checked() {
        let names = NameMap::new(vec!["None".into(), "Hero".into()]);
        assert_eq!(names.get(1).ok(), Some("Hero"));
        assert!(matches!(
            names.get(2),
            Err(Error::IndexOutOfRange {
                table: "name",
                index: 2,
                len: 2
            })
        ));
        assert!(names.get(-1).is_err());
        assert!(names.reference(5, 0).is_err());
    }

    #[test]
    fn numbered_names_resolve_with_suffix() -> Result<()> {
        let names = NameMap::new(vec!["Mesh".into()]);
        assert_eq!(names.resolve(NameRef { index: 0, number: 0 })?, "Mesh");
        assert_eq!(names.resolve(NameRef { index: 0, number: 3 })?, "Mesh_2");
        Ok(())
    }

    #[test]
    fn find_or_add_appends_once() {
        let mut names = NameMap::new(vec!["None".into()]);
        assert_eq!(names.find_or_add("/Game/Hero"), 1);
        assert_eq!(names.find_or_add("/Game/Hero"), 1);
        assert_eq!(names.find_or_add("None"), 0);
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn write_empty_batch() -> Result<()> {
        let mut actual = Vec::new();
        NameMap::default().write_batch(&mut actual)?;
        assert_eq!(actual, vec![0x00, 0x00, 0x00, 0x00]);
        Ok(())
    }

    #[test]
    fn write_ascii_batch() -> Result<()> {
        let names = NameMap::new(vec!["None".into(), "Hero".into()]);
        let mut actual = Vec::new();
        names.write_batch(&mut actual)?;

        #[rustfmt::skip]
        let mut expected = vec![
            0x02, 0x00, 0x00, 0x00,
            0x08, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x64, 0xC1, 0x00, 0x00, 0x00, 0x00,
        ];
        expected.extend_from_slice(&city_hash64(b"none").to_le_bytes());
        expected.extend_from_slice(&city_hash64(b"hero").to_le_bytes());
        #[rustfmt::skip]
        let strings = [
            0x00, 0x04,
            0x00, 0x04,
            b'N', b'o', b'n', b'e',
            b'H', b'e', b'r', b'o',
        ];
        expected.extend_from_slice(&strings);
        assert_eq!(actual, expected);
        Ok(())
    }

    #[test]
    fn overlong_names_are_rejected() -> Result<()> {
        let mut actual = Vec::new();
        NameMap::new(vec!["a".repeat(MAX_NAME_LEN)]).write_batch(&mut actual)?;
        // the longest name keeps the wide flag clear
        let headers = 4 + 4 + 8 + 8;
        assert_eq!(&actual[headers..headers + 2], &[0x7F, 0xFF]);

        let mut actual = Vec::new();
        for name in ["a".repeat(MAX_NAME_LEN + 1), "é".repeat(MAX_NAME_LEN + 1)] {
            assert!(matches!(
                NameMap::new(vec!["None".into(), name]).write_batch(&mut actual),
                Err(Error::NameTooLong {
                    len: 0x8000,
                    max: MAX_NAME_LEN
                })
            ));
        }
        assert!(actual.is_empty());
        Ok(())
    }

    #[test]
    fn wide_names_are_aligned() -> Result<()> {
        let names = NameMap::new(vec!["A".into(), "é".into()]);
        let mut actual = Vec::new();
        names.write_batch(&mut actual)?;

        // string bytes: "A", one alignment byte, then one UTF-16 unit
        assert_eq!(&actual[4..8], &[0x04, 0x00, 0x00, 0x00]);
        let headers = 4 + 4 + 8 + 2 * 8;
        assert_eq!(&actual[headers..headers + 4], &[0x00, 0x01, 0x80, 0x01]);
        assert_eq!(&actual[headers + 4..], &[b'A', 0x00, 0xE9, 0x00]);
        Ok(())
    }
}
