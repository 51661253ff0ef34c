//! Directory index of a container: the file tree mapping relative paths to TOC entries.

use std::collections::HashMap;
use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use modpak_pak::types::write_fstring;

const INVALID: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct DirectoryEntry {
    name: u32,
    first_child: u32,
    next_sibling: u32,
    first_file: u32,
}

#[derive(Debug, Clone, Copy)]
struct FileEntry {
    name: u32,
    next_file: u32,
    user_data: u32,
}

/// Builds the serialized directory index resource
///
/// Directories and files are stored as linked lists of entries referring to a shared string
/// table. Entry `0` is the unnamed root directory; a file's user data is its TOC entry index.
#[derive(Debug, Clone)]
pub struct DirectoryIndexBuilder {
    mount_point: String,
    directories: Vec<DirectoryEntry>,
    files: Vec<FileEntry>,
    strings: Vec<String>,
    string_lookup: HashMap<String, u32>,
}

impl DirectoryIndexBuilder {
    pub fn new(mount_point: impl Into<String>) -> Self {
        DirectoryIndexBuilder {
            mount_point: mount_point.into(),
            directories: vec![DirectoryEntry {
                name: INVALID,
                first_child: INVALID,
                next_sibling: INVALID,
                first_file: INVALID,
            }],
            files: Vec::new(),
            strings: Vec::new(),
            string_lookup: HashMap::new(),
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    fn string(&mut self, value: &str) -> u32 {
        if let Some(index) = self.string_lookup.get(value) {
            return *index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(value.to_string());
        self.string_lookup.insert(value.to_string(), index);
        index
    }

    fn child_directory(&mut self, parent: u32, name: &str) -> u32 {
        let name = self.string(name);

        let mut previous = INVALID;
        let mut current = self.directories[parent as usize].first_child;
        while current != INVALID {
            let entry = self.directories[current as usize];
            if entry.name == name {
                return current;
            }
            previous = current;
            current = entry.next_sibling;
        }

        let index = self.directories.len() as u32;
        self.directories.push(DirectoryEntry {
            name,
            first_child: INVALID,
            next_sibling: INVALID,
            first_file: INVALID,
        });
        match previous {
            INVALID => self.directories[parent as usize].first_child = index,
            previous => self.directories[previous as usize].next_sibling = index,
        }
        index
    }

    /// Adds a file given by its `/` separated path relative to the mount point.
    pub fn add_file(&mut self, path: &str, toc_index: u32) {
        let mut components = path.split('/').filter(|part| !part.is_empty()).collect::<Vec<_>>();
        let Some(file_name) = components.pop() else {
            return;
        };

        let directory = components
            .into_iter()
            .fold(0, |directory, name| self.child_directory(directory, name));

        let name = self.string(file_name);
        let index = self.files.len() as u32;
        self.files.push(FileEntry {
            name,
            next_file: INVALID,
            user_data: toc_index,
        });

        let mut current = self.directories[directory as usize].first_file;
        if current == INVALID {
            self.directories[directory as usize].first_file = index;
            return;
        }
        while self.files[current as usize].next_file != INVALID {
            current = self.files[current as usize].next_file;
        }
        self.files[current as usize].next_file = index;
    }

    /// Mount point, directory entries, file entries and the string table.
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        write_fstring(&mut writer, &self.mount_point)?;

        writer.write_i32::<LittleEndian>(self.directories.len() as i32)?;
        for entry in &self.directories {
            for value in [
                entry.name,
                entry.first_child,
                entry.next_sibling,
                entry.first_file,
            ] {
                writer.write_u32::<LittleEndian>(value)?;
            }
        }

        writer.write_i32::<LittleEndian>(self.files.len() as i32)?;
        for entry in &self.files {
            for value in [entry.name, entry.next_file, entry.user_data] {
                writer.write_u32::<LittleEndian>(value)?;
            }
        }

        writer.write_i32::<LittleEndian>(self.strings.len() as i32)?;
        for value in &self.strings {
            write_fstring(&mut writer, value)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::{assert_eq, assert_str_eq};

    use crate::directory_index::DirectoryIndexBuilder;

    #[test]
    fn empty_index() {
        #[rustfmt::skip]
        let expected = [
            // mount point "../../../"
            0x0A, 0x00, 0x00, 0x00,
            0x2E, 0x2E, 0x2F, 0x2E, 0x2E, 0x2F, 0x2E, 0x2E, 0x2F, 0x00,
            // root directory
            0x01, 0x00, 0x00, 0x00,
            0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
            0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
            // files
            0x00, 0x00, 0x00, 0x00,
            // strings
            0x00, 0x00, 0x00, 0x00,
        ];

        let mut out = Vec::new();
        DirectoryIndexBuilder::new("../../../").write(&mut out).unwrap();
        assert_str_eq!(format!("{:02X?}", out), format!("{:02X?}", expected));
    }

    #[test]
    fn shared_directories_are_reused() {
        #[rustfmt::skip]
        let expected = [
            // mount point ""
            0x00, 0x00, 0x00, 0x00,
            // directories: root, Game, Hero
            0x03, 0x00, 0x00, 0x00,
            0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
            0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
            0x01, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00,
            // files: a.uasset -> toc 4, b.uasset -> toc 7
            0x02, 0x00, 0x00, 0x00,
            0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
            0x03, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x07, 0x00, 0x00, 0x00,
            // strings
            0x04, 0x00, 0x00, 0x00,
            0x05, 0x00, 0x00, 0x00, 0x47, 0x61, 0x6D, 0x65, 0x00,
            0x05, 0x00, 0x00, 0x00, 0x48, 0x65, 0x72, 0x6F, 0x00,
            0x09, 0x00, 0x00, 0x00, 0x61, 0x2E, 0x75, 0x61, 0x73, 0x73, 0x65, 0x74, 0x00,
            0x09, 0x00, 0x00, 0x00, 0x62, 0x2E, 0x75, 0x61, 0x73, 0x73, 0x65, 0x74, 0x00,
        ];

        let mut builder = DirectoryIndexBuilder::new("");
        builder.add_file("Game/Hero/a.uasset", 4);
        builder.add_file("/Game/Hero/b.uasset", 7);
        assert_eq!(builder.file_count(), 2);

        let mut out = Vec::new();
        builder.write(&mut out).unwrap();
        assert_str_eq!(format!("{:02X?}", out), format!("{:02X?}", expected));
    }

    #[test]
    fn sibling_directories_are_linked() {
        let mut builder = DirectoryIndexBuilder::new("");
        builder.add_file("A/x", 0);
        builder.add_file("B/y", 1);
        builder.add_file("C/z", 2);

        let root = builder.directories[0];
        assert_eq!(root.first_child, 1);
        assert_eq!(builder.directories[1].next_sibling, 2);
        assert_eq!(builder.directories[2].next_sibling, 3);
        assert_eq!(builder.directories[3].next_sibling, u32::MAX);
    }
}
