//! Types for writing PAK archives
//!

use binrw::BinWrite;
use bon::Builder;
use byteorder::{LittleEndian, WriteBytesExt};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::io::{self, Seek, Write};
use tracing::{debug, instrument, Level};

use crate::error::{Error, Result};
use crate::hash::path_hash;
use crate::types::{write_fstring, PakEntryHeader, PakFooter, PAK_VERSION};

/// Options for how the PAK file should be written
#[derive(Debug, Clone, Builder)]
pub struct PakWriterOptions {
    /// Mount point stored in the index, relative to the engine binaries
    #[builder(into, default = String::from("../../../"))]
    pub mount_point: String,

    /// Seed mixed into every path hash
    #[builder(default)]
    pub path_hash_seed: u64,
}

/// PAK archive generator
///
/// Entries are always stored raw.
///
/// ```
/// # fn doit() -> modpak_pak::error::Result<()>
/// # {
/// use std::io::Write;
/// use modpak_pak::{PakWriter, PakWriterOptions};
///
/// let mut pak = PakWriter::new(std::io::Cursor::new(Vec::new()), PakWriterOptions::builder().build());
///
/// pak.start_file("chunknames")?;
/// pak.write_all(b"Game/Content/Hero.uasset")?;
///
/// let output = pak.finish()?;
/// assert!(!output.get_ref().is_empty());
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
pub struct PakWriter<W: Write + Seek> {
    inner: W,
    options: PakWriterOptions,
    current: Option<(String, Vec<u8>)>,
    entries: Vec<(String, PakEntryHeader)>,
}

impl<W: Write + Seek> PakWriter<W> {
    /// Initializes the archive.
    pub fn new(inner: W, options: PakWriterOptions) -> PakWriter<W> {
        PakWriter {
            inner,
            options,
            current: None,
            entries: Vec::new(),
        }
    }

    /// Returns true if an entry is currently open for writing.
    pub const fn is_writing_file(&self) -> bool {
        self.current.is_some()
    }

    /// Start a new entry, finishing the previous one.
    #[instrument(skip(self, name), err)]
    pub fn start_file(&mut self, name: impl ToString) -> Result<()> {
        if self.current.is_some() {
            self.finish_file()?;
        }

        let name = name.to_string();
        if self.entries.iter().any(|(existing, _)| *existing == name) {
            return Err(Error::DuplicateEntry(name));
        }

        self.current = Some((name, Vec::new()));
        Ok(())
    }

    /// Convenience for starting an entry and writing all of `data` to it.
    pub fn write_entry(&mut self, name: impl ToString, data: &[u8]) -> Result<()> {
        self.start_file(name)?;
        self.write_all(data)?;
        self.finish_file()
    }

    #[instrument(skip(self), err)]
    fn finish_file(&mut self) -> Result<()> {
        let Some((name, data)) = self.current.take() else {
            return Err(Error::NoEntryStarted);
        };

        let offset = self.inner.stream_position()?;
        let size = data.len() as u64;
        if offset > u32::MAX as u64 || size > u32::MAX as u64 {
            return Err(Error::EntryTooLarge(name));
        }

        let mut header = PakEntryHeader {
            offset: 0,
            size,
            uncompressed_size: size,
            hash: sha1(&data),
            ..Default::default()
        };
        header.write(&mut self.inner)?;
        self.inner.write_all(&data)?;

        debug!(name = name.as_str(), size, offset, "wrote pak entry");

        header.offset = offset;
        self.entries.push((name, header));
        Ok(())
    }

    /// Finish the last entry and write the indices and footer
    ///
    /// This will return the writer, but one should normally not append any data to the end of the file.
    #[instrument(skip(self), err)]
    pub fn finish(mut self) -> Result<W> {
        if self.current.is_some() {
            self.finish_file()?;
        }

        let index_offset = self.inner.stream_position()?;

        let mut encoded = Vec::new();
        let mut encoded_offsets = Vec::with_capacity(self.entries.len());
        for (_, header) in &self.entries {
            encoded_offsets.push(encoded.len() as i32);
            header.write_encoded(&mut encoded)?;
        }

        let path_hash_index = self.path_hash_index(&encoded_offsets)?;
        let directory_index = self.full_directory_index(&encoded_offsets)?;

        // The primary index embeds the offsets of the secondary indices, which follow it.
        let placeholder = self.primary_index(&encoded, 0, &path_hash_index, 0, &directory_index)?;
        let path_hash_offset = index_offset + placeholder.len() as u64;
        let directory_offset = path_hash_offset + path_hash_index.len() as u64;
        let primary = self.primary_index(
            &encoded,
            path_hash_offset,
            &path_hash_index,
            directory_offset,
            &directory_index,
        )?;

        self.inner.write_all(&primary)?;
        self.inner.write_all(&path_hash_index)?;
        self.inner.write_all(&directory_index)?;

        PakFooter {
            version: PAK_VERSION,
            index_offset,
            index_size: primary.len() as u64,
            index_hash: sha1(&primary),
            ..Default::default()
        }
        .write(&mut self.inner)?;

        Ok(self.inner)
    }

    fn primary_index(
        &self,
        encoded: &[u8],
        path_hash_offset: u64,
        path_hash_index: &[u8],
        directory_offset: u64,
        directory_index: &[u8],
    ) -> Result<Vec<u8>> {
        let mut index = Vec::new();
        write_fstring(&mut index, &self.options.mount_point)?;
        index.write_i32::<LittleEndian>(self.entries.len() as i32)?;
        index.write_u64::<LittleEndian>(self.options.path_hash_seed)?;

        index.write_u32::<LittleEndian>(1)?;
        index.write_u64::<LittleEndian>(path_hash_offset)?;
        index.write_u64::<LittleEndian>(path_hash_index.len() as u64)?;
        index.write_all(&sha1(path_hash_index))?;

        index.write_u32::<LittleEndian>(1)?;
        index.write_u64::<LittleEndian>(directory_offset)?;
        index.write_u64::<LittleEndian>(directory_index.len() as u64)?;
        index.write_all(&sha1(directory_index))?;

        index.write_i32::<LittleEndian>(encoded.len() as i32)?;
        index.write_all(encoded)?;

        // entries that could not be encoded
        index.write_i32::<LittleEndian>(0)?;
        Ok(index)
    }

    fn path_hash_index(&self, encoded_offsets: &[i32]) -> Result<Vec<u8>> {
        let mut index = Vec::new();
        index.write_i32::<LittleEndian>(self.entries.len() as i32)?;
        for ((name, _), offset) in self.entries.iter().zip(encoded_offsets) {
            index.write_u64::<LittleEndian>(path_hash(name, self.options.path_hash_seed))?;
            index.write_i32::<LittleEndian>(*offset)?;
        }
        index.write_u32::<LittleEndian>(0)?;
        Ok(index)
    }

    fn full_directory_index(&self, encoded_offsets: &[i32]) -> Result<Vec<u8>> {
        let mut directories: BTreeMap<String, Vec<(&str, i32)>> = BTreeMap::new();
        directories.insert("/".to_string(), Vec::new());

        for ((name, _), offset) in self.entries.iter().zip(encoded_offsets) {
            let (directory, file) = match name.rsplit_once('/') {
                Some((directory, file)) => (format!("{directory}/"), file),
                None => ("/".to_string(), name.as_str()),
            };

            // every parent directory gets its own (possibly empty) record
            let mut parent = directory.as_str();
            while let Some((rest, _)) = parent.trim_end_matches('/').rsplit_once('/') {
                parent = &directory[..rest.len() + 1];
                directories.entry(parent.to_string()).or_default();
            }

            directories.entry(directory).or_default().push((file, *offset));
        }

        let mut index = Vec::new();
        index.write_i32::<LittleEndian>(directories.len() as i32)?;
        for (directory, files) in &directories {
            write_fstring(&mut index, directory)?;
            index.write_i32::<LittleEndian>(files.len() as i32)?;
            for (file, offset) in files {
                write_fstring(&mut index, file)?;
                index.write_i32::<LittleEndian>(*offset)?;
            }
        }
        Ok(index)
    }
}

impl<W: Write + Seek> Write for PakWriter<W> {
    #[instrument(skip_all, err, ret(level = Level::TRACE), fields(size=buf.len()) )]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.current.as_mut() {
            Some((_, data)) => data.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "No entry has been started",
            )),
        }
    }

    #[instrument(skip(self), err)]
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn sha1(data: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Sha1::digest(data));
    out
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use std::io::{Cursor, Write};
    use tracing_test::traced_test;

    use crate::error::{Error, Result};
    use crate::types::{ENTRY_HEADER_SIZE, FOOTER_SIZE};
    use crate::write::{PakWriter, PakWriterOptions};

    fn footer_field(data: &[u8], at: usize) -> u64 {
        let footer = &data[data.len() - FOOTER_SIZE as usize..];
        u64::from_le_bytes(footer[at..at + 8].try_into().unwrap())
    }

    #[traced_test]
    #[test]
    fn pak_empty_write() -> Result<()> {
        let writer = PakWriter::new(Cursor::new(Vec::new()), PakWriterOptions::builder().build());
        let result = writer.finish()?.into_inner();

        // the index starts right away when there is no entry data
        assert_eq!(footer_field(&result, 0x19), 0);
        let index_size = footer_field(&result, 0x21);

        #[rustfmt::skip]
        let expected_prefix = [
            // Mount point
            0x0A, 0x00, 0x00, 0x00, b'.', b'.', b'/', b'.', b'.', b'/', b'.', b'.', b'/', 0x00,
            // Entry count
            0x00, 0x00, 0x00, 0x00,
            // Path hash seed
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        assert_eq!(&result[..expected_prefix.len()], &expected_prefix);
        assert_eq!(index_size, 14 + 4 + 8 + 40 + 40 + 4 + 4);

        Ok(())
    }

    #[traced_test]
    #[test]
    fn pak_single_entry_is_stored_raw() -> Result<()> {
        let mut writer = PakWriter::new(
            Cursor::new(Vec::new()),
            PakWriterOptions::builder()
                .mount_point("../../../")
                .path_hash_seed(0x1234)
                .build(),
        );
        writer.start_file("chunknames")?;
        writer.write_all(b"Game/Content/Hero.uasset")?;

        let result = writer.finish()?.into_inner();

        let data_start = ENTRY_HEADER_SIZE as usize;
        assert_eq!(&result[data_start..data_start + 24], b"Game/Content/Hero.uasset");

        // stored and uncompressed sizes match and no compression method is referenced
        assert_eq!(&result[8..16], &24u64.to_le_bytes());
        assert_eq!(&result[16..24], &24u64.to_le_bytes());
        assert_eq!(&result[24..28], &[0, 0, 0, 0]);

        assert_eq!(footer_field(&result, 0x19), (data_start + 24) as u64);

        let footer = &result[result.len() - FOOTER_SIZE as usize..];
        assert!(footer[0x3D..].iter().all(|b| *b == 0));

        Ok(())
    }

    #[test]
    fn pak_rejects_duplicates() -> Result<()> {
        let mut writer = PakWriter::new(Cursor::new(Vec::new()), PakWriterOptions::builder().build());
        writer.write_entry("chunknames", b"a")?;

        assert!(matches!(
            writer.start_file("chunknames"),
            Err(Error::DuplicateEntry(_))
        ));

        Ok(())
    }

    #[test]
    fn pak_write_without_entry_fails() {
        let mut writer = PakWriter::new(Cursor::new(Vec::new()), PakWriterOptions::builder().build());
        assert!(writer.write_all(b"data").is_err());
    }
}
