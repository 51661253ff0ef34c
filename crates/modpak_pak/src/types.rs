//! Base types for structure of PAK file.

use binrw::{BinRead, BinWrite};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Write};

/// The only archive version produced by this crate
pub const PAK_VERSION: u32 = 11;

/// Serialized size of [`PakFooter`]
pub const FOOTER_SIZE: u64 = 221;

/// Serialized size of [`PakEntryHeader`]
pub const ENTRY_HEADER_SIZE: u64 = 53;

/// Entry header stored both inline before the entry data and, in encoded form, in the index
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct PakEntryHeader {
    /// Offset of the inline header from the start of the file, zero for the inline copy
    pub offset: u64,

    /// Stored size of the entry data
    pub size: u64,

    /// Size of the entry data once decompressed
    pub uncompressed_size: u64,

    /// Index into [`PakFooter::compression_methods`] plus one, zero when stored raw
    pub compression_method: u32,

    /// SHA-1 of the stored bytes
    pub hash: [u8; 20],

    /// Bit 0 marks encrypted entries
    pub flags: u8,

    /// Compression block size, zero when stored raw
    pub compression_block_size: u32,
}

impl PakEntryHeader {
    /// Bit-packed representation used by the primary index.
    ///
    /// Only raw entries are produced, so the block size and block count bits stay zero and the
    /// stored size is implied by the uncompressed size.
    pub fn write_encoded<W: Write>(&self, mut writer: W) -> io::Result<()> {
        let offset_safe = self.offset <= u32::MAX as u64;
        let uncompressed_safe = self.uncompressed_size <= u32::MAX as u64;
        let size_safe = self.size <= u32::MAX as u64;

        let flags = (offset_safe as u32) << 31
            | (uncompressed_safe as u32) << 30
            | (size_safe as u32) << 29
            | (self.compression_method & 0x3f) << 23
            | ((self.flags & 1) as u32) << 22;
        writer.write_u32::<LittleEndian>(flags)?;

        if offset_safe {
            writer.write_u32::<LittleEndian>(self.offset as u32)?;
        } else {
            writer.write_u64::<LittleEndian>(self.offset)?;
        }

        if uncompressed_safe {
            writer.write_u32::<LittleEndian>(self.uncompressed_size as u32)?;
        } else {
            writer.write_u64::<LittleEndian>(self.uncompressed_size)?;
        }

        Ok(())
    }
}

/// PAK file footer
///
/// Always the last [`FOOTER_SIZE`] bytes of the archive.
#[derive(BinRead, BinWrite, Debug, Default, Clone, PartialEq)]
#[brw(little)]
pub struct PakFooter {
    /// Guid of the key used to encrypt the index, zero when unencrypted
    pub encryption_key_guid: [u8; 16],

    /// Non-zero when the index is encrypted
    pub encrypted_index: u8,

    /// Archive version
    #[brw(magic = 0x5A6F12E1u32)]
    pub version: u32,

    /// Offset of the primary index from the start of the file
    pub index_offset: u64,

    /// Size of the primary index
    pub index_size: u64,

    /// SHA-1 of the primary index
    pub index_hash: [u8; 20],

    /// NUL padded compression method names
    pub compression_methods: [[u8; 32]; 5],
}

/// Writes an engine string: a signed length including the terminator, then ASCII bytes or, for
/// anything else, UTF-16 code units with a negated length.
pub fn write_fstring<W: Write>(mut writer: W, value: &str) -> io::Result<()> {
    if value.is_empty() {
        return writer.write_i32::<LittleEndian>(0);
    }

    if value.is_ascii() {
        writer.write_i32::<LittleEndian>(value.len() as i32 + 1)?;
        writer.write_all(value.as_bytes())?;
        writer.write_u8(0)?;
    } else {
        let units = value.encode_utf16().collect::<Vec<_>>();
        writer.write_i32::<LittleEndian>(-(units.len() as i32 + 1))?;
        for unit in units {
            writer.write_u16::<LittleEndian>(unit)?;
        }
        writer.write_u16::<LittleEndian>(0)?;
    }

    Ok(())
}
