//! Fixed-layout records of the `.utoc` table of contents.

use std::io::{self, Write};

use binrw::{BinRead, BinWrite};
use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

/// TOC version written by this library (`PerfectHashWithOverflow`, Unreal Engine 5.3)
pub const TOC_VERSION: u8 = 5;

/// Serialized size of [`TocHeader`]
pub const TOC_HEADER_SIZE: u32 = 144;

/// Length of one entry of the compression method name table
pub const COMPRESSION_METHOD_NAME_LENGTH: u32 = 32;

/// Offsets and compressed blocks are padded to this alignment inside the `.ucas`
pub const UCAS_ALIGNMENT: u64 = 16;

pub const CONTAINER_FLAG_COMPRESSED: u8 = 1 << 0;
pub const CONTAINER_FLAG_INDEXED: u8 = 1 << 3;

pub const META_FLAG_COMPRESSED: u8 = 1 << 0;

/// The header at the start of every `.utoc`
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq)]
#[brw(little, magic = b"-==--==--==--==-")]
pub struct TocHeader {
    pub version: u8,
    pub reserved0: u8,
    pub reserved1: u16,
    pub header_size: u32,
    pub entry_count: u32,
    pub compressed_block_entry_count: u32,
    pub compressed_block_entry_size: u32,
    pub compression_method_name_count: u32,
    pub compression_method_name_length: u32,
    pub compression_block_size: u32,
    pub directory_index_size: u32,
    pub partition_count: u32,
    pub container_id: u64,
    pub encryption_key_guid: [u8; 16],
    pub container_flags: u8,
    pub reserved3: u8,
    pub reserved4: u16,
    pub perfect_hash_seeds_count: u32,
    pub partition_size: u64,
    pub chunks_without_perfect_hash_count: u32,
    pub reserved7: u32,
    pub reserved8: [u64; 5],
}

impl Default for TocHeader {
    fn default() -> Self {
        TocHeader {
            version: TOC_VERSION,
            reserved0: 0,
            reserved1: 0,
            header_size: TOC_HEADER_SIZE,
            entry_count: 0,
            compressed_block_entry_count: 0,
            compressed_block_entry_size: CompressedBlockEntry::SIZE as u32,
            compression_method_name_count: 0,
            compression_method_name_length: COMPRESSION_METHOD_NAME_LENGTH,
            compression_block_size: 0,
            directory_index_size: 0,
            partition_count: 1,
            container_id: 0,
            encryption_key_guid: [0; 16],
            container_flags: 0,
            reserved3: 0,
            reserved4: 0,
            perfect_hash_seeds_count: 0,
            partition_size: u64::MAX,
            chunks_without_perfect_hash_count: 0,
            reserved7: 0,
            reserved8: [0; 5],
        }
    }
}

fn write_u40<W: Write>(writer: &mut W, value: u64, big_endian: bool) -> io::Result<()> {
    if value >> 40 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{value} does not fit in 40 bits"),
        ));
    }
    match big_endian {
        true => writer.write_uint::<BigEndian>(value, 5),
        false => writer.write_uint::<LittleEndian>(value, 5),
    }
}

/// Where a chunk lives in the uncompressed address space of the container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffsetAndLength {
    pub offset: u64,
    pub length: u64,
}

impl OffsetAndLength {
    pub const SIZE: usize = 10;

    /// Both values as 40 bit big endian integers.
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        write_u40(&mut writer, self.offset, true)?;
        write_u40(&mut writer, self.length, true)
    }
}

/// One compression block of the `.ucas`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressedBlockEntry {
    /// Offset of the stored bytes in the `.ucas`
    pub offset: u64,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    /// Index into the method name table, 0 for raw blocks
    pub compression_method_index: u8,
}

impl CompressedBlockEntry {
    pub const SIZE: usize = 12;

    /// 40 bit offset, two 24 bit sizes and the method index, all little endian.
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        if self.compressed_size >> 24 != 0 || self.uncompressed_size >> 24 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "block sizes must fit in 24 bits",
            ));
        }
        write_u40(&mut writer, self.offset, false)?;
        writer.write_u24::<LittleEndian>(self.compressed_size)?;
        writer.write_u24::<LittleEndian>(self.uncompressed_size)?;
        writer.write_u8(self.compression_method_index)
    }
}

/// Hash and flags of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMeta {
    /// Leading 20 bytes of the BLAKE3 hash of the uncompressed chunk
    pub hash: [u8; 20],
    pub flags: u8,
}

impl ChunkMeta {
    pub const SIZE: usize = 33;

    pub fn new(payload: &[u8], compressed: bool) -> Self {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&blake3::hash(payload).as_bytes()[..20]);
        ChunkMeta {
            hash,
            flags: match compressed {
                true => META_FLAG_COMPRESSED,
                false => 0,
            },
        }
    }

    /// The hash padded to 32 bytes, then the flags.
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.hash)?;
        writer.write_all(&[0; 12])?;
        writer.write_u8(self.flags)
    }
}

/// Writes a compression method name padded with NULs.
pub fn write_method_name<W: Write>(mut writer: W, name: &str) -> io::Result<()> {
    let mut field = [0u8; COMPRESSION_METHOD_NAME_LENGTH as usize];
    let bytes = name.as_bytes();
    let len = bytes.len().min(field.len() - 1);
    field[..len].copy_from_slice(&bytes[..len]);
    writer.write_all(&field)
}
