use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, SeekFrom};

use binrw::BinRead;
use byteorder::{LittleEndian, ReadBytesExt};
use modpak_pak::error::Result;
use modpak_pak::hash::path_hash;
use modpak_pak::types::{PakEntryHeader, PakFooter, ENTRY_HEADER_SIZE, FOOTER_SIZE, PAK_VERSION};
use modpak_pak::{PakWriter, PakWriterOptions};
use pretty_assertions::assert_eq;
use sha1::{Digest, Sha1};
use tracing_test::traced_test;

fn read_fstring(reader: &mut Cursor<&[u8]>) -> String {
    let len = reader.read_i32::<LittleEndian>().unwrap();
    assert!(len >= 0, "only ASCII names are written here");
    let mut bytes = vec![0; len as usize];
    reader.read_exact(&mut bytes).unwrap();
    bytes.pop();
    String::from_utf8(bytes).unwrap()
}

fn sha1(data: &[u8]) -> Vec<u8> {
    Sha1::digest(data).to_vec()
}

/// Reads the secondary index record of the primary index and returns its bytes.
fn secondary_index<'a>(archive: &'a [u8], reader: &mut Cursor<&[u8]>) -> &'a [u8] {
    assert_eq!(reader.read_u32::<LittleEndian>().unwrap(), 1);
    let offset = reader.read_u64::<LittleEndian>().unwrap() as usize;
    let size = reader.read_u64::<LittleEndian>().unwrap() as usize;
    let mut hash = [0u8; 20];
    reader.read_exact(&mut hash).unwrap();

    let index = &archive[offset..offset + size];
    assert_eq!(sha1(index), hash.to_vec());
    index
}

#[traced_test]
#[test]
fn archive_indices_locate_every_entry() -> Result<()> {
    let entries: [(&str, &[u8]); 3] = [
        ("chunknames", b"Mod/Content/Hero/T_Hero.uasset\nMod/Content/Hero/T_Hero.uexp"),
        ("Mod/Content/Audio/Hero.bnk", b"BKHD"),
        ("Mod/Content/Movies/Intro.bk2", &[0x42; 300]),
    ];

    let mut writer = PakWriter::new(
        Cursor::new(Vec::new()),
        PakWriterOptions::builder()
            .mount_point("../../../")
            .path_hash_seed(0xABCD)
            .build(),
    );
    for (name, data) in entries {
        writer.write_entry(name, data)?;
    }
    let archive = writer.finish()?.into_inner();

    let mut footer_reader = Cursor::new(&archive[..]);
    footer_reader.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
    let footer = PakFooter::read(&mut footer_reader)?;
    assert_eq!(footer.version, PAK_VERSION);
    assert_eq!(footer.encrypted_index, 0);

    let primary =
        &archive[footer.index_offset as usize..(footer.index_offset + footer.index_size) as usize];
    assert_eq!(sha1(primary), footer.index_hash.to_vec());

    let mut reader = Cursor::new(primary);
    assert_eq!(read_fstring(&mut reader), "../../../");
    assert_eq!(reader.read_i32::<LittleEndian>()?, 3);
    assert_eq!(reader.read_u64::<LittleEndian>()?, 0xABCD);

    let path_hashes = secondary_index(&archive, &mut reader);
    let directories = secondary_index(&archive, &mut reader);

    let encoded_size = reader.read_i32::<LittleEndian>()? as usize;
    let position = reader.position() as usize;
    let encoded = &primary[position..position + encoded_size];

    // every path hash points at an encoded entry
    let mut hash_reader = Cursor::new(path_hashes);
    assert_eq!(hash_reader.read_i32::<LittleEndian>()?, 3);
    let mut by_hash = BTreeMap::new();
    for _ in 0..3 {
        let hash = hash_reader.read_u64::<LittleEndian>()?;
        let offset = hash_reader.read_i32::<LittleEndian>()?;
        by_hash.insert(hash, offset);
    }

    // full directory index: directory -> file -> encoded offset
    let mut directory_reader = Cursor::new(directories);
    let mut files = BTreeMap::new();
    for _ in 0..directory_reader.read_i32::<LittleEndian>()? {
        let directory = read_fstring(&mut directory_reader);
        for _ in 0..directory_reader.read_i32::<LittleEndian>()? {
            let file = read_fstring(&mut directory_reader);
            let offset = directory_reader.read_i32::<LittleEndian>()?;
            let path = match directory.as_str() {
                "/" => file,
                _ => format!("{directory}{file}"),
            };
            files.insert(path, offset);
        }
    }
    assert_eq!(files.len(), 3);

    for (name, data) in entries {
        let offset = files[name];
        assert_eq!(by_hash[&path_hash(name, 0xABCD)], offset);

        let mut entry_reader = Cursor::new(&encoded[offset as usize..]);
        let flags = entry_reader.read_u32::<LittleEndian>()?;
        // raw, unencrypted, 32 bit offset and size
        assert_eq!(flags >> 29, 0b111);
        assert_eq!(flags & (0x3f << 23), 0);
        let entry_offset = entry_reader.read_u32::<LittleEndian>()? as usize;
        let entry_size = entry_reader.read_u32::<LittleEndian>()? as usize;
        assert_eq!(entry_size, data.len());

        let mut inline = Cursor::new(&archive[entry_offset..]);
        let header = PakEntryHeader::read(&mut inline)?;
        assert_eq!(header.offset, 0);
        assert_eq!(header.compression_method, 0);
        assert_eq!(header.hash.to_vec(), sha1(data));

        let start = entry_offset + ENTRY_HEADER_SIZE as usize;
        assert_eq!(&archive[start..start + entry_size], data);
    }

    Ok(())
}
