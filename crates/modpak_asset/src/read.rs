//! Bounds checked reading of package bytes.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};

use crate::error::{Error, Result};

/// Upper bound for a single string, anything longer is treated as corruption
const MAX_STRING_LEN: i32 = 1 << 16;

fn eof(what: &'static str, offset: usize) -> impl FnOnce(io::Error) -> Error {
    move |error| match error.kind() {
        io::ErrorKind::UnexpectedEof => Error::Truncated { what, offset },
        _ => Error::IOError(error),
    }
}

/// Little endian reader over a package buffer
///
/// Every read is checked against the end of the buffer and reports what was being read when the
/// data runs out, so a truncated package turns into an [`Error::Truncated`] instead of a panic.
pub struct PackageReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> PackageReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        PackageReader {
            cursor: Cursor::new(data),
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining(&self) -> usize {
        self.len().saturating_sub(self.position())
    }

    /// Moves to an absolute offset read from the package itself.
    pub fn seek(&mut self, offset: i64, what: &'static str) -> Result<()> {
        if offset < 0 || offset as u64 > self.len() as u64 {
            return Err(Error::InvalidPackage(format!(
                "{what} offset {offset} is outside of the {} byte package",
                self.len()
            )));
        }
        self.cursor.set_position(offset as u64);
        Ok(())
    }

    pub fn u8(&mut self, what: &'static str) -> Result<u8> {
        let map = eof(what, self.position());
        self.cursor.read_u8().map_err(map)
    }

    pub fn u16(&mut self, what: &'static str) -> Result<u16> {
        let map = eof(what, self.position());
        self.cursor.read_u16::<LittleEndian>().map_err(map)
    }

    pub fn i32(&mut self, what: &'static str) -> Result<i32> {
        let map = eof(what, self.position());
        self.cursor.read_i32::<LittleEndian>().map_err(map)
    }

    pub fn u32(&mut self, what: &'static str) -> Result<u32> {
        let map = eof(what, self.position());
        self.cursor.read_u32::<LittleEndian>().map_err(map)
    }

    pub fn i64(&mut self, what: &'static str) -> Result<i64> {
        let map = eof(what, self.position());
        self.cursor.read_i64::<LittleEndian>().map_err(map)
    }

    pub fn u64(&mut self, what: &'static str) -> Result<u64> {
        let map = eof(what, self.position());
        self.cursor.read_u64::<LittleEndian>().map_err(map)
    }

    /// 32 bit boolean as serialized by the engine
    pub fn bool32(&mut self, what: &'static str) -> Result<bool> {
        match self.u32(what)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::InvalidPackage(format!(
                "{what} is not a boolean: {other}"
            ))),
        }
    }

    pub fn guid(&mut self, what: &'static str) -> Result<[u8; 16]> {
        let mut guid = [0u8; 16];
        let map = eof(what, self.position());
        self.cursor.read_exact(&mut guid).map_err(map)?;
        Ok(guid)
    }

    pub fn skip(&mut self, len: usize, what: &'static str) -> Result<()> {
        if len > self.remaining() {
            return Err(Error::Truncated {
                what,
                offset: self.position(),
            });
        }
        self.cursor.set_position((self.position() + len) as u64);
        Ok(())
    }

    /// Reads a signed element count, rejecting negative values and counts whose elements could not
    /// possibly fit in the rest of the buffer.
    pub fn count(&mut self, what: &'static str, min_element_size: usize) -> Result<usize> {
        let count = self.i32(what)?;
        self.check_count(count, what, min_element_size)
    }

    /// Validates a count that was read earlier, see [`PackageReader::count`].
    pub fn check_count(
        &self,
        count: i32,
        what: &'static str,
        min_element_size: usize,
    ) -> Result<usize> {
        if count < 0 {
            return Err(Error::InvalidPackage(format!("{what} is negative: {count}")));
        }
        let count = count as usize;
        if count.saturating_mul(min_element_size) > self.remaining() {
            return Err(Error::InvalidPackage(format!(
                "{what} of {count} does not fit in the remaining {} bytes",
                self.remaining()
            )));
        }
        Ok(count)
    }

    /// Engine string: positive lengths are 8 bit with a terminator, negative lengths UTF-16.
    pub fn fstring(&mut self, what: &'static str) -> Result<String> {
        let len = self.i32(what)?;
        if len == 0 {
            return Ok(String::new());
        }
        if !(-MAX_STRING_LEN..=MAX_STRING_LEN).contains(&len) {
            return Err(Error::InvalidPackage(format!(
                "{what} has an implausible length of {len}"
            )));
        }

        if len > 0 {
            let len = len as usize;
            if len > self.remaining() {
                return Err(Error::Truncated {
                    what,
                    offset: self.position(),
                });
            }
            let mut bytes = vec![0u8; len];
            let map = eof(what, self.position());
            self.cursor.read_exact(&mut bytes).map_err(map)?;
            bytes.pop();
            // Latin-1 maps one to one onto the first 256 code points
            Ok(bytes.into_iter().map(char::from).collect())
        } else {
            let units = len.unsigned_abs() as usize;
            if units * 2 > self.remaining() {
                return Err(Error::Truncated {
                    what,
                    offset: self.position(),
                });
            }
            let mut buffer = Vec::with_capacity(units);
            for _ in 0..units {
                buffer.push(self.u16(what)?);
            }
            buffer.pop();
            String::from_utf16(&buffer)
                .map_err(|_| Error::InvalidPackage(format!("{what} is not valid UTF-16")))
        }
    }
}
