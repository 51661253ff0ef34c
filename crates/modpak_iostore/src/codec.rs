//! Block codecs used when planning container blocks.

use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::{write::ZlibEncoder, Compression};
use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, instrument};

/// Identifies the codec a container is built with
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Stores every block as it is
    None,

    /// Oodle Mermaid through the host's Oodle library
    #[default]
    Oodle,

    /// Compress the data using Zlib
    Zlib,
}

impl CompressionMethod {
    /// Name written to the method table of the container
    pub const fn name(self) -> &'static str {
        match self {
            CompressionMethod::None => "None",
            CompressionMethod::Oodle => "Oodle",
            CompressionMethod::Zlib => "Zlib",
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Ok(CompressionMethod::None),
            "oodle" => Ok(CompressionMethod::Oodle),
            "zlib" => Ok(CompressionMethod::Zlib),
            other => Err(format!("unknown compression method {other}")),
        }
    }
}

/// Errors of a single compression attempt. They never abort a build, the block is stored raw.
#[derive(Error, Diagnostic, Debug)]
pub enum CodecError {
    /// The codec's backing library could not be used
    #[error("compression codec is unavailable: {0}")]
    #[diagnostic(help("point --oodle or MODPAK_OODLE_PATH at oo2core_9_win64.dll or liboo2corelinux64.so.9"))]
    Unavailable(String),

    /// The codec rejected the block
    #[error("compression failed: {0}")]
    Failure(String),
}

/// Compresses a single block. Implementations are shared between worker threads.
pub trait BlockCodec: Send + Sync {
    fn method(&self) -> CompressionMethod;

    fn compress(&self, block: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// Zlib through flate2
#[derive(Debug, Clone, Copy)]
pub struct ZlibCodec {
    level: Compression,
}

impl ZlibCodec {
    pub fn new(level: Compression) -> Self {
        ZlibCodec { level }
    }
}

impl Default for ZlibCodec {
    fn default() -> Self {
        ZlibCodec::new(Compression::best())
    }
}

impl BlockCodec for ZlibCodec {
    fn method(&self) -> CompressionMethod {
        CompressionMethod::Zlib
    }

    fn compress(&self, block: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(block.len()), self.level);
        encoder
            .write_all(block)
            .map_err(|error| CodecError::Failure(error.to_string()))?;
        encoder
            .finish()
            .map_err(|error| CodecError::Failure(error.to_string()))
    }
}

mod oodle_lz {
    /// Compressor ids of the Oodle LZ family
    #[allow(dead_code)]
    #[derive(Debug, Clone, Copy)]
    #[repr(i32)]
    pub enum Compressor {
        Kraken = 8,
        Mermaid = 9,
        Selkie = 11,
        Leviathan = 13,
    }

    #[allow(dead_code)]
    #[derive(Debug, Clone, Copy)]
    #[repr(i32)]
    pub enum CompressionLevel {
        Normal = 4,
        Optimal1 = 5,
        Optimal2 = 6,
        Optimal3 = 7,
    }

    pub type Compress = unsafe extern "system" fn(
        compressor: Compressor,
        raw: *const u8,
        raw_len: usize,
        compressed: *mut u8,
        level: CompressionLevel,
        options: *const (),
        dictionary_base: *const (),
        lrm: *const (),
        scratch: *mut u8,
        scratch_size: usize,
    ) -> isize;

    pub type GetCompressedBufferSizeNeeded =
        unsafe extern "system" fn(compressor: Compressor, raw_size: usize) -> usize;
}

/// Oodle Mermaid, resolved from the host's Oodle library at runtime
pub struct OodleCodec {
    compress: oodle_lz::Compress,
    buffer_size_needed: oodle_lz::GetCompressedBufferSizeNeeded,
    compressor: oodle_lz::Compressor,
    level: oodle_lz::CompressionLevel,
    // keeps the function pointers above valid
    _library: libloading::Library,
}

impl OodleCodec {
    /// File name of the Oodle library on this platform
    pub const LIBRARY_NAME: &'static str = if cfg!(windows) {
        "oo2core_9_win64.dll"
    } else {
        "liboo2corelinux64.so.9"
    };

    /// Where the library is loaded from: `path` when given, then a copy next to `executable`,
    /// then the platform name through the loader's search path.
    pub fn library_target(path: Option<&Path>, executable: Option<&Path>) -> OsString {
        if let Some(path) = path {
            return path.as_os_str().to_owned();
        }
        executable
            .map(|executable| executable.with_file_name(Self::LIBRARY_NAME))
            .filter(|bundled| bundled.is_file())
            .map(PathBuf::into_os_string)
            .unwrap_or_else(|| OsString::from(Self::LIBRARY_NAME))
    }

    /// Loads the Oodle library, see [`OodleCodec::library_target`] for the lookup order.
    #[instrument(err)]
    pub fn load(path: Option<&Path>) -> Result<Self, CodecError> {
        let executable = std::env::current_exe().ok();
        let target = Self::library_target(path, executable.as_deref());

        // SAFETY: loading runs the library's initializers, the Oodle core library has none with
        // observable side effects.
        let library = unsafe { libloading::Library::new(&target) }
            .map_err(|error| CodecError::Unavailable(error.to_string()))?;

        // SAFETY: both signatures match the exported Oodle 2.9 functions.
        let (compress, buffer_size_needed) = unsafe {
            let compress = *library
                .get::<oodle_lz::Compress>(b"OodleLZ_Compress\0")
                .map_err(|error| CodecError::Unavailable(error.to_string()))?;
            let buffer_size_needed = *library
                .get::<oodle_lz::GetCompressedBufferSizeNeeded>(
                    b"OodleLZ_GetCompressedBufferSizeNeeded\0",
                )
                .map_err(|error| CodecError::Unavailable(error.to_string()))?;
            (compress, buffer_size_needed)
        };

        debug!(library = ?target, "loaded oodle");

        Ok(OodleCodec {
            compress,
            buffer_size_needed,
            compressor: oodle_lz::Compressor::Mermaid,
            level: oodle_lz::CompressionLevel::Optimal2,
            _library: library,
        })
    }
}

impl fmt::Debug for OodleCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OodleCodec")
            .field("compressor", &self.compressor)
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

impl BlockCodec for OodleCodec {
    fn method(&self) -> CompressionMethod {
        CompressionMethod::Oodle
    }

    fn compress(&self, block: &[u8]) -> Result<Vec<u8>, CodecError> {
        // SAFETY: the output buffer is sized by the library for this compressor and input size,
        // and the library is kept loaded by `self`.
        unsafe {
            let mut buffer = vec![0; (self.buffer_size_needed)(self.compressor, block.len())];
            let written = (self.compress)(
                self.compressor,
                block.as_ptr(),
                block.len(),
                buffer.as_mut_ptr(),
                self.level,
                std::ptr::null(),
                std::ptr::null(),
                std::ptr::null(),
                std::ptr::null_mut(),
                0,
            );
            if written < 0 || written as usize > buffer.len() {
                return Err(CodecError::Failure(format!(
                    "OodleLZ_Compress returned {written}"
                )));
            }
            buffer.truncate(written as usize);
            Ok(buffer)
        }
    }
}

#[cfg(test)]
mod test {
    use std::ffi::OsString;
    use std::io::Read;
    use std::path::Path;

    use flate2::read::ZlibDecoder;
    use pretty_assertions::assert_eq;

    use crate::codec::{BlockCodec, CodecError, CompressionMethod, OodleCodec, ZlibCodec};

    #[test]
    fn zlib_compresses_repetitive_blocks() {
        let block = vec![0x41u8; 4096];
        let compressed = ZlibCodec::default().compress(&block).unwrap();
        assert!(compressed.len() < block.len());

        let mut decoded = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn missing_oodle_library_is_unavailable() {
        let result = OodleCodec::load(Some(Path::new("/nonexistent/liboo2corelinux64.so.9")));
        assert!(matches!(result, Err(CodecError::Unavailable(_))));
    }

    #[test]
    fn bundled_library_is_found_next_to_the_binary() {
        let dir = tempfile::tempdir().unwrap();
        let executable = dir.path().join("modpak");
        let bundled = dir.path().join(OodleCodec::LIBRARY_NAME);

        // nothing bundled, the loader searches by name
        assert_eq!(
            OodleCodec::library_target(None, Some(&executable)),
            OsString::from(OodleCodec::LIBRARY_NAME)
        );

        std::fs::write(&bundled, b"").unwrap();
        assert_eq!(
            OodleCodec::library_target(None, Some(&executable)),
            bundled.clone().into_os_string()
        );

        let explicit = Path::new("/opt/oodle/liboo2corelinux64.so.9");
        assert_eq!(
            OodleCodec::library_target(Some(explicit), Some(&executable)),
            explicit.as_os_str().to_owned()
        );
        assert_eq!(
            OodleCodec::library_target(None, None),
            OsString::from(OodleCodec::LIBRARY_NAME)
        );
    }

    #[test]
    fn method_names_parse() {
        assert_eq!("zlib".parse::<CompressionMethod>(), Ok(CompressionMethod::Zlib));
        assert_eq!("Oodle".parse::<CompressionMethod>(), Ok(CompressionMethod::Oodle));
        assert_eq!("NONE".parse::<CompressionMethod>(), Ok(CompressionMethod::None));
        assert!("lz4".parse::<CompressionMethod>().is_err());
    }
}
