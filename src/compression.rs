// src/compression.rs

//! Archive compression handling
//!
//! Package artifacts and repository archives are tarballs compressed with
//! zstd, xz or gzip. Detection looks at the file extension first and falls
//! back to magic bytes, since repository archives are often named plainly
//! (`core.db`, `core.files`).

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::debug;
use xz2::read::XzDecoder;

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
const XZ_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Compression format of a tarball
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Zstd,
    Xz,
    Gzip,
    None,
}

impl CompressionFormat {
    /// Detect from the file extension alone
    pub fn from_extension(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy();
        if name.ends_with(".zst") {
            Some(Self::Zstd)
        } else if name.ends_with(".xz") {
            Some(Self::Xz)
        } else if name.ends_with(".gz") {
            Some(Self::Gzip)
        } else if name.ends_with(".tar") {
            Some(Self::None)
        } else {
            None
        }
    }

    /// Detect from the leading bytes of a file
    pub fn from_magic(magic: &[u8]) -> Self {
        if magic.starts_with(&ZSTD_MAGIC) {
            Self::Zstd
        } else if magic.starts_with(&XZ_MAGIC) {
            Self::Xz
        } else if magic.starts_with(&GZIP_MAGIC) {
            Self::Gzip
        } else {
            Self::None
        }
    }

    /// Detect the format of a file on disk, extension first
    pub fn detect(path: &Path) -> io::Result<Self> {
        if let Some(format) = Self::from_extension(path) {
            return Ok(format);
        }

        let mut file = File::open(path)?;
        let mut magic = [0u8; 6];
        let mut filled = 0;
        while filled < magic.len() {
            let n = file.read(&mut magic[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        Ok(Self::from_magic(&magic[..filled]))
    }
}

/// Open a compressed file as a decompressed byte stream
pub fn open_decoder(path: &Path) -> io::Result<Box<dyn Read>> {
    let format = CompressionFormat::detect(path)?;
    debug!("Opening {} as {:?}", path.display(), format);

    let file = File::open(path)?;
    let reader: Box<dyn Read> = match format {
        CompressionFormat::Zstd => Box::new(zstd::Decoder::new(file)?),
        CompressionFormat::Xz => Box::new(XzDecoder::new(file)),
        CompressionFormat::Gzip => Box::new(GzDecoder::new(file)),
        CompressionFormat::None => Box::new(file),
    };

    Ok(reader)
}

/// Settings for the zstd stream used to write repository archives
#[derive(Debug, Clone, Copy)]
pub struct ZstdSettings {
    /// Compression level, clamped to 1..=22
    pub level: i32,
    /// Worker threads; 0 means one per available core
    pub workers: usize,
}

impl Default for ZstdSettings {
    fn default() -> Self {
        Self {
            level: 19,
            workers: 0,
        }
    }
}

impl ZstdSettings {
    fn worker_count(&self) -> u32 {
        let workers = if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.workers
        };
        u32::try_from(workers).unwrap_or(u32::MAX)
    }

    /// Wrap a writer in a zstd encoder
    ///
    /// Output is rsyncable so that consecutive rebuilds of a repository only
    /// differ around the entries that changed, and carries a content checksum.
    pub fn encoder<W: Write>(&self, writer: W) -> io::Result<zstd::Encoder<'static, W>> {
        let mut encoder = zstd::Encoder::new(writer, self.level.clamp(1, 22))?;
        encoder.multithread(self.worker_count())?;
        encoder.set_parameter(zstd::zstd_safe::CParameter::RSyncable(true))?;
        encoder.include_checksum(true)?;
        Ok(encoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_compression_from_extension() {
        assert_eq!(
            CompressionFormat::from_extension(&PathBuf::from("test-1.0-1-x86_64.pkg.tar.zst")),
            Some(CompressionFormat::Zstd)
        );
        assert_eq!(
            CompressionFormat::from_extension(&PathBuf::from("test.pkg.tar.xz")),
            Some(CompressionFormat::Xz)
        );
        assert_eq!(
            CompressionFormat::from_extension(&PathBuf::from("core.db.tar.gz")),
            Some(CompressionFormat::Gzip)
        );
        assert_eq!(
            CompressionFormat::from_extension(&PathBuf::from("core.files")),
            None
        );
    }

    #[test]
    fn test_compression_from_magic() {
        assert_eq!(
            CompressionFormat::from_magic(&[0x28, 0xB5, 0x2F, 0xFD, 0, 0]),
            CompressionFormat::Zstd
        );
        assert_eq!(
            CompressionFormat::from_magic(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]),
            CompressionFormat::Xz
        );
        assert_eq!(
            CompressionFormat::from_magic(&[0x1F, 0x8B, 0x08]),
            CompressionFormat::Gzip
        );
        assert_eq!(CompressionFormat::from_magic(b"core/"), CompressionFormat::None);
        assert_eq!(CompressionFormat::from_magic(&[]), CompressionFormat::None);
    }

    #[test]
    fn test_zstd_round_trip_through_detection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.db");

        let file = File::create(&path).unwrap();
        let settings = ZstdSettings { level: 3, workers: 1 };
        let mut encoder = settings.encoder(file).unwrap();
        encoder.write_all(b"payload").unwrap();
        encoder.finish().unwrap();

        let mut content = String::new();
        open_decoder(&path).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "payload");
    }
}
