// src/packages/arch.rs

//! Arch Linux package artifact reader
//!
//! Reads .pkg.tar.zst, .pkg.tar.xz and .pkg.tar.gz artifacts: metadata comes
//! from the `.PKGINFO` member, sizes and checksums from the artifact bytes.

use crate::compression::open_decoder;
use crate::error::{Error, Result};
use crate::packages::traits::{PackageFormat, PackageMetadata};
use crate::version::PackageVersion;
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;

/// Name of the metadata member inside every artifact
pub const PKGINFO_MEMBER: &str = ".PKGINFO";

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Arch Linux package artifact
#[derive(Debug, Clone)]
pub struct ArchPackage {
    package_path: PathBuf,
    filename: String,
    metadata: PackageMetadata,
}

impl ArchPackage {
    fn malformed(path: &Path, reason: impl Into<String>) -> Error {
        Error::MalformedArtifact {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Open and decompress the package archive
    fn open_archive(path: &Path) -> Result<Archive<Box<dyn Read>>> {
        let reader = open_decoder(path)
            .map_err(|e| Self::malformed(path, format!("failed to open package file: {}", e)))?;
        Ok(Archive::new(reader))
    }

    /// Read the raw `.PKGINFO` member
    fn read_pkginfo(path: &Path) -> Result<String> {
        let mut archive = Self::open_archive(path)?;

        let entries = archive
            .entries()
            .map_err(|e| Self::malformed(path, format!("failed to read archive: {}", e)))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| Self::malformed(path, format!("failed to read entry: {}", e)))?;

            let entry_path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            if entry_path.trim_start_matches("./") == PKGINFO_MEMBER {
                let mut content = String::new();
                entry.read_to_string(&mut content).map_err(|e| {
                    Self::malformed(path, format!("failed to read {}: {}", PKGINFO_MEMBER, e))
                })?;
                return Ok(content);
            }
        }

        Err(Self::malformed(
            path,
            format!("no {} member found in package", PKGINFO_MEMBER),
        ))
    }

    /// Parse `.PKGINFO` content (`key = value` lines)
    fn parse_pkginfo(content: &str) -> PkgInfo {
        let mut info = PkgInfo::default();

        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();

                match key {
                    "pkgname" => info.name = Some(value.to_string()),
                    "pkgbase" => info.base = Some(value.to_string()),
                    "pkgver" => info.version = Some(value.to_string()),
                    "pkgdesc" => info.description = Some(value.to_string()),
                    "url" => info.url = Some(value.to_string()),
                    "builddate" => info.build_date = Some(value.to_string()),
                    "packager" => info.packager = Some(value.to_string()),
                    "size" => info.size = Some(value.to_string()),
                    "arch" => info.architecture = Some(value.to_string()),
                    "replaces" => info.replaces.push(value.to_string()),
                    "group" => info.groups.push(value.to_string()),
                    "depend" => info.dependencies.push(value.to_string()),
                    _ => {} // Ignore unknown keys
                }
            }
        }

        info
    }

    /// Compute size, MD5 and SHA-256 of the artifact in one streaming pass
    fn hash_file(path: &Path) -> Result<ArtifactDigest> {
        let mut file = File::open(path)
            .map_err(|e| Self::malformed(path, format!("failed to open for hashing: {}", e)))?;

        let mut md5 = Md5::new();
        let mut sha256 = Sha256::new();
        let mut size = 0u64;
        let mut buf = vec![0u8; HASH_BUFFER_SIZE];

        loop {
            let n = file
                .read(&mut buf)
                .map_err(|e| Self::malformed(path, format!("failed to read for hashing: {}", e)))?;
            if n == 0 {
                break;
            }
            md5.update(&buf[..n]);
            sha256.update(&buf[..n]);
            size += n as u64;
        }

        Ok(ArtifactDigest {
            size,
            md5: format!("{:x}", md5.finalize()),
            sha256: format!("{:x}", sha256.finalize()),
        })
    }

    fn parse_number(path: &Path, key: &str, value: Option<String>) -> Result<u64> {
        match value {
            None => Ok(0),
            Some(v) => v
                .parse()
                .map_err(|_| Self::malformed(path, format!("invalid {} value '{}'", key, v))),
        }
    }
}

/// Parsed .PKGINFO metadata
#[derive(Default)]
struct PkgInfo {
    name: Option<String>,
    base: Option<String>,
    version: Option<String>,
    description: Option<String>,
    url: Option<String>,
    architecture: Option<String>,
    build_date: Option<String>,
    packager: Option<String>,
    size: Option<String>,
    replaces: Vec<String>,
    groups: Vec<String>,
    dependencies: Vec<String>,
}

struct ArtifactDigest {
    size: u64,
    md5: String,
    sha256: String,
}

impl PackageFormat for ArchPackage {
    fn open(path: &Path) -> Result<Self> {
        debug!("Reading Arch package: {}", path.display());

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Self::malformed(path, "artifact file name is not valid UTF-8"))?
            .to_string();

        let pkginfo = Self::parse_pkginfo(&Self::read_pkginfo(path)?);

        let name = pkginfo
            .name
            .ok_or_else(|| Self::malformed(path, "pkgname not found in .PKGINFO"))?;
        let version = pkginfo
            .version
            .ok_or_else(|| Self::malformed(path, "pkgver not found in .PKGINFO"))?;
        let installed_size = Self::parse_number(path, "size", pkginfo.size)?;
        let build_date = Self::parse_number(path, "builddate", pkginfo.build_date)?;

        let digest = Self::hash_file(path)?;

        let metadata = PackageMetadata {
            base: pkginfo.base.unwrap_or_else(|| name.clone()),
            name,
            version: PackageVersion::parse(&version),
            description: pkginfo.description.unwrap_or_default(),
            url: pkginfo.url.filter(|u| !u.is_empty()),
            architecture: pkginfo.architecture.unwrap_or_else(|| "any".to_string()),
            packager: pkginfo.packager.unwrap_or_else(|| "Unknown Packager".to_string()),
            build_date,
            installed_size,
            compressed_size: digest.size,
            md5sum: digest.md5,
            sha256sum: digest.sha256,
            replaces: pkginfo.replaces,
            groups: pkginfo.groups,
            depends: pkginfo.dependencies,
        };

        debug!(
            "Read Arch package: {} version {} ({} bytes)",
            metadata.name, metadata.version, metadata.compressed_size
        );

        Ok(Self {
            package_path: path.to_path_buf(),
            filename,
            metadata,
        })
    }

    fn path(&self) -> &Path {
        &self.package_path
    }

    fn filename(&self) -> &str {
        &self.filename
    }

    fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    fn file_manifest(&self) -> Result<Vec<String>> {
        let path = self.package_path.as_path();
        let mut archive = Self::open_archive(path)?;
        let mut files = Vec::new();

        let entries = archive
            .entries()
            .map_err(|e| Self::malformed(path, format!("failed to read archive entries: {}", e)))?;

        for entry in entries {
            let entry = entry
                .map_err(|e| Self::malformed(path, format!("failed to read archive entry: {}", e)))?;

            let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let mut entry_path = raw.trim_start_matches("./").to_string();

            // Skip the archive root and control members (.PKGINFO, .MTREE, .BUILDINFO, .INSTALL)
            if entry_path.is_empty() || entry_path == "." || entry_path.starts_with('.') {
                continue;
            }

            if entry.header().entry_type().is_dir() && !entry_path.ends_with('/') {
                entry_path.push('/');
            }

            files.push(entry_path);
        }

        debug!("Listed {} files in {}", files.len(), self.filename);
        Ok(files)
    }
}
