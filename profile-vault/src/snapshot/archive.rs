//! Archive codec: a sorted tar stream compressed with zstd.

use crate::utils::{Result, VaultError};
use std::path::Path;

/// Compression level (1-22 for zstd)
const COMPRESSION_LEVEL: i32 = 3;

/// One file to place in the archive.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveEntry<'a> {
    pub path: &'a str,
    pub contents: &'a [u8],
    pub mode: u32,
    pub mtime: u64,
}

/// Pack entries in the given order into a compressed tar stream.
pub fn pack<'a>(entries: impl IntoIterator<Item = ArchiveEntry<'a>>) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(entry.contents.len() as u64);
        header.set_mode(entry.mode);
        header.set_mtime(entry.mtime);
        builder
            .append_data(&mut header, entry.path, entry.contents)
            .map_err(|e| VaultError::Archive(format!("failed to add {}: {}", entry.path, e)))?;
    }

    let tarball = builder
        .into_inner()
        .map_err(|e| VaultError::Archive(format!("failed to finish archive: {}", e)))?;

    zstd::stream::encode_all(tarball.as_slice(), COMPRESSION_LEVEL)
        .map_err(|e| VaultError::Archive(format!("compression failed: {}", e)))
}

/// Unpack a compressed tar stream below `destination`.
///
/// Entries escaping the destination (absolute paths, `..`) are refused by
/// the tar reader.
pub fn unpack(bytes: &[u8], destination: &Path) -> Result<()> {
    let tarball = zstd::stream::decode_all(bytes)
        .map_err(|e| VaultError::Archive(format!("decompression failed: {}", e)))?;

    let mut archive = tar::Archive::new(tarball.as_slice());
    archive.set_preserve_permissions(true);
    archive
        .unpack(destination)
        .map_err(|e| VaultError::Archive(format!("extraction failed: {}", e)))
}
