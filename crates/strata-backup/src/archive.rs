//! Tar+gzip archive creation, extraction and validation.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;
use tar::{Archive, Builder as TarBuilder};
use tracing::debug;
use walkdir::WalkDir;

/// Default compression level (6 = balanced speed/ratio).
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// What went into an archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Regular files and symlinks written
    pub file_count: usize,
    /// Directories written
    pub dir_count: usize,
}

/// Archive the contents of `source_dir` into a gzip-compressed tar at `output`.
///
/// Entries are stored relative to `source_dir`. Symlinks are stored as links.
/// Anything under `exclude` is skipped, so a backup directory nested in the
/// tree never archives itself. The output file is synced before returning.
/// `abort` is polled before each entry; when it returns true the archive is
/// abandoned with `Error::Cancelled`.
pub fn create_archive(
    source_dir: &Path,
    output: &Path,
    exclude: Option<&Path>,
    level: u32,
    abort: &dyn Fn() -> bool,
) -> Result<ArchiveStats> {
    let file = File::create(output)?;
    let encoder = GzEncoder::new(file, Compression::new(level.clamp(1, 9)));
    let mut tar = TarBuilder::new(encoder);
    tar.follow_symlinks(false);

    let mut stats = ArchiveStats::default();
    let walker = WalkDir::new(source_dir)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !matches!(exclude, Some(ex) if e.path().starts_with(ex)));

    for entry in walker {
        if abort() {
            return Err(Error::Cancelled);
        }
        let entry = entry.map_err(io::Error::from)?;
        let rel_path = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

        if entry.file_type().is_dir() {
            tar.append_dir(rel_path, entry.path())?;
            stats.dir_count += 1;
        } else {
            tar.append_path_with_name(entry.path(), rel_path)?;
            stats.file_count += 1;
        }
    }

    let encoder = tar.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all()?;

    debug!(
        "Archived {} files and {} directories from {} into {}",
        stats.file_count,
        stats.dir_count,
        source_dir.display(),
        output.display()
    );
    Ok(stats)
}

/// Unpack `archive` into `dest`, preserving permissions and mtimes.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut tar = Archive::new(GzDecoder::new(BufReader::new(file)));
    tar.set_preserve_permissions(true);
    tar.set_preserve_mtime(true);
    tar.set_overwrite(true);

    fs::create_dir_all(dest)?;
    tar.unpack(dest)?;

    debug!("Extracted {} into {}", archive.display(), dest.display());
    Ok(())
}

/// Read every entry header of `archive`, proving it is a complete gzip/tar
/// stream. Returns the number of entries.
pub fn validate_archive(archive: &Path) -> Result<usize> {
    let file = File::open(archive)?;
    let mut tar = Archive::new(GzDecoder::new(BufReader::new(file)));

    let mut count = 0;
    for entry in tar.entries()? {
        let mut entry = entry?;
        entry.path()?;
        // Drain the body so truncated data is detected too
        io::copy(&mut entry, &mut io::sink())?;
        count += 1;
    }
    Ok(count)
}

/// SHA256 of a file, hex-encoded.
pub fn calculate_checksum(path: &Path) -> Result<String> {
    let mut file = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
