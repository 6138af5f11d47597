//! Filesystem helpers: hardlink-or-copy tree copies, retried renames, and
//! replace-on-write.
//!
//! Hardlinks are preferred when seeding a build from a previous output; if a
//! link cannot be created (different volume, permissions) the file is copied
//! instead and a warning is logged.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// How files are materialized in the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Plain byte copy
    Copy,
    /// Hard link, falling back to a copy per file
    Hardlink,
}

/// Counters from a tree copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files_copied: usize,
    pub files_linked: usize,
    pub dirs_created: usize,
}

impl CopyStats {
    pub fn files(&self) -> usize {
        self.files_copied + self.files_linked
    }
}

/// Copy or link a single file. Returns `true` when a hardlink was made.
pub fn link_or_copy_file(source: &Path, dest: &Path, mode: LinkMode) -> Result<bool> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    if mode == LinkMode::Hardlink {
        match fs::hard_link(source, dest) {
            Ok(()) => return Ok(true),
            Err(e) => {
                warn!(
                    "Hard link failed ({}), falling back to copy: {} -> {}",
                    e,
                    source.display(),
                    dest.display()
                );
            }
        }
    }
    fs::copy(source, dest)?;
    Ok(false)
}

/// Copy a directory tree.
///
/// `keep` is called with each entry's path relative to `source` and whether it
/// is a directory; returning `false` skips the entry (and a directory's whole
/// subtree).
pub fn copy_tree<F>(source: &Path, dest: &Path, mode: LinkMode, keep: F) -> Result<CopyStats>
where
    F: Fn(&Path, bool) -> bool,
{
    let mut stats = CopyStats::default();
    fs::create_dir_all(dest)?;

    let walker = WalkDir::new(source)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match entry.path().strip_prefix(source) {
            Ok(rel) => keep(rel, entry.file_type().is_dir()),
            Err(_) => false,
        });

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let rel = match entry.path().strip_prefix(source) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
            stats.dirs_created += 1;
        } else if link_or_copy_file(entry.path(), &target, mode)? {
            stats.files_linked += 1;
        } else {
            stats.files_copied += 1;
        }
    }

    debug!(
        "Copied tree {} -> {} ({} copied, {} linked)",
        source.display(),
        dest.display(),
        stats.files_copied,
        stats.files_linked
    );
    Ok(stats)
}

/// Copy a tree with no filtering
pub fn copy_dir_all(source: &Path, dest: &Path, mode: LinkMode) -> Result<CopyStats> {
    copy_tree(source, dest, mode, |_, _| true)
}

/// Write a file by unlinking any existing one first.
///
/// A file that is a hardlink into a backup is replaced rather than modified
/// in place, so the backup keeps its original content.
pub fn write_replacing(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::write(path, bytes)?;
    Ok(())
}

/// Rename with a bounded retry on permission-denied failures.
///
/// Antivirus scanners and file indexers briefly lock freshly written trees on
/// some platforms; any other error fails immediately.
pub fn rename_with_retries(from: &Path, to: &Path, attempts: u32, delay: Duration) -> Result<()> {
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match fs::rename(from, to) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(
                    "Rename {} -> {} denied (attempt {}/{})",
                    from.display(),
                    to.display(),
                    attempt,
                    attempts
                );
                last_error = Some(e);
                if attempt < attempts {
                    thread::sleep(delay);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::RenameFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        attempts,
        source: last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::PermissionDenied, "rename denied")),
    })
}

/// First of `base`, `base_2`, `base_3`, ... that does not exist yet
pub fn unique_path(base: PathBuf) -> PathBuf {
    if !base.exists() {
        return base;
    }
    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut n = 2;
    loop {
        let candidate = base.with_file_name(format!("{}_{}", name, n));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Append a suffix to the final path component
pub fn with_name_suffix(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}", name, suffix))
}

/// True when a directory holds nothing but OS clutter files
pub fn is_effectively_empty(dir: &Path) -> Result<bool> {
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if name != ".DS_Store" && name != "Thumbs.db" {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Numeric (song) folder name, if the entry is one
pub fn numeric_dir_name(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Numeric song folders directly under `export_root`, ascending
pub fn list_song_dirs(export_root: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(export_root)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(id) = numeric_dir_name(&path) {
            dirs.push((id, path));
        }
    }
    dirs.sort_by_key(|(id, _)| *id);
    Ok(dirs)
}
