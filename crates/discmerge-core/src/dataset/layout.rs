//! Locate the Export root of an input folder.
//!
//! Inputs may be an extracted disc (`PS3_GAME/USRDIR/FileSystem/Export`), a
//! folder holding `FileSystem/Export`, or a loose export folder.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

/// How an input folder was recognized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutKind {
    DiscFolder,
    ExportFolder,
}

/// A resolved input dataset location
#[derive(Debug, Clone, Serialize)]
pub struct DatasetLocation {
    /// Path as given by the caller
    pub original: PathBuf,
    /// Folder containing `FileSystem` for disc layouts, else the Export root
    pub resolved_root: PathBuf,
    /// Folder holding `config.xml`, the bank files, and song folders
    pub export_root: PathBuf,
    pub kind: LayoutKind,
    /// Layout hazards noticed while resolving
    pub warnings: Vec<String>,
}

/// Disc-level folders that may sit between the input and `USRDIR`
const DISC_PREFIXES: [&str; 5] = [
    "",
    "PS3_GAME",
    "GAME",
    "BCES00011",
    "BCES00011SINGSTARFAMILY",
];

fn candidate_roots(input: &Path) -> Vec<(LayoutKind, PathBuf)> {
    let mut candidates = Vec::new();
    for prefix in DISC_PREFIXES {
        let base = if prefix.is_empty() {
            input.to_path_buf()
        } else {
            input.join(prefix)
        };
        candidates.push((
            LayoutKind::DiscFolder,
            base.join("USRDIR").join("FileSystem").join("Export"),
        ));
        candidates.push((LayoutKind::DiscFolder, base.join("FileSystem").join("Export")));
    }
    candidates.push((LayoutKind::ExportFolder, input.join("Export")));
    candidates.push((LayoutKind::ExportFolder, input.to_path_buf()));
    candidates
}

/// True when a folder carries any export signature file
pub fn looks_like_export_root(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    if dir.join("config.xml").is_file() || dir.join("covers.xml").is_file() {
        return true;
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return false,
    };
    entries.flatten().any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        is_signature_file(&name)
    })
}

fn is_signature_file(name: &str) -> bool {
    let matches = |prefix: &str, suffix: &str| {
        name.len() > prefix.len() + suffix.len()
            && name.starts_with(prefix)
            && name.ends_with(suffix)
    };
    matches("songs_", ".xml")
        || matches("acts_", "_0.xml")
        || matches("songlists_", ".xml")
        || matches("melodies_", ".chc")
}

/// Resolve an input folder to its Export root
pub fn resolve_input(path: &Path) -> Result<DatasetLocation> {
    if !path.is_dir() {
        return Err(Error::DataRootNotFound(path.to_path_buf()));
    }
    let original = path.to_path_buf();

    let mut seen: Vec<PathBuf> = Vec::new();
    for (kind, candidate) in candidate_roots(path) {
        let candidate = fs::canonicalize(&candidate).unwrap_or(candidate);
        if seen.contains(&candidate) {
            continue;
        }
        seen.push(candidate.clone());

        if !looks_like_export_root(&candidate) {
            continue;
        }

        let resolved_root = match kind {
            LayoutKind::DiscFolder => candidate
                .parent()
                .and_then(Path::parent)
                .map(Path::to_path_buf)
                .unwrap_or_else(|| candidate.clone()),
            LayoutKind::ExportFolder => candidate.clone(),
        };
        debug!(
            "Resolved {} -> {} ({:?})",
            original.display(),
            candidate.display(),
            kind
        );
        return Ok(DatasetLocation {
            warnings: layout_warnings(&candidate),
            original,
            resolved_root,
            export_root: candidate,
            kind,
        });
    }

    Err(Error::DataRootNotFound(original))
}

/// On-disk name of a child whose name matches `expected` ignoring case but
/// differs in casing
pub(crate) fn case_mismatch_child(parent: &Path, expected: &str) -> Option<String> {
    let entries = fs::read_dir(parent).ok()?;
    entries.flatten().find_map(|entry| {
        let name = entry.file_name().to_string_lossy().into_owned();
        (name.eq_ignore_ascii_case(expected) && name != expected).then_some(name)
    })
}

fn layout_warnings(export_root: &Path) -> Vec<String> {
    let mut warnings = Vec::new();

    let parent_is_filesystem = export_root
        .parent()
        .and_then(Path::file_name)
        .map(|n| n == "FileSystem")
        .unwrap_or(false);
    let name = export_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if parent_is_filesystem && name != "Export" {
        warnings.push(format!("Export folder name is '{}' (expected 'Export').", name));
    }

    if let Some(actual) = case_mismatch_child(export_root, "textures") {
        warnings.push(format!(
            "Found '{}' folder; on the target platform this must be lowercase 'textures' inside Export.",
            actual
        ));
    } else if !export_root.join("textures").is_dir() {
        warnings.push(
            "No textures folder found under Export (ok for loose XML-only sets, but required for real discs/output)."
                .to_string(),
        );
    }

    if !export_root.join("config.xml").is_file() {
        warnings.push("No config.xml found at Export root (some donors may be partial).".to_string());
    }

    warnings
}

impl DatasetLocation {
    /// The three identities an output path must never equal
    pub fn identity_paths(&self) -> [&Path; 3] {
        [&self.original, &self.resolved_root, &self.export_root]
    }

    /// Folder to copy when an output is seeded from this input, plus the
    /// Export root's path relative to it.
    ///
    /// Disc layouts copy from the folder above `PS3_GAME` so disc-level files
    /// come along.
    pub fn copy_root(&self) -> (PathBuf, PathBuf) {
        let export = &self.export_root;

        let disc_root = export
            .ancestors()
            .find(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().eq_ignore_ascii_case("PS3_GAME"))
                    .unwrap_or(false)
            })
            .and_then(Path::parent);
        if let Some(disc_root) = disc_root {
            if let Ok(rel) = export.strip_prefix(disc_root) {
                return (disc_root.to_path_buf(), rel.to_path_buf());
            }
        }

        let original = fs::canonicalize(&self.original).unwrap_or_else(|_| self.original.clone());
        if let Ok(rel) = export.strip_prefix(&original) {
            return (original.clone(), rel.to_path_buf());
        }
        if let Ok(rel) = export.strip_prefix(&self.resolved_root) {
            return (self.resolved_root.clone(), rel.to_path_buf());
        }
        (export.clone(), PathBuf::new())
    }
}
