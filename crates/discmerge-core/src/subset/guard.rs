//! Overwrite guardrails for subset outputs

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use crate::config::BuildOptions;
use crate::dataset::{DatasetLocation, CONFIG_FILE, COVERS_FILE};
use crate::error::{Error, Result};
use crate::fsops::{is_effectively_empty, numeric_dir_name, rename_with_retries, unique_path, with_name_suffix};

/// Where an output's Export folder may sit, most common first
fn export_candidates(root: &Path) -> [PathBuf; 4] {
    [
        root.join("PS3_GAME").join("USRDIR").join("FileSystem").join("Export"),
        root.join("USRDIR").join("FileSystem").join("Export"),
        root.join("Export"),
        root.to_path_buf(),
    ]
}

/// First existing Export candidate under an output root
pub(crate) fn find_export_root(root: &Path) -> Option<PathBuf> {
    export_candidates(root).into_iter().find(|p| p.is_dir())
}

fn has_songs_file(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries.flatten().any(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with("songs_") && name.ends_with(".xml")
            })
        })
        .unwrap_or(false)
}

fn has_numeric_song_folders(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .any(|entry| entry.path().is_dir() && numeric_dir_name(&entry.path()).is_some())
        })
        .unwrap_or(false)
}

/// Whether `root` is empty or carries the signature of a previous output.
///
/// `Err` holds the reason it does not.
pub(crate) fn check_prior_output(root: &Path) -> std::result::Result<String, String> {
    if !root.is_dir() {
        return Err("path is not a directory".to_string());
    }
    if is_effectively_empty(root).unwrap_or(false) {
        return Ok("folder is empty".to_string());
    }

    for export in export_candidates(root) {
        if !export.is_dir() || !has_songs_file(&export) {
            continue;
        }
        if export.join(CONFIG_FILE).is_file()
            || export.join(COVERS_FILE).is_file()
            || has_numeric_song_folders(&export)
        {
            let rel = export
                .strip_prefix(root)
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            return Ok(format!("found Export signature at '{}'", rel));
        }
    }

    if root.join("PS3_GAME").exists() {
        Err("PS3_GAME exists but no Export signature (songs/config) was found".to_string())
    } else {
        Err("no Export signature (songs/config) was found".to_string())
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Refuse an output that is one of the inputs' original, resolved, or Export paths
pub(crate) fn ensure_not_an_input(out_dir: &Path, inputs: &[(&str, &DatasetLocation)]) -> Result<()> {
    let out = canonical(out_dir);
    let names = ["original", "resolved_root", "export_root"];
    let mut hits = Vec::new();
    for (label, location) in inputs {
        for (path, name) in location.identity_paths().into_iter().zip(names) {
            if canonical(path) == out {
                hits.push(format!("{}:{}", label, name));
            }
        }
    }

    if hits.is_empty() {
        return Ok(());
    }
    Err(Error::OverwriteRefused {
        path: out_dir.to_path_buf(),
        reason: format!("output matches an input ({})", hits.join(", ")),
    })
}

/// Vet an existing output folder and move it aside.
///
/// Returns the kept backup folder, if one was made. Nothing is touched unless
/// every check passes.
pub(crate) fn prepare_existing_output(
    out_dir: &Path,
    inputs: &[(&str, &DatasetLocation)],
    allow_overwrite: bool,
    keep_backup: bool,
    options: &BuildOptions,
) -> Result<Option<PathBuf>> {
    if !out_dir.exists() {
        return Ok(None);
    }
    if !allow_overwrite {
        return Err(Error::OverwriteRefused {
            path: out_dir.to_path_buf(),
            reason: "output already exists".to_string(),
        });
    }

    ensure_not_an_input(out_dir, inputs)?;
    let signature = check_prior_output(out_dir).map_err(|reason| Error::OverwriteRefused {
        path: out_dir.to_path_buf(),
        reason: format!("folder does not look like a previous output: {}", reason),
    })?;
    info!("Overwrite allowed: {}", signature);

    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    if keep_backup {
        let backup = unique_path(with_name_suffix(out_dir, &format!(".__BACKUP_{}", stamp)));
        info!("Moving existing output to backup {}", backup.display());
        rename_with_retries(
            out_dir,
            &backup,
            options.rename_max_attempts,
            options.rename_retry_delay,
        )?;
        return Ok(Some(backup));
    }

    let discard = unique_path(with_name_suffix(out_dir, &format!(".__OVERWRITTEN_{}", stamp)));
    rename_with_retries(
        out_dir,
        &discard,
        options.rename_max_attempts,
        options.rename_retry_delay,
    )?;
    if let Err(e) = fs::remove_dir_all(&discard) {
        warn!("Could not delete {}: {}", discard.display(), e);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::resolve_input;
    use tempfile::TempDir;

    #[test]
    fn test_prior_output_signature() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("out");
        fs::create_dir_all(&root).unwrap();
        assert!(check_prior_output(&root).is_ok());

        fs::write(root.join("notes.txt"), "keep me").unwrap();
        assert!(check_prior_output(&root).is_err());

        let export = root.join("PS3_GAME/USRDIR/FileSystem/Export");
        fs::create_dir_all(export.join("12")).unwrap();
        fs::write(export.join("songs_6_0.xml"), "<SONGS/>").unwrap();
        let found = check_prior_output(&root).unwrap();
        assert!(found.contains("Export"));
    }

    #[test]
    fn test_input_paths_refused() {
        let temp = TempDir::new().unwrap();
        let export = temp.path().join("disc/PS3_GAME/USRDIR/FileSystem/Export");
        fs::create_dir_all(&export).unwrap();
        fs::write(export.join("config.xml"), "<CONFIG/>").unwrap();
        let location = resolve_input(&temp.path().join("disc")).unwrap();

        let err = ensure_not_an_input(&export, &[("Base", &location)]).unwrap_err();
        assert!(matches!(err, Error::OverwriteRefused { .. }));
        assert!(ensure_not_an_input(&temp.path().join("elsewhere"), &[("Base", &location)]).is_ok());
    }

    #[test]
    fn test_backup_made_when_overwriting() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("out");
        fs::create_dir_all(out.join("Export")).unwrap();
        fs::write(out.join("Export/songs_1_0.xml"), "<SONGS/>").unwrap();
        fs::write(out.join("Export/config.xml"), "<CONFIG/>").unwrap();

        let backup = prepare_existing_output(&out, &[], true, true, &BuildOptions::default())
            .unwrap()
            .unwrap();
        assert!(!out.exists());
        assert!(backup.join("Export/config.xml").is_file());
        assert!(backup
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("out.__BACKUP_"));
    }

    #[test]
    fn test_overwrite_needs_permission() {
        let temp = TempDir::new().unwrap();
        let err =
            prepare_existing_output(temp.path(), &[], false, true, &BuildOptions::default()).unwrap_err();
        assert!(matches!(err, Error::OverwriteRefused { .. }));
        assert!(temp.path().exists());
    }
}
