//! Forward synthesis of per-version melody documents

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::build::progress::{BuildPhase, Reporter};
use crate::cache::melody_path;
use crate::error::{Error, Result};
use crate::fingerprint::melody_files;

/// Make sure every song has `melody_{v}.xml` for `v` in `1..=target_version`.
///
/// Missing versions are filled with the bytes of the highest version the
/// folder has. Existing files are never touched. Returns the number of files
/// written.
pub(crate) fn ensure_versioned_melody_files(
    export_root: &Path,
    song_ids: &BTreeSet<u32>,
    target_version: u32,
    reporter: &Reporter<'_>,
) -> Result<usize> {
    let total = song_ids.len();
    let mut created = 0;

    for (index, &song_id) in song_ids.iter().enumerate() {
        if index % 25 == 0 {
            reporter.checkpoint("Cancelled during melody synthesis")?;
            reporter.count(BuildPhase::Melody, "Synthesizing melody versions", index, total);
        }

        let song_dir = export_root.join(song_id.to_string());
        let (source_version, source) = melody_files(&song_dir).pop().ok_or_else(|| {
            Error::missing(format!(
                "melody document for song {}: no melody_*.xml in {}",
                song_id,
                song_dir.display()
            ))
        })?;

        for version in 1..=target_version {
            let dest = melody_path(export_root, song_id, version);
            if dest.exists() {
                continue;
            }
            fs::copy(&source, &dest)?;
            created += 1;
            debug!(
                "Song {}: melody_{}.xml synthesized from melody_{}.xml",
                song_id, version, source_version
            );
        }

        if !melody_path(export_root, song_id, target_version).is_file() {
            return Err(Error::missing(format!(
                "melody_{}.xml for song {}",
                target_version, song_id
            )));
        }
    }

    reporter.count(BuildPhase::Melody, "Melody versions ready", total, total);
    Ok(created)
}
