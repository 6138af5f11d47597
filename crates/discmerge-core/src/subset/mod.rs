//! Subset build: a new disc folder holding only selected songs.
//!
//! The build happens in a sibling `<name>._BUILDING_tmp` folder that is
//! renamed into place only after every check passed. An existing output is
//! vetted by [`guard`] and moved aside first. On cancellation the temp folder
//! is kept as `<name>.__CANCELLED` with a note explaining why.
//!
//! Each selected song comes from exactly one source: an explicit route from
//! [`SubsetBuilder::with_preferred_sources`], else the base if it has the
//! song, else the first donor that does. A song two sources would both
//! provide must be fingerprint-identical.

mod guard;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::build::{
    cancel_flag, import_pages, is_packed_artifact, merge_songlists, next_page_offset,
    write_output, ActCanonicalizer, BuildPhase, CancelCheck, Catalog, ProgressCallback, Reporter,
    Templates,
};
use crate::config::BuildOptions;
use crate::dataset::{ensure_textures_dir, require_textures_dir, DatasetLocation, ExportDataset};
use crate::error::{Error, Result};
use crate::fingerprint::fingerprint_song_dir;
use crate::fsops::{
    copy_dir_all, copy_tree, list_song_dirs, numeric_dir_name, rename_with_retries, unique_path,
    with_name_suffix, LinkMode,
};
use crate::plan::DuplicateClass;

/// Label under which the base dataset is addressed in routes and reports
pub const BASE_LABEL: &str = "Base";

const TEMP_SUFFIX: &str = "._BUILDING_tmp";
const CANCELLED_SUFFIX: &str = ".__CANCELLED";
const CANCEL_NOTE: &str = "__BUILD_CANCELLED__.txt";

/// Outcome of a finished subset build
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubsetReport {
    pub output: PathBuf,
    /// Previous output, if one was kept
    pub backup: Option<PathBuf>,
    pub merged_song_count: usize,
    /// Source label to the song IDs taken from it
    pub imported_by_source: BTreeMap<String, Vec<u32>>,
    pub texture_pages_copied: usize,
    pub melody_files_created: usize,
}

/// Source index: 0 is the base, `i + 1` is donor `i`
type SourceIndex = usize;

/// Subset builder
pub struct SubsetBuilder {
    base: ExportDataset,
    donors: Vec<ExportDataset>,
    options: BuildOptions,
    preferred_sources: BTreeMap<u32, String>,
    allow_overwrite: bool,
    keep_backup: bool,
    fast_update: bool,
    progress_callback: Option<ProgressCallback>,
    cancel_check: Option<CancelCheck>,
}

impl SubsetBuilder {
    /// Create a builder; donors are consulted in the given order
    pub fn new(base: ExportDataset, donors: Vec<ExportDataset>) -> Self {
        Self {
            base,
            donors,
            options: BuildOptions::default(),
            preferred_sources: BTreeMap::new(),
            allow_overwrite: false,
            keep_backup: true,
            fast_update: false,
            progress_callback: None,
            cancel_check: None,
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Force songs to come from a named source (`Base` or a donor label)
    pub fn with_preferred_sources(mut self, routes: BTreeMap<u32, String>) -> Self {
        self.preferred_sources = routes;
        self
    }

    /// Allow replacing an existing output folder that passes the guardrails
    pub fn allow_overwrite(mut self, allow: bool) -> Self {
        self.allow_overwrite = allow;
        self
    }

    pub fn keep_backup(mut self, keep: bool) -> Self {
        self.keep_backup = keep;
        self
    }

    /// Seed the build from the kept backup with hardlinks
    pub fn fast_update(mut self, enabled: bool) -> Self {
        self.fast_update = enabled;
        self
    }

    /// Set a progress callback
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn with_cancel_check(mut self, check: CancelCheck) -> Self {
        self.cancel_check = Some(check);
        self
    }

    /// Set a cancellation token for aborting the build
    pub fn with_cancellation(self, token: Arc<AtomicBool>) -> Self {
        self.with_cancel_check(cancel_flag(token))
    }

    fn source(&self, index: SourceIndex) -> &ExportDataset {
        match index {
            0 => &self.base,
            i => &self.donors[i - 1],
        }
    }

    fn source_count(&self) -> usize {
        self.donors.len() + 1
    }

    /// Build `selected` into `out_dir`
    pub fn build(&self, out_dir: &Path, selected: &BTreeSet<u32>) -> Result<SubsetReport> {
        let early = Reporter::new(
            self.progress_callback.as_ref(),
            self.cancel_check.as_ref(),
            out_dir.to_path_buf(),
        );
        early.step(BuildPhase::Preflight, format!("Subset build of {} song(s)", selected.len()));
        self.validate(selected)?;
        early.checkpoint("Cancelled before start")?;

        let routes = self.route(selected)?;

        let inputs: Vec<(&str, &DatasetLocation)> = (0..self.source_count())
            .map(|i| {
                let source = self.source(i);
                (source.label.as_str(), &source.location)
            })
            .collect();
        let backup = guard::prepare_existing_output(
            out_dir,
            &inputs,
            self.allow_overwrite,
            self.keep_backup,
            &self.options,
        )?;

        let temp_dir = with_name_suffix(out_dir, TEMP_SUFFIX);
        if temp_dir.exists() {
            return Err(Error::OverwriteRefused {
                path: temp_dir,
                reason: "temp build folder already exists; a previous build may have failed"
                    .to_string(),
            });
        }

        let reporter = Reporter::new(
            self.progress_callback.as_ref(),
            self.cancel_check.as_ref(),
            temp_dir.clone(),
        );
        match self.build_into(&temp_dir, out_dir, &routes, backup.as_deref(), &reporter) {
            Ok(mut report) => {
                report.backup = backup;
                Ok(report)
            }
            Err(Error::Cancelled { reason, .. }) => {
                Err(self.preserve_cancelled(&temp_dir, out_dir, reason))
            }
            Err(e) => Err(e),
        }
    }

    fn validate(&self, selected: &BTreeSet<u32>) -> Result<()> {
        if selected.is_empty() {
            return Err(Error::InvalidOptions("no songs selected".to_string()));
        }
        self.options.validate()?;

        let mut labels = BTreeSet::new();
        labels.insert(BASE_LABEL);
        for donor in &self.donors {
            if !labels.insert(donor.label.as_str()) {
                return Err(Error::InvalidOptions(format!(
                    "source label used twice: {}",
                    donor.label
                )));
            }
        }
        for (song_id, label) in &self.preferred_sources {
            if !labels.contains(label.as_str()) {
                return Err(Error::InvalidOptions(format!(
                    "song {} routed to unknown source '{}'",
                    song_id, label
                )));
            }
        }

        self.base.require_build_inputs()?;
        self.base.require_config_doc()?;
        for donor in &self.donors {
            donor.require_build_inputs()?;
        }
        Ok(())
    }

    /// Decide the source of every selected song
    fn route(&self, selected: &BTreeSet<u32>) -> Result<BTreeMap<u32, SourceIndex>> {
        let explicit: BTreeMap<u32, &str> = self
            .preferred_sources
            .iter()
            .filter(|(id, _)| selected.contains(id))
            .map(|(id, label)| (*id, label.as_str()))
            .collect();

        let mut routes: BTreeMap<u32, SourceIndex> = BTreeMap::new();
        for &song_id in selected {
            let to_base = explicit.get(&song_id).map(|l| *l == BASE_LABEL).unwrap_or(true);
            if to_base && self.base.contains(song_id) {
                routes.insert(song_id, 0);
            }
        }

        let base_ids = self.base.song_ids();
        for (d, donor) in self.donors.iter().enumerate() {
            let index = d + 1;
            let mut wanted: BTreeSet<u32> = explicit
                .iter()
                .filter(|(_, label)| **label == donor.label)
                .map(|(id, _)| *id)
                .collect();
            wanted.extend(
                donor
                    .song_ids()
                    .intersection(selected)
                    .filter(|id| !base_ids.contains(id) && !explicit.contains_key(id)),
            );

            let mut unresolved = Vec::new();
            for &song_id in &wanted {
                if !donor.contains(song_id) {
                    return Err(Error::missing(format!(
                        "song {} routed to {} but not listed there",
                        song_id, donor.label
                    )));
                }
                if explicit.contains_key(&song_id) {
                    continue;
                }
                if let Some(&existing) = routes.get(&song_id) {
                    let planned = self.source(existing).fingerprint(song_id);
                    let incoming = donor.fingerprint(song_id);
                    if !DuplicateClass::classify(planned.as_ref(), incoming.as_ref()).is_identical() {
                        unresolved.push(song_id);
                    }
                }
            }
            if !unresolved.is_empty() {
                return Err(Error::UnresolvedDuplicate { song_ids: unresolved });
            }

            for song_id in wanted {
                routes.entry(song_id).or_insert(index);
            }
        }

        let missing: Vec<u32> = selected
            .iter()
            .filter(|id| !routes.contains_key(id))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(Error::missing(format!(
                "selected song(s) not provided by any source: {:?}",
                &missing[..missing.len().min(50)]
            )));
        }

        debug!("Routed {} song(s)", routes.len());
        Ok(routes)
    }

    fn build_into(
        &self,
        temp_dir: &Path,
        final_dir: &Path,
        routes: &BTreeMap<u32, SourceIndex>,
        backup: Option<&Path>,
        reporter: &Reporter<'_>,
    ) -> Result<SubsetReport> {
        let selected: BTreeSet<u32> = routes.keys().copied().collect();
        let seed = match backup.filter(|_| self.fast_update) {
            Some(backup) => {
                // A previous output mirrors the base layout
                let (_, base_rel) = self.base.location.copy_root();
                let export = if backup.join(&base_rel).is_dir() {
                    Some(backup.join(&base_rel))
                } else {
                    guard::find_export_root(backup)
                };
                match export {
                    Some(export) => {
                        let rel = export.strip_prefix(backup).unwrap_or(Path::new("")).to_path_buf();
                        info!("Fast update: seeding from {}", backup.display());
                        Some((backup.to_path_buf(), rel))
                    }
                    None => {
                        warn!("No Export folder in {}; doing a full build", backup.display());
                        None
                    }
                }
            }
            None => {
                if self.fast_update {
                    warn!("Fast update needs a kept backup of a previous output; doing a full build");
                }
                None
            }
        };
        let seeded = seed.is_some();

        let (copy_root, rel_export, mode, keep) = match seed {
            Some((root, rel)) => (root, rel, LinkMode::Hardlink, selected.clone()),
            None => {
                let (root, rel) = self.base.location.copy_root();
                let from_base: BTreeSet<u32> = routes
                    .iter()
                    .filter(|(_, source)| **source == 0)
                    .map(|(id, _)| *id)
                    .collect();
                (root, rel, LinkMode::Copy, from_base)
            }
        };

        reporter.step(
            BuildPhase::Copy,
            format!(
                "Copying {} (selected songs only) -> {}",
                copy_root.display(),
                temp_dir.display()
            ),
        );
        copy_tree(&copy_root, temp_dir, mode, |rel, is_dir| {
            if is_packed_artifact(rel) {
                return false;
            }
            if is_dir && rel.parent() == Some(rel_export.as_path()) {
                if let Some(song_id) = numeric_dir_name(rel) {
                    return keep.contains(&song_id);
                }
            }
            true
        })?;
        reporter.checkpoint("Cancelled after base copy")?;

        let out_export = temp_dir.join(&rel_export);
        if !out_export.is_dir() {
            return Err(Error::corrupt(format!(
                "output Export folder not found after copy: {}",
                out_export.display()
            )));
        }
        let out_textures = ensure_textures_dir(&out_export)?;

        reporter.step(BuildPhase::Prune, "Deleting unselected song folders");
        let mut pruned = 0;
        for (song_id, dir) in list_song_dirs(&out_export)? {
            if !selected.contains(&song_id) {
                fs::remove_dir_all(&dir)?;
                pruned += 1;
            }
        }
        debug!("Pruned {} song folder(s)", pruned);
        reporter.checkpoint("Cancelled after prune")?;

        let (acts, base_remap) = ActCanonicalizer::from_base(self.base.acts());
        let mut catalog = Catalog {
            acts,
            ..Catalog::default()
        };
        let mut report = SubsetReport::default();

        let base_ids: Vec<u32> = routes
            .iter()
            .filter(|(_, source)| **source == 0)
            .map(|(id, _)| *id)
            .collect();
        if seeded {
            self.place_song_folders(0, &base_ids, &out_export, true, reporter)?;
        }
        for &song_id in &base_ids {
            if let Some(song) = self.base.song(song_id) {
                let mut song = song.clone();
                catalog.acts.remap_song(&mut song, &base_remap);
                catalog.songs.insert(song_id, song);
            }
            if let Some(cover) = self.base.cover(song_id) {
                catalog.covers.insert(song_id, cover.clone());
            }
        }
        if !base_ids.is_empty() {
            report
                .imported_by_source
                .insert(BASE_LABEL.to_string(), base_ids.clone());
        }

        for index in 1..self.source_count() {
            let donor = self.source(index);
            let song_ids: Vec<u32> = routes
                .iter()
                .filter(|(_, source)| **source == index)
                .map(|(id, _)| *id)
                .collect();
            if song_ids.is_empty() {
                continue;
            }
            reporter.step(
                BuildPhase::Import,
                format!("Importing {} selected song(s) from {}", song_ids.len(), donor.label),
            );
            self.place_song_folders(index, &song_ids, &out_export, seeded, reporter)?;

            let mut needed_pages = BTreeSet::new();
            for &song_id in &song_ids {
                let cover = donor.cover(song_id).ok_or_else(|| {
                    Error::missing(format!(
                        "covers.xml entry for selected song {} in {}",
                        song_id, donor.label
                    ))
                })?;
                let page = cover.page().ok_or_else(|| {
                    Error::corrupt(format!(
                        "unrecognized cover TEXTURE for song {}: {}",
                        song_id,
                        cover.texture()
                    ))
                })?;
                needed_pages.insert(page);
            }

            let donor_textures = require_textures_dir(donor.export_root(), &donor.label)?;
            let offset = next_page_offset(&out_textures)?;
            reporter.step(
                BuildPhase::Textures,
                format!(
                    "{}: copying {} texture page(s) at offset {}",
                    donor.label,
                    needed_pages.len(),
                    offset
                ),
            );
            let pages = import_pages(
                &donor_textures,
                &out_textures,
                offset,
                Some(&needed_pages),
                reporter,
            )?;
            report.texture_pages_copied += pages.files_copied;

            let remap = catalog.acts.import(donor.acts());
            for &song_id in &song_ids {
                if catalog.covers.contains_key(&song_id) {
                    return Err(Error::corrupt(format!(
                        "duplicate cover entry for selected song {}",
                        song_id
                    )));
                }
                if let Some(cover) = donor.cover(song_id) {
                    if let Some(new_page) = cover.page().and_then(|p| pages.mapping.get(&p)) {
                        catalog.covers.insert(song_id, cover.with_page(*new_page));
                    }
                }
                if let Some(song) = donor.song(song_id) {
                    let mut song = song.clone();
                    catalog.acts.remap_song(&mut song, &remap);
                    catalog.songs.insert(song_id, song);
                }
            }
            report
                .imported_by_source
                .insert(donor.label.clone(), song_ids);
        }

        let merged_ids = catalog.song_ids();
        let unmerged: Vec<u32> = selected.difference(&merged_ids).copied().collect();
        if !unmerged.is_empty() {
            return Err(Error::missing(format!(
                "selected song(s) missing from the merged catalogue: {:?}",
                unmerged
            )));
        }

        let base_songlists = self.base.require_songlists_doc()?;
        let donor_songlists = self
            .donors
            .iter()
            .map(ExportDataset::require_songlists_doc)
            .collect::<Result<Vec<_>>>()?;
        let songlists = merge_songlists(
            self.options.songlist_mode,
            base_songlists,
            &donor_songlists,
            &merged_ids,
        );

        reporter.checkpoint("Cancelled before XML write")?;
        let templates = Templates {
            songs: self.base.songs_doc(),
            acts: self.base.require_acts_doc()?,
            covers: self.base.require_covers_doc()?,
            config: self.base.require_config_doc()?,
        };
        let summary = write_output(
            &out_export,
            catalog,
            &songlists,
            &templates,
            &self.options,
            reporter,
        )?;
        report.merged_song_count = summary.song_count;
        report.melody_files_created = summary.melody_files_created;

        reporter.checkpoint("Cancelled before finalize")?;
        reporter.step(
            BuildPhase::Finalize,
            format!("Renaming temp output -> {}", final_dir.display()),
        );
        rename_with_retries(
            temp_dir,
            final_dir,
            self.options.rename_max_attempts,
            self.options.rename_retry_delay,
        )?;

        reporter.count(
            BuildPhase::Done,
            format!("Build complete: {} songs -> {}", summary.song_count, final_dir.display()),
            summary.song_count,
            summary.song_count,
        );
        report.output = final_dir.to_path_buf();
        Ok(report)
    }

    /// Put each song's folder from `source` into the output.
    ///
    /// A folder already in the output (seeded from a backup) is kept when its
    /// melody matches the source's and replaced otherwise.
    fn place_song_folders(
        &self,
        index: SourceIndex,
        song_ids: &[u32],
        out_export: &Path,
        seeded: bool,
        reporter: &Reporter<'_>,
    ) -> Result<()> {
        let source = self.source(index);
        let mode = if seeded { LinkMode::Hardlink } else { LinkMode::Copy };
        let total = song_ids.len();

        for (n, &song_id) in song_ids.iter().enumerate() {
            reporter.checkpoint("Cancelled during song folder copy")?;
            if total <= 40 || n % 10 == 0 {
                reporter.count(
                    BuildPhase::CopySongs,
                    format!("{}: copying song folders", source.label),
                    n + 1,
                    total,
                );
            }

            let dest = out_export.join(song_id.to_string());
            if dest.is_dir() {
                let present = fingerprint_song_dir(&dest);
                let wanted = source.fingerprint(song_id);
                if DuplicateClass::classify(present.as_ref(), wanted.as_ref()).is_identical() {
                    debug!("Song {}: reusing seeded folder", song_id);
                    continue;
                }
                debug!("Song {}: seeded folder differs from {}, replacing", song_id, source.label);
                fs::remove_dir_all(&dest)?;
            }

            let from = source.song_dir(song_id);
            if !from.is_dir() {
                return Err(Error::missing(format!(
                    "song folder for {} in {}: {}",
                    song_id,
                    source.label,
                    from.display()
                )));
            }
            copy_dir_all(&from, &dest, mode)?;
        }
        Ok(())
    }

    /// Mark and keep a cancelled build's temp folder
    fn preserve_cancelled(&self, temp_dir: &Path, out_dir: &Path, reason: String) -> Error {
        if !temp_dir.exists() {
            return Error::Cancelled {
                partial_output: temp_dir.to_path_buf(),
                reason,
            };
        }

        let note = format!("Build cancelled.\nReason: {}\n", reason);
        if let Err(e) = fs::write(temp_dir.join(CANCEL_NOTE), note) {
            warn!("Could not write cancel note: {}", e);
        }

        let cancelled = unique_path(with_name_suffix(out_dir, CANCELLED_SUFFIX));
        let partial_output = match rename_with_retries(
            temp_dir,
            &cancelled,
            self.options.rename_max_attempts,
            self.options.rename_retry_delay,
        ) {
            Ok(()) => cancelled,
            Err(e) => {
                warn!("Could not rename cancelled build: {}", e);
                temp_dir.to_path_buf()
            }
        };
        info!("Build cancelled ({}); partial output at {}", reason, partial_output.display());
        Error::Cancelled {
            partial_output,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_and_cancel_names() {
        let out = Path::new("/data/Mix");
        assert_eq!(
            with_name_suffix(out, TEMP_SUFFIX),
            PathBuf::from("/data/Mix._BUILDING_tmp")
        );
        assert_eq!(
            with_name_suffix(out, CANCELLED_SUFFIX),
            PathBuf::from("/data/Mix.__CANCELLED")
        );
    }
}
