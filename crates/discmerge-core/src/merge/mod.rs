//! Full union merge of a base dataset with donors.
//!
//! The base tree is copied as-is into a fresh output folder, then each donor's
//! songs are folded in: song folders copied, texture pages appended under new
//! numbers, acts canonicalized, and songs remapped. Duplicate IDs must be
//! fingerprint-identical; identical donor copies are dropped.
//!
//! There is no temp-folder publish step here. A failure after the base copy
//! leaves an incomplete output behind, so [`MergeEngine::run`] runs a plan
//! first and refuses to start when it reports unresolved duplicates.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::build::{
    import_pages, merge_songlists, next_page_offset, write_output, ActCanonicalizer, BuildPhase,
    Catalog, ProgressCallback, Reporter, Templates,
};
use crate::config::{BuildOptions, CollisionPolicy};
use crate::dataset::{ensure_textures_dir, require_textures_dir, ExportDataset};
use crate::error::{Error, Result};
use crate::fingerprint::fingerprint_song_dir;
use crate::fsops::{copy_dir_all, copy_tree, LinkMode};
use crate::plan::{make_plan, DuplicateClass};

/// Counters from a finished merge
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeStats {
    pub output: PathBuf,
    pub merged_song_count: usize,
    pub base_song_count: usize,
    /// Songs listed by all donors, before de-duplication
    pub donor_song_count: usize,
    pub acts_count: usize,
    /// Texture pages present in the output
    pub texture_pages: usize,
    pub cache_files: u32,
    /// Donor songs dropped as identical duplicates
    pub identical_duplicates: Vec<u32>,
}

/// Merge engine
pub struct MergeEngine {
    base: ExportDataset,
    donors: Vec<ExportDataset>,
    options: BuildOptions,
    progress_callback: Option<ProgressCallback>,
}

impl MergeEngine {
    pub fn new(base: ExportDataset, donors: Vec<ExportDataset>) -> Self {
        Self {
            base,
            donors,
            options: BuildOptions::default(),
            progress_callback: None,
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Set a progress callback
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Merge into `out_dir`, which must not exist yet
    pub fn run(&self, out_dir: &Path) -> Result<MergeStats> {
        self.options.validate()?;
        let reporter = Reporter::new(self.progress_callback.as_ref(), None, out_dir.to_path_buf());

        if out_dir.exists() {
            return Err(Error::OverwriteRefused {
                path: out_dir.to_path_buf(),
                reason: "output folder already exists".to_string(),
            });
        }

        reporter.step(BuildPhase::Preflight, "Checking inputs");
        self.base.require_build_inputs()?;
        let config_template = self.base.require_config_doc()?;
        for donor in &self.donors {
            donor.require_build_inputs()?;
            require_textures_dir(donor.export_root(), &donor.label)?;
        }
        make_plan(
            &self.base,
            &self.donors,
            self.options.target_version,
            CollisionPolicy::Fail,
        )?
        .ensure_resolved()?;

        let (copy_root, rel_export) = self.base.location.copy_root();
        reporter.step(
            BuildPhase::Copy,
            format!("Copying base {} -> {}", copy_root.display(), out_dir.display()),
        );
        let copied = copy_tree(&copy_root, out_dir, LinkMode::Copy, |rel, _| {
            !crate::build::is_packed_artifact(rel)
        })?;
        debug!("Base copy: {} file(s)", copied.files());

        let out_export = out_dir.join(&rel_export);
        if !out_export.is_dir() {
            return Err(Error::corrupt(format!(
                "output Export root missing after copy: {}",
                out_export.display()
            )));
        }
        let out_textures = ensure_textures_dir(&out_export)?;

        let (acts, base_remap) = ActCanonicalizer::from_base(self.base.acts());
        let mut catalog = Catalog {
            songs: self.base.songs().map(|s| (s.id, s.clone())).collect(),
            covers: self.base.covers().map(|c| (c.song_id, c.clone())).collect(),
            acts,
        };
        for song in catalog.songs.values_mut() {
            catalog.acts.remap_song(song, &base_remap);
        }

        let mut identical_duplicates = BTreeSet::new();
        let mut donor_song_count = 0;

        for (index, donor) in self.donors.iter().enumerate() {
            reporter.count(
                BuildPhase::Import,
                format!("Importing donor {}", donor.label),
                index,
                self.donors.len(),
            );
            let donor_ids = donor.song_ids();
            donor_song_count += donor_ids.len();

            let mut unresolved = Vec::new();
            let mut identical = BTreeSet::new();
            for &song_id in donor_ids.iter().filter(|id| catalog.songs.contains_key(id)) {
                let existing = fingerprint_song_dir(&out_export.join(song_id.to_string()));
                let incoming = donor.fingerprint(song_id);
                if DuplicateClass::classify(existing.as_ref(), incoming.as_ref()).is_identical() {
                    identical.insert(song_id);
                } else {
                    unresolved.push(song_id);
                }
            }
            if !unresolved.is_empty() {
                return Err(Error::UnresolvedDuplicate { song_ids: unresolved });
            }
            if !identical.is_empty() {
                info!(
                    "De-duplicated {} identical song(s) from {}",
                    identical.len(),
                    donor.label
                );
            }

            let imported: Vec<u32> = donor_ids.difference(&identical).copied().collect();
            for (n, &song_id) in imported.iter().enumerate() {
                let source = donor.song_dir(song_id);
                if !source.is_dir() {
                    return Err(Error::missing(format!(
                        "song folder for {} in {}: {}",
                        song_id,
                        donor.label,
                        source.display()
                    )));
                }
                copy_dir_all(&source, &out_export.join(song_id.to_string()), LinkMode::Copy)?;
                if n % 50 == 0 {
                    reporter.count(BuildPhase::CopySongs, "Copying song folders", n, imported.len());
                }
            }

            let donor_textures = require_textures_dir(donor.export_root(), &donor.label)?;
            let offset = next_page_offset(&out_textures)?;
            let pages = import_pages(&donor_textures, &out_textures, offset, None, &reporter)?;
            reporter.step(
                BuildPhase::Textures,
                format!("{} page(s) from {} at offset {}", pages.files_copied, donor.label, offset),
            );

            for &song_id in &imported {
                let Some(cover) = donor.cover(song_id) else {
                    continue;
                };
                if catalog.covers.contains_key(&song_id) {
                    return Err(Error::corrupt(format!("duplicate cover entry for song {}", song_id)));
                }
                let page = cover.page().ok_or_else(|| {
                    Error::corrupt(format!(
                        "unrecognized cover TEXTURE for song {}: {}",
                        song_id,
                        cover.texture()
                    ))
                })?;
                let new_page = pages.mapping.get(&page).copied().ok_or_else(|| {
                    Error::missing(format!(
                        "texture page_{} for song {} in {} textures",
                        page, song_id, donor.label
                    ))
                })?;
                catalog.covers.insert(song_id, cover.with_page(new_page));
            }

            let remap = catalog.acts.import(donor.acts());
            for &song_id in &imported {
                if let Some(song) = donor.song(song_id) {
                    let mut song = song.clone();
                    catalog.acts.remap_song(&mut song, &remap);
                    catalog.songs.insert(song_id, song);
                }
            }

            identical_duplicates.extend(identical);
        }

        let merged_ids = catalog.song_ids();
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

        let templates = Templates {
            songs: self.base.songs_doc(),
            acts: self.base.require_acts_doc()?,
            covers: self.base.require_covers_doc()?,
            config: config_template,
        };
        let summary = write_output(
            &out_export,
            catalog,
            &songlists,
            &templates,
            &self.options,
            &reporter,
        )?;

        reporter.step(BuildPhase::Done, format!("Merged {} songs", summary.song_count));
        Ok(MergeStats {
            output: out_dir.to_path_buf(),
            merged_song_count: summary.song_count,
            base_song_count: self.base.song_ids().len(),
            donor_song_count,
            acts_count: summary.act_count,
            texture_pages: summary.texture_pages,
            cache_files: summary.cache_files,
            identical_duplicates: identical_duplicates.into_iter().collect(),
        })
    }
}
