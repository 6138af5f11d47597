//! Dry-run planning and duplicate classification.
//!
//! A plan walks the base and each donor in order, tracking the projected
//! merged song set, and classifies every song ID that a donor shares with
//! that set by comparing melody fingerprints. Nothing is written.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::CollisionPolicy;
use crate::dataset::ExportDataset;
use crate::error::{Error, Result};
use crate::fingerprint::MelodyFingerprint;

/// How two same-ID songs compare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateClass {
    /// Both fingerprints exist and match
    Identical,
    /// Fingerprints differ, or at least one side could not be fingerprinted
    Unresolved,
}

impl DuplicateClass {
    pub fn classify(a: Option<&MelodyFingerprint>, b: Option<&MelodyFingerprint>) -> Self {
        match (a, b) {
            (Some(a), Some(b)) if a == b => Self::Identical,
            _ => Self::Unresolved,
        }
    }

    pub fn is_identical(self) -> bool {
        self == Self::Identical
    }
}

/// Per-dataset facts shown in a plan
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub label: String,
    pub input_path: PathBuf,
    pub export_root: PathBuf,
    pub max_bank: u32,
    pub chosen_bank: u32,
    pub song_count: usize,
    /// First 20 song IDs, ascending
    pub song_ids_sample: Vec<u32>,
    pub missing_song_folders: usize,
    /// Songs with no fingerprintable melody document
    pub missing_melody_xml: usize,
    /// Cover entries whose texture page file is absent
    pub missing_cover_pages: usize,
    pub warnings: Vec<String>,
}

/// One shared song ID
#[derive(Debug, Clone, Serialize)]
pub struct CollisionInfo {
    pub song_id: u32,
    /// Donor that introduced the collision
    pub donor: String,
    pub base_fingerprint: Option<MelodyFingerprint>,
    pub donor_fingerprint: Option<MelodyFingerprint>,
    pub class: DuplicateClass,
}

/// Result of [`make_plan`]
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub base: DatasetSummary,
    pub donors: Vec<DatasetSummary>,
    pub target_version: u32,
    pub collision_policy: CollisionPolicy,
    /// Projected size of the merged catalogue under `collision_policy`
    pub merged_song_count: usize,
    pub collisions: Vec<CollisionInfo>,
    pub identical_duplicates: Vec<u32>,
    pub unresolved_duplicates: Vec<u32>,
    pub notes: Vec<String>,
}

impl PlanReport {
    /// `Err(UnresolvedDuplicate)` if any collision is unresolved
    pub fn ensure_resolved(&self) -> Result<()> {
        if self.unresolved_duplicates.is_empty() {
            return Ok(());
        }
        Err(Error::UnresolvedDuplicate {
            song_ids: self.unresolved_duplicates.clone(),
        })
    }

    pub fn has_unresolved(&self) -> bool {
        !self.unresolved_duplicates.is_empty()
    }
}

/// Fingerprints of every song in a dataset, plus its summary
fn survey(
    dataset: &ExportDataset,
) -> Result<(DatasetSummary, BTreeMap<u32, Option<MelodyFingerprint>>)> {
    let mut fingerprints = BTreeMap::new();
    let mut missing_song_folders = 0;
    let mut missing_melody_xml = 0;

    for song_id in dataset.song_ids() {
        if !dataset.song_dir(song_id).is_dir() {
            missing_song_folders += 1;
        }
        let fingerprint = dataset.fingerprint(song_id);
        if fingerprint.is_none() {
            missing_melody_xml += 1;
        }
        fingerprints.insert(song_id, fingerprint);
    }

    let pages = dataset.texture_pages()?;
    let missing_cover_pages = dataset
        .cover_pages()
        .values()
        .filter(|page| !pages.contains_key(page))
        .count();

    let summary = DatasetSummary {
        label: dataset.label.clone(),
        input_path: dataset.location.original.clone(),
        export_root: dataset.export_root().to_path_buf(),
        max_bank: dataset.max_bank,
        chosen_bank: dataset.bank,
        song_count: fingerprints.len(),
        song_ids_sample: fingerprints.keys().take(20).copied().collect(),
        missing_song_folders,
        missing_melody_xml,
        missing_cover_pages,
        warnings: dataset.location.warnings.clone(),
    };
    Ok((summary, fingerprints))
}

/// Compute a dry-run merge plan for `base` plus `donors`, in order
pub fn make_plan(
    base: &ExportDataset,
    donors: &[ExportDataset],
    target_version: u32,
    collision_policy: CollisionPolicy,
) -> Result<PlanReport> {
    if target_version < 1 {
        return Err(Error::InvalidOptions(
            "target_version must be at least 1".to_string(),
        ));
    }

    let (base_summary, base_fingerprints) = survey(base)?;
    let mut merged: BTreeMap<u32, Option<MelodyFingerprint>> = base_fingerprints;

    let mut donor_summaries = Vec::with_capacity(donors.len());
    let mut collisions = Vec::new();
    let mut identical = BTreeSet::new();
    let mut unresolved = BTreeSet::new();

    for donor in donors {
        let (summary, fingerprints) = survey(donor)?;
        donor_summaries.push(summary);

        let shared: BTreeSet<u32> = fingerprints
            .keys()
            .filter(|id| merged.contains_key(id))
            .copied()
            .collect();

        for &song_id in &shared {
            let existing = merged.get(&song_id).and_then(Option::as_ref);
            let incoming = fingerprints.get(&song_id).and_then(Option::as_ref);
            let class = DuplicateClass::classify(existing, incoming);
            debug!("Song {} shared with {}: {:?}", song_id, donor.label, class);

            if class.is_identical() {
                identical.insert(song_id);
            } else {
                unresolved.insert(song_id);
            }
            collisions.push(CollisionInfo {
                song_id,
                donor: donor.label.clone(),
                base_fingerprint: existing.cloned(),
                donor_fingerprint: incoming.cloned(),
                class,
            });
        }

        for (song_id, fingerprint) in fingerprints {
            let take = match collision_policy {
                CollisionPolicy::PreferDonor => true,
                CollisionPolicy::PreferBase => !shared.contains(&song_id),
                CollisionPolicy::Fail => !unresolved.contains(&song_id),
            };
            if take {
                merged.insert(song_id, fingerprint);
            }
        }
    }

    let mut notes = Vec::new();
    if !unresolved.is_empty() && collision_policy == CollisionPolicy::Fail {
        notes.push(format!(
            "Unresolved duplicate song IDs detected ({}). The build stops until they are resolved.",
            unresolved.len()
        ));
    }
    if !identical.is_empty() {
        notes.push(format!(
            "Identical duplicates detected ({}). These are de-duplicated by melody fingerprint.",
            identical.len()
        ));
    }
    notes.push(format!(
        "Output target_version={}: the merged catalogue is replicated into banks 1..{}.",
        target_version, target_version
    ));
    notes.push(format!(
        "melodies_*.chc is rebuilt from Export/<id>/melody_{}.xml; missing melody versions are \
         synthesized from the highest one each song has.",
        target_version
    ));

    info!(
        "Plan: {} merged song(s), {} identical and {} unresolved duplicate(s)",
        merged.len(),
        identical.len(),
        unresolved.len()
    );

    Ok(PlanReport {
        base: base_summary,
        donors: donor_summaries,
        target_version,
        collision_policy,
        merged_song_count: merged.len(),
        collisions,
        identical_duplicates: identical.into_iter().collect(),
        unresolved_duplicates: unresolved.into_iter().collect(),
        notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint_str;

    #[test]
    fn test_classify() {
        let a = fingerprint_str(r#"<MELODY><SENTENCE><NOTE MidiNote="60" Duration="4" Lyric="la"/></SENTENCE></MELODY>"#);
        let b = fingerprint_str(r#"<MELODY><SENTENCE><NOTE MidiNote="62" Duration="4" Lyric="la"/></SENTENCE></MELODY>"#);
        assert!(a.is_some());

        assert_eq!(DuplicateClass::classify(a.as_ref(), a.as_ref()), DuplicateClass::Identical);
        assert_eq!(DuplicateClass::classify(a.as_ref(), b.as_ref()), DuplicateClass::Unresolved);
        assert_eq!(DuplicateClass::classify(None, None), DuplicateClass::Unresolved);
    }

    #[test]
    fn test_ensure_resolved() {
        let summary = DatasetSummary {
            label: "Base".to_string(),
            input_path: PathBuf::new(),
            export_root: PathBuf::new(),
            max_bank: 1,
            chosen_bank: 1,
            song_count: 0,
            song_ids_sample: Vec::new(),
            missing_song_folders: 0,
            missing_melody_xml: 0,
            missing_cover_pages: 0,
            warnings: Vec::new(),
        };
        let mut report = PlanReport {
            base: summary,
            donors: Vec::new(),
            target_version: 6,
            collision_policy: CollisionPolicy::Fail,
            merged_song_count: 0,
            collisions: Vec::new(),
            identical_duplicates: vec![3],
            unresolved_duplicates: Vec::new(),
            notes: Vec::new(),
        };
        assert!(report.ensure_resolved().is_ok());

        report.unresolved_duplicates = vec![5];
        match report.ensure_resolved().unwrap_err() {
            Error::UnresolvedDuplicate { song_ids } => assert_eq!(song_ids, vec![5]),
            other => panic!("unexpected error: {other}"),
        }
    }
}
