//! Output assembly shared by the merge and subset engines.
//!
//! Both engines gather a merged catalogue (songs, covers, acts) and a
//! songlists document, then hand them to [`write_output`], which writes every
//! bank file, synthesizes melody versions, rebuilds the melody cache, rebuilds
//! `config.xml`, and runs the final consistency checks.

mod acts;
mod melody;
mod progress;
mod songlists;
mod textures;

pub use acts::{ActCanonicalizer, ActRemap};
pub use progress::{cancel_flag, BuildPhase, BuildProgress, CancelCheck, ProgressCallback};
pub use songlists::{merge_songlists, union_by_name};

pub(crate) use melody::ensure_versioned_melody_files;
pub(crate) use progress::Reporter;
pub(crate) use textures::{import_pages, missing_pages, next_page_offset};

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::info;

use crate::cache;
use crate::config::BuildOptions;
use crate::dataset::{
    acts_file_name, cache_file_name, songlists_file_name, songs_file_name, CoverEntry, Song,
    CONFIG_FILE, COVERS_FILE, TEXTURES_DIR,
};
use crate::error::{Error, Result};
use crate::fsops::write_replacing;
use crate::manifest;
use crate::xml::{Element, XmlDocument};

/// Merged records destined for the output
#[derive(Debug, Default)]
pub(crate) struct Catalog {
    pub songs: BTreeMap<u32, Song>,
    pub covers: BTreeMap<u32, CoverEntry>,
    pub acts: ActCanonicalizer,
}

impl Catalog {
    pub fn song_ids(&self) -> BTreeSet<u32> {
        self.songs.keys().copied().collect()
    }
}

/// Base documents whose shape the output keeps
pub(crate) struct Templates<'a> {
    pub songs: &'a XmlDocument,
    pub acts: &'a XmlDocument,
    pub covers: &'a XmlDocument,
    pub config: &'a XmlDocument,
}

/// What [`write_output`] produced
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct OutputSummary {
    pub song_count: usize,
    pub act_count: usize,
    pub cache_files: u32,
    pub melody_files_created: usize,
    pub texture_pages: usize,
}

/// Write every generated file into `export_root` and verify the result
pub(crate) fn write_output(
    export_root: &Path,
    catalog: Catalog,
    songlists: &XmlDocument,
    templates: &Templates<'_>,
    options: &BuildOptions,
    reporter: &Reporter<'_>,
) -> Result<OutputSummary> {
    let target = options.target_version;
    let song_ids = catalog.song_ids();

    let missing_covers: Vec<u32> = song_ids
        .iter()
        .filter(|id| !catalog.covers.contains_key(id))
        .copied()
        .collect();
    if !missing_covers.is_empty() {
        return Err(Error::missing(format!(
            "covers.xml entries for {} song(s) (sample: {:?})",
            missing_covers.len(),
            &missing_covers[..missing_covers.len().min(30)]
        )));
    }

    let referenced_pages: BTreeSet<u32> = catalog.covers.values().filter_map(|c| c.page()).collect();
    let act_count = catalog.acts.len();

    let songs_doc = compose(
        templates.songs,
        "SONG",
        catalog.songs.into_values().map(Song::into_element).collect(),
    );
    let acts_doc = compose(templates.acts, "ACT", catalog.acts.into_elements());
    let covers_doc = compose(
        templates.covers,
        "TPAGE_BIT",
        catalog.covers.into_values().map(CoverEntry::into_element).collect(),
    );

    reporter.step(BuildPhase::Write, format!("Writing bank files 1..{}", target));
    for bank in 1..=target {
        songs_doc.write(&export_root.join(songs_file_name(bank)))?;
        acts_doc.write(&export_root.join(acts_file_name(bank)))?;
        songlists.write(&export_root.join(songlists_file_name(bank)))?;
    }
    covers_doc.write(&export_root.join(COVERS_FILE))?;

    let melody_files_created =
        ensure_versioned_melody_files(export_root, &song_ids, target, reporter)?;

    reporter.step(BuildPhase::Cache, format!("Rebuilding melodies cache ({} songs)", song_ids.len()));
    let data = cache::build_cache_from_export(export_root, &song_ids, target, || {
        reporter.checkpoint("Cancelled during CHC rebuild")
    })?;
    cache::validate_cache(
        &data,
        &song_ids,
        export_root,
        target,
        options.cache_validation_sample,
    )?;
    for bank in 1..=target {
        write_replacing(&export_root.join(cache_file_name(bank)), &data)?;
    }

    reporter.step(BuildPhase::Config, "Rebuilding config.xml");
    let config = manifest::rebuild_manifest(templates.config, target, options.mode)?;
    config.write(&export_root.join(CONFIG_FILE))?;

    let textures = export_root.join(TEXTURES_DIR);
    let missing = missing_pages(&textures, referenced_pages.iter().copied())?;
    if let Some(page) = missing.first() {
        return Err(Error::missing(format!(
            "texture page files for referenced page_{}.* in {}",
            page,
            textures.display()
        )));
    }
    let texture_pages = crate::dataset::list_texture_pages(&textures)?.len();

    info!(
        "Wrote {} songs, {} acts, {} cache file(s) to {}",
        song_ids.len(),
        act_count,
        target,
        export_root.display()
    );

    Ok(OutputSummary {
        song_count: song_ids.len(),
        act_count,
        cache_files: target,
        melody_files_created,
        texture_pages,
    })
}

/// Packed archives (`pack*.pkd`) and unpack scratch (`*.pkd_out*`) are never
/// copied into an output
pub(crate) fn is_packed_artifact(rel: &Path) -> bool {
    rel.components().any(|component| {
        let name = component.as_os_str().to_string_lossy().to_ascii_lowercase();
        (name.starts_with("pack") && name.ends_with(".pkd")) || name.contains(".pkd_out")
    })
}

/// Clone `template`, drop every `name` element, and put `records` where the
/// first one used to live (or under the root)
fn compose(template: &XmlDocument, name: &str, records: Vec<Element>) -> XmlDocument {
    let mut doc = template.clone();
    let path = parent_path(&doc.root, name).unwrap_or_default();
    doc.root.remove_descendants(name);

    let mut parent = &mut doc.root;
    for index in path {
        // Ancestors of the first match cannot have been removed
        if index >= parent.children.len() {
            break;
        }
        parent = &mut parent.children[index];
    }
    parent.children.extend(records);
    doc
}

/// Child indices from the root down to the parent of the first `name` element
fn parent_path(element: &Element, name: &str) -> Option<Vec<usize>> {
    if element.children.iter().any(|c| c.name == name) {
        return Some(Vec::new());
    }
    for (index, child) in element.children.iter().enumerate() {
        if let Some(mut rest) = parent_path(child, name) {
            rest.insert(0, index);
            return Some(rest);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_compose_keeps_container() {
        let template = XmlDocument::parse_str(
            r#"<COVERS><HEADER/><TPAGE><TPAGE_BIT NAME="cover_1"/><TPAGE_BIT NAME="cover_2"/></TPAGE></COVERS>"#,
            &PathBuf::from("covers.xml"),
        )
        .unwrap();
        let doc = compose(
            &template,
            "TPAGE_BIT",
            vec![Element::new("TPAGE_BIT").with_attr("NAME", "cover_9")],
        );

        let tpage = doc.root.child("TPAGE").unwrap();
        let names: Vec<&str> = tpage
            .children_named("TPAGE_BIT")
            .filter_map(|b| b.attr("NAME"))
            .collect();
        assert_eq!(names, vec!["cover_9"]);
        assert!(doc.root.child("HEADER").is_some());
    }

    #[test]
    fn test_packed_artifacts() {
        assert!(is_packed_artifact(Path::new("PS3_GAME/USRDIR/pack_ee.pkd")));
        assert!(is_packed_artifact(Path::new("USRDIR/pack_ee.pkd_out/x.xml")));
        assert!(!is_packed_artifact(Path::new("USRDIR/FileSystem/Export/config.xml")));
    }

    #[test]
    fn test_compose_without_records_appends_to_root() {
        let template = XmlDocument::parse_str("<ACTS/>", &PathBuf::from("acts.xml")).unwrap();
        let doc = compose(&template, "ACT", vec![Element::new("ACT").with_attr("ID", "1")]);
        assert_eq!(doc.root.children.len(), 1);
    }
}
