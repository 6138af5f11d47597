//! Export dataset accessor.
//!
//! An [`ExportDataset`] is one disc's data root, opened read-only for a single
//! operation: the chosen bank's songs/acts/songlists documents, the shared
//! covers manifest and `config.xml`, and the texture page inventory.

mod layout;
mod records;
mod textures;

pub use layout::{looks_like_export_root, resolve_input, DatasetLocation, LayoutKind};
pub use records::{normalize_key, Act, ActRef, CoverEntry, Song};
pub use textures::{
    ensure_textures_dir, list_texture_pages, max_page, parse_page_file_name,
    require_textures_dir, TexturePage, TEXTURES_DIR,
};

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::cache;
use crate::error::{Error, Result};
use crate::fingerprint::{self, MelodyFingerprint};
use crate::manifest;
use crate::xml::XmlDocument;

/// Per-bank songs document name
pub fn songs_file_name(bank: u32) -> String {
    format!("songs_{}_0.xml", bank)
}

pub fn acts_file_name(bank: u32) -> String {
    format!("acts_{}_0.xml", bank)
}

pub fn songlists_file_name(bank: u32) -> String {
    format!("songlists_{}.xml", bank)
}

pub fn cache_file_name(bank: u32) -> String {
    format!("melodies_{}.chc", bank)
}

pub const CONFIG_FILE: &str = "config.xml";
pub const COVERS_FILE: &str = "covers.xml";

/// One input dataset, read for the chosen bank
#[derive(Debug, Clone)]
pub struct ExportDataset {
    /// Caller-facing name (`Base` or a donor label)
    pub label: String,
    pub location: DatasetLocation,
    /// Versions declared in `config.xml`
    pub declared_versions: Vec<u32>,
    /// Highest declared bank
    pub max_bank: u32,
    /// Bank whose files were read
    pub bank: u32,
    songs_doc: XmlDocument,
    songs: BTreeMap<u32, Song>,
    acts_doc: Option<XmlDocument>,
    acts: Vec<Act>,
    songlists_doc: Option<XmlDocument>,
    covers_doc: Option<XmlDocument>,
    covers: BTreeMap<u32, CoverEntry>,
    config_doc: Option<XmlDocument>,
}

impl ExportDataset {
    /// Resolve an input folder and open its highest bank
    pub fn open_path(path: &Path, label: impl Into<String>) -> Result<Self> {
        let location = resolve_input(path)?;
        Self::open(location, label, None)
    }

    /// Open a resolved location, optionally for a specific bank
    pub fn open(
        location: DatasetLocation,
        label: impl Into<String>,
        requested_bank: Option<u32>,
    ) -> Result<Self> {
        let label = label.into();
        let export_root = location.export_root.clone();

        let config_path = export_root.join(CONFIG_FILE);
        let config_doc = if config_path.is_file() {
            Some(XmlDocument::read(&config_path)?)
        } else {
            None
        };

        let declared_versions = config_doc
            .as_ref()
            .map(manifest::declared_versions)
            .unwrap_or_default();
        let max_bank = match (&config_doc, declared_versions.last()) {
            (Some(_), Some(max)) => *max,
            (Some(_), None) => 1,
            (None, _) => max_bank_from_files(&export_root),
        };
        let bank = choose_bank(&export_root, max_bank, requested_bank);

        let songs_path = export_root.join(songs_file_name(bank));
        if !songs_path.is_file() {
            return Err(Error::missing(format!(
                "{} not found under Export root {}",
                songs_file_name(bank),
                export_root.display()
            )));
        }
        let songs_doc = XmlDocument::read(&songs_path)?;
        let songs = collect_songs(&songs_doc);
        if songs.is_empty() {
            return Err(Error::missing(format!(
                "no SONG ids found in {}",
                songs_path.display()
            )));
        }

        let acts_doc = read_optional(&export_root.join(acts_file_name(bank)))?;
        let acts = acts_doc
            .as_ref()
            .map(|doc| {
                doc.root
                    .descendants()
                    .filter(|e| e.name == "ACT")
                    .filter_map(|e| Act::from_element(e.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let songlists_doc = read_optional(&export_root.join(songlists_file_name(bank)))?;

        let covers_doc = read_optional(&export_root.join(COVERS_FILE))?;
        let covers = covers_doc
            .as_ref()
            .map(|doc| {
                doc.root
                    .descendants()
                    .filter(|e| e.name == "TPAGE_BIT")
                    .filter_map(|e| CoverEntry::from_element(e.clone()))
                    .map(|c| (c.song_id, c))
                    .collect()
            })
            .unwrap_or_default();

        debug!(
            "Opened {} at {} (bank {} of {}, {} songs)",
            label,
            export_root.display(),
            bank,
            max_bank,
            songs.len()
        );

        Ok(Self {
            label,
            location,
            declared_versions,
            max_bank,
            bank,
            songs_doc,
            songs,
            acts_doc,
            acts,
            songlists_doc,
            covers_doc,
            covers,
            config_doc,
        })
    }

    pub fn export_root(&self) -> &Path {
        &self.location.export_root
    }

    pub fn song_ids(&self) -> BTreeSet<u32> {
        self.songs.keys().copied().collect()
    }

    pub fn contains(&self, song_id: u32) -> bool {
        self.songs.contains_key(&song_id)
    }

    pub fn song(&self, song_id: u32) -> Option<&Song> {
        self.songs.get(&song_id)
    }

    pub fn songs(&self) -> impl Iterator<Item = &Song> {
        self.songs.values()
    }

    pub fn acts(&self) -> &[Act] {
        &self.acts
    }

    pub fn cover(&self, song_id: u32) -> Option<&CoverEntry> {
        self.covers.get(&song_id)
    }

    pub fn covers(&self) -> impl Iterator<Item = &CoverEntry> {
        self.covers.values()
    }

    /// Song ID to cover page number, for entries with a parsable page
    pub fn cover_pages(&self) -> BTreeMap<u32, u32> {
        self.covers
            .values()
            .filter_map(|c| c.page().map(|p| (c.song_id, p)))
            .collect()
    }

    /// Page number to file path; the first extension wins when a page exists twice
    pub fn texture_pages(&self) -> Result<BTreeMap<u32, PathBuf>> {
        let pages = list_texture_pages(&self.export_root().join(TEXTURES_DIR))?;
        let mut map = BTreeMap::new();
        for page in pages {
            map.entry(page.number).or_insert(page.path);
        }
        Ok(map)
    }

    pub fn song_dir(&self, song_id: u32) -> PathBuf {
        self.export_root().join(song_id.to_string())
    }

    /// Fingerprint of a song's best available melody document
    pub fn fingerprint(&self, song_id: u32) -> Option<MelodyFingerprint> {
        fingerprint::fingerprint_song_dir(&self.song_dir(song_id))
    }

    /// Song IDs recorded in the chosen bank's melody cache, if it has one
    pub fn cache_song_ids(&self) -> Result<Option<BTreeSet<u32>>> {
        let path = self.export_root().join(cache_file_name(self.bank));
        if !path.is_file() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        let entries = cache::parse_index(&data)?;
        Ok(Some(entries.iter().map(|e| e.song_id).collect()))
    }

    pub fn songs_doc(&self) -> &XmlDocument {
        &self.songs_doc
    }

    pub fn acts_doc(&self) -> Option<&XmlDocument> {
        self.acts_doc.as_ref()
    }

    pub fn songlists_doc(&self) -> Option<&XmlDocument> {
        self.songlists_doc.as_ref()
    }

    pub fn covers_doc(&self) -> Option<&XmlDocument> {
        self.covers_doc.as_ref()
    }

    pub fn config_doc(&self) -> Option<&XmlDocument> {
        self.config_doc.as_ref()
    }

    pub fn require_acts_doc(&self) -> Result<&XmlDocument> {
        self.acts_doc
            .as_ref()
            .ok_or_else(|| self.missing_file(&acts_file_name(self.bank)))
    }

    pub fn require_songlists_doc(&self) -> Result<&XmlDocument> {
        self.songlists_doc
            .as_ref()
            .ok_or_else(|| self.missing_file(&songlists_file_name(self.bank)))
    }

    pub fn require_covers_doc(&self) -> Result<&XmlDocument> {
        self.covers_doc
            .as_ref()
            .ok_or_else(|| self.missing_file(COVERS_FILE))
    }

    pub fn require_config_doc(&self) -> Result<&XmlDocument> {
        self.config_doc
            .as_ref()
            .ok_or_else(|| self.missing_file(CONFIG_FILE))
    }

    /// Check that every document a build reads from this dataset exists
    pub fn require_build_inputs(&self) -> Result<()> {
        self.require_acts_doc()?;
        self.require_songlists_doc()?;
        self.require_covers_doc()?;
        Ok(())
    }

    fn missing_file(&self, name: &str) -> Error {
        Error::missing(format!(
            "{} ({})",
            self.export_root().join(name).display(),
            self.label
        ))
    }
}

fn read_optional(path: &Path) -> Result<Option<XmlDocument>> {
    if path.is_file() {
        XmlDocument::read(path).map(Some)
    } else {
        Ok(None)
    }
}

fn collect_songs(doc: &XmlDocument) -> BTreeMap<u32, Song> {
    let mut songs = BTreeMap::new();
    for element in doc.root.descendants().filter(|e| e.name == "SONG") {
        if let Some(song) = Song::from_element(element.clone()) {
            if songs.contains_key(&song.id) {
                warn!("Song {} listed twice; keeping the last entry", song.id);
            }
            songs.insert(song.id, song);
        }
    }
    songs
}

fn max_bank_from_files(export_root: &Path) -> u32 {
    let entries = match fs::read_dir(export_root) {
        Ok(entries) => entries,
        Err(_) => return 1,
    };
    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let digits = name.strip_prefix("songs_")?.strip_suffix("_0.xml")?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            digits.parse::<u32>().ok()
        })
        .fold(1, u32::max)
}

/// Requested bank if its songs file exists, else the highest bank with one
fn choose_bank(export_root: &Path, max_bank: u32, requested: Option<u32>) -> u32 {
    if let Some(bank) = requested {
        if export_root.join(songs_file_name(bank)).is_file() {
            return bank;
        }
        warn!("Requested bank {} has no songs file; using the highest available", bank);
    }
    (1..=max_bank)
        .rev()
        .find(|bank| export_root.join(songs_file_name(*bank)).is_file())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_open_chooses_highest_bank_with_songs() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(
            &root.join("config.xml"),
            r#"<CONFIG><VERSION version="1"/><VERSION version="3"/></CONFIG>"#,
        );
        write(&root.join("songs_1_0.xml"), r#"<SONGS><SONG ID="1"/></SONGS>"#);
        write(
            &root.join("songs_2_0.xml"),
            r#"<SONGS><SONG ID="1"/><SONG ID="2"/></SONGS>"#,
        );

        let dataset = ExportDataset::open_path(root, "Base").unwrap();
        assert_eq!(dataset.max_bank, 3);
        assert_eq!(dataset.bank, 2);
        assert_eq!(dataset.declared_versions, vec![1, 3]);
        assert_eq!(dataset.song_ids().into_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert!(dataset.acts_doc().is_none());
        assert!(dataset.require_acts_doc().is_err());
    }

    #[test]
    fn test_requested_bank() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(&root.join("songs_1_0.xml"), r#"<SONGS><SONG ID="7"/></SONGS>"#);
        write(&root.join("songs_2_0.xml"), r#"<SONGS><SONG ID="8"/></SONGS>"#);

        let location = resolve_input(root).unwrap();
        let dataset = ExportDataset::open(location, "Base", Some(1)).unwrap();
        assert_eq!(dataset.bank, 1);
        assert!(dataset.contains(7));
    }

    #[test]
    fn test_songs_file_without_ids_rejected() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("songs_1_0.xml"), "<SONGS><SONG/></SONGS>");
        let err = ExportDataset::open_path(temp.path(), "Base").unwrap_err();
        assert!(matches!(err, Error::MissingReference { .. }));
    }

    #[test]
    fn test_malformed_songs_is_parse_error() {
        let temp = TempDir::new().unwrap();
        write(&temp.path().join("songs_1_0.xml"), "<SONGS><SONG ID=\"1\">");
        let err = ExportDataset::open_path(temp.path(), "Base").unwrap_err();
        assert!(matches!(err, Error::XmlParse { .. }));
    }

    #[test]
    fn test_covers_and_pages() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(&root.join("songs_1_0.xml"), r#"<SONGS><SONG ID="4"/></SONGS>"#);
        write(
            &root.join("covers.xml"),
            r#"<COVERS><TPAGE_BIT NAME="cover_4" TEXTURE="page_2"/></COVERS>"#,
        );
        write(&root.join("textures/page_2.jpg"), "jpg");

        let dataset = ExportDataset::open_path(root, "Base").unwrap();
        assert_eq!(dataset.cover_pages().get(&4), Some(&2));
        assert!(dataset.texture_pages().unwrap().contains_key(&2));
    }
}
