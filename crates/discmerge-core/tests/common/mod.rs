//! Synthetic disc folders for end-to-end tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use discmerge_core::ExportDataset;
use tempfile::TempDir;

/// One song on a fixture disc
#[derive(Debug, Clone)]
pub struct SongSpec {
    pub id: u32,
    pub artist: &'static str,
    /// MIDI note of the single melody note; changing it changes the fingerprint
    pub pitch: u32,
}

pub fn song(id: u32, artist: &'static str, pitch: u32) -> SongSpec {
    SongSpec { id, artist, pitch }
}

/// Creates extracted disc folders inside a temp dir
pub struct TestFixture {
    _temp_dir: TempDir,
    pub root: PathBuf,
}

impl TestFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        Self {
            _temp_dir: temp_dir,
            root,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Write `<root>/<name>/PS3_GAME/USRDIR/FileSystem/Export` with bank 1
    /// files, one texture page per song (in order), and a `melody_1.xml` per
    /// song. Returns the disc folder.
    pub fn create_disc(&self, name: &str, songs: &[SongSpec]) -> PathBuf {
        let disc = self.root.join(name);
        let export = disc.join("PS3_GAME/USRDIR/FileSystem/Export");
        fs::create_dir_all(export.join("textures")).expect("Failed to create textures dir");
        write(&disc.join("PS3_GAME/PARAM.SFO"), "sfo");
        write(&disc.join("PS3_GAME/USRDIR/pack_ee.pkd"), "packed");

        write(&export.join("config.xml"), CONFIG);

        let mut artists: Vec<&str> = Vec::new();
        for spec in songs {
            if !artists.contains(&spec.artist) {
                artists.push(spec.artist);
            }
        }
        let act_id = |artist: &str| artists.iter().position(|a| *a == artist).unwrap_or(0) + 1;

        let mut songs_xml = String::from("<SONGS xmlns=\"http://www.singstargame.com\">\n");
        let mut covers_xml = String::from("<COVERS xmlns=\"http://www.singstargame.com\">\n");
        let mut refs = String::new();
        for (page, spec) in songs.iter().enumerate() {
            songs_xml.push_str(&format!(
                "  <SONG ID=\"{}\"><TITLE>Song {}</TITLE><PERFORMANCE_NAME>{}</PERFORMANCE_NAME><PERFORMED_BY ID=\"{}\"/></SONG>\n",
                spec.id,
                spec.id,
                spec.artist,
                act_id(spec.artist)
            ));
            covers_xml.push_str(&format!(
                "  <TPAGE_BIT NAME=\"cover_{}\" TEXTURE=\"page_{}\"/>\n",
                spec.id, page
            ));
            refs.push_str(&format!("<SONG_REF ID=\"{}\"/>", spec.id));

            write(&export.join(format!("textures/page_{}.jpg", page)), &format!("{} page {}", name, page));
            write(&export.join(format!("{}/melody_1.xml", spec.id)), &melody(spec.pitch));
        }
        songs_xml.push_str("</SONGS>\n");
        covers_xml.push_str("</COVERS>\n");

        let mut acts_xml = String::from("<ACTS xmlns=\"http://www.singstargame.com\">\n");
        for artist in &artists {
            acts_xml.push_str(&format!(
                "  <ACT ID=\"{}\"><NAME>{}</NAME><NAME_KEY>{}</NAME_KEY></ACT>\n",
                act_id(artist),
                artist,
                artist.to_uppercase()
            ));
        }
        acts_xml.push_str("</ACTS>\n");

        let songlists_xml = format!(
            "<SONGLISTS xmlns=\"http://www.singstargame.com\"><GROUP NAME=\"Root\"><SUBSET NAME=\"{}\" ID=\"1\">{}</SUBSET></GROUP></SONGLISTS>\n",
            name, refs
        );

        write(&export.join("songs_1_0.xml"), &songs_xml);
        write(&export.join("acts_1_0.xml"), &acts_xml);
        write(&export.join("covers.xml"), &covers_xml);
        write(&export.join("songlists_1.xml"), &songlists_xml);
        disc
    }

    pub fn open(&self, name: &str, label: &str) -> ExportDataset {
        ExportDataset::open_path(&self.path(name), label).expect("Failed to open dataset")
    }
}

pub fn export_of(disc: &Path) -> PathBuf {
    disc.join("PS3_GAME/USRDIR/FileSystem/Export")
}

pub fn melody(pitch: u32) -> String {
    format!(
        "<MELODY xmlns=\"http://www.singstargame.com\"><SENTENCE><NOTE MidiNote=\"{}\" Duration=\"4\" Lyric=\"la\"/><NOTE MidiNote=\"62\" Duration=\"2\" Lyric=\"di\"/></SENTENCE></MELODY>\n",
        pitch
    )
}

fn write(path: &Path, text: &str) {
    fs::create_dir_all(path.parent().expect("path has a parent")).expect("Failed to create dir");
    fs::write(path, text).expect("Failed to write file");
}

const CONFIG: &str = r#"<CONFIG xmlns="http://www.singstargame.com">
  <VERSION version="1">
    <SONGS>
      <SONG_LIST>FileSystem/Export/songs_1_0.xml</SONG_LIST>
      <ACT_LIST>FileSystem/Export/acts_1_0.xml</ACT_LIST>
    </SONGS>
    <MELODY_CACHE><FILE>FileSystem/Export/melodies_1.chc</FILE></MELODY_CACHE>
    <SONG_LISTS><FILE>FileSystem/Export/songlists_1.xml</FILE></SONG_LISTS>
    <ERRATA><FILE>FileSystem/Export/errata.xml</FILE></ERRATA>
  </VERSION>
</CONFIG>
"#;
