//! Melody content fingerprints.
//!
//! A melody document is reduced to a linear stream of note events
//! `(start, duration, midi, lyric)` and hashed. The stream ignores
//! formatting, attribute order and case, numeric representation, and metadata
//! blocks, so two exports of the same song hash identically while any change
//! to pitch, timing, or lyric text does not.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// One note event on the melody timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MelodyEvent {
    pub start: i64,
    pub duration: i64,
    pub midi: i64,
    pub lyric: String,
}

/// SHA-256 of a canonical melody event stream, as lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MelodyFingerprint(String);

impl MelodyFingerprint {
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// 12-character prefix used in reports
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for MelodyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract note events from melody document text.
///
/// Returns `None` when the document does not parse.
pub fn melody_events(text: &str) -> Option<Vec<MelodyEvent>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let doc = roxmltree::Document::parse_with_options(text, options).ok()?;

    let mut events = Vec::new();
    let mut cursor: i64 = 0;

    let sentences = doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case("SENTENCE"));

    for sentence in sentences {
        for child in sentence.children().filter(|n| n.is_element()) {
            let is_note = child.tag_name().name().eq_ignore_ascii_case("NOTE");
            let delay = attr_ci(child, "Delay").and_then(parse_number);

            if !is_note {
                if let Some(delay) = delay {
                    cursor = cursor.saturating_add(delay.max(0));
                }
                continue;
            }

            if let Some(delay) = delay {
                cursor = cursor.saturating_add(delay.max(0));
            }

            let midi = attr_ci(child, "MidiNote").and_then(parse_number);
            let duration = attr_ci(child, "Duration").and_then(parse_number);
            let (midi, duration) = match (midi, duration) {
                (Some(m), Some(d)) => (m, d.max(0)),
                _ => continue,
            };

            events.push(MelodyEvent {
                start: cursor,
                duration,
                midi,
                lyric: normalize_lyric(attr_ci(child, "Lyric").unwrap_or("")),
            });
            cursor = cursor.saturating_add(duration);
        }
    }

    Some(events)
}

/// Fingerprint melody document text; `None` if unparsable or it has no notes
pub fn fingerprint_str(text: &str) -> Option<MelodyFingerprint> {
    let events = melody_events(text)?;
    let base = events.first()?.start;

    let mut hasher = Sha256::new();
    for event in &events {
        let line = format!(
            "{},{},{},{}\n",
            event.start.saturating_sub(base),
            event.duration,
            event.midi,
            event.lyric
        );
        hasher.update(line.as_bytes());
    }

    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    Some(MelodyFingerprint(hex))
}

/// Fingerprint a melody file; unreadable files yield `None`
pub fn fingerprint_file(path: &Path) -> Option<MelodyFingerprint> {
    let bytes = fs::read(path).ok()?;
    let text = String::from_utf8_lossy(&bytes);
    fingerprint_str(&text)
}

/// `melody_{v}.xml` files in a song folder, ascending by version
pub fn melody_files(song_dir: &Path) -> Vec<(u32, PathBuf)> {
    let mut files = Vec::new();
    let entries = match fs::read_dir(song_dir) {
        Ok(entries) => entries,
        Err(_) => return files,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(version) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_melody_version)
        {
            files.push((version, path));
        }
    }
    files.sort_by_key(|(v, _)| *v);
    files
}

/// Highest-version melody document in a song folder
pub fn best_melody_file(song_dir: &Path) -> Option<PathBuf> {
    melody_files(song_dir).pop().map(|(_, path)| path)
}

/// Fingerprint of a song folder's best available melody
pub fn fingerprint_song_dir(song_dir: &Path) -> Option<MelodyFingerprint> {
    best_melody_file(song_dir).and_then(|p| fingerprint_file(&p))
}

fn parse_melody_version(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    let digits = lower.strip_prefix("melody_")?.strip_suffix(".xml")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Attribute lookup preferring an exact match, then any casing
fn attr_ci<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attribute(name).or_else(|| {
        node.attributes()
            .find(|a| a.name().eq_ignore_ascii_case(name))
            .map(|a| a.value())
    })
}

/// Integer-ish numeric attribute: "170", "170.00", "1,200"
fn parse_number(raw: &str) -> Option<i64> {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.round() as i64)
}

/// Lower-case, ASCII punctuation, collapsed whitespace, tight hyphens
pub fn normalize_lyric(raw: &str) -> String {
    let mapped: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '\u{2010}'..='\u{2015}' | '\u{2212}' => '-',
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            other => other,
        })
        .collect();

    let collapsed = mapped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .split('-')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("-")
}
