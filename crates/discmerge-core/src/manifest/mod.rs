//! Versioned manifest (`config.xml`) rebuild.
//!
//! The base manifest's highest `VERSION` block is the template; one copy is
//! stamped out per version `1..=target` with only the per-bank file references
//! rewritten, so tag names, ordering, and path shapes follow the source disc.

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::BuildMode;
use crate::error::{Error, Result};
use crate::xml::{Element, XmlDocument};

pub fn songs_ref(version: u32) -> String {
    format!("FileSystem/Export/songs_{}_0.xml", version)
}

pub fn acts_ref(version: u32) -> String {
    format!("FileSystem/Export/acts_{}_0.xml", version)
}

pub fn cache_ref(version: u32) -> String {
    format!("FileSystem/Export/melodies_{}.chc", version)
}

pub fn songlists_ref(version: u32) -> String {
    format!("FileSystem/Export/songlists_{}.xml", version)
}

/// Every `VERSION@version` in the document, ascending and unique
pub fn declared_versions(doc: &XmlDocument) -> Vec<u32> {
    let versions: BTreeSet<u32> = doc
        .root
        .descendants()
        .filter(|e| e.name == "VERSION")
        .filter_map(|e| e.attr_u32("version"))
        .collect();
    versions.into_iter().collect()
}

fn version_number(element: &Element) -> u32 {
    element.attr_u32("version").unwrap_or(0)
}

/// Rebuild the manifest for versions `1..=target_version` and validate it
pub fn rebuild_manifest(
    base: &XmlDocument,
    target_version: u32,
    mode: BuildMode,
) -> Result<XmlDocument> {
    if target_version < 1 {
        return Err(Error::InvalidOptions(
            "target_version must be at least 1".to_string(),
        ));
    }

    let mut doc = base.clone();
    let root = &mut doc.root;

    if mode == BuildMode::UpdateRequired {
        let removed = root.remove_descendants("ERRATA");
        if removed > 0 {
            debug!("Stripped {} ERRATA block(s)", removed);
        }
    }

    {
        let has_container = root.children.iter().any(|c| c.name == "VERSIONS");
        let version_parent = if has_container {
            match root.child_mut("VERSIONS") {
                Some(container) => {
                    container.set_attr("version", target_version.to_string());
                    container
                }
                None => return Err(Error::corrupt("config.xml VERSIONS container vanished")),
            }
        } else {
            &mut *root
        };
        stamp_versions(version_parent, target_version);
    }

    for child in root.children.iter_mut() {
        match child.name.as_str() {
            "SONGS" => {
                set_first_text(child, "SONG_LIST", songs_ref(target_version));
                set_first_text(child, "ACT_LIST", acts_ref(target_version));
            }
            "MELODY_CACHE" => set_first_text(child, "FILE", cache_ref(target_version)),
            "SONG_LISTS" => set_first_text(child, "FILE", songlists_ref(target_version)),
            _ => {}
        }
    }

    validate_manifest(&doc, target_version)?;
    Ok(doc)
}

fn stamp_versions(parent: &mut Element, target_version: u32) {
    // First VERSION with the highest number is the template
    let template = parent
        .children
        .iter()
        .filter(|c| c.name == "VERSION")
        .fold(None::<&Element>, |best, v| match best {
            Some(b) if version_number(b) >= version_number(v) => Some(b),
            _ => Some(v),
        })
        .cloned()
        .unwrap_or_else(minimal_version_template);

    let insert_at = parent
        .children
        .iter()
        .position(|c| c.name == "VERSION")
        .unwrap_or(0);
    parent.children.retain(|c| c.name != "VERSION");

    let stamped: Vec<Element> = (1..=target_version)
        .rev()
        .map(|i| {
            let mut version = template.clone();
            version.set_attr("version", i.to_string());
            if let Some(songs) = version.find_mut("SONGS") {
                set_first_text(songs, "SONG_LIST", songs_ref(i));
                set_first_text(songs, "ACT_LIST", acts_ref(i));
            }
            if let Some(cache) = version.find_mut("MELODY_CACHE") {
                set_first_text(cache, "FILE", cache_ref(i));
            }
            if let Some(lists) = version.find_mut("SONG_LISTS") {
                set_first_text(lists, "FILE", songlists_ref(i));
            }
            version
        })
        .collect();

    let insert_at = insert_at.min(parent.children.len());
    parent.children.splice(insert_at..insert_at, stamped);
}

fn set_first_text(element: &mut Element, name: &str, value: String) {
    if let Some(target) = element.find_mut(name) {
        target.set_text(value);
    }
}

fn minimal_version_template() -> Element {
    let text = |name: &str, value: &str| Element::new(name).with_text(value);
    Element::new("VERSION")
        .with_attr("version", "1")
        .with_child(
            Element::new("SONGS")
                .with_child(text("LAYER", "0"))
                .with_child(text("SONG_LIST", &songs_ref(1)))
                .with_child(text("ACT_LIST", &acts_ref(1)))
                .with_child(text("PATH", "FileSystem/Export/")),
        )
        .with_child(Element::new("MELODY_CACHE").with_child(text("FILE", &cache_ref(1))))
        .with_child(Element::new("SONG_LISTS").with_child(text("FILE", &songlists_ref(1))))
        .with_child(
            Element::new("COVERS")
                .with_child(text("LIST", "FileSystem/Export/covers.xml"))
                .with_child(text("PATH", "FileSystem/Export/textures/")),
        )
}

/// Check that a manifest declares exactly `1..=target_version` and every
/// version points at its canonical per-bank files
pub fn validate_manifest(doc: &XmlDocument, target_version: u32) -> Result<()> {
    let parent = doc.root.child("VERSIONS").unwrap_or(&doc.root);
    let versions: Vec<&Element> = parent.children_named("VERSION").collect();

    let found: BTreeSet<u32> = versions.iter().map(|v| version_number(v)).collect();
    let expected: BTreeSet<u32> = (1..=target_version).collect();
    if found != expected {
        return Err(Error::corrupt(format!(
            "config.xml VERSION set mismatch: found={:?} expected=1..{}",
            found, target_version
        )));
    }

    for i in 1..=target_version {
        let version = versions
            .iter()
            .find(|v| version_number(v) == i)
            .ok_or_else(|| Error::corrupt(format!("config.xml VERSION {} missing", i)))?;

        let block = |name: &str| {
            version
                .find(name)
                .ok_or_else(|| Error::corrupt(format!("config.xml VERSION {} missing {}", i, name)))
        };
        let songs = block("SONGS")?;
        let cache = block("MELODY_CACHE")?;
        let lists = block("SONG_LISTS")?;

        expect_text(songs, "SONG_LIST", &songs_ref(i), i)?;
        expect_text(songs, "ACT_LIST", &acts_ref(i), i)?;
        expect_text(cache, "FILE", &cache_ref(i), i)?;
        expect_text(lists, "FILE", &songlists_ref(i), i)?;
    }
    Ok(())
}

fn expect_text(block: &Element, name: &str, expected: &str, version: u32) -> Result<()> {
    let text = block
        .find(name)
        .map(|e| e.text().trim())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            Error::corrupt(format!("config.xml VERSION {} missing {}", version, name))
        })?;
    if text != expected {
        return Err(Error::corrupt(format!(
            "config.xml VERSION {} {}/{} mismatch: {} (expected {})",
            version, block.name, name, text, expected
        )));
    }
    Ok(())
}
