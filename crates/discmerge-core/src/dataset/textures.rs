//! Texture page inventory (`textures/page_{n}.{ext}`)

use std::fs;
use std::path::{Path, PathBuf};

use crate::dataset::layout::case_mismatch_child;
use crate::error::{Error, Result};

/// Folder name the target platform looks for, exactly as spelled
pub const TEXTURES_DIR: &str = "textures";

/// One physical texture page file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TexturePage {
    pub number: u32,
    pub extension: String,
    pub path: PathBuf,
}

impl TexturePage {
    /// File name for this page under another number
    pub fn renumbered_name(&self, number: u32) -> String {
        format!("page_{}.{}", number, self.extension)
    }
}

/// Parse `page_{n}.{ext}` with an alphanumeric extension
pub fn parse_page_file_name(name: &str) -> Option<(u32, String)> {
    let rest = name.strip_prefix("page_")?;
    let (digits, ext) = rest.split_once('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if ext.is_empty() || !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some((digits.parse().ok()?, ext.to_string()))
}

/// List pages in a textures folder, ascending by number. A missing folder
/// has no pages.
pub fn list_texture_pages(dir: &Path) -> Result<Vec<TexturePage>> {
    let mut pages = Vec::new();
    if !dir.is_dir() {
        return Ok(pages);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let parsed = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_page_file_name);
        if let Some((number, extension)) = parsed {
            pages.push(TexturePage {
                number,
                extension,
                path,
            });
        }
    }
    pages.sort_by(|a, b| a.number.cmp(&b.number).then(a.path.cmp(&b.path)));
    Ok(pages)
}

/// Highest page number present
pub fn max_page(pages: &[TexturePage]) -> Option<u32> {
    pages.iter().map(|p| p.number).max()
}

/// The lowercase `textures` folder of an input; a wrongly-cased folder or a
/// missing one is an error.
pub fn require_textures_dir(export_root: &Path, who: &str) -> Result<PathBuf> {
    reject_miscased_textures(export_root, who)?;
    let dir = export_root.join(TEXTURES_DIR);
    if !dir.is_dir() {
        return Err(Error::missing(format!(
            "{} textures folder (must be Export/textures): {}",
            who,
            dir.display()
        )));
    }
    Ok(dir)
}

/// The output `textures` folder, created if needed
pub fn ensure_textures_dir(export_root: &Path) -> Result<PathBuf> {
    reject_miscased_textures(export_root, "output")?;
    let dir = export_root.join(TEXTURES_DIR);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn reject_miscased_textures(export_root: &Path, who: &str) -> Result<()> {
    let exact = export_root.join(TEXTURES_DIR);
    if let Some(actual) = case_mismatch_child(export_root, TEXTURES_DIR) {
        // Case-insensitive filesystems report the lowercase name as existing too
        let exact_listed = fs::read_dir(export_root)?
            .flatten()
            .any(|e| e.file_name() == TEXTURES_DIR);
        if !exact_listed {
            return Err(Error::corrupt(format!(
                "found {} Export/{} but expected Export/textures: {}",
                who,
                actual,
                exact.display()
            )));
        }
    }
    Ok(())
}
