//! Texture page import with renumbering

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::build::progress::{BuildPhase, Reporter};
use crate::dataset::{list_texture_pages, max_page};
use crate::error::{Error, Result};

/// Offset for the next import: one past the output's highest page, or 0
pub(crate) fn next_page_offset(output_textures: &Path) -> Result<u32> {
    let pages = list_texture_pages(output_textures)?;
    Ok(max_page(&pages).map(|m| m + 1).unwrap_or(0))
}

/// Result of one page import
#[derive(Debug, Clone, Default)]
pub(crate) struct PageImport {
    /// Old page number to new page number
    pub mapping: BTreeMap<u32, u32>,
    pub files_copied: usize,
}

/// Copy `page_{n}.*` files as `page_{n + offset}.*`.
///
/// With `only`, just those page numbers are copied and each must exist in the
/// source. An existing destination file is never overwritten.
pub(crate) fn import_pages(
    source_textures: &Path,
    dest_textures: &Path,
    offset: u32,
    only: Option<&BTreeSet<u32>>,
    reporter: &Reporter<'_>,
) -> Result<PageImport> {
    let mut import = PageImport::default();
    if only.map(BTreeSet::is_empty).unwrap_or(false) {
        return Ok(import);
    }

    let pages = list_texture_pages(source_textures)?;
    let total = pages.len();
    for (index, page) in pages.into_iter().enumerate() {
        reporter.checkpoint("Cancelled during texture copy")?;
        if let Some(wanted) = only {
            if !wanted.contains(&page.number) {
                continue;
            }
        }

        let new_number = page.number + offset;
        let dest = dest_textures.join(page.renumbered_name(new_number));
        if dest.exists() {
            return Err(Error::OverwriteRefused {
                path: dest,
                reason: "texture page already exists".to_string(),
            });
        }
        fs::copy(&page.path, &dest)?;
        debug!("Texture page {} -> {}", page.path.display(), dest.display());

        import.mapping.insert(page.number, new_number);
        import.files_copied += 1;
        if index % 50 == 0 {
            reporter.count(BuildPhase::Textures, "Copying texture pages", index, total);
        }
    }

    if let Some(wanted) = only {
        let missing: Vec<u32> = wanted
            .iter()
            .filter(|n| !import.mapping.contains_key(n))
            .take(30)
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(Error::missing(format!(
                "texture page files in {} for pages {:?}",
                source_textures.display(),
                missing
            )));
        }
    }

    Ok(import)
}

/// Cover-referenced pages with no `page_{n}.*` file in `textures`
pub(crate) fn missing_pages(
    textures: &Path,
    referenced: impl IntoIterator<Item = u32>,
) -> Result<Vec<u32>> {
    let present: BTreeSet<u32> = list_texture_pages(textures)?
        .into_iter()
        .map(|p| p.number)
        .collect();
    let referenced: BTreeSet<u32> = referenced.into_iter().collect();
    Ok(referenced.difference(&present).copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("page_0.jpg"), "a").unwrap();
        fs::write(src.join("page_1.png"), "b").unwrap();
        fs::write(dst.join("page_0.jpg"), "base").unwrap();
        (temp, src, dst)
    }

    #[test]
    fn test_all_pages_renumbered() {
        let (_temp, src, dst) = setup();
        let reporter = Reporter::new(None, None, PathBuf::new());
        let offset = next_page_offset(&dst).unwrap();
        assert_eq!(offset, 1);

        let import = import_pages(&src, &dst, offset, None, &reporter).unwrap();
        assert_eq!(import.files_copied, 2);
        assert_eq!(import.mapping.get(&1), Some(&2));
        assert_eq!(fs::read_to_string(dst.join("page_2.png")).unwrap(), "b");
        assert!(missing_pages(&dst, [0, 1, 2]).unwrap().is_empty());
    }

    #[test]
    fn test_selected_pages_only() {
        let (_temp, src, dst) = setup();
        let reporter = Reporter::new(None, None, PathBuf::new());
        let wanted: BTreeSet<u32> = [1].into_iter().collect();

        let import = import_pages(&src, &dst, 1, Some(&wanted), &reporter).unwrap();
        assert_eq!(import.files_copied, 1);
        assert!(!dst.join("page_1.jpg").exists());
        assert!(dst.join("page_2.png").exists());
    }

    #[test]
    fn test_missing_selected_page() {
        let (_temp, src, dst) = setup();
        let reporter = Reporter::new(None, None, PathBuf::new());
        let wanted: BTreeSet<u32> = [7].into_iter().collect();
        let err = import_pages(&src, &dst, 1, Some(&wanted), &reporter).unwrap_err();
        assert!(matches!(err, Error::MissingReference { .. }));
    }

    #[test]
    fn test_refuses_to_overwrite() {
        let (_temp, src, dst) = setup();
        let reporter = Reporter::new(None, None, PathBuf::new());
        let err = import_pages(&src, &dst, 0, None, &reporter).unwrap_err();
        assert!(matches!(err, Error::OverwriteRefused { .. }));
    }
}
