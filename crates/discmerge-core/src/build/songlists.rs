//! Songlist (`SUBSET`/`SONG_REF`) merging

use std::collections::{BTreeSet, HashSet};

use crate::config::SonglistMode;
use crate::xml::{Element, XmlDocument};

/// Combine songlists according to `mode`. Every result is filtered to
/// `merged` and free of duplicate references.
pub fn merge_songlists(
    mode: SonglistMode,
    base: &XmlDocument,
    donors: &[&XmlDocument],
    merged: &BTreeSet<u32>,
) -> XmlDocument {
    match mode {
        SonglistMode::UnionByName => union_by_name(base, donors, merged),
        SonglistMode::BaseOnly => {
            let mut doc = base.clone();
            clean_all_subsets(&mut doc.root, merged);
            doc
        }
    }
}

/// Union same-named subsets; donor-only subsets are appended to the `Root`
/// group (or the document root) with a fresh ID if theirs is taken
pub fn union_by_name(
    base: &XmlDocument,
    donors: &[&XmlDocument],
    merged: &BTreeSet<u32>,
) -> XmlDocument {
    let mut doc = base.clone();
    clean_all_subsets(&mut doc.root, merged);

    let mut used_ids: BTreeSet<u32> = doc
        .root
        .descendants()
        .filter(|e| e.name == "SUBSET")
        .filter_map(|e| e.attr_u32("ID"))
        .collect();

    for donor in donors {
        for subset in donor.root.descendants().filter(|e| e.name == "SUBSET") {
            let name = match subset.attr("NAME") {
                Some(name) if !name.is_empty() => name,
                _ => continue,
            };

            if let Some(target) = find_subset_mut(&mut doc.root, name) {
                let mut existing: HashSet<u32> = song_ref_ids(target).collect();
                for id in song_ref_ids(subset) {
                    if merged.contains(&id) && existing.insert(id) {
                        target
                            .children
                            .push(Element::new("SONG_REF").with_attr("ID", id.to_string()));
                    }
                }
                clean_subset(target, merged);
                continue;
            }

            let mut cloned = subset.clone();
            if let Some(id) = cloned.attr_u32("ID") {
                if used_ids.contains(&id) {
                    let fresh = used_ids.iter().next_back().map(|m| m + 1).unwrap_or(1);
                    cloned.set_attr("ID", fresh.to_string());
                    used_ids.insert(fresh);
                } else {
                    used_ids.insert(id);
                }
            }
            clean_subset(&mut cloned, merged);
            root_group_mut(&mut doc.root).children.push(cloned);
        }
    }

    doc
}

fn song_ref_ids(subset: &Element) -> impl Iterator<Item = u32> + '_ {
    subset
        .children_named("SONG_REF")
        .filter_map(|r| r.attr_u32("ID"))
}

/// Drop references that are unparsable, outside `merged`, or repeated
fn clean_subset(subset: &mut Element, merged: &BTreeSet<u32>) {
    let mut seen = HashSet::new();
    subset.children.retain(|child| {
        if child.name != "SONG_REF" {
            return true;
        }
        match child.attr_u32("ID") {
            Some(id) => merged.contains(&id) && seen.insert(id),
            None => false,
        }
    });
}

fn clean_all_subsets(root: &mut Element, merged: &BTreeSet<u32>) {
    if root.name == "SUBSET" {
        clean_subset(root, merged);
    }
    root.for_each_descendant_mut(&mut |el| {
        if el.name == "SUBSET" {
            clean_subset(el, merged);
        }
    });
}

fn find_subset_mut<'a>(element: &'a mut Element, name: &str) -> Option<&'a mut Element> {
    for child in &mut element.children {
        if child.name == "SUBSET" && child.attr("NAME") == Some(name) {
            return Some(child);
        }
        if let Some(found) = find_subset_mut(child, name) {
            return Some(found);
        }
    }
    None
}

fn root_group_mut(root: &mut Element) -> &mut Element {
    match root_group_path(root) {
        Some(path) => path.into_iter().fold(root, |el, i| &mut el.children[i]),
        None => root,
    }
}

/// Child indices from `element` down to the first `GROUP NAME="Root"`
fn root_group_path(element: &Element) -> Option<Vec<usize>> {
    for (index, child) in element.children.iter().enumerate() {
        if child.name == "GROUP" && child.attr("NAME") == Some("Root") {
            return Some(vec![index]);
        }
        if let Some(mut rest) = root_group_path(child) {
            rest.insert(0, index);
            return Some(rest);
        }
    }
    None
}
