//! Performer (act) canonicalization across datasets.
//!
//! Acts are identified by their normalized name key. Base acts keep their
//! IDs; donor acts with a key not seen yet get the next free ID; donor acts
//! with a known key are folded into the existing act.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::dataset::{Act, ActRef, Song};
use crate::xml::Element;

/// Old act ID to canonical key, for one dataset
#[derive(Debug, Clone, Default)]
pub struct ActRemap {
    keys: HashMap<u32, String>,
}

impl ActRemap {
    pub fn key_for(&self, old_id: u32) -> Option<&str> {
        self.keys
            .get(&old_id)
            .map(String::as_str)
            .filter(|k| !k.is_empty())
    }
}

/// Merged act table
#[derive(Debug, Clone, Default)]
pub struct ActCanonicalizer {
    key_to_id: HashMap<String, u32>,
    acts: BTreeMap<u32, Act>,
}

impl ActCanonicalizer {
    /// Seed from the base dataset's acts, keeping their IDs
    pub fn from_base(acts: &[Act]) -> (Self, ActRemap) {
        let mut table = Self::default();
        let mut remap = ActRemap::default();
        for act in acts {
            let key = act.key();
            remap.keys.insert(act.id, key.clone());
            if key.is_empty() || table.key_to_id.contains_key(&key) {
                continue;
            }
            table.key_to_id.insert(key, act.id);
            table.acts.insert(act.id, act.clone());
        }
        (table, remap)
    }

    /// Fold a donor's acts into the table
    pub fn import(&mut self, acts: &[Act]) -> ActRemap {
        let mut remap = ActRemap::default();
        let mut added = 0usize;
        for act in acts {
            let key = act.key();
            remap.keys.insert(act.id, key.clone());
            if key.is_empty() || self.key_to_id.contains_key(&key) {
                continue;
            }
            let new_id = self.next_id();
            self.key_to_id.insert(key, new_id);
            self.acts.insert(new_id, act.with_id(new_id));
            added += 1;
        }
        debug!("Imported {} new act(s) from {} donor act(s)", added, acts.len());
        remap
    }

    fn next_id(&self) -> u32 {
        self.acts.keys().next_back().map(|id| id + 1).unwrap_or(1)
    }

    /// Merged ID for a canonical key
    pub fn id_for_key(&self, key: &str) -> Option<u32> {
        self.key_to_id.get(key).copied()
    }

    /// Rewrite a song's act references using its own dataset's remap.
    ///
    /// `PERFORMED_BY` falls back to the song's performance name when its ID is
    /// not in the dataset's act table.
    pub fn remap_song(&self, song: &mut Song, remap: &ActRemap) {
        let fallback_key = song.performance_key();
        song.remap_acts(|kind, old| {
            let key = match (kind, remap.key_for(old)) {
                (_, Some(key)) => key,
                (ActRef::PerformedBy, None) if !fallback_key.is_empty() => fallback_key.as_str(),
                _ => return None,
            };
            self.id_for_key(key)
        });
    }

    pub fn len(&self) -> usize {
        self.acts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acts.is_empty()
    }

    /// Act elements ascending by merged ID
    pub fn into_elements(self) -> Vec<Element> {
        self.acts.into_values().map(Act::into_element).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn act(id: u32, name: &str) -> Act {
        Act::synthesized(id, name, "")
    }

    fn song(id: u32, performed_by: u32) -> Song {
        Song::from_element(
            Element::new("SONG")
                .with_attr("ID", id.to_string())
                .with_child(Element::new("PERFORMED_BY").with_attr("ID", performed_by.to_string())),
        )
        .unwrap()
    }

    #[test]
    fn test_shared_key_reuses_base_id() {
        let (mut table, _) = ActCanonicalizer::from_base(&[act(1, "Queen"), act(4, "Abba")]);
        let remap = table.import(&[act(1, "Blur"), act(2, "  queen ")]);

        assert_eq!(table.len(), 3);
        assert_eq!(table.id_for_key("QUEEN"), Some(1));
        assert_eq!(table.id_for_key("BLUR"), Some(5));

        let mut donor_song = song(20, 2);
        table.remap_song(&mut donor_song, &remap);
        assert_eq!(donor_song.performed_by(), Some(1));

        let mut other = song(21, 1);
        table.remap_song(&mut other, &remap);
        assert_eq!(other.performed_by(), Some(5));
    }

    #[test]
    fn test_unknown_act_uses_performance_name() {
        let (table, remap) = ActCanonicalizer::from_base(&[act(3, "Madness")]);
        let mut s = Song::from_element(
            Element::new("SONG")
                .with_attr("ID", "9")
                .with_child(Element::new("PERFORMED_BY").with_attr("ID", "77"))
                .with_child(Element::new("PERFORMANCE_NAME").with_text("madness")),
        )
        .unwrap();
        table.remap_song(&mut s, &remap);
        assert_eq!(s.performed_by(), Some(3));
    }

    #[test]
    fn test_elements_sorted_by_id() {
        let (mut table, _) = ActCanonicalizer::from_base(&[act(7, "B"), act(2, "A")]);
        table.import(&[act(1, "C")]);
        let ids: Vec<Option<u32>> = table
            .into_elements()
            .iter()
            .map(|e| e.attr_u32("ID"))
            .collect();
        assert_eq!(ids, vec![Some(2), Some(7), Some(8)]);
    }
}
