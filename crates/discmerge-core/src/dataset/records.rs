//! Typed records over the songs, acts, and covers documents.
//!
//! Each record keeps the element it was read from so unknown child nodes and
//! attribute order survive a rewrite; only the known fields are edited.

use crate::xml::Element;

/// Attribute keys a `SONG` element may carry its ID under, in lookup order
const SONG_ID_KEYS: [&str; 4] = ["ID", "id", "SONG_ID", "song_id"];

/// Case/whitespace-normalized performer key: trimmed, collapsed, upper-cased
pub fn normalize_key(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// A `SONG` element with its ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Song {
    pub id: u32,
    element: Element,
}

/// Where an act ID is referenced from inside a song
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActRef {
    /// `PERFORMED_BY@ID`, a direct child of the song
    PerformedBy,
    /// Any nested `ACT@ID`
    Nested,
}

impl Song {
    /// Read a song from its element; `None` if it has no usable ID
    pub fn from_element(element: Element) -> Option<Self> {
        let id = song_id_of(&element)?;
        Some(Self { id, element })
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn into_element(self) -> Element {
        self.element
    }

    /// `PERFORMED_BY@ID`, if present
    pub fn performed_by(&self) -> Option<u32> {
        self.element.child("PERFORMED_BY")?.attr_u32("ID")
    }

    /// Performer key from the song's own text fields
    pub fn performance_key(&self) -> String {
        ["PERFORMANCE_NAME_KEY", "PERFORMANCE_NAME"]
            .iter()
            .filter_map(|name| self.element.find(name))
            .map(|el| el.text().trim())
            .find(|text| !text.is_empty())
            .map(normalize_key)
            .unwrap_or_default()
    }

    /// Rewrite act references. `map` receives the reference kind and the
    /// current ID and returns the replacement, or `None` to leave it.
    pub fn remap_acts(&mut self, mut map: impl FnMut(ActRef, u32) -> Option<u32>) {
        if let Some(performed_by) = self.element.child_mut("PERFORMED_BY") {
            if let Some(old) = performed_by.attr_u32("ID") {
                if let Some(new) = map(ActRef::PerformedBy, old) {
                    performed_by.set_attr("ID", new.to_string());
                }
            }
        }
        self.element.for_each_descendant_mut(&mut |el| {
            if el.name != "ACT" {
                return;
            }
            if let Some(old) = el.attr_u32("ID") {
                if let Some(new) = map(ActRef::Nested, old) {
                    el.set_attr("ID", new.to_string());
                }
            }
        });
    }
}

/// First present ID attribute; a present but unparsable value yields `None`
pub(crate) fn song_id_of(element: &Element) -> Option<u32> {
    SONG_ID_KEYS
        .iter()
        .find_map(|key| element.attr(key))
        .and_then(|value| value.trim().parse().ok())
}

/// An `ACT` (performer) element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Act {
    pub id: u32,
    pub name: String,
    pub name_key: String,
    element: Element,
}

impl Act {
    pub fn from_element(element: Element) -> Option<Self> {
        let id = element.attr_u32("ID")?;
        let name = element
            .child("NAME")
            .map(|e| e.text().to_string())
            .unwrap_or_default();
        let name_key = element
            .child("NAME_KEY")
            .map(|e| e.text().to_string())
            .unwrap_or_default();
        Some(Self {
            id,
            name,
            name_key,
            element,
        })
    }

    /// Synthesize an act element from a name
    #[cfg(test)]
    pub(crate) fn synthesized(id: u32, name: &str, name_key: &str) -> Self {
        let key = if name_key.trim().is_empty() {
            normalize_key(name)
        } else {
            name_key.to_string()
        };
        let element = Element::new("ACT")
            .with_attr("ID", id.to_string())
            .with_child(Element::new("NAME").with_text(name))
            .with_child(Element::new("NAME_KEY").with_text(key.clone()));
        Self {
            id,
            name: name.to_string(),
            name_key: key,
            element,
        }
    }

    /// Canonical identity across datasets; empty when the act has no name
    pub fn key(&self) -> String {
        if self.name_key.trim().is_empty() {
            normalize_key(&self.name)
        } else {
            normalize_key(&self.name_key)
        }
    }

    /// Clone with a new ID
    pub fn with_id(&self, id: u32) -> Self {
        let mut act = self.clone();
        act.id = id;
        act.element.set_attr("ID", id.to_string());
        act
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn into_element(self) -> Element {
        self.element
    }
}

/// A `TPAGE_BIT` cover entry named `cover_{song_id}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverEntry {
    pub song_id: u32,
    element: Element,
}

impl CoverEntry {
    pub fn from_element(element: Element) -> Option<Self> {
        let song_id = element
            .attr("NAME")?
            .strip_prefix("cover_")
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))?
            .parse()
            .ok()?;
        Some(Self { song_id, element })
    }

    /// Raw `TEXTURE` attribute
    pub fn texture(&self) -> &str {
        self.element.attr("TEXTURE").unwrap_or("")
    }

    /// Page number from `TEXTURE="page_{n}"`
    pub fn page(&self) -> Option<u32> {
        let digits = self.texture().strip_prefix("page_")?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Clone pointing at another page
    pub fn with_page(&self, page: u32) -> Self {
        let mut entry = self.clone();
        entry.element.set_attr("TEXTURE", format!("page_{}", page));
        entry
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn into_element(self) -> Element {
        self.element
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("  the   Beatles "), "THE BEATLES");
        assert_eq!(normalize_key(""), "");
    }

    #[test]
    fn test_song_id_key_order() {
        let el = Element::new("SONG").with_attr("song_id", "9").with_attr("id", "4");
        assert_eq!(Song::from_element(el).unwrap().id, 4);

        let bad = Element::new("SONG").with_attr("ID", "x").with_attr("id", "4");
        assert!(Song::from_element(bad).is_none());
    }

    #[test]
    fn test_remap_acts() {
        let el = Element::new("SONG")
            .with_attr("ID", "1")
            .with_child(Element::new("PERFORMED_BY").with_attr("ID", "3"))
            .with_child(
                Element::new("CREDITS").with_child(Element::new("ACT").with_attr("ID", "3")),
            );
        let mut song = Song::from_element(el).unwrap();
        song.remap_acts(|kind, old| match kind {
            ActRef::PerformedBy => Some(old + 10),
            ActRef::Nested => Some(old + 20),
        });
        assert_eq!(song.performed_by(), Some(13));
        assert_eq!(song.element().find("ACT").unwrap().attr_u32("ID"), Some(23));
    }

    #[test]
    fn test_performance_key_fallback() {
        let el = Element::new("SONG")
            .with_attr("ID", "1")
            .with_child(Element::new("PERFORMANCE_NAME_KEY").with_text("  "))
            .with_child(Element::new("PERFORMANCE_NAME").with_text("Blondie"));
        assert_eq!(Song::from_element(el).unwrap().performance_key(), "BLONDIE");
    }

    #[test]
    fn test_act_key_prefers_name_key() {
        let act = Act::from_element(
            Element::new("ACT")
                .with_attr("ID", "2")
                .with_child(Element::new("NAME").with_text("Queen"))
                .with_child(Element::new("NAME_KEY").with_text("queen ")),
        )
        .unwrap();
        assert_eq!(act.key(), "QUEEN");
        assert_eq!(act.with_id(7).element().attr("ID"), Some("7"));
    }

    #[test]
    fn test_cover_entry_page() {
        let el = Element::new("TPAGE_BIT")
            .with_attr("NAME", "cover_12")
            .with_attr("TEXTURE", "page_3");
        let cover = CoverEntry::from_element(el).unwrap();
        assert_eq!(cover.song_id, 12);
        assert_eq!(cover.page(), Some(3));
        assert_eq!(cover.with_page(8).texture(), "page_8");

        let other = Element::new("TPAGE_BIT").with_attr("NAME", "logo");
        assert!(CoverEntry::from_element(other).is_none());
    }
}
