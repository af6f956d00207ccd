//! Parsing of curator list events (NIP-51 follow sets and curation sets).
//!
//! Parsing is lenient: tags that do not carry a value are skipped and
//! pubkeys are not validated, so a malformed list yields a partial or empty
//! [`CuratedList`] instead of an error.

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Author reference from a `p` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubkeyRef {
    pub pubkey: String,
    /// Relay hint; advisory only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<String>,
}

/// Addressable reference from an `a` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressableRef {
    /// `kind:pubkey:d-tag`.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<String>,
}

/// One parsed curator list for a `(category, kind)` pair.
///
/// `pubkeys` and `pubkey_refs` come from the same scan and stay index-aligned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CuratedList {
    /// Category this list was requested for.
    pub category: String,
    /// The list's own `d` tag; the category when the event has none.
    pub d_tag: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub pubkeys: Vec<String>,
    pub pubkey_refs: Vec<PubkeyRef>,
    pub event_ids: Vec<String>,
    pub addressable_ids: Vec<String>,
    pub addressable_refs: Vec<AddressableRef>,
    pub created_at: u64,
    /// Source event.
    pub event: Event,
}

impl CuratedList {
    fn empty(category: &str, event: &Event) -> Self {
        Self {
            category: category.to_string(),
            d_tag: category.to_string(),
            title: None,
            description: None,
            image: None,
            pubkeys: vec![],
            pubkey_refs: vec![],
            event_ids: vec![],
            addressable_ids: vec![],
            addressable_refs: vec![],
            created_at: event.created_at,
            event: event.clone(),
        }
    }

    fn push_pubkey(&mut self, pubkey: &str, relay: Option<&str>) {
        self.pubkeys.push(pubkey.to_string());
        self.pubkey_refs.push(PubkeyRef {
            pubkey: pubkey.to_string(),
            relay: relay.map(str::to_string),
        });
    }

    fn set_metadata(&mut self, name: &str, value: &str) {
        let slot = match name {
            "title" => &mut self.title,
            "description" => &mut self.description,
            "image" => &mut self.image,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }
}

/// Parse a follow set: `p` tags become pubkey references, `title`,
/// `description` and `image` (first occurrence) become metadata.
pub fn parse_follow_set(category: &str, event: &Event) -> CuratedList {
    let mut list = CuratedList::empty(category, event);
    for tag in &event.tags {
        let (Some(name), Some(value)) = (tag.name(), tag.value()) else {
            continue;
        };
        match name {
            "p" => list.push_pubkey(value, tag.non_empty(2)),
            "d" => list.d_tag = value.to_string(),
            _ => list.set_metadata(name, value),
        }
    }
    list
}

/// Parse a curation set: like a follow set, plus `e` (event ids) and `a`
/// (addressable references with relay hints). The event's `d` tag overrides
/// the list's `d_tag`, even when it disagrees with the requested category.
pub fn parse_curation_set(category: &str, event: &Event) -> CuratedList {
    let mut list = CuratedList::empty(category, event);
    for tag in &event.tags {
        let (Some(name), Some(value)) = (tag.name(), tag.value()) else {
            continue;
        };
        match name {
            "p" => list.push_pubkey(value, tag.non_empty(2)),
            "e" => list.event_ids.push(value.to_string()),
            "a" => {
                list.addressable_ids.push(value.to_string());
                list.addressable_refs.push(AddressableRef {
                    id: value.to_string(),
                    relay: tag.non_empty(2).map(str::to_string),
                });
            }
            "d" => list.d_tag = value.to_string(),
            _ => list.set_metadata(name, value),
        }
    }
    list
}
