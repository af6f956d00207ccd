//! Nostr event model and kind classification.

use serde::{Deserialize, Serialize};

/// Event kinds the discovery layer reads.
pub mod kinds {
    /// Short text note.
    pub const TEXT_NOTE: u32 = 1;
    /// Picture post (NIP-68).
    pub const PICTURE: u32 = 20;
    /// Normal video (NIP-71).
    pub const VIDEO: u32 = 21;
    /// Short vertical video (NIP-71).
    pub const SHORT_VIDEO: u32 = 22;
    /// Author relay list (NIP-65).
    pub const RELAY_LIST: u32 = 10002;
    /// Follow set (NIP-51).
    pub const FOLLOW_SET: u32 = 30000;
    /// Article and note curation set (NIP-51).
    pub const ARTICLE_CURATION: u32 = 30004;
    /// Video curation set (NIP-51).
    pub const VIDEO_CURATION: u32 = 30005;
    /// Picture curation set (NIP-51).
    pub const PICTURE_CURATION: u32 = 30006;
    /// Long-form article (NIP-23).
    pub const LONG_FORM: u32 = 30023;
    /// Live activity (NIP-53).
    pub const LIVE_ACTIVITY: u32 = 30311;
    /// Music playlist published by the curator.
    pub const PLAYLIST: u32 = 32100;
    /// Addressable normal video.
    pub const ADDRESSABLE_VIDEO: u32 = 34235;
    /// Addressable short video.
    pub const ADDRESSABLE_SHORT_VIDEO: u32 = 34236;
}

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. The ones this crate reads:
///
/// - `p` – author reference, optional relay hint in position 2
/// - `e` – event id reference
/// - `a` – addressable reference `kind:pubkey:d-tag`, optional relay hint
/// - `d` – identifier for addressable events
/// - `r` – relay URL in a NIP-65 relay list
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from string slices.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tag(fields.into_iter().map(Into::into).collect())
    }

    /// Tag name, e.g. `"p"`.
    pub fn name(&self) -> Option<&str> {
        self.get(0)
    }

    /// First value after the name.
    pub fn value(&self) -> Option<&str> {
        self.get(1)
    }

    /// Field at position `idx`.
    pub fn get(&self, idx: usize) -> Option<&str> {
        self.0.get(idx).map(String::as_str)
    }

    /// Field at `idx` when present and non-empty. Used for relay hints,
    /// which clients frequently publish as `""`.
    pub fn non_empty(&self, idx: usize) -> Option<&str> {
        self.get(idx).filter(|s| !s.is_empty())
    }
}

/// Signed Nostr event as received from relays.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "3bf0...",
///   "kind": 30000,
///   "created_at": 1700000000,
///   "tags": [["d", "news"], ["p", "7e7e...", "wss://relay.example"]],
///   "content": "",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `1` or `30023`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Arbitrary tags.
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl Event {
    /// Value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name() == Some(name))
            .and_then(Tag::value)
    }

    /// All tags named `name`, in order.
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Tag> + 'a {
        self.tags.iter().filter(move |t| t.name() == Some(name))
    }

    /// The `d` tag identifier, if any.
    pub fn identifier(&self) -> Option<&str> {
        self.tag_value("d")
    }

    /// Replaceable kinds (10000–19999): one canonical event per author and kind.
    pub fn is_replaceable(&self) -> bool {
        is_replaceable_kind(self.kind)
    }

    /// Addressable kinds (30000–39999): one canonical event per author, kind and `d` tag.
    pub fn is_addressable(&self) -> bool {
        is_addressable_kind(self.kind)
    }
}

pub fn is_replaceable_kind(kind: u32) -> bool {
    (10_000..20_000).contains(&kind)
}

pub fn is_addressable_kind(kind: u32) -> bool {
    (30_000..40_000).contains(&kind)
}

/// Whether `s` is a lowercase-or-uppercase hex string of exactly 64 characters.
pub fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: u32, tags: Vec<Tag>) -> Event {
        Event {
            id: "aa11".into(),
            pubkey: "p".into(),
            kind,
            created_at: 1,
            tags,
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn deserializes_relay_json() {
        let json = r#"{"id":"aa11","pubkey":"p","kind":30023,"created_at":5,
            "tags":[["d","slug"],["t","news"]],"content":"hi","sig":"00"}"#;
        let ev: Event = serde_json::from_str(json).unwrap();
        assert_eq!(ev.kind, kinds::LONG_FORM);
        assert_eq!(ev.identifier(), Some("slug"));
        assert_eq!(ev.tag_value("t"), Some("news"));
    }

    #[test]
    fn kind_ranges() {
        assert!(ev(10002, vec![]).is_replaceable());
        assert!(!ev(10002, vec![]).is_addressable());
        assert!(ev(30311, vec![]).is_addressable());
        assert!(!ev(1, vec![]).is_replaceable());
        assert!(!ev(1, vec![]).is_addressable());
        assert!(!is_addressable_kind(40_000));
    }

    #[test]
    fn first_tag_wins_and_empty_hint_ignored() {
        let e = ev(
            1,
            vec![
                Tag::new(["title", "first"]),
                Tag::new(["title", "second"]),
                Tag::new(["p", "abc", ""]),
            ],
        );
        assert_eq!(e.tag_value("title"), Some("first"));
        let p = e.tags_named("p").next().unwrap();
        assert_eq!(p.non_empty(2), None);
        assert_eq!(e.tags_named("title").count(), 2);
    }

    #[test]
    fn hex64_check() {
        assert!(is_hex64(&"ab".repeat(32)));
        assert!(!is_hex64("abcd"));
        assert!(!is_hex64(&"zz".repeat(32)));
    }
}
