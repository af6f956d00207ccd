//! NIP-01 subscription filters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Filter sent in `REQ` messages and applied locally to whatever relays return.
///
/// Tag conditions are keyed by their `#` prefix (e.g. `#d`) and flattened into
/// the JSON object, matching the wire format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(self, id: impl Into<String>) -> Self {
        self.ids([id.into()])
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn author(self, pubkey: impl Into<String>) -> Self {
        self.authors([pubkey.into()])
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = Some(authors.into_iter().map(Into::into).collect());
        self
    }

    pub fn kind(self, kind: u32) -> Self {
        self.kinds([kind])
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Add a `#<name>` tag condition.
    pub fn tag<I, S>(mut self, name: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.insert(
            format!("#{name}"),
            values.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Shorthand for a single `#d` value.
    pub fn identifier(self, d: impl Into<String>) -> Self {
        self.tag('d', [d.into()])
    }

    #[cfg(test)]
    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `ev` satisfies every condition of the filter. `limit` is not
    /// considered here.
    pub fn matches(&self, ev: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| id == &ev.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.iter().any(|a| a == &ev.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&ev.kind) {
                return false;
            }
        }
        if self.since.is_some_and(|s| ev.created_at < s) {
            return false;
        }
        if self.until.is_some_and(|u| ev.created_at > u) {
            return false;
        }
        self.tags.iter().all(|(key, values)| {
            let Some(name) = key.strip_prefix('#') else {
                return true;
            };
            ev.tags_named(name)
                .filter_map(|t| t.value())
                .any(|v| values.iter().any(|want| want == v))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;
    use serde_json::json;

    fn ev(kind: u32, pubkey: &str, created_at: u64, d: Option<&str>) -> Event {
        Event {
            id: format!("{pubkey}-{created_at}"),
            pubkey: pubkey.into(),
            kind,
            created_at,
            tags: d.map(|d| vec![Tag::new(["d", d])]).unwrap_or_default(),
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn serializes_to_wire_form() {
        let f = Filter::new()
            .kind(30000)
            .author("cur")
            .identifier("news")
            .limit(1);
        assert_eq!(
            serde_json::to_value(&f).unwrap(),
            json!({"kinds": [30000], "authors": ["cur"], "#d": ["news"], "limit": 1})
        );
        let back: Filter = serde_json::from_value(serde_json::to_value(&f).unwrap()).unwrap();
        assert_eq!(back, f);
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::new().matches(&ev(1, "a", 1, None)));
    }

    #[test]
    fn matches_each_field() {
        let f = Filter::new().kinds([30023]).author("a").identifier("slug");
        assert!(f.matches(&ev(30023, "a", 5, Some("slug"))));
        assert!(!f.matches(&ev(30023, "a", 5, Some("other"))));
        assert!(!f.matches(&ev(30023, "a", 5, None)));
        assert!(!f.matches(&ev(1, "a", 5, Some("slug"))));
        assert!(!f.matches(&ev(30023, "b", 5, Some("slug"))));

        let window = Filter::new().since(10);
        assert!(!window.matches(&ev(1, "a", 9, None)));
        assert!(window.matches(&ev(1, "a", 10, None)));

        let by_id = Filter::new().id("a-3");
        assert!(by_id.matches(&ev(1, "a", 3, None)));
        assert!(!by_id.matches(&ev(1, "a", 4, None)));
    }
}
