//! Freshness-ordered event deduplication.
//!
//! [`EventCache`] is the single merge-by-freshness accumulator used wherever
//! events for the same logical item arrive out of order from several relays.
//! [`ListCache`] is the process-wide map of parsed curator lists shared across
//! aggregation calls.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use crate::{
    event::{is_addressable_kind, is_replaceable_kind, Event},
    lists::CuratedList,
};

/// How an event is mapped to its dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// `pubkey:d` for replaceable and addressable kinds, bare id otherwise.
    ByKind,
    /// Always `pubkey:d`, with `""` when the event has no `d` tag.
    Addressable,
    /// Always the event id.
    Immutable,
}

impl KeyStrategy {
    pub fn key(self, ev: &Event) -> String {
        let addressable = match self {
            KeyStrategy::ByKind => is_replaceable_kind(ev.kind) || is_addressable_kind(ev.kind),
            KeyStrategy::Addressable => true,
            KeyStrategy::Immutable => false,
        };
        if addressable {
            format!("{}:{}", ev.pubkey, ev.identifier().unwrap_or_default())
        } else {
            ev.id.clone()
        }
    }
}

/// Keeps the newest-seen event per dedup key.
///
/// A stored event is only replaced by one with a strictly greater
/// `created_at`; on a tie the first arrival stays.
#[derive(Debug, Clone)]
pub struct EventCache {
    strategy: KeyStrategy,
    entries: HashMap<String, Event>,
}

impl EventCache {
    pub fn new(strategy: KeyStrategy) -> Self {
        Self {
            strategy,
            entries: HashMap::new(),
        }
    }

    /// Insert `ev` if its key is new or it is strictly newer than the stored
    /// event. Returns whether the event was accepted.
    pub fn upsert(&mut self, ev: Event) -> bool {
        let key = self.strategy.key(&ev);
        match self.entries.get(&key) {
            Some(existing) if existing.created_at >= ev.created_at => false,
            _ => {
                self.entries.insert(key, ev);
                true
            }
        }
    }

    /// Upsert every event, returning how many were accepted.
    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) -> usize {
        events
            .into_iter()
            .map(|ev| self.upsert(ev))
            .filter(|accepted| *accepted)
            .count()
    }

    /// Snapshot of the current events, unordered.
    pub fn values(&self) -> Vec<Event> {
        self.entries.values().cloned().collect()
    }

    pub fn into_values(self) -> Vec<Event> {
        self.entries.into_values().collect()
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&Event> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Process-wide cache of parsed curator lists keyed by `(list kind, d tag)`.
///
/// Writes only ever overwrite with an equal-or-newer list, so concurrent
/// aggregations can share it without coordination beyond the lock.
#[derive(Debug, Default)]
pub struct ListCache {
    lists: RwLock<HashMap<(u32, String), CuratedList>>,
}

impl ListCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: u32, d_tag: &str) -> Option<CuratedList> {
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        lists.get(&(kind, d_tag.to_string())).cloned()
    }

    /// Store `list` unless a strictly newer list is already cached. Returns
    /// whether the list was stored.
    pub fn put(&self, kind: u32, d_tag: &str, list: CuratedList) -> bool {
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        let key = (kind, d_tag.to_string());
        if lists
            .get(&key)
            .is_some_and(|existing| existing.created_at > list.created_at)
        {
            return false;
        }
        lists.insert(key, list);
        true
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lists.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event::Tag, lists::parse_follow_set};

    fn ev(id: &str, kind: u32, pubkey: &str, d: Option<&str>, created_at: u64) -> Event {
        Event {
            id: id.into(),
            pubkey: pubkey.into(),
            kind,
            created_at,
            tags: d.map(|d| vec![Tag::new(["d", d])]).unwrap_or_default(),
            content: String::new(),
            sig: String::new(),
        }
    }

    #[test]
    fn newer_replaces_older_and_stale_is_rejected() {
        let a = ev("a", 30311, "P", Some("x"), 100);
        let b = ev("b", 30311, "P", Some("x"), 200);
        let mut cache = EventCache::new(KeyStrategy::ByKind);
        assert!(cache.upsert(a.clone()));
        assert!(cache.upsert(b.clone()));
        assert!(!cache.upsert(a));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.values(), vec![b]);
    }

    #[test]
    fn tie_keeps_first_arrival() {
        let first = ev("first", 30023, "P", Some("x"), 100);
        let second = ev("second", 30023, "P", Some("x"), 100);
        let mut cache = EventCache::new(KeyStrategy::ByKind);
        assert!(cache.upsert(first));
        assert!(!cache.upsert(second));
        assert_eq!(cache.get("P:x").unwrap().id, "first");
    }

    #[test]
    fn immutable_kinds_keyed_by_id() {
        let mut cache = EventCache::new(KeyStrategy::ByKind);
        assert!(cache.upsert(ev("n1", 1, "P", None, 5)));
        assert!(cache.upsert(ev("n2", 1, "P", None, 5)));
        assert!(!cache.upsert(ev("n2", 1, "P", None, 5)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn strategies_override_kind() {
        let e = ev("id1", 22, "P", None, 1);
        assert_eq!(KeyStrategy::ByKind.key(&e), "id1");
        assert_eq!(KeyStrategy::Addressable.key(&e), "P:");
        let addr = ev("id2", 34236, "P", Some("clip"), 1);
        assert_eq!(KeyStrategy::ByKind.key(&addr), "P:clip");
        assert_eq!(KeyStrategy::Immutable.key(&addr), "id2");
    }

    #[test]
    fn extend_counts_accepted() {
        let mut cache = EventCache::new(KeyStrategy::Addressable);
        let accepted = cache.extend(vec![
            ev("a", 30311, "P", Some("x"), 1),
            ev("b", 30311, "P", Some("x"), 3),
            ev("c", 30311, "P", Some("x"), 2),
            ev("d", 30311, "Q", Some("x"), 1),
        ]);
        assert_eq!(accepted, 3);
        assert_eq!(cache.get("P:x").unwrap().id, "b");
    }

    #[test]
    fn list_cache_keeps_newest() {
        let cache = ListCache::new();
        let older = parse_follow_set("news", &ev("o", 30000, "C", Some("news"), 10));
        let newer = parse_follow_set("news", &ev("n", 30000, "C", Some("news"), 20));
        assert!(cache.put(30000, "news", newer));
        assert!(!cache.put(30000, "news", older));
        assert_eq!(cache.get(30000, "news").unwrap().event.id, "n");
        assert!(cache.get(30004, "news").is_none());
        assert_eq!(cache.len(), 1);
    }
}
