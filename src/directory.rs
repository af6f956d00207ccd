//! Author relay lists (NIP-65) discovered from the general relays.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use crate::{
    event::{kinds, Event},
    pool::normalize_relays,
};

/// Relays an author advertises in their kind 10002 list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayList {
    /// Where the author publishes; events *from* them are fetched here.
    pub write: Vec<String>,
    /// Where the author reads mentions.
    pub read: Vec<String>,
    pub created_at: u64,
}

impl RelayList {
    /// Parse `r` tags. An unmarked tag counts as both read and write.
    pub fn from_event(ev: &Event) -> Self {
        let mut write = vec![];
        let mut read = vec![];
        for tag in ev.tags_named("r") {
            let Some(url) = tag.value() else { continue };
            match tag.get(2) {
                Some("write") => write.push(url.to_string()),
                Some("read") => read.push(url.to_string()),
                _ => {
                    write.push(url.to_string());
                    read.push(url.to_string());
                }
            }
        }
        Self {
            write: normalize_relays(&write),
            read: normalize_relays(&read),
            created_at: ev.created_at,
        }
    }
}

/// In-process map from author pubkey to their newest known relay list.
#[derive(Debug, Default)]
pub struct RelayDirectory {
    lists: RwLock<HashMap<String, RelayList>>,
}

impl RelayDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pubkey: &str) -> Option<RelayList> {
        self.lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(pubkey)
            .cloned()
    }

    pub fn contains(&self, pubkey: &str) -> bool {
        self.get(pubkey).is_some()
    }

    /// Record a relay-list event unless a strictly newer list is known.
    /// Returns whether the directory changed.
    pub fn update(&self, ev: &Event) -> bool {
        if ev.kind != kinds::RELAY_LIST {
            return false;
        }
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        if lists
            .get(&ev.pubkey)
            .is_some_and(|known| known.created_at >= ev.created_at)
        {
            return false;
        }
        lists.insert(ev.pubkey.clone(), RelayList::from_event(ev));
        true
    }

    /// Remember that an author publishes no relay list so discovery is not
    /// repeated for them.
    pub fn mark_empty(&self, pubkey: &str) {
        self.lists
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(pubkey.to_string())
            .or_default();
    }
}
