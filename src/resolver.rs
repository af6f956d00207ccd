//! Turning addressable coordinates and event ids into full events.
//!
//! Each lookup walks a fixed fallback chain and stops at the first hit.
//! Relay failures never surface here: an exhausted chain is `None`.

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    coordinate::Coordinate,
    directory::{RelayDirectory, RelayList},
    event::{is_hex64, kinds, Event},
    filter::Filter,
    pool::{normalize_relays, Lookup, RelayPool},
    storage::Store,
};

/// Author relays queried per lookup.
const AUTHOR_RELAY_LIMIT: usize = 5;

#[derive(Clone)]
pub struct Resolver {
    pool: Arc<RelayPool>,
    store: Store,
    directory: Arc<RelayDirectory>,
    general_relays: Vec<String>,
    timeout: Duration,
}

impl Resolver {
    pub fn new(
        pool: Arc<RelayPool>,
        store: Store,
        general_relays: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            pool,
            store,
            directory: Arc::new(RelayDirectory::new()),
            general_relays: normalize_relays(&general_relays),
            timeout,
        }
    }

    #[cfg(test)]
    pub fn directory(&self) -> &RelayDirectory {
        &self.directory
    }

    /// Resolve `kind:pubkey:identifier`: local store, then `hints`, then the
    /// author's best write relays, then the general relays.
    pub async fn resolve(
        &self,
        kind: u32,
        pubkey: &str,
        identifier: &str,
        hints: &[String],
    ) -> Option<Event> {
        let coord = Coordinate::new(kind, pubkey, identifier);
        match self.store.latest(&coord) {
            Ok(Some(ev)) => {
                debug!(%coord, "resolved from local store");
                // Warm the author's relays for the next miss.
                self.spawn_relay_discovery(pubkey);
                return Some(ev);
            }
            Ok(None) => {}
            Err(e) => warn!(%coord, error = %e, "local store lookup failed"),
        }

        let filter = Filter::new()
            .kind(kind)
            .author(pubkey)
            .identifier(identifier);
        let found = self.fetch_via_relays(&filter, hints, Some(pubkey)).await;
        if found.is_none() {
            debug!(%coord, "coordinate not found");
        }
        found
    }

    /// [`Resolver::resolve`] for an already parsed coordinate.
    pub async fn resolve_coordinate(&self, coord: &Coordinate, hints: &[String]) -> Option<Event> {
        self.resolve(coord.kind, &coord.pubkey, &coord.identifier, hints)
            .await
    }

    /// Fetch an immutable event by id: `hints`, then the author's relays when
    /// the author is known, then the local store, then the general relays.
    pub async fn fetch_event(
        &self,
        id: &str,
        hints: &[String],
        author: Option<&str>,
    ) -> Option<Event> {
        let filter = Filter::new().id(id);
        if let Some(ev) = self.query(&normalize_relays(hints), &filter).await {
            return Some(ev);
        }
        if let Some(author) = author {
            let relays = self.author_relays(author).await;
            if let Some(ev) = self.query(&relays, &filter).await {
                return Some(ev);
            }
        }
        match self.store.get(id) {
            Ok(Some(ev)) => return Some(ev),
            Ok(None) => {}
            Err(e) => warn!(id, error = %e, "local store lookup failed"),
        }
        self.query(&self.general_relays, &filter).await
    }

    /// Best write relays for `pubkey`, discovering its relay list first when
    /// none is known. Empty when the author publishes no list.
    pub async fn author_relays(&self, pubkey: &str) -> Vec<String> {
        let list = match self.directory.get(pubkey) {
            Some(list) => list,
            None => match self.discover_relay_list(pubkey).await {
                Ok(list) => list,
                Err(e) => {
                    debug!(pubkey, error = %e, "relay list discovery failed");
                    return vec![];
                }
            },
        };
        let mut ranked = self.pool.rank_relays(&list.write);
        ranked.truncate(AUTHOR_RELAY_LIMIT);
        ranked
    }

    /// Look up `pubkey`'s relay list on the general relays and record the
    /// outcome in the directory. Absence is recorded only when a relay
    /// answered; if none did, nothing is recorded and the next lookup tries
    /// again.
    pub async fn discover_relay_list(&self, pubkey: &str) -> Result<RelayList> {
        if !is_hex64(pubkey) {
            bail!("invalid pubkey `{pubkey}`");
        }
        if self.general_relays.is_empty() {
            bail!("no general relays configured");
        }
        let filter = Filter::new().kind(kinds::RELAY_LIST).author(pubkey);
        match self
            .pool
            .lookup(&self.general_relays, &filter, self.timeout)
            .await
        {
            Lookup::Found(ev) => {
                self.directory.update(&ev);
            }
            Lookup::Missing => self.directory.mark_empty(pubkey),
            Lookup::Unreachable => bail!("no general relay answered"),
        }
        Ok(self.directory.get(pubkey).unwrap_or_default())
    }

    /// Discover `pubkey`'s relays in a detached task. Failures are logged by
    /// the task itself; nothing is reported to the caller.
    pub fn spawn_relay_discovery(&self, pubkey: &str) -> Option<JoinHandle<()>> {
        if self.directory.contains(pubkey) {
            return None;
        }
        let this = self.clone();
        let pubkey = pubkey.to_string();
        Some(tokio::spawn(async move {
            if let Err(e) = this.discover_relay_list(&pubkey).await {
                warn!(%pubkey, error = %e, "background relay discovery failed");
            }
        }))
    }

    async fn fetch_via_relays(
        &self,
        filter: &Filter,
        hints: &[String],
        author: Option<&str>,
    ) -> Option<Event> {
        if let Some(ev) = self.query(&normalize_relays(hints), filter).await {
            return Some(ev);
        }
        if let Some(author) = author {
            let relays = self.author_relays(author).await;
            if let Some(ev) = self.query(&relays, filter).await {
                return Some(ev);
            }
        }
        self.query(&self.general_relays, filter).await
    }

    /// One `get` against `relays`; hits are persisted locally.
    async fn query(&self, relays: &[String], filter: &Filter) -> Option<Event> {
        if relays.is_empty() {
            return None;
        }
        let ev = self.pool.get(relays, filter, self.timeout).await?;
        if let Err(e) = self.store.ingest(&ev) {
            warn!(id = %ev.id, error = %e, "failed to persist fetched event");
        }
        Some(ev)
    }
}
