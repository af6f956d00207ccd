//! Category content aggregation.
//!
//! A load walks `Idle -> FetchingCreators -> FetchingContent -> Done`, or ends
//! in `Error`. Creators always come from the curator's follow set for the
//! category; what happens next is chosen once by the category's
//! [`CategoryStrategy`].

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::Arc,
    time::Duration,
};

use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::{JoinError, JoinHandle},
    time::{timeout_at, Instant},
};
use tracing::{debug, error, info};

use crate::{
    cache::{EventCache, KeyStrategy, ListCache},
    category::{self, CategoryConfig, CategoryStrategy, MediaProfile},
    coordinate::Coordinate,
    event::{kinds, Event},
    filter::Filter,
    lists::{parse_curation_set, parse_follow_set, AddressableRef, CuratedList, PubkeyRef},
    pool::{normalize_relays, RelayPool},
};

const NEWS_PER_AUTHOR: usize = 2;
const LIVE_LIMIT: usize = 50;
const LIVE_CAP: usize = 3;
const MEDIA_ITEM_LIMIT: usize = 30;
const SHORTS: (&[u32], usize) = (&[kinds::SHORT_VIDEO, kinds::ADDRESSABLE_SHORT_VIDEO], 3);
const LONG_VIDEOS: (&[u32], usize) = (&[kinds::VIDEO, kinds::ADDRESSABLE_VIDEO], 3);
const IMAGES: (&[u32], usize) = (&[kinds::PICTURE], 3);
const POSTS: (&[u32], usize) = (&[kinds::TEXT_NOTE], 2);

/// Curator identity and relay sets injected into the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub curator_pubkey: String,
    pub curator_relay: String,
    pub general_relays: Vec<String>,
    /// Bound on one-shot list lookups.
    pub query_timeout: Duration,
    /// Wall-clock cap on the live stream subscription.
    pub stream_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    FetchingCreators,
    FetchingContent,
    Done,
    Error(String),
}

impl LoadState {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::FetchingCreators | Self::FetchingContent)
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Category not found")]
    CategoryNotFound(String),
    #[error("Failed to load content. Please try again.")]
    LoadFailed(#[source] JoinError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorItem {
    pub id: String,
    pub pubkey: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<String>,
    /// Kind of the list the creator was taken from.
    pub kind: u32,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleItem {
    /// `kind:pubkey:slug`.
    pub id: String,
    pub pubkey: String,
    pub slug: String,
    pub kind: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub relay_hints: Vec<String>,
    pub created_at: u64,
}

/// A referenced event or coordinate. Author and kind stay unset for event
/// references the curator relay could not supply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: String,
    pub pubkey: Option<String>,
    pub kind: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: u64,
}

impl ContentItem {
    fn fill_from(&mut self, ev: &Event) {
        self.pubkey = Some(ev.pubkey.clone());
        self.kind = Some(ev.kind);
        self.title = ev.tag_value("title").map(str::to_string);
        self.image = ev
            .tag_value("image")
            .or_else(|| ev.tag_value("thumb"))
            .map(str::to_string);
        self.created_at = ev.created_at;
    }
}

/// Typed buckets produced by one load. Buckets a strategy does not fill
/// stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryContent {
    pub category: String,
    pub creators: Vec<CreatorItem>,
    pub articles: Vec<ArticleItem>,
    pub events: Vec<ContentItem>,
    pub videos: Vec<ContentItem>,
    pub pictures: Vec<ContentItem>,
    pub news: Vec<Event>,
    pub notes: Vec<Event>,
    pub live_streams: Vec<Event>,
    pub playlists: Vec<Event>,
    pub shorts: Vec<Event>,
    pub long_videos: Vec<Event>,
    pub images: Vec<Event>,
    pub posts: Vec<Event>,
}

/// Returns the state to `Idle` when a load is dropped mid-flight.
struct LoadGuard<'a>(&'a watch::Sender<LoadState>);

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.0.send_if_modified(|state| {
            if state.is_loading() {
                *state = LoadState::Idle;
                true
            } else {
                false
            }
        });
    }
}

#[derive(Clone)]
pub struct Aggregator {
    pool: Arc<RelayPool>,
    config: Arc<DiscoveryConfig>,
    lists: Arc<ListCache>,
}

impl Aggregator {
    pub fn new(pool: Arc<RelayPool>, mut config: DiscoveryConfig) -> Self {
        config.general_relays = normalize_relays(&config.general_relays);
        Self {
            pool,
            config: Arc::new(config),
            lists: Arc::new(ListCache::new()),
        }
    }

    /// Load a category without observing intermediate states.
    pub async fn load_category_content(&self, id: &str) -> Result<CategoryContent, DiscoveryError> {
        let (state, _) = watch::channel(LoadState::Idle);
        self.load_tracked(id, &state).await
    }

    /// Load a category, publishing every state transition on `state`.
    pub async fn load_tracked(
        &self,
        id: &str,
        state: &watch::Sender<LoadState>,
    ) -> Result<CategoryContent, DiscoveryError> {
        track(id, state, self.load(id, state)).await
    }

    async fn load(
        &self,
        id: &str,
        state: &watch::Sender<LoadState>,
    ) -> Result<CategoryContent, DiscoveryError> {
        let category =
            category::find(id).ok_or_else(|| DiscoveryError::CategoryNotFound(id.to_string()))?;
        info!(category = id, "loading category");

        state.send_replace(LoadState::FetchingCreators);
        let this = self.clone();
        let creators = isolated(async move {
            this.fetch_list(kinds::FOLLOW_SET, category.d_tag).await
        })
        .await?;

        state.send_replace(LoadState::FetchingContent);
        let this = self.clone();
        let refs = creators
            .as_ref()
            .map(|list| unique_creators(&list.pubkey_refs))
            .unwrap_or_default();
        let mut content = isolated(async move { this.fetch_content(category, refs).await }).await?;
        content.category = category.id.to_string();
        content.creators = creators.map(|list| creator_items(&list)).unwrap_or_default();
        Ok(content)
    }

    /// The curator's newest list of `kind` for `d_tag`, parsed. Served from
    /// the shared list cache when this process has seen it before.
    pub async fn fetch_list(&self, kind: u32, d_tag: &str) -> Option<CuratedList> {
        if let Some(list) = self.lists.get(kind, d_tag) {
            debug!(kind, d_tag, "list cache hit");
            return Some(list);
        }
        let filter = Filter::new()
            .kind(kind)
            .author(self.config.curator_pubkey.clone())
            .identifier(d_tag)
            .limit(1);
        let relays = [self.config.curator_relay.clone()];
        let ev = self
            .pool
            .get(&relays, &filter, self.config.query_timeout)
            .await?;
        let list = if kind == kinds::FOLLOW_SET {
            parse_follow_set(d_tag, &ev)
        } else {
            parse_curation_set(d_tag, &ev)
        };
        self.lists.put(kind, d_tag, list.clone());
        Some(list)
    }

    async fn fetch_content(
        &self,
        category: &'static CategoryConfig,
        creators: Vec<PubkeyRef>,
    ) -> CategoryContent {
        let mut content = CategoryContent::default();
        match category.strategy {
            CategoryStrategy::News => {
                let (news, notes) = tokio::join!(
                    self.per_author(&creators, &[kinds::LONG_FORM], NEWS_PER_AUTHOR),
                    self.per_author(&creators, &[kinds::TEXT_NOTE], NEWS_PER_AUTHOR),
                );
                content.news = merge_newest_first(news);
                content.notes = merge_newest_first(notes);
            }
            CategoryStrategy::Live => content.live_streams = self.live_streams().await,
            CategoryStrategy::Music => content.playlists = self.playlists().await,
            CategoryStrategy::Media(MediaProfile::Videos) => {
                let (shorts, long_videos) = tokio::join!(
                    self.media_feed(&creators, SHORTS),
                    self.media_feed(&creators, LONG_VIDEOS),
                );
                content.shorts = shorts;
                content.long_videos = long_videos;
            }
            CategoryStrategy::Media(MediaProfile::Photography) => {
                let (images, posts) = tokio::join!(
                    self.media_feed(&creators, IMAGES),
                    self.media_feed(&creators, POSTS),
                );
                content.images = images;
                content.posts = posts;
            }
            CategoryStrategy::Curated => self.curated(category, &mut content).await,
        }
        content
    }

    /// Each creator's newest events of `kinds`, at most `cap` per creator,
    /// in creator order.
    async fn per_author(
        &self,
        creators: &[PubkeyRef],
        kinds: &[u32],
        cap: usize,
    ) -> Vec<Vec<Event>> {
        let queries = creators.iter().map(|creator| {
            let relays = self.relays_for(creator);
            let filter = Filter::new()
                .author(creator.pubkey.clone())
                .kinds(kinds.iter().copied())
                .limit(cap);
            async move { self.pool.query_sync(&relays, &filter).await }
        });
        let results = join_all(queries).await;
        creators
            .iter()
            .zip(results)
            .map(|(creator, events)| {
                let mut cache = EventCache::new(KeyStrategy::ByKind);
                cache.extend(events.into_iter().filter(|e| e.pubkey == creator.pubkey));
                let mut events = cache.into_values();
                sort_newest_first(&mut events);
                events.truncate(cap);
                events
            })
            .collect()
    }

    async fn media_feed(
        &self,
        creators: &[PubkeyRef],
        (kinds, cap): (&[u32], usize),
    ) -> Vec<Event> {
        let per_author = self.per_author(creators, kinds, cap).await;
        let mut merged = round_robin(per_author, MEDIA_ITEM_LIMIT);
        sort_newest_first(&mut merged);
        merged
    }

    /// Stream live activities from the general relays until the stream
    /// timeout elapses or a full backlog of distinct streams has arrived.
    async fn live_streams(&self) -> Vec<Event> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let filter = Filter::new().kind(kinds::LIVE_ACTIVITY).limit(LIVE_LIMIT);
        let sub = self
            .pool
            .subscribe(&self.config.general_relays, &filter, move |ev| {
                let _ = tx.send(ev);
            });
        let deadline = Instant::now() + self.config.stream_timeout;
        let mut cache = EventCache::new(KeyStrategy::Addressable);
        while let Ok(Some(ev)) = timeout_at(deadline, rx.recv()).await {
            cache.upsert(ev);
            if cache.len() >= LIVE_LIMIT {
                debug!(streams = cache.len(), "live backlog saturated");
                break;
            }
        }
        sub.close();
        select_live_streams(cache.values())
    }

    async fn playlists(&self) -> Vec<Event> {
        let filter = Filter::new()
            .kind(kinds::PLAYLIST)
            .author(self.config.curator_pubkey.clone());
        let events = self
            .pool
            .query_sync(&[self.config.curator_relay.clone()], &filter)
            .await;
        let mut cache = EventCache::new(KeyStrategy::ByKind);
        cache.extend(events);
        let mut playlists = cache.into_values();
        sort_newest_first(&mut playlists);
        playlists
    }

    async fn curated(&self, category: &CategoryConfig, content: &mut CategoryContent) {
        let (articles, videos, pictures) = tokio::join!(
            self.fetch_list(kinds::ARTICLE_CURATION, category.d_tag),
            self.fetch_list(kinds::VIDEO_CURATION, category.d_tag),
            self.fetch_list(kinds::PICTURE_CURATION, category.d_tag),
        );
        if let Some(list) = &articles {
            content.articles = article_items(list);
            content.events = event_items(list);
        }
        if let Some(list) = &videos {
            content.videos = event_items(list);
            content.videos.extend(coordinate_items(list));
        }
        if let Some(list) = &pictures {
            content.pictures = event_items(list);
            content.pictures.extend(coordinate_items(list));
        }
        let (events, videos, pictures) = (
            &mut content.events,
            &mut content.videos,
            &mut content.pictures,
        );
        self.hydrate([events, videos, pictures]).await;
    }

    /// Fill in author, kind and metadata for event references with one
    /// batched lookup.
    async fn hydrate<const N: usize>(&self, buckets: [&mut Vec<ContentItem>; N]) {
        let ids: HashSet<String> = buckets
            .iter()
            .flat_map(|b| b.iter())
            .filter(|item| item.pubkey.is_none())
            .map(|item| item.id.clone())
            .collect();
        if ids.is_empty() {
            return;
        }
        let mut relays = vec![self.config.curator_relay.clone()];
        relays.extend(self.config.general_relays.iter().cloned());
        let found: HashMap<String, Event> = self
            .pool
            .query_sync(&relays, &Filter::new().ids(ids))
            .await
            .into_iter()
            .map(|ev| (ev.id.clone(), ev))
            .collect();
        for bucket in buckets {
            for item in bucket.iter_mut() {
                if let Some(ev) = found.get(&item.id) {
                    item.fill_from(ev);
                }
            }
        }
    }

    /// A creator's relay hint followed by the general relays.
    fn relays_for(&self, creator: &PubkeyRef) -> Vec<String> {
        let mut relays: Vec<String> = creator.relay.iter().cloned().collect();
        relays.extend(self.config.general_relays.iter().cloned());
        normalize_relays(&relays)
    }
}

/// Drive `load` and publish its outcome on `state`. Dropping the returned
/// future mid-load puts `state` back to `Idle`.
async fn track<F>(
    id: &str,
    state: &watch::Sender<LoadState>,
    load: F,
) -> Result<CategoryContent, DiscoveryError>
where
    F: Future<Output = Result<CategoryContent, DiscoveryError>>,
{
    let _guard = LoadGuard(state);
    let result = load.await;
    match &result {
        Ok(content) => {
            info!(
                category = id,
                creators = content.creators.len(),
                "category loaded"
            );
            state.send_replace(LoadState::Done);
        }
        Err(e) => {
            error!(category = id, error = %e, "category load failed");
            state.send_replace(LoadState::Error(e.to_string()));
        }
    }
    result
}

/// Aborts the task when dropped, so a cancelled load stops its work.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `fut` as its own task so a panic inside it fails this load only.
async fn isolated<T, F>(fut: F) -> Result<T, DiscoveryError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut task = AbortOnDrop(tokio::spawn(fut));
    (&mut task.0).await.map_err(DiscoveryError::LoadFailed)
}

/// Keep only streams that are live now, newest first, at most three.
pub fn select_live_streams(events: Vec<Event>) -> Vec<Event> {
    let mut live: Vec<Event> = events
        .into_iter()
        .filter(|ev| ev.tag_value("status").unwrap_or("planned") == "live")
        .collect();
    sort_newest_first(&mut live);
    live.truncate(LIVE_CAP);
    live
}

fn sort_newest_first(events: &mut [Event]) {
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

fn merge_newest_first(per_author: Vec<Vec<Event>>) -> Vec<Event> {
    let mut merged: Vec<Event> = per_author.into_iter().flatten().collect();
    sort_newest_first(&mut merged);
    merged
}

/// Take one item from each list in turn until `max` items are taken or every
/// list is exhausted.
fn round_robin(lists: Vec<Vec<Event>>, max: usize) -> Vec<Event> {
    let mut iters: Vec<_> = lists.into_iter().map(Vec::into_iter).collect();
    let mut out = vec![];
    loop {
        let mut progressed = false;
        for it in &mut iters {
            if out.len() >= max {
                return out;
            }
            if let Some(ev) = it.next() {
                out.push(ev);
                progressed = true;
            }
        }
        if !progressed {
            return out;
        }
    }
}

fn unique_creators(refs: &[PubkeyRef]) -> Vec<PubkeyRef> {
    let mut seen = HashSet::new();
    refs.iter()
        .filter(|r| seen.insert(r.pubkey.clone()))
        .cloned()
        .collect()
}

fn creator_items(list: &CuratedList) -> Vec<CreatorItem> {
    unique_creators(&list.pubkey_refs)
        .into_iter()
        .map(|r| CreatorItem {
            id: r.pubkey.clone(),
            pubkey: r.pubkey,
            relay: r.relay,
            kind: list.event.kind,
            created_at: list.created_at,
        })
        .collect()
}

/// Articles referenced by a curation set, in list order.
///
/// Duplicate references keep the first occurrence, even when a later one
/// carries a relay hint the first lacks. Everywhere else freshness wins;
/// this path has never compared timestamps.
fn article_items(list: &CuratedList) -> Vec<ArticleItem> {
    let mut seen = HashSet::new();
    list.addressable_refs
        .iter()
        .filter(|r| seen.insert(r.id.clone()))
        .filter_map(|r| {
            let coord = parse_ref(r)?;
            Some(ArticleItem {
                id: r.id.clone(),
                pubkey: coord.pubkey,
                slug: coord.identifier,
                kind: coord.kind,
                relay_hints: r.relay.iter().cloned().collect(),
                created_at: list.created_at,
            })
        })
        .collect()
}

fn event_items(list: &CuratedList) -> Vec<ContentItem> {
    let mut seen = HashSet::new();
    list.event_ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .map(|id| ContentItem {
            id: id.clone(),
            pubkey: None,
            kind: None,
            title: None,
            image: None,
            created_at: list.created_at,
        })
        .collect()
}

fn coordinate_items(list: &CuratedList) -> Vec<ContentItem> {
    let mut seen = HashSet::new();
    list.addressable_refs
        .iter()
        .filter(|r| seen.insert(r.id.as_str()))
        .filter_map(|r| {
            let coord = parse_ref(r)?;
            Some(ContentItem {
                id: r.id.clone(),
                pubkey: Some(coord.pubkey),
                kind: Some(coord.kind),
                title: None,
                image: None,
                created_at: list.created_at,
            })
        })
        .collect()
}

fn parse_ref(r: &AddressableRef) -> Option<Coordinate> {
    match r.id.parse() {
        Ok(coord) => Some(coord),
        Err(e) => {
            debug!(reference = %r.id, error = %e, "skipping malformed reference");
            None
        }
    }
}
