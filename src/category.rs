//! Static category table and the per-category aggregation strategy.

use serde::Serialize;

/// Grouping used by clients to lay categories out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryGroup {
    Content,
    Media,
}

/// Which author fan-out a media category performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaProfile {
    /// Short and long videos.
    Videos,
    /// Pictures and text posts.
    Photography,
}

/// How content for a category is gathered once its creators are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "profile")]
pub enum CategoryStrategy {
    /// Latest articles and notes from every curated creator.
    News,
    /// Currently live activities streamed from the general relays.
    Live,
    /// Curator playlists.
    Music,
    /// Per-author media fan-out.
    Media(MediaProfile),
    /// Curator curation sets for articles, events, videos and pictures.
    Curated,
}

/// One entry of the category table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryConfig {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub group: CategoryGroup,
    /// `#d` value selecting the curator's lists for this category.
    pub d_tag: &'static str,
    pub strategy: CategoryStrategy,
}

const fn entry(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    icon: &'static str,
    group: CategoryGroup,
    strategy: CategoryStrategy,
) -> CategoryConfig {
    CategoryConfig {
        id,
        name,
        description,
        icon,
        group,
        d_tag: id,
        strategy,
    }
}

/// Every known category, content categories first.
pub const CATEGORIES: &[CategoryConfig] = &[
    entry(
        "news",
        "News",
        "Reporting and commentary from curated journalists",
        "newspaper",
        CategoryGroup::Content,
        CategoryStrategy::News,
    ),
    entry(
        "finance",
        "Finance",
        "Markets, money and economics",
        "account_balance",
        CategoryGroup::Content,
        CategoryStrategy::Curated,
    ),
    entry(
        "gaming",
        "Gaming",
        "Games, players and studios",
        "sports_esports",
        CategoryGroup::Content,
        CategoryStrategy::Curated,
    ),
    entry(
        "art",
        "Art",
        "Artists and their work",
        "palette",
        CategoryGroup::Content,
        CategoryStrategy::Curated,
    ),
    entry(
        "freedom",
        "Freedom",
        "Privacy, free speech and digital rights",
        "flag",
        CategoryGroup::Content,
        CategoryStrategy::Curated,
    ),
    entry(
        "podcasts",
        "Podcasts",
        "Shows and episodes",
        "podcasts",
        CategoryGroup::Media,
        CategoryStrategy::Curated,
    ),
    entry(
        "music",
        "Music",
        "Musicians and playlists",
        "music_note",
        CategoryGroup::Media,
        CategoryStrategy::Music,
    ),
    entry(
        "videos",
        "Videos",
        "Short clips and long-form video",
        "smart_display",
        CategoryGroup::Media,
        CategoryStrategy::Media(MediaProfile::Videos),
    ),
    entry(
        "live",
        "Live",
        "Streams that are live right now",
        "live_tv",
        CategoryGroup::Media,
        CategoryStrategy::Live,
    ),
    entry(
        "audiobooks",
        "Audiobooks",
        "Narrated books and readings",
        "headphones",
        CategoryGroup::Media,
        CategoryStrategy::Curated,
    ),
    entry(
        "photography",
        "Photography",
        "Photographers and their pictures",
        "photo_camera",
        CategoryGroup::Media,
        CategoryStrategy::Media(MediaProfile::Photography),
    ),
];

/// Look up a category by id.
pub fn find(id: &str) -> Option<&'static CategoryConfig> {
    CATEGORIES.iter().find(|c| c.id == id)
}
