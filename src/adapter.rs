//! Shapes Anilibria records into the Jellyfin DTOs clients expect.
//!
//! Everything here is pure: callers resolve titles and favorite flags first
//! and pass them in, which keeps the mapping rules testable without HTTP.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::content_id::{ContentId, ContentKind, FAVORITES, UPDATES};
use crate::identity::SERVER_ID;
use crate::upstream::{Episode, Title};

/// Image served for items without artwork of their own.
pub const FALLBACK_IMAGE: &str = "/img/footer.png";

/// Jellyfin wants an `ImageTags.Primary` value to even try fetching artwork;
/// the item id is as good a tag as any.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ImageTags {
    pub primary: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct UserItemData {
    pub is_favorite: bool,
    pub played: bool,
    pub play_count: u32,
    pub playback_position_ticks: i64,
    pub key: String,
}

impl UserItemData {
    pub fn new(id: &ContentId, is_favorite: bool) -> Self {
        Self {
            is_favorite,
            played: false,
            play_count: 0,
            playback_position_ticks: 0,
            key: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ItemList<T> {
    pub items: Vec<T>,
    pub total_record_count: usize,
    pub start_index: usize,
}

impl<T> ItemList<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            total_record_count: items.len(),
            items,
            start_index: 0,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl<T> Default for ItemList<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> FromIterator<T> for ItemList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CollectionFolder {
    pub name: String,
    pub server_id: &'static str,
    pub id: String,
    pub sort_name: String,
    #[serde(rename = "Type")]
    pub item_type: &'static str,
    pub collection_type: &'static str,
    pub is_folder: bool,
    pub can_delete: bool,
    pub image_tags: ImageTags,
    pub user_data: UserItemData,
    pub location_type: &'static str,
    pub media_type: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SeriesItem {
    pub name: String,
    pub original_title: Option<String>,
    pub server_id: &'static str,
    pub id: String,
    #[serde(rename = "Type")]
    pub item_type: &'static str,
    pub is_folder: bool,
    pub can_delete: bool,
    pub overview: Option<String>,
    pub production_year: Option<i32>,
    pub status: &'static str,
    pub image_tags: ImageTags,
    pub primary_image_aspect_ratio: f64,
    pub user_data: UserItemData,
    pub location_type: &'static str,
    pub media_type: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SeasonItem {
    pub name: String,
    pub server_id: &'static str,
    pub id: String,
    #[serde(rename = "Type")]
    pub item_type: &'static str,
    pub is_folder: bool,
    pub can_delete: bool,
    pub index_number: u32,
    pub series_id: String,
    pub series_name: String,
    pub series_primary_image_tag: String,
    pub image_tags: ImageTags,
    pub primary_image_aspect_ratio: f64,
    pub user_data: UserItemData,
    pub location_type: &'static str,
    pub media_type: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MediaStream {
    pub codec: &'static str,
    #[serde(rename = "Type")]
    pub stream_type: &'static str,
    pub index: u32,
    pub is_default: bool,
    pub is_external: bool,
    pub display_title: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MediaSource {
    pub protocol: &'static str,
    pub id: String,
    pub path: String,
    #[serde(rename = "Type")]
    pub source_type: &'static str,
    pub container: &'static str,
    pub name: String,
    pub is_remote: bool,
    pub supports_direct_play: bool,
    pub supports_direct_stream: bool,
    pub supports_transcoding: bool,
    pub is_infinite_stream: bool,
    pub requires_opening: bool,
    pub requires_closing: bool,
    pub transcoding_sub_protocol: &'static str,
    pub required_http_headers: BTreeMap<String, String>,
    pub media_streams: Vec<MediaStream>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct EpisodeItem {
    pub name: String,
    pub server_id: &'static str,
    pub id: String,
    #[serde(rename = "Type")]
    pub item_type: &'static str,
    pub is_folder: bool,
    pub can_delete: bool,
    pub date_created: Option<String>,
    pub premiere_date: Option<String>,
    pub index_number: Option<i64>,
    pub parent_index_number: u32,
    pub parent_id: String,
    pub series_id: String,
    pub series_name: String,
    pub season_id: String,
    pub season_name: String,
    pub container: &'static str,
    pub media_sources: Vec<MediaSource>,
    pub image_tags: ImageTags,
    pub primary_image_aspect_ratio: f64,
    pub user_data: UserItemData,
    pub location_type: &'static str,
    pub media_type: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackInfo {
    pub media_sources: Vec<MediaSource>,
    pub play_session_id: String,
}

/// Any item a single lookup can resolve to.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum BaseItem {
    Folder(CollectionFolder),
    Series(SeriesItem),
    Season(SeasonItem),
    Episode(EpisodeItem),
}

/// Where a media source's playlist is fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOrigin {
    /// Playlist and every segment pass through this server.
    Proxy,
    /// Playlist is forwarded as-is; segments come straight from Anilibria.
    Direct,
}

impl StreamOrigin {
    pub fn suffix(self) -> &'static str {
        match self {
            StreamOrigin::Proxy => "proxy",
            StreamOrigin::Direct => "anilibria",
        }
    }

    fn label(self) -> &'static str {
        match self {
            StreamOrigin::Proxy => "proxy",
            StreamOrigin::Direct => "direct",
        }
    }
}

/// Quality and origin encoded in a media source id (`hd@proxy`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSourceSelection {
    pub quality: String,
    pub origin: StreamOrigin,
}

impl MediaSourceSelection {
    pub fn new(quality: impl Into<String>, origin: StreamOrigin) -> Self {
        Self {
            quality: quality.into(),
            origin,
        }
    }

    /// Ids without a recognised suffix are treated as proxied.
    pub fn parse(source_id: &str) -> Self {
        match source_id.split_once('@') {
            Some((quality, suffix)) if suffix == StreamOrigin::Direct.suffix() => {
                Self::new(quality, StreamOrigin::Direct)
            }
            Some((quality, _)) => Self::new(quality, StreamOrigin::Proxy),
            None => Self::new(source_id, StreamOrigin::Proxy),
        }
    }

    pub fn source_id(&self) -> String {
        format!("{}@{}", self.quality, self.origin.suffix())
    }
}

pub fn collection_folder(name: &str, display_name: &str) -> CollectionFolder {
    let id = ContentId::synthetic_root(name);
    CollectionFolder {
        name: display_name.to_owned(),
        server_id: SERVER_ID,
        id: id.to_string(),
        sort_name: display_name.to_owned(),
        item_type: "CollectionFolder",
        collection_type: "tvshows",
        is_folder: true,
        can_delete: false,
        image_tags: ImageTags {
            primary: id.to_string(),
        },
        user_data: UserItemData::new(&id, false),
        location_type: "FileSystem",
        media_type: "Unknown",
    }
}

/// The two synthetic top-level libraries.
pub fn root_views() -> ItemList<CollectionFolder> {
    ItemList::new(vec![
        collection_folder(UPDATES, "Обновления"),
        collection_folder(FAVORITES, "Избранное"),
    ])
}

/// Folder record for a synthetic collection id, if the name is known.
pub fn collection_by_name(name: &str) -> Option<CollectionFolder> {
    root_views().items.into_iter().find(|folder| {
        ContentId::parse(&folder.id).classify() == ContentKind::Collection(name.to_owned())
    })
}

pub fn series_item(title: &Title, is_favorite: bool) -> SeriesItem {
    let id = ContentId::series(title.id_string());
    SeriesItem {
        name: title.names.ru.clone(),
        original_title: title.names.en.clone(),
        server_id: SERVER_ID,
        id: id.to_string(),
        item_type: "Series",
        is_folder: true,
        can_delete: false,
        overview: title.description.clone(),
        production_year: title.year,
        status: if title.is_in_progress() {
            "Continuing"
        } else {
            "Ended"
        },
        image_tags: ImageTags {
            primary: id.to_string(),
        },
        primary_image_aspect_ratio: 0.68,
        user_data: UserItemData::new(&id, is_favorite),
        location_type: "FileSystem",
        media_type: "Unknown",
    }
}

pub fn season_item(id: &ContentId, name: &str) -> SeasonItem {
    SeasonItem {
        name: name.to_owned(),
        server_id: SERVER_ID,
        id: id.to_string(),
        item_type: "Season",
        is_folder: true,
        can_delete: false,
        index_number: 1,
        series_id: id.serialize(1),
        series_name: name.to_owned(),
        series_primary_image_tag: id.serialize(1),
        image_tags: ImageTags {
            primary: id.to_string(),
        },
        primary_image_aspect_ratio: 0.68,
        user_data: UserItemData::new(id, false),
        location_type: "FileSystem",
        media_type: "Unknown",
    }
}

/// Releases shown as seasons of `title`: the title itself first, then every
/// other release of its franchises, skipping the series being viewed.
pub fn season_entries(title: &Title, viewed_series_id: &str) -> Vec<(String, String)> {
    let own_id = title.id_string();
    let mut seen = HashSet::from([own_id.clone(), viewed_series_id.to_owned()]);
    let mut entries = vec![(own_id, title.names.ru.clone())];

    for release in title.franchises.iter().flat_map(|franchise| &franchise.releases) {
        let release_id = release.id.to_string();
        if seen.insert(release_id.clone()) {
            entries.push((release_id, release.names.ru.clone()));
        }
    }
    entries
}

pub fn season_list(title: &Title, viewed_series_id: &str) -> ItemList<SeasonItem> {
    season_entries(title, viewed_series_id)
        .into_iter()
        .map(|(release_id, name)| season_item(&ContentId::season(release_id, "1"), &name))
        .collect()
}

pub fn episode_name(episode: &Episode) -> String {
    if let Some(name) = episode.name.as_deref().filter(|name| !name.trim().is_empty()) {
        return name.to_owned();
    }
    match &episode.episode {
        Some(number) => format!("Episode {number}"),
        None => "?".to_owned(),
    }
}

pub fn media_source(
    id: &ContentId,
    episode: &Episode,
    selection: &MediaSourceSelection,
) -> MediaSource {
    let source_id = selection.source_id();
    MediaSource {
        protocol: "File",
        path: format!("/stable/videos/{id}/stream.m3u8?MediaSourceId={source_id}"),
        id: source_id,
        source_type: "Default",
        container: "m3u8",
        name: format!(
            "{} {} ({})",
            episode_name(episode),
            selection.quality,
            selection.origin.label()
        ),
        is_remote: false,
        supports_direct_play: true,
        supports_direct_stream: true,
        supports_transcoding: false,
        is_infinite_stream: false,
        requires_opening: false,
        requires_closing: false,
        transcoding_sub_protocol: "hls",
        required_http_headers: BTreeMap::new(),
        media_streams: vec![MediaStream {
            codec: "h264",
            stream_type: "Video",
            index: 0,
            is_default: true,
            is_external: false,
            display_title: format!("{} H264", selection.quality.to_uppercase()),
        }],
    }
}

/// Two sources per available quality: one through this server, one direct.
pub fn media_sources(id: &ContentId, episode: &Episode) -> Vec<MediaSource> {
    episode
        .qualities()
        .flat_map(|(quality, _)| {
            [StreamOrigin::Proxy, StreamOrigin::Direct]
                .map(|origin| media_source(id, episode, &MediaSourceSelection::new(quality, origin)))
        })
        .collect()
}

pub fn episode_item(
    id: &ContentId,
    title: &Title,
    episode: &Episode,
    is_favorite: bool,
) -> EpisodeItem {
    let created = episode.created_timestamp.and_then(format_timestamp);
    EpisodeItem {
        name: episode_name(episode),
        server_id: SERVER_ID,
        id: id.to_string(),
        item_type: "Episode",
        is_folder: false,
        can_delete: false,
        date_created: created.clone(),
        premiere_date: created,
        index_number: episode
            .episode
            .as_ref()
            .and_then(|number| number.as_f64())
            .map(|number| number as i64),
        parent_index_number: 1,
        parent_id: id.serialize(2),
        series_id: id.serialize(1),
        series_name: title.names.ru.clone(),
        season_id: id.serialize(2),
        season_name: title.names.ru.clone(),
        container: "m3u8",
        media_sources: media_sources(id, episode),
        image_tags: ImageTags {
            primary: id.to_string(),
        },
        primary_image_aspect_ratio: 16.0 / 9.0,
        user_data: UserItemData::new(id, is_favorite),
        location_type: "FileSystem",
        media_type: "Video",
    }
}

/// Episodes of `title`, with ids placed under `season`.
pub fn episode_list<F>(season: &ContentId, title: &Title, is_favorite: F) -> ItemList<EpisodeItem>
where
    F: Fn(&ContentId) -> bool,
{
    let series_id = title.id_string();
    let season_id = season.season_id.clone().unwrap_or_else(|| "1".to_owned());
    title
        .episodes()
        .into_iter()
        .map(|(key, episode)| {
            let id = ContentId::episode(series_id.clone(), season_id.clone(), key);
            let favorite = is_favorite(&id);
            episode_item(&id, title, episode, favorite)
        })
        .collect()
}

/// Path of the primary artwork on the Anilibria download host.
pub fn primary_image_path<'a>(id: &ContentId, title: &'a Title) -> Option<&'a str> {
    match id.classify() {
        ContentKind::Episode => id
            .episode_id
            .as_deref()
            .and_then(|key| title.episode(key))
            .and_then(|episode| episode.preview.as_deref())
            .or_else(|| title.posters.original_url()),
        ContentKind::Season => title.posters.original_url(),
        ContentKind::Series => title.posters.small_url(),
        ContentKind::Root | ContentKind::Collection(_) => None,
    }
}

fn format_timestamp(seconds: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .map(|date| date.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{Franchise, Poster, Release, TitleNames};

    fn names(ru: &str) -> TitleNames {
        TitleNames {
            ru: ru.into(),
            en: None,
        }
    }

    fn release(id: i64, name: &str) -> Release {
        Release {
            id,
            code: String::new(),
            ordinal: None,
            names: names(name),
        }
    }

    fn title_with_franchise() -> Title {
        serde_json::from_value(serde_json::json!({
            "id": 100,
            "names": {"ru": "A"},
            "posters": {"small": {"url": "/small.jpg"}, "original": {"url": "/original.jpg"}},
            "player": {"host": "cache.libria.fun", "list": {
                "1": {"episode": 1, "name": "Pilot", "created_timestamp": 1700000000,
                      "preview": "/preview/1.jpg",
                      "hls": {"fhd": "/1/1080.m3u8", "hd": "/1/720.m3u8", "sd": null}},
                "2": {"episode": 2, "name": null, "hls": {"sd": "/2/480.m3u8"}}
            }}
        }))
        .map(|mut title: Title| {
            title.franchises = vec![Franchise {
                franchise: Default::default(),
                releases: vec![release(100, "A"), release(200, "B"), release(300, "C")],
            }];
            title
        })
        .unwrap()
    }

    #[test]
    fn season_listing_puts_self_first_without_duplicates() {
        let title = title_with_franchise();
        let seasons = season_list(&title, "100");
        let ids: Vec<_> = seasons.items.iter().map(|season| season.id.as_str()).collect();
        assert_eq!(ids, vec!["100-1-", "200-1-", "300-1-"]);
        assert_eq!(seasons.total_record_count, 3);
        assert_eq!(seasons.items[1].name, "B");
        assert_eq!(seasons.items[1].series_id, "200");
    }

    #[test]
    fn season_listing_dedupes_across_franchises() {
        let mut title = title_with_franchise();
        title.franchises.push(Franchise {
            franchise: Default::default(),
            releases: vec![release(300, "C"), release(400, "D")],
        });
        let entries = season_entries(&title, "100");
        let ids: Vec<_> = entries.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["100", "200", "300", "400"]);
    }

    #[test]
    fn episode_name_fallbacks() {
        let mut episode = Episode {
            name: Some("Pilot".into()),
            episode: Some(serde_json::Number::from(7u32)),
            ..Default::default()
        };
        assert_eq!(episode_name(&episode), "Pilot");
        episode.name = Some("  ".into());
        assert_eq!(episode_name(&episode), "Episode 7");
        episode.episode = None;
        assert_eq!(episode_name(&episode), "?");
    }

    #[test]
    fn episode_emits_proxied_and_direct_sources_per_quality() {
        let title = title_with_franchise();
        let id = ContentId::episode("100", "1", "1");
        let item = episode_item(&id, &title, title.episode("1").unwrap(), true);

        let source_ids: Vec<_> = item.media_sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            source_ids,
            vec!["fhd@proxy", "fhd@anilibria", "hd@proxy", "hd@anilibria"]
        );
        assert_eq!(
            item.media_sources[0].path,
            "/stable/videos/100-1-1/stream.m3u8?MediaSourceId=fhd@proxy"
        );
        assert_eq!(item.parent_id, "100-1");
        assert_eq!(item.series_id, "100");
        assert_eq!(item.index_number, Some(1));
        assert_eq!(item.date_created.as_deref(), Some("2023-11-14T22:13:20.000Z"));
        assert!(item.user_data.is_favorite);
    }

    #[test]
    fn episode_list_uses_requested_season() {
        let title = title_with_franchise();
        let list = episode_list(&ContentId::season("100", "1"), &title, |_| false);
        let ids: Vec<_> = list.items.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["100-1-1", "100-1-2"]);
        assert_eq!(list.items[1].name, "Episode 2");
    }

    #[test]
    fn media_source_selection_roundtrip() {
        let direct = MediaSourceSelection::parse("hd@anilibria");
        assert_eq!(direct, MediaSourceSelection::new("hd", StreamOrigin::Direct));
        assert_eq!(direct.source_id(), "hd@anilibria");

        assert_eq!(
            MediaSourceSelection::parse("fhd@proxy").origin,
            StreamOrigin::Proxy
        );
        assert_eq!(MediaSourceSelection::parse("sd").origin, StreamOrigin::Proxy);
    }

    #[test]
    fn series_item_carries_caller_favorite_flag() {
        let mut title = title_with_franchise();
        title.status = Some(crate::upstream::TitleStatus {
            string: None,
            code: Some(crate::upstream::STATUS_IN_PROGRESS),
        });
        let item = series_item(&title, true);
        assert_eq!(item.id, "100--");
        assert_eq!(item.status, "Continuing");
        assert!(item.user_data.is_favorite);

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["Type"], "Series");
        assert_eq!(json["UserData"]["IsFavorite"], true);
    }

    #[test]
    fn primary_image_depends_on_kind() {
        let mut title = title_with_franchise();
        assert_eq!(
            primary_image_path(&ContentId::series("100"), &title),
            Some("/small.jpg")
        );
        assert_eq!(
            primary_image_path(&ContentId::season("100", "1"), &title),
            Some("/original.jpg")
        );
        assert_eq!(
            primary_image_path(&ContentId::episode("100", "1", "1"), &title),
            Some("/preview/1.jpg")
        );
        assert_eq!(
            primary_image_path(&ContentId::episode("100", "1", "2"), &title),
            Some("/original.jpg")
        );

        title.posters.original = Some(Poster { url: None });
        title.posters.small = None;
        assert_eq!(primary_image_path(&ContentId::series("100"), &title), None);
        assert_eq!(
            primary_image_path(&ContentId::synthetic_root(UPDATES), &title),
            None
        );
    }

    #[test]
    fn root_views_expose_both_collections() {
        let views = root_views();
        assert_eq!(views.total_record_count, 2);
        assert_eq!(views.items[0].id, "system-updates-");
        assert!(collection_by_name(FAVORITES).is_some());
        assert!(collection_by_name("unknown").is_none());
    }
}
