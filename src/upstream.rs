//! Anilibria v3 API client.
//!
//! Only the fields the shim reads are modelled; everything else in the
//! upstream payload is ignored. The client is blocking (ureq) and is meant to
//! be driven from `spawn_blocking`, the same way the SQLite readers are.

use std::{collections::BTreeMap, thread, time::Duration};

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_API_HOST: &str = "api.anilibria.tv";
pub const PAGE_SIZE: usize = 20;
pub const DECODE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Anilibria status code for titles that are still airing.
pub const STATUS_IN_PROGRESS: i64 = 1;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
    /// The upstream answered with its own error envelope.
    #[error("upstream reported an error: {0}")]
    Api(serde_json::Value),
    #[error("malformed upstream response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TitleNames {
    #[serde(default)]
    pub ru: String,
    #[serde(default)]
    pub en: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TitleStatus {
    #[serde(default)]
    pub string: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Poster {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Posters {
    #[serde(default)]
    pub original: Option<Poster>,
    #[serde(default)]
    pub medium: Option<Poster>,
    #[serde(default)]
    pub small: Option<Poster>,
}

impl Posters {
    pub fn original_url(&self) -> Option<&str> {
        poster_url(&self.original)
            .or_else(|| poster_url(&self.medium))
            .or_else(|| poster_url(&self.small))
    }

    pub fn small_url(&self) -> Option<&str> {
        poster_url(&self.small)
            .or_else(|| poster_url(&self.medium))
            .or_else(|| poster_url(&self.original))
    }
}

fn poster_url(poster: &Option<Poster>) -> Option<&str> {
    poster.as_ref().and_then(|poster| poster.url.as_deref())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FranchiseInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// One entry of a franchise graph; every release is itself a title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: i64,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub ordinal: Option<i64>,
    #[serde(default)]
    pub names: TitleNames,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Franchise {
    #[serde(default)]
    pub franchise: FranchiseInfo,
    #[serde(default)]
    pub releases: Vec<Release>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    #[serde(default)]
    pub episode: Option<serde_json::Number>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub created_timestamp: Option<i64>,
    #[serde(default)]
    pub preview: Option<String>,
    /// Quality key (`fhd`, `hd`, `sd`) to playlist path on the player host.
    #[serde(default)]
    pub hls: BTreeMap<String, Option<String>>,
}

impl Episode {
    /// Qualities that actually carry a playlist.
    pub fn qualities(&self) -> impl Iterator<Item = (&str, &str)> {
        self.hls
            .iter()
            .filter_map(|(quality, path)| Some((quality.as_str(), path.as_deref()?)))
    }

    pub fn playlist_path(&self, quality: &str) -> Option<&str> {
        self.hls.get(quality).and_then(|path| path.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Player {
    #[serde(default)]
    pub host: String,
    #[serde(default, deserialize_with = "episode_list")]
    pub list: BTreeMap<String, Episode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Title {
    pub id: i64,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub names: TitleNames,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub status: Option<TitleStatus>,
    #[serde(default)]
    pub posters: Posters,
    #[serde(default)]
    pub franchises: Vec<Franchise>,
    #[serde(default)]
    pub player: Player,
}

impl Title {
    pub fn id_string(&self) -> String {
        self.id.to_string()
    }

    pub fn episode(&self, key: &str) -> Option<&Episode> {
        self.player.list.get(key)
    }

    /// Episodes ordered by their number, falling back to the list key.
    pub fn episodes(&self) -> Vec<(&str, &Episode)> {
        let mut episodes: Vec<_> = self
            .player
            .list
            .iter()
            .map(|(key, episode)| (key.as_str(), episode))
            .collect();
        episodes.sort_by(|(a_key, a), (b_key, b)| {
            let a_number = a.episode.as_ref().and_then(|n| n.as_f64());
            let b_number = b.episode.as_ref().and_then(|n| n.as_f64());
            a_number
                .partial_cmp(&b_number)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a_key.cmp(b_key))
        });
        episodes
    }

    pub fn is_in_progress(&self) -> bool {
        self.status.as_ref().and_then(|status| status.code) == Some(STATUS_IN_PROGRESS)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TitleList {
    #[serde(default)]
    pub list: Vec<Title>,
}

/// `player.list` is an object keyed by episode number, except for titles
/// without episodes where the upstream sends `[]` (or occasionally a list).
fn episode_list<'de, D>(deserializer: D) -> Result<BTreeMap<String, Episode>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Listing {
        Map(BTreeMap<String, Episode>),
        Seq(Vec<Episode>),
    }

    Ok(match Option::<Listing>::deserialize(deserializer)? {
        Some(Listing::Map(map)) => map,
        Some(Listing::Seq(episodes)) => episodes
            .into_iter()
            .enumerate()
            .map(|(index, episode)| {
                let key = episode
                    .episode
                    .as_ref()
                    .map(|number| number.to_string())
                    .unwrap_or_else(|| (index + 1).to_string());
                (key, episode)
            })
            .collect(),
        None => BTreeMap::new(),
    })
}

/// Read-side of the upstream service. Implemented by [`AnilibriaClient`] and
/// by test doubles.
pub trait TitleSource: Send + Sync {
    fn search_titles(&self, query: &str) -> Result<Vec<Title>, UpstreamError>;
    fn recently_updated(&self) -> Result<Vec<Title>, UpstreamError>;
    fn fetch_title(&self, id: &str) -> Result<Title, UpstreamError>;
}

#[derive(Clone)]
pub struct AnilibriaClient {
    agent: ureq::Agent,
    base_url: String,
}

impl AnilibriaClient {
    pub fn new(host: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(30))
            .build();
        Self::with_agent(agent, host)
    }

    /// `host` is a bare host name (HTTPS is assumed) or a full
    /// `scheme://host[:port]` origin.
    pub fn with_agent(agent: ureq::Agent, host: impl Into<String>) -> Self {
        let host = host.into();
        let base_url = if host.contains("://") {
            host.trim_end_matches('/').to_owned()
        } else {
            format!("https://{host}")
        };
        Self { agent, base_url }
    }

    /// Performs the request and retries exactly once, after a short pause,
    /// when the body could not be decoded.
    fn api<T: DeserializeOwned>(&self, path: &str) -> Result<T, UpstreamError> {
        match self.request(path) {
            Err(UpstreamError::Decode(err)) => {
                warn!(path, error = %err, "undecodable upstream response, retrying once");
                thread::sleep(DECODE_RETRY_DELAY);
                self.request(path)
            }
            result => result,
        }
    }

    fn request<T: DeserializeOwned>(&self, path: &str) -> Result<T, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "upstream request");
        let response = match self.agent.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                // Error envelopes also arrive with 4xx statuses.
                let body = response.into_string().unwrap_or_default();
                return match decode_envelope::<serde_json::Value>(&body) {
                    Err(err @ UpstreamError::Api(_)) => Err(err),
                    _ => Err(UpstreamError::Unavailable(format!("{url} returned {code}"))),
                };
            }
            Err(err) => return Err(UpstreamError::Unavailable(err.to_string())),
        };
        let body = response
            .into_string()
            .map_err(|err| UpstreamError::Unavailable(format!("reading {url}: {err}")))?;
        decode_envelope(&body)
    }
}

impl TitleSource for AnilibriaClient {
    fn search_titles(&self, query: &str) -> Result<Vec<Title>, UpstreamError> {
        let query = utf8_percent_encode(query, NON_ALPHANUMERIC);
        let listing: TitleList =
            self.api(&format!("/v3/title/search?limit={PAGE_SIZE}&search={query}"))?;
        Ok(listing.list)
    }

    fn recently_updated(&self) -> Result<Vec<Title>, UpstreamError> {
        let listing: TitleList = self.api(&format!("/v3/title/updates?limit={PAGE_SIZE}"))?;
        Ok(listing.list)
    }

    fn fetch_title(&self, id: &str) -> Result<Title, UpstreamError> {
        let id = utf8_percent_encode(id, NON_ALPHANUMERIC);
        self.api(&format!("/v3/title?id={id}"))
    }
}

/// Decodes an upstream body, turning an `error` member into
/// [`UpstreamError::Api`] even when the HTTP status was 200.
pub fn decode_envelope<T: DeserializeOwned>(body: &str) -> Result<T, UpstreamError> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    let has_error = value
        .get("error")
        .is_some_and(|error| !error.is_null());
    if has_error {
        return Err(UpstreamError::Api(value));
    }
    Ok(serde_json::from_value(value)?)
}
