#![forbid(unsafe_code)]

//! Jellyfin-compatible API server backed by Anilibria.

use std::{collections::HashSet, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use libriafin::{
    adapter::{
        self, BaseItem, FALLBACK_IMAGE, ItemList, MediaSourceSelection, PlaybackInfo,
        StreamOrigin,
    },
    cache::TitleCache,
    config::{self, DEFAULT_CONFIG_PATH, Settings},
    content_id::{ContentId, ContentKind, FAVORITES, UPDATES},
    favorites::FavoriteStore,
    identity::{self, FavoriteState, USER_ID},
    playlist,
    proxy::{self, StreamProxy},
    upstream::{AnilibriaClient, Title, UpstreamError},
};
use mime_guess::MimeGuess;
use serde::Deserialize;
use tokio::{signal, task};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve the Anilibria catalog over the Jellyfin API.")]
struct Cli {
    #[arg(
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        help = "Env-style config file (optional)"
    )]
    config: PathBuf,
    #[arg(long = "port", value_name = "PORT", help = "Override the listen port")]
    port: Option<u16>,
}

#[derive(Clone)]
struct AppState {
    cache: Arc<TitleCache<AnilibriaClient>>,
    favorites: FavoriteStore,
    proxy: StreamProxy,
    settings: Arc<Settings>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        match &err {
            UpstreamError::Api(envelope) if envelope["error"]["code"] == 404 => {
                ApiError::not_found(err.to_string())
            }
            _ => ApiError::bad_gateway(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, message = %self.message, "request failed");
        }
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsQuery {
    search_term: Option<String>,
    parent_id: Option<String>,
    name_starts_with: Option<String>,
    // Jellyfin clients send .NET-style `True`/`False`.
    is_favorite: Option<String>,
}

impl ItemsQuery {
    fn favorites_only(&self) -> bool {
        self.is_favorite
            .as_deref()
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EpisodesQuery {
    season_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StreamQuery {
    media_source_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentQuery {
    path: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut settings = config::load_settings_from(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    if let Some(port) = cli.port {
        settings.port = port;
    }

    let favorites =
        FavoriteStore::open(&settings.favorites_db).context("initializing favorites database")?;
    let cache = Arc::new(TitleCache::new(AnilibriaClient::new(
        settings.api_host.clone(),
    )));

    let warm = cache.clone();
    task::spawn_blocking(move || match warm.warm_up() {
        Ok(count) => info!(count, "updates listing cached"),
        Err(err) => warn!(error = %err, "initial updates fetch failed"),
    });

    let addr = SocketAddr::new(settings.host.parse()?, settings.port);
    let state = AppState {
        cache,
        favorites,
        proxy: StreamProxy::new(),
        settings: Arc::new(settings),
    };

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("Jellyfin shim listening on http://{}/stable", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/stable/System/Info/Public", get(public_system_info))
        .route("/stable/Users/AuthenticateByName", post(authenticate))
        .route("/stable/Users/{user_id}", get(get_user))
        .route("/stable/Users/{user_id}/Views", get(user_views))
        .route("/stable/Users/{user_id}/Items", get(list_items))
        .route("/stable/Users/{user_id}/Items/Latest", get(empty_array))
        .route("/stable/Users/{user_id}/Items/Resume", get(empty_list))
        .route("/stable/Users/{user_id}/Items/{item_id}", get(get_user_item))
        .route(
            "/stable/Users/{user_id}/FavoriteItems/{item_id}",
            post(add_favorite).delete(remove_favorite),
        )
        .route("/stable/Items/{item_id}", get(get_item))
        .route("/stable/Items/{item_id}/PlaybackInfo", post(playback_info).get(playback_info))
        .route("/stable/Items/{item_id}/Images/Primary", get(primary_image))
        .route("/stable/Shows/NextUp", get(empty_list))
        .route("/stable/Shows/{item_id}/Seasons", get(list_seasons))
        .route("/stable/Shows/{item_id}/Episodes", get(list_episodes))
        .route("/stable/videos/{item_id}/stream.m3u8", get(stream_episode))
        .route("/stable/videos/{item_id}/master.m3u8", get(stream_episode))
        .route("/stable/Videos/{item_id}/stream.m3u8", get(stream_episode))
        .route("/stable/Videos/{item_id}/master.m3u8", get(stream_episode))
        .route("/stable/DisplayPreferences/usersettings", get(display_preferences))
        .route("/stable/Plugins", get(empty_array))
        .route("/stable/Packages", get(empty_array))
        .route("/stable/Library/VirtualFolders", get(empty_array))
        .route("/content/{scheme}/{host}/{ext}", get(proxy_content))
        .fallback(not_found)
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", err);
    }
}

async fn log_requests(request: Request, next: Next) -> Response {
    let uri = request.uri();
    // Artwork requests are too chatty to be worth logging.
    if !uri.path().contains("/Images/Primary") {
        info!(
            method = %request.method(),
            path = uri.path(),
            query = uri.query().unwrap_or(""),
            "request"
        );
    }
    next.run(request).await
}

async fn not_found(method: Method, uri: axum::http::Uri) -> ApiError {
    warn!(%method, %uri, "unhandled route");
    ApiError::not_found("route not found")
}

async fn empty_list() -> Json<ItemList<serde_json::Value>> {
    Json(ItemList::empty())
}

async fn empty_array() -> Json<Vec<serde_json::Value>> {
    Json(Vec::new())
}

async fn public_system_info(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<identity::PublicSystemInfo> {
    let origin = if state.settings.public_url.is_empty() {
        let host = headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost");
        format!("http://{host}")
    } else {
        state.settings.public_url.clone()
    };
    Json(identity::public_system_info(format!("{origin}/stable")))
}

async fn authenticate() -> Json<identity::AuthenticationResult> {
    Json(identity::authentication_result())
}

async fn get_user() -> Json<identity::UserDto> {
    Json(identity::user())
}

async fn display_preferences() -> Json<identity::DisplayPreferences> {
    Json(identity::display_preferences())
}

async fn user_views() -> Json<ItemList<adapter::CollectionFolder>> {
    Json(adapter::root_views())
}

async fn list_items(
    State(state): State<AppState>,
    Query(query): Query<ItemsQuery>,
) -> ApiResult<Json<ItemList<BaseItem>>> {
    if query.name_starts_with.is_some() {
        return Ok(Json(ItemList::empty()));
    }

    if let Some(term) = query.search_term.as_deref().filter(|term| !term.trim().is_empty()) {
        let titles = state.search(term.to_owned()).await?;
        return Ok(Json(state.series_list(titles).await?));
    }

    if query.favorites_only() {
        return Ok(Json(state.favorite_items().await?));
    }

    let parent = ContentId::parse(query.parent_id.as_deref().unwrap_or(""));
    let items = match parent.classify() {
        ContentKind::Root => {
            let titles = state.recently_updated().await?;
            state.series_list(titles).await?
        }
        ContentKind::Collection(name) if name == UPDATES => {
            let titles = state.recently_updated().await?;
            state.series_list(titles).await?
        }
        ContentKind::Collection(name) if name == FAVORITES => state.favorite_items().await?,
        ContentKind::Collection(_) | ContentKind::Episode => ItemList::empty(),
        ContentKind::Series => {
            let series_id = series_id(&parent)?;
            let title = state.title(series_id).await?;
            adapter::season_list(&title, series_id)
                .items
                .into_iter()
                .map(BaseItem::Season)
                .collect()
        }
        ContentKind::Season => state.episode_items(&parent).await?,
    };
    Ok(Json(items))
}

async fn get_user_item(
    State(state): State<AppState>,
    Path((_user_id, item_id)): Path<(String, String)>,
) -> ApiResult<Json<BaseItem>> {
    Ok(Json(state.item(&ContentId::parse(&item_id)).await?))
}

async fn get_item(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> ApiResult<Json<BaseItem>> {
    Ok(Json(state.item(&ContentId::parse(&item_id)).await?))
}

async fn add_favorite(
    State(state): State<AppState>,
    Path((_user_id, item_id)): Path<(String, String)>,
) -> ApiResult<Json<FavoriteState>> {
    state.set_favorite(&ContentId::parse(&item_id), true).await.map(Json)
}

async fn remove_favorite(
    State(state): State<AppState>,
    Path((_user_id, item_id)): Path<(String, String)>,
) -> ApiResult<Json<FavoriteState>> {
    state.set_favorite(&ContentId::parse(&item_id), false).await.map(Json)
}

async fn playback_info(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> ApiResult<Json<PlaybackInfo>> {
    let id = ContentId::parse(&item_id);
    let (title, episode_key) = state.episode_title(&id).await?;
    let episode = title
        .episode(&episode_key)
        .ok_or_else(|| ApiError::not_found("episode not found"))?;
    Ok(Json(PlaybackInfo {
        media_sources: adapter::media_sources(&id, episode),
        play_session_id: id.to_string(),
    }))
}

async fn list_seasons(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> ApiResult<Json<ItemList<adapter::SeasonItem>>> {
    let id = ContentId::parse(&item_id);
    let Some(series_id) = id.series_id.as_deref().filter(|_| is_upstream_id(&id)) else {
        return Ok(Json(ItemList::empty()));
    };
    let title = state.title(series_id).await?;
    Ok(Json(adapter::season_list(&title, series_id)))
}

async fn list_episodes(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Query(query): Query<EpisodesQuery>,
) -> ApiResult<Json<ItemList<BaseItem>>> {
    let season = match query.season_id.as_deref() {
        Some(season_id) => ContentId::parse(season_id),
        None => {
            let show = ContentId::parse(&item_id);
            ContentId::new(show.series_id, Some("1".to_owned()), None)
        }
    };
    if season.classify() != ContentKind::Season || !is_upstream_id(&season) {
        return Ok(Json(ItemList::empty()));
    }
    Ok(Json(state.episode_items(&season).await?))
}

async fn stream_episode(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Query(query): Query<StreamQuery>,
    method: Method,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let id = ContentId::parse(&item_id);
    let (title, episode_key) = state.episode_title(&id).await?;
    let episode = title
        .episode(&episode_key)
        .ok_or_else(|| ApiError::not_found("episode not found"))?;

    let selection = match query.media_source_id.as_deref() {
        Some(source_id) => MediaSourceSelection::parse(source_id),
        None => {
            let (quality, _) = episode
                .qualities()
                .next()
                .ok_or_else(|| ApiError::not_found("episode has no streams"))?;
            MediaSourceSelection::new(quality, StreamOrigin::Proxy)
        }
    };
    let path = episode
        .playlist_path(&selection.quality)
        .ok_or_else(|| ApiError::not_found("requested quality not found"))?;
    let url = proxy::https_url(&title.player.host, path);

    match selection.origin {
        StreamOrigin::Proxy => {
            let body = state
                .proxy
                .fetch_and_rewrite_playlist(url, &state.settings.public_url)
                .await
                .map_err(|err| ApiError::bad_gateway(format!("{err:#}")))?;
            Ok(proxy::playlist_response(body))
        }
        StreamOrigin::Direct => state.forward(method, url, &headers).await,
    }
}

async fn primary_image(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let id = ContentId::parse(&item_id);
    let settings = state.settings.clone();
    let fallback = proxy::https_url(&settings.static_host, FALLBACK_IMAGE);

    let url = match id.series_id.as_deref() {
        Some(series_id) if is_upstream_id(&id) => {
            let title = state.title(series_id).await?;
            adapter::primary_image_path(&id, &title)
                .map(|path| proxy::https_url(&settings.dl_host, path))
                .unwrap_or(fallback)
        }
        _ => fallback,
    };
    state.forward(method, url, &headers).await
}

async fn proxy_content(
    State(state): State<AppState>,
    Path((scheme, host, ext)): Path<(String, String, String)>,
    Query(query): Query<ContentQuery>,
    method: Method,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let url = playlist::reverse(&scheme, &host, &ext, &query.path)
        .map_err(|err| ApiError::bad_request(format!("{err:#}")))?;

    if ext.eq_ignore_ascii_case("m3u8") {
        let body = state
            .proxy
            .fetch_and_rewrite_playlist(url, &state.settings.public_url)
            .await
            .map_err(|err| ApiError::bad_gateway(format!("{err:#}")))?;
        return Ok(proxy::playlist_response(body));
    }

    let mut response = state.forward(method, url, &headers).await?;
    if !response.headers().contains_key(header::CONTENT_TYPE) {
        if let Some(mime) = MimeGuess::from_ext(&ext).first() {
            if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
        }
    }
    Ok(response)
}

/// Real Anilibria ids are numeric; anything else cannot be looked up.
fn is_upstream_id(id: &ContentId) -> bool {
    id.series_id
        .as_deref()
        .is_some_and(|series| !series.is_empty() && series.bytes().all(|b| b.is_ascii_digit()))
}

fn series_id(id: &ContentId) -> ApiResult<&str> {
    match id.series_id.as_deref() {
        Some(series) if is_upstream_id(id) => Ok(series),
        _ => Err(ApiError::not_found("unknown series")),
    }
}

async fn blocking<F, T>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|err| ApiError::internal(format!("task join error: {err}")))?
}

impl AppState {
    async fn title(&self, id: &str) -> ApiResult<Title> {
        let cache = self.cache.clone();
        let id = id.to_owned();
        blocking(move || cache.get_title(&id).map_err(ApiError::from)).await
    }

    async fn recently_updated(&self) -> ApiResult<Vec<Title>> {
        let cache = self.cache.clone();
        blocking(move || cache.recently_updated(true).map_err(ApiError::from)).await
    }

    async fn search(&self, term: String) -> ApiResult<Vec<Title>> {
        let cache = self.cache.clone();
        blocking(move || cache.search_titles(&term).map_err(ApiError::from)).await
    }

    async fn favorite_ids(&self) -> ApiResult<Vec<String>> {
        let favorites = self.favorites.clone();
        blocking(move || {
            favorites
                .list_favorites(USER_ID)
                .map_err(|err| ApiError::internal(format!("{err:#}")))
        })
        .await
    }

    async fn favorite_set(&self) -> ApiResult<HashSet<String>> {
        Ok(self.favorite_ids().await?.into_iter().collect())
    }

    async fn set_favorite(&self, id: &ContentId, favorite: bool) -> ApiResult<FavoriteState> {
        let favorites = self.favorites.clone();
        let key = id.to_string();
        let stored = key.clone();
        blocking(move || {
            let result = if favorite {
                favorites.add_favorite(USER_ID, &stored)
            } else {
                favorites.remove_favorite(USER_ID, &stored)
            };
            result.map_err(|err| ApiError::internal(format!("{err:#}")))
        })
        .await?;
        info!(item = %key, favorite, "favorite updated");
        Ok(FavoriteState {
            is_favorite: favorite,
            item_id: key.clone(),
            key,
        })
    }

    async fn forward(&self, method: Method, url: String, headers: &HeaderMap) -> ApiResult<Response> {
        self.proxy
            .forward(method, url, headers)
            .await
            .map_err(|err| ApiError::bad_gateway(format!("{err:#}")))
    }

    async fn series_list(&self, titles: Vec<Title>) -> ApiResult<ItemList<BaseItem>> {
        let favorites = self.favorite_set().await?;
        Ok(titles
            .iter()
            .map(|title| {
                let key = ContentId::series(title.id_string()).to_string();
                BaseItem::Series(adapter::series_item(title, favorites.contains(&key)))
            })
            .collect())
    }

    async fn episode_items(&self, season: &ContentId) -> ApiResult<ItemList<BaseItem>> {
        let title = self.title(series_id(season)?).await?;
        let favorites = self.favorite_set().await?;
        Ok(adapter::episode_list(season, &title, |id| {
            favorites.contains(&id.to_string())
        })
        .items
        .into_iter()
        .map(BaseItem::Episode)
        .collect())
    }

    /// Title backing an episode id, plus the episode key inside it.
    async fn episode_title(&self, id: &ContentId) -> ApiResult<(Title, String)> {
        let episode_key = match (id.classify(), id.episode_id.as_deref()) {
            (ContentKind::Episode, Some(key)) => key.to_owned(),
            _ => return Err(ApiError::not_found("not an episode")),
        };
        let title = self.title(series_id(id)?).await?;
        Ok((title, episode_key))
    }

    async fn item(&self, id: &ContentId) -> ApiResult<BaseItem> {
        match id.classify() {
            ContentKind::Root => Err(ApiError::not_found("item not found")),
            ContentKind::Collection(name) => adapter::collection_by_name(&name)
                .map(BaseItem::Folder)
                .ok_or_else(|| ApiError::not_found("collection not found")),
            ContentKind::Series => {
                let title = self.title(series_id(id)?).await?;
                let favorite = self.favorite_set().await?.contains(&id.to_string());
                Ok(BaseItem::Series(adapter::series_item(&title, favorite)))
            }
            ContentKind::Season => {
                let title = self.title(series_id(id)?).await?;
                Ok(BaseItem::Season(adapter::season_item(id, &title.names.ru)))
            }
            ContentKind::Episode => {
                let (title, episode_key) = self.episode_title(id).await?;
                let episode = title
                    .episode(&episode_key)
                    .ok_or_else(|| ApiError::not_found("episode not found"))?;
                let favorite = self.favorite_set().await?.contains(&id.to_string());
                Ok(BaseItem::Episode(adapter::episode_item(
                    id, &title, episode, favorite,
                )))
            }
        }
    }

    /// Everything the demo user marked as favorite. Titles the upstream no
    /// longer knows are skipped; outages still fail the request.
    async fn favorite_items(&self) -> ApiResult<ItemList<BaseItem>> {
        let mut items = Vec::new();
        for token in self.favorite_ids().await? {
            let id = ContentId::parse(&token);
            match self.item(&id).await {
                Ok(item) => items.push(item),
                Err(err) if err.status == StatusCode::NOT_FOUND => {
                    warn!(item = %token, "skipping unresolvable favorite");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(ItemList::new(items))
    }
}
