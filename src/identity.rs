//! The single demo identity handed to every client.
//!
//! There is no authentication: every login succeeds and every session sees
//! the same user, server and token.

use serde::Serialize;

pub const USER_NAME: &str = "demo";
pub const USER_ID: &str = "a076a5bfc9034f379f5889bc6dafc77b";
pub const SERVER_ID: &str = "713dc3fe952b438fa70ed35e4ef0525a";
pub const ACCESS_TOKEN: &str = "eacd06e811c14d789bc051b8a21fc046";
pub const SERVER_NAME: &str = "Libriafin";
/// Jellyfin version clients should assume when picking API features.
pub const PROTOCOL_VERSION: &str = "10.8.13";

const LOGIN_DATE: &str = "2024-02-11T00:13:54.1200198Z";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserConfiguration {
    pub audio_language_preference: &'static str,
    pub play_default_audio_track: bool,
    pub subtitle_mode: &'static str,
    pub display_missing_episodes: bool,
    pub hide_played_in_latest: bool,
    pub enable_next_episode_auto_play: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserPolicy {
    pub is_administrator: bool,
    pub is_hidden: bool,
    pub is_disabled: bool,
    pub enable_media_playback: bool,
    pub enable_content_downloading: bool,
    pub enable_all_folders: bool,
    pub enable_all_devices: bool,
    pub enable_remote_access: bool,
    pub authentication_provider_id: &'static str,
    pub password_reset_provider_id: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserDto {
    pub name: &'static str,
    pub server_id: &'static str,
    pub id: &'static str,
    pub has_password: bool,
    pub has_configured_password: bool,
    pub has_configured_easy_password: bool,
    pub enable_auto_login: bool,
    pub last_login_date: &'static str,
    pub last_activity_date: &'static str,
    pub configuration: UserConfiguration,
    pub policy: UserPolicy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionInfo {
    pub id: &'static str,
    pub user_id: &'static str,
    pub user_name: &'static str,
    pub client: &'static str,
    pub device_name: &'static str,
    pub device_id: &'static str,
    pub application_version: &'static str,
    pub is_active: bool,
    pub supports_media_control: bool,
    pub supports_remote_control: bool,
    pub server_id: &'static str,
    pub playable_media_types: Vec<&'static str>,
    pub supported_commands: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthenticationResult {
    pub user: UserDto,
    pub session_info: SessionInfo,
    pub access_token: &'static str,
    pub server_id: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublicSystemInfo {
    pub local_address: String,
    pub server_name: &'static str,
    pub version: &'static str,
    pub product_name: &'static str,
    pub operating_system: &'static str,
    pub id: &'static str,
    pub startup_wizard_completed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DisplayPreferences {
    pub id: &'static str,
    pub sort_by: &'static str,
    pub sort_order: &'static str,
    pub remember_indexing: bool,
    pub remember_sorting: bool,
    pub primary_image_height: u32,
    pub primary_image_width: u32,
    pub scroll_direction: &'static str,
    pub show_backdrop: bool,
    pub show_sidebar: bool,
    pub client: &'static str,
}

/// Payload returned by `/UserData`-style endpoints after a favorite toggle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FavoriteState {
    pub is_favorite: bool,
    pub key: String,
    pub item_id: String,
}

pub fn user() -> UserDto {
    UserDto {
        name: USER_NAME,
        server_id: SERVER_ID,
        id: USER_ID,
        has_password: false,
        has_configured_password: false,
        has_configured_easy_password: false,
        enable_auto_login: true,
        last_login_date: LOGIN_DATE,
        last_activity_date: LOGIN_DATE,
        configuration: UserConfiguration {
            audio_language_preference: "",
            play_default_audio_track: true,
            subtitle_mode: "Default",
            display_missing_episodes: true,
            hide_played_in_latest: false,
            enable_next_episode_auto_play: true,
        },
        policy: UserPolicy {
            is_administrator: false,
            is_hidden: true,
            is_disabled: false,
            enable_media_playback: true,
            enable_content_downloading: true,
            enable_all_folders: true,
            enable_all_devices: true,
            enable_remote_access: true,
            authentication_provider_id:
                "Jellyfin.Server.Implementations.Users.DefaultAuthenticationProvider",
            password_reset_provider_id:
                "Jellyfin.Server.Implementations.Users.DefaultPasswordResetProvider",
        },
    }
}

pub fn session() -> SessionInfo {
    SessionInfo {
        id: "90d5d409c9176500e10816167c9867a6",
        user_id: USER_ID,
        user_name: USER_NAME,
        client: "Libriafin",
        device_name: "Libriafin",
        device_id: "libriafin-demo-device",
        application_version: env!("CARGO_PKG_VERSION"),
        is_active: true,
        supports_media_control: false,
        supports_remote_control: false,
        server_id: SERVER_ID,
        playable_media_types: vec!["Video"],
        supported_commands: Vec::new(),
    }
}

pub fn authentication_result() -> AuthenticationResult {
    AuthenticationResult {
        user: user(),
        session_info: session(),
        access_token: ACCESS_TOKEN,
        server_id: SERVER_ID,
    }
}

pub fn public_system_info(local_address: impl Into<String>) -> PublicSystemInfo {
    PublicSystemInfo {
        local_address: local_address.into(),
        server_name: SERVER_NAME,
        version: PROTOCOL_VERSION,
        product_name: "Jellyfin Server",
        operating_system: std::env::consts::OS,
        id: SERVER_ID,
        startup_wizard_completed: true,
    }
}

pub fn display_preferences() -> DisplayPreferences {
    DisplayPreferences {
        id: "3ce5b65d-e116-d731-65d1-efc4a30ec35c",
        sort_by: "SortName",
        sort_order: "Ascending",
        remember_indexing: false,
        remember_sorting: false,
        primary_image_height: 250,
        primary_image_width: 250,
        scroll_direction: "Horizontal",
        show_backdrop: true,
        show_sidebar: false,
        client: "emby",
    }
}
