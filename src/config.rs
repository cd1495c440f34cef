use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::upstream::DEFAULT_API_HOST;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/libriafin-env";
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_DL_HOST: &str = "dl-20240212-1.anilib.one";
pub const DEFAULT_STATIC_HOST: &str = "static-libria.weekstorm.one";
pub const DEFAULT_FAVORITES_DB: &str = "favorites.sqlite";
pub const PORT_ENV: &str = "LIBRIAFIN_PORT";

#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub api_host: Option<String>,
    pub dl_host: Option<String>,
    pub static_host: Option<String>,
    pub favorites_db: Option<PathBuf>,
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub api_host: String,
    pub dl_host: String,
    pub static_host: String,
    pub favorites_db: PathBuf,
    /// Origin prefixed to rewritten playlist URLs; empty keeps them
    /// root-relative.
    pub public_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env_config(EnvConfig::default())
    }
}

impl Settings {
    pub fn from_env_config(cfg: EnvConfig) -> Self {
        Self {
            host: cfg.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cfg.port.unwrap_or(DEFAULT_PORT),
            api_host: cfg.api_host.unwrap_or_else(|| DEFAULT_API_HOST.to_string()),
            dl_host: cfg.dl_host.unwrap_or_else(|| DEFAULT_DL_HOST.to_string()),
            static_host: cfg
                .static_host
                .unwrap_or_else(|| DEFAULT_STATIC_HOST.to_string()),
            favorites_db: cfg
                .favorites_db
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FAVORITES_DB)),
            public_url: cfg
                .public_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_default(),
        }
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            if value.is_empty() {
                continue;
            }
            match key.trim() {
                "LIBRIAFIN_HOST" => cfg.host = Some(value.to_string()),
                "LIBRIAFIN_PORT" => {
                    let port: u16 = value
                        .parse()
                        .with_context(|| format!("Parsing LIBRIAFIN_PORT from {}", path.display()))?;
                    cfg.port = Some(port);
                }
                "API_HOST" => cfg.api_host = Some(value.to_string()),
                "DL_HOST" => cfg.dl_host = Some(value.to_string()),
                "STATIC_HOST" => cfg.static_host = Some(value.to_string()),
                "FAVORITES_DB" => cfg.favorites_db = Some(PathBuf::from(value)),
                "PUBLIC_URL" => cfg.public_url = Some(value.to_string()),
                _ => {}
            }
        }
    }
    Ok(Some(cfg))
}

/// Loads settings from `path` if it exists (defaults otherwise), then applies
/// the `LIBRIAFIN_PORT` environment variable.
pub fn load_settings_from(path: impl AsRef<Path>) -> Result<Settings> {
    let cfg = read_env_config(path.as_ref())?.unwrap_or_default();
    let mut settings = Settings::from_env_config(cfg);
    if let Some(port) = std::env::var(PORT_ENV)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        settings.port = port;
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn read_env_config_extracts_port() {
        let cfg = make_config("# shim\nLIBRIAFIN_PORT=\"4242\"\nAPI_HOST=\"api.example\"\n");
        let parsed = read_env_config(cfg.path()).unwrap().unwrap();
        assert_eq!(parsed.port, Some(4242));
        assert_eq!(parsed.api_host.as_deref(), Some("api.example"));
    }

    #[test]
    fn read_env_config_rejects_bad_port() {
        let cfg = make_config("LIBRIAFIN_PORT=eighty\n");
        assert!(read_env_config(cfg.path()).is_err());
    }

    #[test]
    fn missing_file_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_env_config(&dir.path().join("absent")).unwrap().is_none());
    }

    #[test]
    fn settings_default_missing_values() {
        let cfg = make_config("FAVORITES_DB=\"/var/lib/libriafin/fav.sqlite\"\nPUBLIC_URL=\"http://tv.local:8888/\"\n");
        let parsed = read_env_config(cfg.path()).unwrap().unwrap();
        let settings = Settings::from_env_config(parsed);
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.host, DEFAULT_HOST);
        assert_eq!(settings.api_host, DEFAULT_API_HOST);
        assert_eq!(settings.dl_host, DEFAULT_DL_HOST);
        assert_eq!(
            settings.favorites_db,
            PathBuf::from("/var/lib/libriafin/fav.sqlite")
        );
        assert_eq!(settings.public_url, "http://tv.local:8888");
    }

    #[test]
    fn default_settings_keep_relative_playlists() {
        let settings = Settings::default();
        assert_eq!(settings.public_url, "");
        assert_eq!(settings.static_host, DEFAULT_STATIC_HOST);
    }
}
