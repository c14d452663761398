// Service configuration - TOML file, environment overrides, CLI flags on top

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8080/api/spotify/callback";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("could not determine a data directory")]
    Directories,
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub spotify: SpotifyConfig,
    pub genius: GeniusConfig,
    pub scraper: ScraperConfig,
    pub getsongbpm: GetSongBpmConfig,
    pub auth: AuthConfig,
    pub prefetch: PrefetchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; empty allows any origin
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        SpotifyConfig {
            client_id: None,
            client_secret: None,
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeniusConfig {
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetSongBpmConfig {
    pub api_key: Option<String>,
}

/// A bearer token accepted as a signed-in identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenIdentity {
    pub token: String,
    pub uid: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Emails allowed to use the API; empty means everyone with a valid token
    pub allowed_users: Vec<String>,
    pub tokens: Vec<TokenIdentity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    pub enabled: bool,
    pub max_songs: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        PrefetchConfig {
            enabled: true,
            max_songs: 50,
        }
    }
}

impl Config {
    /// Load from a TOML file. A missing file gives the defaults, a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Config::default());
        };

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("No config file at {:?}, using defaults", path);
                return Ok(Config::default());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(toml::from_str(&content)?)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (the process env in production)
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("BANDPRACTICE_PORT") {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "BANDPRACTICE_PORT".to_string(),
                value: port.clone(),
            })?;
        }
        if let Some(db) = get("BANDPRACTICE_DB") {
            self.database.path = Some(PathBuf::from(db));
        }
        if let Some(v) = get("SPOTIFY_CLIENT_ID") {
            self.spotify.client_id = Some(v);
        }
        if let Some(v) = get("SPOTIFY_CLIENT_SECRET") {
            self.spotify.client_secret = Some(v);
        }
        if let Some(v) = get("SPOTIFY_REDIRECT_URI") {
            self.spotify.redirect_uri = v;
        }
        if let Some(v) = get("GENIUS_ACCESS_TOKEN") {
            self.genius.access_token = Some(v);
        }
        if let Some(v) = get("SCRAPER_API_KEY") {
            self.scraper.api_key = Some(v);
        }
        if let Some(v) = get("GETSONGBPM_API_KEY") {
            self.getsongbpm.api_key = Some(v);
        }
        if let Some(v) = get("ALLOWED_USERS") {
            self.auth.allowed_users = v
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        Ok(())
    }

    /// Database file path, falling back to the platform data directory
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.database.path {
            return Ok(path.clone());
        }
        let dirs =
            ProjectDirs::from("com", "bandpractice", "bandpractice").ok_or(ConfigError::Directories)?;
        std::fs::create_dir_all(dirs.data_dir())?;
        Ok(dirs.data_dir().join("bandpractice.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = tempdir().unwrap();
        let config = Config::load(Some(&tmp.path().join("nope.toml"))).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.spotify.redirect_uri, DEFAULT_REDIRECT_URI);
        assert!(config.prefetch.enabled);
        assert_eq!(config.prefetch.max_songs, 50);
    }

    #[test]
    fn test_load_partial_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("bandpractice.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 9000

[genius]
access_token = "genius-token"

[[auth.tokens]]
token = "secret"
uid = "u1"
email = "drummer@example.com"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.genius.access_token.as_deref(), Some("genius-token"));
        assert_eq!(config.auth.tokens.len(), 1);
        assert_eq!(config.auth.tokens[0].display_name, None);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BANDPRACTICE_PORT", "7000"),
            ("GETSONGBPM_API_KEY", "bpm-key"),
            ("ALLOWED_USERS", "A@x.com, b@y.com ,"),
            ("SCRAPER_API_KEY", "  "),
        ]);
        let mut config = Config::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.getsongbpm.api_key.as_deref(), Some("bpm-key"));
        assert_eq!(config.auth.allowed_users, vec!["a@x.com", "b@y.com"]);
        // Blank values do not override
        assert_eq!(config.scraper.api_key, None);
    }

    #[test]
    fn test_env_invalid_port() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(|k| {
            (k == "BANDPRACTICE_PORT").then(|| "eighty".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
