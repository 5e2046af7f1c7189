//! # cm-config
//!
//! Layered settings for the media store: built-in defaults, then an
//! optional TOML file, then `CARDMEDIA__*` environment variables.

use config::{Config, Environment, File, Map};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "cardmedia.toml";
pub const ENV_PREFIX: &str = "CARDMEDIA";
const ENV_SEPARATOR: &str = "__";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub media: MediaSettings,
    pub index: IndexSettings,
    #[serde(default)]
    pub cloud: Option<CloudSettings>,
    pub log: LogSettings,
}

#[derive(Debug, Deserialize)]
pub struct MediaSettings {
    pub root_dir: PathBuf,
    pub thumbnail_max_dimension: u32,
    pub thumbnail_quality: u8,
}

#[derive(Debug, Deserialize)]
pub struct IndexSettings {
    pub database_url: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct CloudSettings {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default, deserialize_with = "secret_opt")]
    pub api_token: Option<SecretString>,
    #[serde(default = "default_cloud_timeout")]
    pub timeout_secs: u64,
}

impl CloudSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_cloud_timeout() -> u64 {
    30
}

fn secret_opt<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|token| !token.is_empty())
        .map(SecretString::from))
}

#[derive(Debug, Deserialize)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl Settings {
    /// Loads `.env` if present, then layers defaults, the config file and
    /// the process environment. A missing file is not an error.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "Loaded .env");
        }
        let file = config_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::from_sources(Some(&file), None)
    }

    /// `env` replaces the process environment when given.
    pub fn from_sources(file: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("media.root_dir", "./data/media")?
            .set_default("media.thumbnail_max_dimension", 250_i64)?
            .set_default("media.thumbnail_quality", 80_i64)?
            .set_default("index.database_url", "sqlite://./data/cardmedia.db?mode=rwc")?
            .set_default("index.key", "media.index.v1")?
            .set_default("log.level", "info")?
            .set_default("log.json", false)?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(false));
        }

        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(env);

        let settings: Settings = builder.add_source(environment).build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.media.root_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("media.root_dir must not be empty".into()));
        }
        if !(1..=100).contains(&self.media.thumbnail_quality) {
            return Err(ConfigError::Invalid(format!(
                "media.thumbnail_quality must be within 1..=100, got {}",
                self.media.thumbnail_quality
            )));
        }
        if self.media.thumbnail_max_dimension == 0 {
            return Err(ConfigError::Invalid(
                "media.thumbnail_max_dimension must be positive".into(),
            ));
        }
        if self.index.key.trim().is_empty() {
            return Err(ConfigError::Invalid("index.key must not be empty".into()));
        }
        if let Some(cloud) = &self.cloud {
            if cloud.bucket.trim().is_empty() {
                return Err(ConfigError::Invalid("cloud.bucket must not be empty".into()));
            }
            if cloud.timeout_secs == 0 {
                return Err(ConfigError::Invalid("cloud.timeout_secs must be positive".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::fs;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> Option<Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let settings = Settings::from_sources(None, env(&[])).unwrap();
        assert_eq!(settings.media.root_dir, PathBuf::from("./data/media"));
        assert_eq!(settings.media.thumbnail_max_dimension, 250);
        assert_eq!(settings.media.thumbnail_quality, 80);
        assert_eq!(settings.index.key, "media.index.v1");
        assert!(settings.cloud.is_none());
        assert_eq!(settings.log.level, "info");
        assert!(!settings.log.json);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let tmp = TempDir::new().unwrap();
        let settings =
            Settings::from_sources(Some(&tmp.path().join("absent.toml")), env(&[])).unwrap();
        assert_eq!(settings.media.thumbnail_quality, 80);
    }

    #[test]
    fn file_then_env_override_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cardmedia.toml");
        fs::write(
            &path,
            r#"
[media]
root_dir = "/var/lib/cards"
thumbnail_quality = 70

[cloud]
endpoint = "https://storage.example.com"
bucket = "cards"
api_token = "s3cr3t"
"#,
        )
        .unwrap();

        let settings = Settings::from_sources(
            Some(&path),
            env(&[
                ("CARDMEDIA__MEDIA__THUMBNAIL_QUALITY", "90"),
                ("CARDMEDIA__LOG__JSON", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.media.root_dir, PathBuf::from("/var/lib/cards"));
        assert_eq!(settings.media.thumbnail_quality, 90);
        assert!(settings.log.json);
        let cloud = settings.cloud.unwrap();
        assert_eq!(cloud.bucket, "cards");
        assert_eq!(cloud.timeout(), Duration::from_secs(30));
        assert_eq!(cloud.api_token.unwrap().expose_secret(), "s3cr3t");
    }

    #[test]
    fn out_of_range_quality_is_rejected() {
        let err = Settings::from_sources(None, env(&[("CARDMEDIA__MEDIA__THUMBNAIL_QUALITY", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn empty_index_key_is_rejected() {
        let err =
            Settings::from_sources(None, env(&[("CARDMEDIA__INDEX__KEY", " ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn cloud_section_is_validated() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cardmedia.toml");
        fs::write(
            &path,
            "[cloud]\nendpoint = \"http://localhost:9000\"\nbucket = \"\"\n",
        )
        .unwrap();
        let err = Settings::from_sources(Some(&path), env(&[])).unwrap_err();
        assert!(err.to_string().contains("cloud.bucket"));

        fs::write(
            &path,
            "[cloud]\nendpoint = \"http://localhost:9000\"\nbucket = \"b\"\ntimeout_secs = 0\n",
        )
        .unwrap();
        let err = Settings::from_sources(Some(&path), env(&[])).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }
}
