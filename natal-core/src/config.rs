use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{
    Deserialize, Serialize,
    de::{
        DeserializeOwned, IntoDeserializer,
        value::{Error as ValueError, StrDeserializer},
    },
};
use std::{collections::HashMap, fs, path::Path, path::PathBuf, time::Duration};

use crate::provider::ProviderId;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Credentials and endpoint override for a single provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,

    /// Account login, only used by providers that authenticate with Basic auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Overrides the provider's public endpoint, e.g. for a sandbox.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// What to do when the timezone lookup fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimezoneFallback {
    /// The request fails.
    #[default]
    Strict,
    /// Use the geocoder's timezone annotation, or "UTC" when there is none.
    Utc,
}

/// How chart provider calls are authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Exchange the account login for a bearer token first.
    #[default]
    Bearer,
    /// Send the account login as Basic auth on the chart call itself.
    Basic,
}

/// Where the chart image URL lives in the chart provider's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSchema {
    /// `{ "chartImageUrl": "..." }`
    #[default]
    ChartImageUrl,
    /// `{ "chartData": { "imgPath": "..." } }`
    ChartDataImgPath,
    /// `{ "chartResult": { "imageUrl": "..." } }`
    ChartResultImageUrl,
}

/// What URL is handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Delivery {
    /// The chart provider's own image URL.
    #[default]
    Link,
    /// Re-host the image with the print provider and return that URL.
    PrintUpload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound for every outbound call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub timezone_fallback: TimezoneFallback,
    #[serde(default)]
    pub auth: AuthMode,
    #[serde(default)]
    pub response_schema: ResponseSchema,
    #[serde(default)]
    pub delivery: Delivery,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            timezone_fallback: TimezoneFallback::default(),
            auth: AuthMode::default(),
            response_schema: ResponseSchema::default(),
            delivery: Delivery::default(),
        }
    }
}

/// Top-level configuration. Built once at startup and never mutated after
/// the server starts.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Example TOML:
    /// [providers.astroapp]
    /// api_key = "..."
    /// username = "me@example.com"
    /// password = "..."
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

impl Config {
    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Returns API key for a provider, if present and non-empty.
    pub fn provider_api_key(&self, id: ProviderId) -> Option<&str> {
        self.provider_config(id)
            .map(|cfg| cfg.api_key.as_str())
            .filter(|key| !key.is_empty())
    }

    pub fn is_provider_configured(&self, id: ProviderId) -> bool {
        self.provider_api_key(id).is_some()
    }

    /// Set/replace a provider API key, keeping any other settings.
    pub fn upsert_provider_api_key(&mut self, id: ProviderId, api_key: String) {
        self.provider_entry(id).api_key = api_key;
    }

    /// Set/replace the account login of a provider.
    pub fn set_provider_login(&mut self, id: ProviderId, username: String, password: String) {
        let entry = self.provider_entry(id);
        entry.username = Some(username);
        entry.password = Some(password);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.timeout_secs)
    }

    /// Rejects settings that would make every request fail.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.timeout_secs == 0 {
            return Err(anyhow!("pipeline timeout_secs must be greater than 0"));
        }
        Ok(())
    }

    fn provider_entry(&mut self, id: ProviderId) -> &mut ProviderConfig {
        self.providers.entry(id.as_str().to_string()).or_default()
    }

    /// Load config from `path`, or return an empty default if it doesn't
    /// exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        cfg.validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "natal", "natal")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Apply environment overrides on top of the file configuration.
    ///
    /// `lookup` is usually `|name| std::env::var(name).ok()`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(port) = var("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT '{port}'"))?;
        }

        for (name, id) in [
            ("OPENCAGE_KEY", ProviderId::OpenCage),
            ("TIMEZONEDB_KEY", ProviderId::TimezoneDb),
            ("ASTROAPP_KEY", ProviderId::AstroApp),
            ("PRINTFUL_KEY", ProviderId::Printful),
        ] {
            if let Some(key) = var(name) {
                self.upsert_provider_api_key(id, key);
            }
        }

        if let Some(email) = var("ASTROAPP_EMAIL") {
            self.provider_entry(ProviderId::AstroApp).username = Some(email);
        }
        if let Some(pass) = var("ASTROAPP_PASS") {
            self.provider_entry(ProviderId::AstroApp).password = Some(pass);
        }

        if let Some(secs) = var("NATAL_TIMEOUT_SECS") {
            self.pipeline.timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid NATAL_TIMEOUT_SECS '{secs}'"))?;
        }
        if let Some(v) = var("NATAL_TIMEZONE_FALLBACK") {
            self.pipeline.timezone_fallback = parse_setting("NATAL_TIMEZONE_FALLBACK", &v)?;
        }
        if let Some(v) = var("NATAL_AUTH") {
            self.pipeline.auth = parse_setting("NATAL_AUTH", &v)?;
        }
        if let Some(v) = var("NATAL_RESPONSE_SCHEMA") {
            self.pipeline.response_schema = parse_setting("NATAL_RESPONSE_SCHEMA", &v)?;
        }
        if let Some(v) = var("NATAL_DELIVERY") {
            self.pipeline.delivery = parse_setting("NATAL_DELIVERY", &v)?;
        }

        self.validate().context("Invalid environment configuration")?;
        Ok(self)
    }
}

/// Parse a kebab-case enum setting using the same names as the TOML file.
fn parse_setting<T: DeserializeOwned>(name: &str, value: &str) -> Result<T> {
    let lower = value.trim().to_lowercase();
    let de: StrDeserializer<'_, ValueError> = lower.as_str().into_deserializer();
    T::deserialize(de).map_err(|e| anyhow!("Invalid {name} '{value}': {e}"))
}
