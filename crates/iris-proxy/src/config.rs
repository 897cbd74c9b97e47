//! Configuration from environment variables and an optional `iris.yml`.
//!
//! **Environment variables** (always win over the YAML file):
//! - `IRIS_CONFIG`: path of a YAML file to load first
//! - `PORT`: server port (default: 3000)
//! - `IRIS_MODE`: `capture`, `repair` or `translate` (default: capture)
//! - `UPSTREAM_BASE_URL`: upstream base URL (default depends on the mode)
//! - `UPSTREAM_MODEL`: model name for translated requests (default: glm-4.5)
//! - `UPSTREAM_API_KEY`: credential used to synthesize `authorization` in translate mode
//! - `CAPTURE_DIR`: directory for capture records (default: requests)
//! - `CAPTURE_ENABLED`: `true`/`1` or `false`/`0` (default: true)
//! - `CONNECT_TIMEOUT_SECS`: upstream connect timeout (default: 30)
//!
//! ```yaml
//! port: 3000
//! mode: repair
//! upstream_base_url: "https://api.minimaxi.com/anthropic"
//! capture_dir: "requests"
//! ```

use secrecy::SecretString;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MODEL: &str = "glm-4.5";
pub const DEFAULT_CAPTURE_DIR: &str = "requests";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("unknown mode `{0}` (expected capture, repair or translate)")]
    InvalidMode(String),

    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// How inbound `/v1/messages` requests are handled before relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Forward untouched to a block-structured upstream.
    #[default]
    Capture,
    /// Split multi-block tool-result messages, then forward.
    Repair,
    /// Convert to a flat-role `chat/completions` call.
    Translate,
}

impl ProxyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyMode::Capture => "capture",
            ProxyMode::Repair => "repair",
            ProxyMode::Translate => "translate",
        }
    }

    pub fn default_upstream_base_url(&self) -> &'static str {
        match self {
            ProxyMode::Capture => "https://open.bigmodel.cn/api/anthropic",
            ProxyMode::Repair => "https://api.minimaxi.com/anthropic",
            ProxyMode::Translate => "https://open.bigmodel.cn/api/paas/v4",
        }
    }

    pub fn upstream_path(&self) -> &'static str {
        match self {
            ProxyMode::Capture | ProxyMode::Repair => "/v1/messages",
            ProxyMode::Translate => "/chat/completions",
        }
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProxyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "capture" => Ok(ProxyMode::Capture),
            "repair" => Ok(ProxyMode::Repair),
            "translate" => Ok(ProxyMode::Translate),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub mode: ProxyMode,
    /// Overrides the mode's default upstream when set.
    pub upstream_base_url: Option<String>,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub capture_dir: PathBuf,
    pub capture_enabled: bool,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
struct IrisYamlConfig {
    port: Option<u16>,
    mode: Option<ProxyMode>,
    upstream_base_url: Option<String>,
    model: Option<String>,
    capture_dir: Option<PathBuf>,
    capture_enabled: Option<bool>,
    connect_timeout_secs: Option<u64>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            mode: ProxyMode::default(),
            upstream_base_url: None,
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            capture_dir: PathBuf::from(DEFAULT_CAPTURE_DIR),
            capture_enabled: true,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl ProxyConfig {
    /// Defaults, then the file named by `IRIS_CONFIG` (if any), then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match env::var("IRIS_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_yaml_file(path)?,
            _ => Self::default(),
        };
        base.with_overrides(|key| env::var(key).ok())
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let yaml: IrisYamlConfig =
            serde_yaml_ng::from_str(&content).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;

        let defaults = Self::default();
        Ok(Self {
            port: yaml.port.unwrap_or(defaults.port),
            mode: yaml.mode.unwrap_or(defaults.mode),
            upstream_base_url: yaml.upstream_base_url,
            model: yaml.model.unwrap_or(defaults.model),
            api_key: None,
            capture_dir: yaml.capture_dir.unwrap_or(defaults.capture_dir),
            capture_enabled: yaml.capture_enabled.unwrap_or(defaults.capture_enabled),
            connect_timeout_secs: yaml
                .connect_timeout_secs
                .unwrap_or(defaults.connect_timeout_secs),
        })
    }

    /// Apply variable overrides read through `lookup`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("PORT") {
            self.port = parse_value("PORT", &port)?;
        }
        if let Some(mode) = get("IRIS_MODE") {
            self.mode = mode.parse()?;
        }
        if let Some(url) = get("UPSTREAM_BASE_URL") {
            self.upstream_base_url = Some(url);
        }
        if let Some(model) = get("UPSTREAM_MODEL") {
            self.model = model;
        }
        if let Some(key) = get("UPSTREAM_API_KEY") {
            self.api_key = Some(SecretString::from(key));
        }
        if let Some(dir) = get("CAPTURE_DIR") {
            self.capture_dir = PathBuf::from(dir);
        }
        if let Some(enabled) = get("CAPTURE_ENABLED") {
            self.capture_enabled = parse_flag("CAPTURE_ENABLED", &enabled)?;
        }
        if let Some(secs) = get("CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_secs = parse_value("CONNECT_TIMEOUT_SECS", &secs)?;
        }

        Ok(self)
    }

    pub fn upstream_base_url_trimmed(&self) -> String {
        self.upstream_base_url
            .as_deref()
            .unwrap_or_else(|| self.mode.default_upstream_base_url())
            .trim_end_matches('/')
            .to_string()
    }

    /// Full URL requests are relayed to.
    pub fn upstream_url(&self) -> String {
        format!("{}{}", self.upstream_base_url_trimmed(), self.mode.upstream_path())
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.mode, ProxyMode::Capture);
        assert_eq!(config.model, "glm-4.5");
        assert!(config.capture_enabled);
        assert_eq!(config.capture_dir, PathBuf::from("requests"));
        assert_eq!(
            config.upstream_url(),
            "https://open.bigmodel.cn/api/anthropic/v1/messages"
        );
    }

    #[test]
    fn test_env_overrides() {
        let config = ProxyConfig::default()
            .with_overrides(lookup(&[
                ("PORT", "8080"),
                ("IRIS_MODE", "translate"),
                ("UPSTREAM_BASE_URL", "http://localhost:9000/v4/"),
                ("UPSTREAM_MODEL", "glm-4.6"),
                ("UPSTREAM_API_KEY", "sk-test"),
                ("CAPTURE_ENABLED", "0"),
            ]))
            .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.mode, ProxyMode::Translate);
        assert_eq!(config.upstream_url(), "http://localhost:9000/v4/chat/completions");
        assert_eq!(config.model, "glm-4.6");
        assert_eq!(config.api_key.as_ref().unwrap().expose_secret(), "sk-test");
        assert!(!config.capture_enabled);
    }

    #[test]
    fn test_mode_default_upstreams() {
        let repair = ProxyConfig {
            mode: ProxyMode::Repair,
            ..ProxyConfig::default()
        };
        assert_eq!(
            repair.upstream_url(),
            "https://api.minimaxi.com/anthropic/v1/messages"
        );

        let translate = ProxyConfig {
            mode: ProxyMode::Translate,
            ..ProxyConfig::default()
        };
        assert_eq!(
            translate.upstream_url(),
            "https://open.bigmodel.cn/api/paas/v4/chat/completions"
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = ProxyConfig::default()
            .with_overrides(lookup(&[("IRIS_MODE", "mirror")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMode(m) if m == "mirror"));

        let err = ProxyConfig::default()
            .with_overrides(lookup(&[("PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "PORT", .. }));
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config = ProxyConfig::default()
            .with_overrides(lookup(&[("PORT", "  "), ("IRIS_MODE", "")]))
            .unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.mode, ProxyMode::Capture);
    }

    #[test]
    fn test_mode_parsing_is_case_insensitive() {
        assert_eq!("Repair".parse::<ProxyMode>().unwrap(), ProxyMode::Repair);
        assert_eq!(" TRANSLATE ".parse::<ProxyMode>().unwrap(), ProxyMode::Translate);
    }
}
