//! Configuration: defaults, then an optional TOML file, then environment
//! overrides, then CLI flags (applied by [`crate::cli::Args::apply`]).
//!
//! ```toml
//! [backend]
//! base_url = "http://127.0.0.1:8000"
//! connect_timeout_secs = 10
//!
//! [session]
//! mode = "two-stage"
//! language = "zh"
//! error_heuristic = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::event::DONE_SENTINEL;
use crate::protocol::Endpoint;
use crate::render::Locale;
use crate::session::SessionMode;

pub const ENV_BASE_URL: &str = "ANIMAGEN_BASE_URL";
pub const ENV_LANG: &str = "ANIMAGEN_LANG";
pub const ENV_MODE: &str = "ANIMAGEN_MODE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub outline_path: String,
    pub animation_path: String,
    pub combined_path: String,
    /// TCP connect timeout. The stream itself is never timed out.
    pub connect_timeout_secs: Option<u64>,
    /// Origin used to build `/view/<id>` share links; defaults to `base_url`.
    pub share_base: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            outline_path: "/generate-outline".to_string(),
            animation_path: "/generate-animation".to_string(),
            combined_path: "/generate".to_string(),
            connect_timeout_secs: Some(10),
            share_base: None,
        }
    }
}

impl BackendConfig {
    pub fn path(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::Outline => &self.outline_path,
            Endpoint::Animation => &self.animation_path,
            Endpoint::Combined => &self.combined_path,
        }
    }

    pub fn url(&self, endpoint: Endpoint) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.path(endpoint);
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    pub fn share_base(&self) -> &str {
        self.share_base.as_deref().unwrap_or(&self.base_url)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: SessionMode,
    pub language: Locale,
    /// Escalate unparseable frames that mention `error` to remote errors.
    pub error_heuristic: bool,
    /// Terminal sentinel recognized by the combined stage.
    pub combined_sentinel: String,
    /// `tracing-subscriber` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::TwoStage,
            language: Locale::En,
            error_heuristic: true,
            combined_sentinel: DONE_SENTINEL.to_string(),
            log_filter: "animagen=warn".to_string(),
        }
    }
}

impl Config {
    /// Load from `path` (if given) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text, &path.display().to_string())
    }

    pub fn from_toml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    /// Apply overrides from a key lookup (the process environment in
    /// [`Config::load`]).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.backend.base_url = url;
        }
        if let Some(lang) = lookup(ENV_LANG) {
            self.session.language = Locale::from_tag(&lang).ok_or(ConfigError::Invalid {
                key: ENV_LANG,
                value: lang,
            })?;
        }
        if let Some(mode) = lookup(ENV_MODE) {
            self.session.mode = match mode.as_str() {
                "two-stage" => SessionMode::TwoStage,
                "combined" => SessionMode::Combined,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: ENV_MODE,
                        value: mode,
                    })
                }
            };
        }
        Ok(())
    }
}
