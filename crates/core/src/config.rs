//! Generation backend configuration.
//! Values come from defaults, then the environment, then explicit overrides.

use crate::error::GenerationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which completion service to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Gemini,
    OpenAi,
}

impl BackendKind {
    /// Environment variables checked, in order, for the API key.
    pub fn key_vars(&self) -> &'static [&'static str] {
        match self {
            Self::Gemini => &["GEMINI_API_KEY", "API_KEY"],
            Self::OpenAi => &["OPENAI_API_KEY"],
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
        })
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" | "open-ai" => Ok(Self::OpenAi),
            other => Err(format!("unknown backend {other:?}, expected gemini or openai")),
        }
    }
}

/// Settings needed to build a generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub backend: BackendKind,
    /// API key; required before any call is made.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Override for the service base URL (proxies, tests).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Model used for raw chunk correction.
    pub fast_model: String,
    /// Model used for rewriting, regeneration and style transfer.
    pub quality_model: String,
    /// Optional HTTP client timeout. The workflows impose none themselves.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self::for_backend(BackendKind::default())
    }
}

impl GenerationConfig {
    /// Defaults for `backend` without any credential.
    pub fn for_backend(backend: BackendKind) -> Self {
        let (fast, quality) = match backend {
            BackendKind::Gemini => ("gemini-3-flash-preview", "gemini-3-pro-preview"),
            BackendKind::OpenAi => ("gpt-4o-mini", "gpt-4o"),
        };
        Self {
            backend,
            api_key: None,
            base_url: None,
            fast_model: fast.to_string(),
            quality_model: quality.to_string(),
            timeout_secs: None,
        }
    }

    /// Defaults for `backend` completed from the process environment.
    pub fn from_env(backend: BackendKind) -> Self {
        Self::from_lookup(backend, |name| std::env::var(name).ok())
    }

    /// Same as [`Self::from_env`] with an injectable variable lookup.
    /// Reads the backend key variables plus `SRTSMITH_BASE_URL`,
    /// `SRTSMITH_FAST_MODEL` and `SRTSMITH_QUALITY_MODEL`.
    pub fn from_lookup(backend: BackendKind, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::for_backend(backend);
        let set = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        config.api_key = backend.key_vars().iter().find_map(|name| set(*name));
        config.base_url = set("SRTSMITH_BASE_URL");
        if let Some(model) = set("SRTSMITH_FAST_MODEL") {
            config.fast_model = model;
        }
        if let Some(model) = set("SRTSMITH_QUALITY_MODEL") {
            config.quality_model = model;
        }
        config
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// The API key, or a configuration error when it is absent or blank.
    pub fn require_key(&self) -> Result<&str, GenerationError> {
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(GenerationError::configuration(format!(
                "API key is missing, set {}",
                self.backend.key_vars().join(" or ")
            ))),
        }
    }
}
