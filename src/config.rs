// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! Runtime configuration
//!
//! All configuration comes from environment variables; there is no config
//! file. Keys are checked for presence only, never validated against the
//! upstream service.

use std::env;
use std::path::PathBuf;

use crate::error::{KaapiError, Result};

/// Default listen address for the HTTP server.
pub const DEFAULT_BIND: &str = "0.0.0.0:8000";

/// Default path of the catalog database, relative to the working directory.
pub const DEFAULT_CATALOG_DB: &str = "coffees.db";

/// Application settings, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Active provider name: "gemini", "openai", "anthropic", "openrouter", "ollama"
    pub provider: String,

    /// Model override; each adapter has its own default
    pub model: Option<String>,

    /// HTTP listen address
    pub bind_address: String,

    /// Path to the SQLite coffee catalog
    pub catalog_db: PathBuf,

    /// Per-provider API keys
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,

    /// Ollama needs a URL, not a key
    pub ollama_base_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: None,
            bind_address: DEFAULT_BIND.to_string(),
            catalog_db: PathBuf::from(DEFAULT_CATALOG_DB),
            gemini_api_key: None,
            openai_api_key: None,
            anthropic_api_key: None,
            openrouter_api_key: None,
            ollama_base_url: "http://localhost:11434".to_string(),
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Settings {
    /// Load settings from the process environment.
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Self {
            provider: env_opt("KAAPI_PROVIDER").unwrap_or(defaults.provider),
            model: env_opt("KAAPI_MODEL"),
            bind_address: env_opt("KAAPI_BIND").unwrap_or(defaults.bind_address),
            catalog_db: env_opt("KAAPI_CATALOG_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.catalog_db),
            gemini_api_key: env_opt("GEMINI_API_KEY"),
            openai_api_key: env_opt("OPENAI_API_KEY"),
            anthropic_api_key: env_opt("ANTHROPIC_API_KEY"),
            openrouter_api_key: env_opt("OPENROUTER_API_KEY"),
            ollama_base_url: env_opt("OLLAMA_BASE_URL").unwrap_or(defaults.ollama_base_url),
        }
    }

    /// Check that the active provider has what it needs to start.
    ///
    /// Presence only; a bad key still fails at the first model call.
    pub fn validate(&self) -> Result<()> {
        let missing = |var: &str| {
            KaapiError::Config(format!(
                "provider '{}' selected but {} is not set",
                self.provider, var
            ))
        };

        match self.provider.as_str() {
            "gemini" => self.gemini_api_key.as_ref().map(|_| ()).ok_or_else(|| missing("GEMINI_API_KEY")),
            "openai" => self.openai_api_key.as_ref().map(|_| ()).ok_or_else(|| missing("OPENAI_API_KEY")),
            "anthropic" => self
                .anthropic_api_key
                .as_ref()
                .map(|_| ())
                .ok_or_else(|| missing("ANTHROPIC_API_KEY")),
            "openrouter" => self
                .openrouter_api_key
                .as_ref()
                .map(|_| ())
                .ok_or_else(|| missing("OPENROUTER_API_KEY")),
            "ollama" => Ok(()),
            other => Err(KaapiError::Config(format!("unknown provider '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.provider, "gemini");
        assert_eq!(settings.bind_address, DEFAULT_BIND);
        assert_eq!(settings.catalog_db, PathBuf::from(DEFAULT_CATALOG_DB));
        assert!(settings.model.is_none());
    }

    #[test]
    fn test_validate_gemini_missing_key() {
        let settings = Settings::default();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_validate_gemini_with_key() {
        let settings = Settings {
            gemini_api_key: Some("test-key".to_string()),
            ..Settings::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_ollama_needs_no_key() {
        let settings = Settings {
            provider: "ollama".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_unknown_provider() {
        let settings = Settings {
            provider: "palantir".to_string(),
            ..Settings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("unknown provider"));
    }

    #[test]
    fn test_validate_openrouter_missing_key() {
        let settings = Settings {
            provider: "openrouter".to_string(),
            ..Settings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("OPENROUTER_API_KEY"));
    }
}
