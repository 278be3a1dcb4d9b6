// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Kaapi Contributors

//! Provider factory
//!
//! Selects and constructs the active provider from configuration, so the
//! orchestrator never branches on provider names itself.

use std::sync::Arc;

use crate::config::Settings;
use crate::error::{KaapiError, Result};
use crate::llm::provider::ChatProvider;
use crate::llm::providers::{
    AnthropicProvider, GeminiProvider, OllamaProvider, OpenAiProvider, OpenRouterProvider,
};

/// Factory for chat providers
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create the provider named by `settings.provider`.
    ///
    /// The system prompt is baked into the adapter at construction; the
    /// orchestrator only ever hands over history.
    pub fn create(settings: &Settings, system_prompt: &str) -> Result<Arc<dyn ChatProvider>> {
        settings.validate()?;
        let model = settings.model.clone();

        let provider: Arc<dyn ChatProvider> = match settings.provider.as_str() {
            "gemini" => Arc::new(GeminiProvider::new(
                settings.gemini_api_key.clone().unwrap_or_default(),
                model,
                system_prompt,
            )),
            "openai" => Arc::new(OpenAiProvider::new(
                settings.openai_api_key.clone().unwrap_or_default(),
                model,
                system_prompt,
            )),
            "anthropic" => Arc::new(AnthropicProvider::new(
                settings.anthropic_api_key.clone().unwrap_or_default(),
                model,
                system_prompt,
            )),
            "openrouter" => Arc::new(OpenRouterProvider::new(
                settings.openrouter_api_key.clone().unwrap_or_default(),
                model,
                system_prompt,
            )),
            "ollama" => Arc::new(OllamaProvider::with_base_url(
                settings.ollama_base_url.clone(),
                model,
                system_prompt,
            )),
            other => {
                return Err(KaapiError::Config(format!("unknown provider '{}'", other)));
            }
        };

        Ok(provider)
    }

    /// List all supported provider names
    pub fn supported_providers() -> &'static [&'static str] {
        &["gemini", "openai", "anthropic", "openrouter", "ollama"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_for(provider: &str) -> Settings {
        Settings {
            provider: provider.to_string(),
            gemini_api_key: Some("k".to_string()),
            openai_api_key: Some("k".to_string()),
            anthropic_api_key: Some("k".to_string()),
            openrouter_api_key: Some("k".to_string()),
            ..Settings::default()
        }
    }

    #[test]
    fn test_create_each_supported_provider() {
        for name in ProviderFactory::supported_providers() {
            let provider = ProviderFactory::create(&settings_for(name), "prompt").unwrap();
            assert_eq!(provider.name(), *name);
        }
    }

    #[test]
    fn test_create_unknown_provider_fails() {
        let settings = settings_for("mystery");
        assert!(ProviderFactory::create(&settings, "prompt").is_err());
    }

    #[test]
    fn test_create_without_key_fails() {
        let settings = Settings {
            provider: "anthropic".to_string(),
            ..Settings::default()
        };
        let err = match ProviderFactory::create(&settings, "prompt") {
            Err(e) => e,
            Ok(_) => panic!("expected create to return an error"),
        };
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let settings = Settings {
            provider: "ollama".to_string(),
            ..Settings::default()
        };
        assert!(ProviderFactory::create(&settings, "prompt").is_ok());
    }
}
