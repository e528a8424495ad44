use crate::config::Config;
use crate::providers::{OllamaProvider, OpenAIProvider};
use crate::traits::Provider;
use anyhow::{Result, anyhow};
use std::sync::Arc;

const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

pub fn create_provider(config: &Config) -> Result<Arc<dyn Provider>> {
    let provider_name = config.provider.as_deref().unwrap_or("openai");

    match provider_name.to_lowercase().as_str() {
        "ollama" => {
            let mut provider = OllamaProvider::new()
                .with_model(config.model.clone())
                .with_temperature(config.temperature);
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            Ok(Arc::new(provider))
        }
        "openai" | "openai-compatible" | "deepseek" => {
            let api_key = resolve_api_key_with_fallback(
                &["MCPILOT_API_KEY", "OPENAI_API_KEY"],
                &config.api_key,
            )?;
            let mut provider = OpenAIProvider::new(api_key)
                .with_model(config.model.clone())
                .with_temperature(config.temperature);
            let base_url = match (&config.base_url, provider_name.eq_ignore_ascii_case("deepseek")) {
                (Some(base_url), _) => Some(base_url.as_str()),
                (None, true) => Some(DEEPSEEK_BASE_URL),
                (None, false) => None,
            };
            if let Some(base_url) = base_url {
                provider = provider.with_base_url(base_url);
            }
            Ok(Arc::new(provider))
        }
        _ => Err(anyhow!(
            "Unknown provider: {}. Available: openai, openai-compatible, deepseek, ollama",
            provider_name
        )),
    }
}

fn resolve_api_key_with_fallback(env_vars: &[&str], config_key: &str) -> Result<String> {
    for var_name in env_vars {
        if let Ok(key) = std::env::var(var_name)
            && !key.trim().is_empty()
        {
            return Ok(key);
        }
    }
    if !config_key.is_empty() {
        Ok(config_key.to_string())
    } else {
        Err(anyhow!(
            "No API key found. Set MCPILOT_API_KEY or add api_key to the config file."
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_rejected() {
        let config = Config {
            provider: Some("carrier-pigeon".to_string()),
            ..Config::default()
        };
        let err = create_provider(&config).err().unwrap();
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn ollama_needs_no_key() {
        let config = Config {
            provider: Some("Ollama".to_string()),
            ..Config::default()
        };
        assert!(create_provider(&config).is_ok());
    }

    #[test]
    fn configured_key_is_used() {
        let config = Config {
            api_key: "sk-test".to_string(),
            ..Config::default()
        };
        assert!(create_provider(&config).is_ok());
    }
}
