use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::catalog::{ModelSpec, ProviderKind};
use crate::config::Config;
use crate::error::ConfigError;

use super::{
    LlmProvider, anthropic::AnthropicProvider, gemini::GeminiProvider, novelai::NovelAiProvider,
    openai::OpenAiProvider,
};

/// Builds the adapter for a resolved model. The only place that branches on
/// provider kind; everything downstream sees `dyn LlmProvider`.
pub fn build_provider(cfg: &Config, spec: &ModelSpec) -> Result<Arc<dyn LlmProvider>, ConfigError> {
    let kind = spec.provider;
    let endpoint = cfg.endpoint(kind).cloned().unwrap_or_default();
    let api_key = endpoint
        .effective_api_key(kind.api_key_env())
        .ok_or(ConfigError::MissingApiKey {
            provider: kind.as_str(),
            env: kind.api_key_env(),
        })?;
    let base = |default: &str| {
        endpoint
            .base_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| default.into())
    };
    let client = Client::builder()
        .timeout(Duration::from_secs(cfg.llm.timeout_secs))
        .build()
        .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;
    let spec = spec.clone();

    let provider: Arc<dyn LlmProvider> = match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(
            client,
            base(super::openai::DEFAULT_BASE_URL),
            api_key,
            spec,
        )),
        ProviderKind::Anthropic => {
            let version = endpoint
                .version
                .clone()
                .unwrap_or_else(|| super::anthropic::DEFAULT_VERSION.into());
            Arc::new(AnthropicProvider::new(
                client,
                base(super::anthropic::DEFAULT_BASE_URL),
                api_key,
                version,
                spec,
            ))
        }
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(
            client,
            base(super::gemini::DEFAULT_BASE_URL),
            api_key,
            spec,
        )),
        ProviderKind::NovelAi => Arc::new(NovelAiProvider::new(
            client,
            base(super::novelai::DEFAULT_BASE_URL),
            api_key,
            spec,
        )),
    };
    tracing::debug!(provider = provider.name(), model = %provider.model().api_model, "provider ready");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Direction, ModelCatalog};
    use crate::config::EndpointConfig;

    fn with_key(kind: ProviderKind) -> Config {
        let endpoint = Some(EndpointConfig {
            api_key: Some("k".into()),
            ..EndpointConfig::default()
        });
        let mut cfg = Config::default();
        match kind {
            ProviderKind::OpenAi => cfg.openai = endpoint,
            ProviderKind::Anthropic => cfg.anthropic = endpoint,
            ProviderKind::Gemini => cfg.gemini = endpoint,
            ProviderKind::NovelAi => cfg.novelai = endpoint,
        }
        cfg
    }

    #[test]
    fn builds_each_provider_kind() {
        let catalog = ModelCatalog::builtin();
        for (model, name) in [
            ("gpt-4o", "openai"),
            ("claude-3-opus-latest", "anthropic"),
            ("gemini-1.5-pro", "gemini"),
            ("clio", "novelai"),
        ] {
            let spec = catalog.get(model).unwrap();
            let provider = build_provider(&with_key(spec.provider), spec).unwrap();
            assert_eq!(provider.name(), name);
            assert_eq!(provider.model().key, model);
        }
    }

    #[test]
    fn cost_per_token_comes_from_catalog() {
        let catalog = ModelCatalog::builtin();
        let spec = catalog.get("gpt-4o").unwrap();
        let provider = build_provider(&with_key(ProviderKind::OpenAi), spec).unwrap();
        let input = provider.cost_per_token(Direction::Input, 1_000).unwrap();
        assert!((input - 2.5e-6).abs() < 1e-15);

        let spec = catalog.get("gemini-1.5-pro").unwrap();
        let provider = build_provider(&with_key(ProviderKind::Gemini), spec).unwrap();
        let standard = provider.cost_per_token(Direction::Input, 100_000).unwrap();
        let extended = provider.cost_per_token(Direction::Input, 200_000).unwrap();
        assert!((standard - 1.25e-6).abs() < 1e-15);
        assert!((extended - 2.5e-6).abs() < 1e-15);

        let spec = catalog.get("erato").unwrap();
        let provider = build_provider(&with_key(ProviderKind::NovelAi), spec).unwrap();
        assert_eq!(provider.cost_per_token(Direction::Output, 0), None);
        assert_eq!(provider.estimate_tokens("abcdefgh"), 2);
    }
}
