use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::PriceOverride;
use crate::error::ConfigError;
use crate::tokens::ModelFamily;

/// When the list prices below were last checked against the providers'
/// pricing pages. Any entry can be overridden from `[pricing]` in config.
pub const PRICING_VERSION: &str = "2025-01";

/// Gemini bills long prompts at a higher rate above this many input tokens.
const GEMINI_TIER_THRESHOLD: usize = 128_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
    NovelAi,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::NovelAi => "novelai",
        }
    }

    pub fn api_key_env(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::NovelAi => "NOVELAI_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "gemini" | "google" => Ok(Self::Gemini),
            "novelai" => Ok(Self::NovelAi),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rates {
    pub input: f64,
    pub output: f64,
}

impl Rates {
    fn per_million(self, direction: Direction) -> f64 {
        match direction {
            Direction::Input => self.input,
            Direction::Output => self.output,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Pricing {
    PerMillion(Rates),
    /// `extended` applies once the prompt exceeds `threshold` tokens.
    Tiered {
        threshold: usize,
        standard: Rates,
        extended: Rates,
    },
    /// Flat fee; individual requests have no marginal cost.
    Subscription { plan: String },
}

impl Pricing {
    fn rates_for(&self, prompt_tokens: usize) -> Option<Rates> {
        match self {
            Self::PerMillion(r) => Some(*r),
            Self::Tiered {
                threshold,
                standard,
                extended,
            } => Some(if prompt_tokens <= *threshold {
                *standard
            } else {
                *extended
            }),
            Self::Subscription { .. } => None,
        }
    }

    /// USD per single token for a request whose prompt is `prompt_tokens`
    /// long. `None` for subscription plans.
    pub fn rate(&self, direction: Direction, prompt_tokens: usize) -> Option<f64> {
        self.rates_for(prompt_tokens)
            .map(|r| r.per_million(direction) / 1_000_000.0)
    }

    pub fn cost(&self, input_tokens: usize, output_tokens: usize) -> Option<f64> {
        let r = self.rates_for(input_tokens)?;
        Some(
            (input_tokens as f64 / 1_000_000.0) * r.input
                + (output_tokens as f64 / 1_000_000.0) * r.output,
        )
    }

    pub fn subscription_plan(&self) -> Option<&str> {
        match self {
            Self::Subscription { plan } => Some(plan),
            _ => None,
        }
    }
}

impl fmt::Display for Pricing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerMillion(r) => write!(f, "${:.2} in / ${:.2} out per 1M", r.input, r.output),
            Self::Tiered {
                threshold,
                standard,
                extended,
            } => write!(
                f,
                "${:.3} in / ${:.2} out per 1M (${:.2} / ${:.2} above {}k prompt)",
                standard.input,
                standard.output,
                extended.input,
                extended.output,
                threshold / 1000
            ),
            Self::Subscription { plan } => f.write_str(plan),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    /// Name users select the model by, e.g. `gpt-4o`.
    pub key: String,
    pub provider: ProviderKind,
    /// Identifier sent to the API.
    pub api_model: String,
    pub family: ModelFamily,
    pub max_input_tokens: usize,
    pub max_output_tokens: usize,
    pub pricing: Pricing,
}

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelSpec>,
}

/// `family` names the tokenizer heuristic, see [`ModelFamily::from_name`].
fn model(
    key: &str,
    provider: ProviderKind,
    api_model: &str,
    family: &str,
    max_input_tokens: usize,
    pricing: Pricing,
) -> ModelSpec {
    ModelSpec {
        key: key.into(),
        provider,
        api_model: api_model.into(),
        family: ModelFamily::from_name(family),
        max_input_tokens,
        max_output_tokens: 4096,
        pricing,
    }
}

fn flat(input: f64, output: f64) -> Pricing {
    Pricing::PerMillion(Rates { input, output })
}

fn tiered(standard: (f64, f64), extended: (f64, f64)) -> Pricing {
    Pricing::Tiered {
        threshold: GEMINI_TIER_THRESHOLD,
        standard: Rates {
            input: standard.0,
            output: standard.1,
        },
        extended: Rates {
            input: extended.0,
            output: extended.1,
        },
    }
}

fn novelai_plan() -> Pricing {
    Pricing::Subscription {
        plan: "$20/month unlimited".into(),
    }
}

impl ModelCatalog {
    pub fn builtin() -> Self {
        use ProviderKind::*;
        let models = vec![
            model("gpt-4o", OpenAi, "gpt-4o-2024-08-06", "openai", 128_000, flat(2.50, 10.00)),
            model("gpt-4o-mini", OpenAi, "gpt-4o-mini-2024-07-18", "openai", 128_000, flat(0.15, 0.60)),
            model("claude-3-opus-latest", Anthropic, "claude-3-opus-20240229", "anthropic", 200_000, flat(15.00, 75.00)),
            model("claude-3-sonnet-latest", Anthropic, "claude-3-sonnet-20240229", "anthropic", 200_000, flat(3.00, 15.00)),
            model("claude-3-haiku-latest", Anthropic, "claude-3-haiku-20240307", "anthropic", 200_000, flat(0.25, 1.25)),
            model("gemini-2.0-flash", Gemini, "gemini-2.0-flash", "gemini", 1_000_000, flat(0.10, 0.40)),
            model("gemini-1.5-flash", Gemini, "gemini-1.5-flash", "gemini", 1_000_000, tiered((0.075, 0.30), (0.15, 0.60))),
            model("gemini-1.5-pro", Gemini, "gemini-1.5-pro", "gemini", 2_000_000, tiered((1.25, 5.00), (2.50, 10.00))),
            model("erato", NovelAi, "llama-3-erato-v1", "erato", 16_384, novelai_plan()),
            model("kayra", NovelAi, "kayra-v1", "novelai", 8_192, novelai_plan()),
            model("clio", NovelAi, "clio-v1", "novelai", 8_192, novelai_plan()),
            model("krake", NovelAi, "krake-v2", "novelai", 8_192, novelai_plan()),
        ];
        Self { models }
    }

    /// Replaces built-in rates with per-model overrides from config.
    pub fn with_overrides(mut self, overrides: &HashMap<String, PriceOverride>) -> Result<Self, ConfigError> {
        for (key, o) in overrides {
            let spec = self
                .models
                .iter_mut()
                .find(|m| &m.key == key)
                .ok_or_else(|| ConfigError::UnknownPricingModel(key.clone()))?;
            spec.pricing = flat(o.input_usd_per_1m, o.output_usd_per_1m);
        }
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.iter()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.key.as_str()).collect()
    }

    /// Looks up `model`, checking it against `provider` when one is given.
    /// Without a provider, the model's own provider is used.
    pub fn resolve(&self, provider: Option<&str>, model: &str) -> Result<&ModelSpec, ConfigError> {
        let requested = provider.map(ProviderKind::from_str).transpose()?;
        let spec = self.get(model).ok_or_else(|| ConfigError::UnknownModel {
            model: model.to_string(),
            known: self.keys().join(", "),
        })?;
        if let Some(kind) = requested
            && kind != spec.provider
        {
            return Err(ConfigError::ProviderMismatch {
                model: model.to_string(),
                provider: kind.to_string(),
                expected: spec.provider.to_string(),
            });
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_model_without_provider() {
        let catalog = ModelCatalog::builtin();
        let spec = catalog.resolve(None, "erato").unwrap();
        assert_eq!(spec.provider, ProviderKind::NovelAi);
        assert_eq!(spec.family, ModelFamily::NovelAi { bytes_per_token: 4 });
    }

    #[test]
    fn every_builtin_model_has_a_known_family() {
        let catalog = ModelCatalog::builtin();
        for spec in catalog.iter() {
            assert_ne!(spec.family, ModelFamily::Generic, "{}", spec.key);
        }
        assert_eq!(catalog.get("gpt-4o").unwrap().family, ModelFamily::OpenAi);
        assert_eq!(catalog.get("kayra").unwrap().family, ModelFamily::NovelAi { bytes_per_token: 2 });
    }

    #[test]
    fn unknown_provider_fails_fast() {
        let err = ModelCatalog::builtin().resolve(Some("acme"), "gpt-4o").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider(p) if p == "acme"));
    }

    #[test]
    fn unknown_model_lists_known_ones() {
        let err = ModelCatalog::builtin().resolve(Some("openai"), "gpt-9").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("gpt-9"));
        assert!(msg.contains("gpt-4o-mini"));
    }

    #[test]
    fn provider_must_own_the_model() {
        let err = ModelCatalog::builtin().resolve(Some("anthropic"), "gpt-4o").unwrap_err();
        assert!(matches!(err, ConfigError::ProviderMismatch { .. }));
    }

    #[test]
    fn per_million_cost() {
        let spec = ModelCatalog::builtin().get("gpt-4o").cloned().unwrap();
        let cost = spec.pricing.cost(1_000_000, 500_000).unwrap();
        assert!((cost - 7.5).abs() < 1e-9);
        let rate = spec.pricing.rate(Direction::Output, 0).unwrap();
        assert!((rate - 0.00001).abs() < 1e-12);
    }

    #[test]
    fn tiered_pricing_switches_on_prompt_size() {
        let catalog = ModelCatalog::builtin();
        let pricing = &catalog.get("gemini-1.5-pro").unwrap().pricing;
        let small = pricing.cost(100_000, 0).unwrap();
        let large = pricing.cost(200_000, 0).unwrap();
        assert!((small - 0.125).abs() < 1e-9);
        assert!((large - 0.5).abs() < 1e-9);
    }

    #[test]
    fn subscription_has_no_marginal_cost() {
        let catalog = ModelCatalog::builtin();
        let pricing = &catalog.get("kayra").unwrap().pricing;
        assert_eq!(pricing.cost(10_000, 10_000), None);
        assert_eq!(pricing.rate(Direction::Input, 0), None);
        assert!(pricing.subscription_plan().is_some());
    }

    #[test]
    fn overrides_replace_rates() {
        let overrides = HashMap::from([(
            "gpt-4o-mini".to_string(),
            PriceOverride {
                input_usd_per_1m: 1.0,
                output_usd_per_1m: 2.0,
            },
        )]);
        let catalog = ModelCatalog::builtin().with_overrides(&overrides).unwrap();
        let cost = catalog.get("gpt-4o-mini").unwrap().pricing.cost(1_000_000, 1_000_000).unwrap();
        assert!((cost - 3.0).abs() < 1e-9);
    }

    #[test]
    fn override_for_unknown_model_is_an_error() {
        let overrides = HashMap::from([(
            "gpt-17".to_string(),
            PriceOverride {
                input_usd_per_1m: 1.0,
                output_usd_per_1m: 2.0,
            },
        )]);
        assert!(ModelCatalog::builtin().with_overrides(&overrides).is_err());
    }
}
