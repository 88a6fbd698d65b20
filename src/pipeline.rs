//! Everything that happens before the first network call: scene detection,
//! chunk planning and prompt rendering.

use std::collections::BTreeSet;

use anyhow::Result;

use crate::catalog::ModelSpec;
use crate::config::{Config, ProcessingConfig};
use crate::error::ConfigError;
use crate::ledger::TokenEstimate;
use crate::planner::{self, ChunkPlan, PlanOptions};
use crate::prompt::{Prompt, PromptBuilder};
use crate::scene::{self, SceneOptions};
use crate::transcript::Exchange;

pub const DEFAULT_CHUNK_TOKENS: usize = 12_000;

/// Share of the model window the prompt may use; the rest is headroom for
/// estimate error.
const WINDOW_SHARE: f64 = 0.8;

/// Prompt budget per chunk: the configured value, or what the model window
/// leaves after reserving room for the response.
pub fn chunk_budget(processing: &ProcessingConfig, spec: &ModelSpec) -> usize {
    if let Some(n) = processing.max_chunk_tokens {
        return n;
    }
    let usable = (spec.max_input_tokens as f64 * WINDOW_SHARE) as usize;
    DEFAULT_CHUNK_TOKENS.min(usable.saturating_sub(spec.max_output_tokens))
}

/// [`chunk_budget`], rejected when a full chunk plus its response would not
/// fit the model window.
pub fn checked_budget(processing: &ProcessingConfig, spec: &ModelSpec) -> Result<usize, ConfigError> {
    let budget = chunk_budget(processing, spec);
    if budget + spec.max_output_tokens > spec.max_input_tokens {
        return Err(ConfigError::ChunkBudgetExceedsWindow {
            model: spec.key.clone(),
            budget,
            output: spec.max_output_tokens,
            window: spec.max_input_tokens,
        });
    }
    Ok(budget)
}

#[derive(Debug)]
pub struct Prepared {
    pub boundaries: BTreeSet<usize>,
    pub budget: usize,
    pub plan: ChunkPlan,
    pub prompts: Vec<Prompt>,
}

impl Prepared {
    /// Input estimates per chunk; output stays zero until generation.
    pub fn estimates(&self, spec: &ModelSpec) -> Vec<TokenEstimate> {
        self.prompts
            .iter()
            .map(|p| TokenEstimate {
                input_tokens: spec.family.estimate(&p.full_text()),
                output_tokens: 0,
            })
            .collect()
    }

    /// Input cost of the whole run, `None` for subscription models.
    pub fn estimated_input_cost(&self, spec: &ModelSpec) -> Option<f64> {
        self.estimates(spec)
            .iter()
            .map(|e| spec.pricing.cost(e.input_tokens, 0))
            .sum()
    }
}

pub fn prepare(cfg: &Config, spec: &ModelSpec, exchanges: &[Exchange]) -> Result<Prepared> {
    let processing = &cfg.processing;
    let budget = checked_budget(processing, spec)?;
    let builder = PromptBuilder::from_template_file(processing.style, processing.prompt_template.as_deref())?;
    let overhead = builder.overhead(spec.family)?;

    let scene_options = SceneOptions {
        enabled: processing.split_on_scene_changes,
        max_exchanges_per_scene: Some(processing.max_exchanges_per_scene),
        ..SceneOptions::default()
    };
    let boundaries = scene::detect_boundaries(exchanges, &scene_options);
    let options = PlanOptions {
        max_tokens_per_chunk: budget,
        context_exchanges: processing.context_exchanges,
        scene_fill_ratio: processing.scene_fill_ratio,
        family: spec.family,
        overhead,
    };
    let plan = planner::plan(exchanges, &boundaries, &options)?;

    let count = plan.chunks.len();
    let prompts = plan
        .chunks
        .iter()
        .map(|chunk| builder.build(chunk, exchanges, count))
        .collect::<Result<Vec<_>>>()?;
    tracing::info!(
        exchanges = exchanges.len(),
        boundaries = boundaries.len(),
        chunks = count,
        budget,
        template_tokens = overhead.base,
        "transcript planned"
    );
    Ok(Prepared {
        boundaries,
        budget,
        plan,
        prompts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelCatalog;

    fn spec(key: &str) -> ModelSpec {
        ModelCatalog::builtin().get(key).cloned().unwrap()
    }

    fn transcript(n: usize) -> Vec<Exchange> {
        (0..n)
            .map(|i| Exchange::new(format!("I take step {i}."), format!("the hall stretches on ({i}).")))
            .collect()
    }

    #[test]
    fn configured_budget_wins() {
        let processing = ProcessingConfig {
            max_chunk_tokens: Some(500),
            ..ProcessingConfig::default()
        };
        assert_eq!(chunk_budget(&processing, &spec("gpt-4o")), 500);
    }

    #[test]
    fn budget_derives_from_model_window() {
        let processing = ProcessingConfig::default();
        assert_eq!(chunk_budget(&processing, &spec("gpt-4o")), DEFAULT_CHUNK_TOKENS);
        assert_eq!(chunk_budget(&processing, &spec("erato")), 9_011);
        assert_eq!(chunk_budget(&processing, &spec("kayra")), 2_457);
    }

    fn template_tokens(spec: &ModelSpec) -> usize {
        let overhead = PromptBuilder::new(Default::default(), None)
            .unwrap()
            .overhead(spec.family)
            .unwrap();
        overhead.base + overhead.context
    }

    #[test]
    fn configured_budget_must_fit_the_model_window() {
        let kayra = spec("kayra");
        let mut processing = ProcessingConfig {
            max_chunk_tokens: Some(100_000),
            ..ProcessingConfig::default()
        };
        let err = checked_budget(&processing, &kayra).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ChunkBudgetExceedsWindow { budget: 100_000, window: 8_192, .. }
        ));

        processing.max_chunk_tokens = Some(4_096);
        assert_eq!(checked_budget(&processing, &kayra).unwrap(), 4_096);
        processing.max_chunk_tokens = Some(4_097);
        assert!(checked_budget(&processing, &kayra).is_err());

        let mut cfg = Config::default();
        cfg.processing.max_chunk_tokens = Some(100_000);
        assert!(prepare(&cfg, &kayra, &transcript(3)).is_err());
    }

    #[test]
    fn derived_budgets_always_fit_the_window() {
        for spec in ModelCatalog::builtin().iter() {
            assert!(checked_budget(&ProcessingConfig::default(), spec).is_ok(), "{}", spec.key);
        }
    }

    #[test]
    fn prompts_stay_within_budget_with_carried_context() {
        let kayra = spec("kayra");
        let mut cfg = Config::default();
        cfg.processing.max_chunk_tokens = Some(1_500);
        cfg.processing.context_exchanges = 16;
        let exchanges = transcript(400);
        let prepared = prepare(&cfg, &kayra, &exchanges).unwrap();

        assert!(prepared.plan.warnings.is_empty());
        assert!(prepared.plan.chunks.len() > 1);
        assert!(prepared.plan.chunks.iter().skip(1).any(|c| !c.carried.is_empty()));
        let estimates = prepared.estimates(&kayra);
        for (chunk, estimate) in prepared.plan.chunks.iter().zip(&estimates) {
            assert!(!chunk.oversized);
            assert!(chunk.carried.len() <= 16);
            assert!(
                estimate.input_tokens <= prepared.budget,
                "chunk {} prompt is ~{} tokens, budget {}",
                chunk.index,
                estimate.input_tokens,
                prepared.budget
            );
            assert!(estimate.input_tokens <= chunk.estimated_tokens);
        }
    }

    #[test]
    fn budget_smaller_than_the_template_is_rejected() {
        let mut cfg = Config::default();
        cfg.processing.max_chunk_tokens = Some(300);
        let err = prepare(&cfg, &spec("kayra"), &transcript(10)).unwrap_err();
        assert!(err.to_string().contains("leaves no room for exchanges"), "{err}");
    }

    #[test]
    fn one_prompt_per_chunk_with_context_after_the_first() {
        let haiku = spec("claude-3-haiku-latest");
        let mut cfg = Config::default();
        cfg.processing.max_chunk_tokens = Some(template_tokens(&haiku) + 100);
        let exchanges = transcript(12);
        let prepared = prepare(&cfg, &haiku, &exchanges).unwrap();

        assert!(prepared.plan.chunks.len() > 1);
        assert_eq!(prepared.prompts.len(), prepared.plan.chunks.len());
        assert!(!prepared.prompts[0].user.contains("Previous context"));
        for prompt in &prepared.prompts[1..] {
            assert!(prompt.user.contains("Previous context"));
        }
        let last = prepared.prompts.last().unwrap();
        assert!(last.user.contains("Conclude the story appropriately"));
    }

    #[test]
    fn scene_split_can_be_disabled() {
        let mut exchanges = transcript(6);
        exchanges[3] = Exchange::new("I wake.", "The next day the hall is gone.");
        let mut cfg = Config::default();
        cfg.processing.split_on_scene_changes = false;
        let prepared = prepare(&cfg, &spec("gpt-4o-mini"), &exchanges).unwrap();
        assert!(prepared.boundaries.is_empty());
        assert_eq!(prepared.plan.chunks.len(), 1);

        cfg.processing.split_on_scene_changes = true;
        let prepared = prepare(&cfg, &spec("gpt-4o-mini"), &exchanges).unwrap();
        assert_eq!(prepared.boundaries, BTreeSet::from([2]));
    }

    #[test]
    fn empty_transcript_prepares_nothing() {
        let prepared = prepare(&Config::default(), &spec("gpt-4o"), &[]).unwrap();
        assert!(prepared.plan.is_empty());
        assert!(prepared.prompts.is_empty());
        assert_eq!(prepared.estimated_input_cost(&spec("gpt-4o")), Some(0.0));
    }

    #[test]
    fn subscription_models_have_no_estimated_cost() {
        let exchanges = transcript(3);
        let kayra = spec("kayra");
        let prepared = prepare(&Config::default(), &kayra, &exchanges).unwrap();
        assert_eq!(prepared.estimated_input_cost(&kayra), None);
        assert!(prepared.estimates(&kayra)[0].input_tokens > 0);
    }
}
