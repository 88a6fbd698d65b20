//! Sends chunk prompts to the provider and collects the results in chunk
//! order.
//!
//! Up to `concurrency` chunks are in flight at once. Each finished chunk is
//! written into its own slot, so completion order never affects output order.
//! Retryable failures back off exponentially; a chunk that exhausts its
//! attempts is marked failed and the rest of the run carries on. Cancelling
//! the token drops in-flight requests, and nothing is recorded for them.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use tokio_util::sync::CancellationToken;

use crate::cache::ChunkCache;
use crate::catalog::Direction;
use crate::ledger::{TokenEstimate, UsageLedger, UsageRecord};
use crate::prompt::Prompt;
use crate::providers::{Generation, GenerationRequest, LlmProvider, ProviderError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (0-based): doubles each time, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub temperature: f32,
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            concurrency: 1,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome {
    Generated { text: String, usage: TokenEstimate },
    /// Reused from the chunk cache; no request was made.
    Cached { text: String },
    Failed { error: String, attempts: u32 },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NarrativeBlock {
    pub chunk_index: usize,
    pub outcome: BlockOutcome,
}

impl NarrativeBlock {
    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            BlockOutcome::Generated { text, .. } | BlockOutcome::Cached { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NarrativeResult {
    pub blocks: Vec<NarrativeBlock>,
}

impl NarrativeResult {
    /// Blocks joined in chunk order. Failed chunks become a visible
    /// placeholder so gaps in the story are obvious.
    pub fn render(&self) -> String {
        let total = self.blocks.len();
        let mut parts: Vec<String> = Vec::with_capacity(total);
        for block in &self.blocks {
            match &block.outcome {
                BlockOutcome::Generated { text, .. } | BlockOutcome::Cached { text } => {
                    parts.push(text.trim().to_string());
                }
                BlockOutcome::Failed { error, .. } => parts.push(format!(
                    "[chunk {} of {} could not be generated: {}]",
                    block.chunk_index + 1,
                    total,
                    error
                )),
                BlockOutcome::Cancelled => {}
            }
        }
        parts.join("\n\n")
    }

    pub fn failed(&self) -> Vec<&NarrativeBlock> {
        self.blocks
            .iter()
            .filter(|b| matches!(b.outcome, BlockOutcome::Failed { .. }))
            .collect()
    }

    pub fn cached_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| matches!(b.outcome, BlockOutcome::Cached { .. }))
            .count()
    }

    pub fn was_cancelled(&self) -> bool {
        self.blocks.iter().any(|b| b.outcome == BlockOutcome::Cancelled)
    }

    pub fn is_complete(&self) -> bool {
        self.blocks.iter().all(|b| b.text().is_some())
    }
}

pub struct Dispatcher {
    provider: Arc<dyn LlmProvider>,
    ledger: Arc<UsageLedger>,
    cache: Option<ChunkCache>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(provider: Arc<dyn LlmProvider>, ledger: Arc<UsageLedger>, settings: DispatchSettings) -> Self {
        Self {
            provider,
            ledger,
            cache: None,
            settings,
        }
    }

    pub fn with_cache(mut self, cache: ChunkCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn run(&self, prompts: Vec<Prompt>, cancel: &CancellationToken) -> NarrativeResult {
        let total = prompts.len();
        let mut slots: Vec<Option<BlockOutcome>> = (0..total).map(|_| None).collect();
        let concurrency = self.settings.concurrency.max(1);
        tracing::info!(chunks = total, concurrency, provider = self.provider.name(), "dispatching");

        let mut outcomes = stream::iter(prompts.into_iter().enumerate())
            .map(|(index, prompt)| async move {
                let outcome = self.dispatch(index, total, &prompt, cancel).await;
                (index, outcome)
            })
            .buffer_unordered(concurrency);
        while let Some((index, outcome)) = outcomes.next().await {
            slots[index] = Some(outcome);
        }

        let blocks = slots
            .into_iter()
            .enumerate()
            .map(|(chunk_index, outcome)| NarrativeBlock {
                chunk_index,
                outcome: outcome.unwrap_or(BlockOutcome::Cancelled),
            })
            .collect();
        NarrativeResult { blocks }
    }

    fn cache_key(&self, prompt: &Prompt) -> String {
        let model = self.provider.model();
        ChunkCache::key(&[
            self.provider.name(),
            &model.api_model,
            &self.settings.temperature.to_string(),
            &prompt.system,
            &prompt.user,
        ])
    }

    async fn dispatch(&self, index: usize, total: usize, prompt: &Prompt, cancel: &CancellationToken) -> BlockOutcome {
        if cancel.is_cancelled() {
            return BlockOutcome::Cancelled;
        }
        let key = self.cache.as_ref().map(|_| self.cache_key(prompt));
        if let (Some(cache), Some(key)) = (&self.cache, &key)
            && let Some(text) = cache.get(key)
        {
            tracing::info!(chunk = index + 1, total, "reusing cached chunk");
            return BlockOutcome::Cached { text };
        }

        let request = GenerationRequest {
            system: prompt.system.clone(),
            prompt: prompt.user.clone(),
            temperature: self.settings.temperature,
            max_tokens: u32::try_from(self.provider.model().max_output_tokens).unwrap_or(u32::MAX),
        };
        let retry = &self.settings.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return BlockOutcome::Cancelled,
                r = self.provider.generate(&request) => r,
            };
            match result {
                Ok(generation) => {
                    let usage = self.record(index, prompt, &generation);
                    tracing::info!(chunk = index + 1, total, attempt, "chunk narrated");
                    if let (Some(cache), Some(key)) = (&self.cache, &key)
                        && let Err(e) = cache.put(key, &generation.text)
                    {
                        tracing::warn!(chunk = index + 1, error = %e, "could not cache chunk");
                    }
                    return BlockOutcome::Generated {
                        text: generation.text,
                        usage,
                    };
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = e.retry_after().unwrap_or_else(|| retry.delay_for(attempt - 1));
                    tracing::warn!(
                        chunk = index + 1,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "provider call failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return BlockOutcome::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return self.fail(index, total, attempt, e),
            }
        }
    }

    fn fail(&self, index: usize, total: usize, attempts: u32, error: ProviderError) -> BlockOutcome {
        tracing::error!(chunk = index + 1, total, attempts, error = %error, "chunk failed");
        BlockOutcome::Failed {
            error: error.to_string(),
            attempts,
        }
    }

    /// Uses the provider's token counts when reported, estimates otherwise,
    /// and appends exactly one ledger record.
    fn record(&self, index: usize, prompt: &Prompt, generation: &Generation) -> TokenEstimate {
        let usage = match generation.usage {
            Some(u) => TokenEstimate {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            },
            None => TokenEstimate {
                input_tokens: self.provider.estimate_tokens(&prompt.full_text()),
                output_tokens: self.provider.estimate_tokens(&generation.text),
            },
        };
        let model = self.provider.model();
        let cost = self.price(usage);
        let totals = self.ledger.record(UsageRecord {
            chunk_index: index,
            provider: model.provider,
            model: model.key.clone(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cost,
        });
        tracing::debug!(
            chunk = index + 1,
            input = usage.input_tokens,
            output = usage.output_tokens,
            run_tokens = totals.total_tokens(),
            run_cost = totals.cost,
            "usage recorded"
        );
        usage
    }

    fn price(&self, usage: TokenEstimate) -> Option<f64> {
        let prompt = usage.input_tokens;
        let input = self.provider.cost_per_token(Direction::Input, prompt)?;
        let output = self.provider.cost_per_token(Direction::Output, prompt)?;
        Some(usage.input_tokens as f64 * input + usage.output_tokens as f64 * output)
    }
}
