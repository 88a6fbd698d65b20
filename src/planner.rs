//! Chunk planning.
//!
//! Splits the transcript into contiguous chunks whose prompts fit the token
//! budget. A prompt is the fixed template text, the context carried from the
//! previous chunk and the chunk's own exchanges, and all three count. Scene
//! boundaries are preferred split points once a chunk is reasonably full;
//! otherwise chunks are cut on size. Carried context is trimmed, oldest
//! first, when it would leave no room for the chunk's first exchange.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

use crate::carrier;
use crate::error::PlanError;
use crate::prompt::format_exchange;
use crate::tokens::ModelFamily;
use crate::transcript::Exchange;

/// Fraction of the budget a chunk must reach before a scene boundary closes it.
pub const DEFAULT_SCENE_FILL_RATIO: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    /// Exchanges this chunk narrates.
    pub owned: Range<usize>,
    /// Read-only tail of the previous chunk, sent as background.
    pub carried: Range<usize>,
    pub owned_tokens: usize,
    pub carried_tokens: usize,
    /// Whole prompt: template text, carried context and owned exchanges.
    pub estimated_tokens: usize,
    /// A single exchange too large for the budget.
    pub oversized: bool,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.owned.len()
    }

    pub fn exchanges<'a>(&self, all: &'a [Exchange]) -> &'a [Exchange] {
        &all[self.owned.clone()]
    }

    pub fn carried_exchanges<'a>(&self, all: &'a [Exchange]) -> &'a [Exchange] {
        &all[self.carried.clone()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OversizedExchangeWarning {
    pub exchange_index: usize,
    pub estimated_tokens: usize,
    pub budget: usize,
}

impl fmt::Display for OversizedExchangeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exchange {} is ~{} tokens and does not fit the {}-token chunk budget with its prompt; it was given its own chunk",
            self.exchange_index, self.estimated_tokens, self.budget
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<OversizedExchangeWarning>,
}

impl ChunkPlan {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Prompt tokens spent outside the exchanges themselves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromptOverhead {
    /// System prompt and template text around an empty exchange list.
    pub base: usize,
    /// Extra template text that only appears when context is carried.
    pub context: usize,
}

#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub max_tokens_per_chunk: usize,
    pub context_exchanges: usize,
    pub scene_fill_ratio: f64,
    pub family: ModelFamily,
    pub overhead: PromptOverhead,
}

/// The chunk being filled.
struct OpenChunk {
    start: usize,
    carried: Range<usize>,
    carried_tokens: usize,
    overhead: usize,
    owned_tokens: usize,
}

impl OpenChunk {
    /// Opens a chunk at `start`, carrying as much of `previous` as fits
    /// beside the first exchange.
    fn open(start: usize, previous: Option<&Chunk>, costs: &[usize], options: &PlanOptions) -> Self {
        let budget = options.max_tokens_per_chunk;
        let PromptOverhead { base, context } = options.overhead;
        let window = match previous {
            Some(prev) => carrier::carry(prev, options.context_exchanges),
            None => start..start,
        };
        let first = costs[start];
        let carried = if base + first > budget {
            // Oversized either way; keep the full context for continuity.
            window
        } else {
            let room = budget.saturating_sub(base + context + first);
            let trimmed = carrier::trim_to_fit(window.clone(), costs, room);
            if trimmed.len() < window.len() {
                tracing::debug!(
                    chunk_start = start,
                    carried = trimmed.len(),
                    wanted = window.len(),
                    "trimmed carried context to fit the budget"
                );
            }
            trimmed
        };
        let carried_tokens = costs[carried.clone()].iter().sum();
        let overhead = if carried.is_empty() { base } else { base + context };
        Self {
            start,
            carried,
            carried_tokens,
            overhead,
            owned_tokens: 0,
        }
    }

    fn total(&self) -> usize {
        self.overhead + self.carried_tokens + self.owned_tokens
    }

    fn close(self, end: usize, index: usize, oversized: bool) -> Chunk {
        let estimated_tokens = self.total();
        Chunk {
            index,
            owned: self.start..end,
            carried: self.carried,
            owned_tokens: self.owned_tokens,
            carried_tokens: self.carried_tokens,
            estimated_tokens,
            oversized,
        }
    }
}

/// Partitions `exchanges` into ordered chunks. `boundaries` holds indices
/// after which a scene change was detected.
pub fn plan(
    exchanges: &[Exchange],
    boundaries: &BTreeSet<usize>,
    options: &PlanOptions,
) -> Result<ChunkPlan, PlanError> {
    let budget = options.max_tokens_per_chunk;
    if budget == 0 {
        return Err(PlanError::ZeroBudget);
    }
    if options.overhead.base >= budget {
        return Err(PlanError::BudgetBelowOverhead {
            budget,
            overhead: options.overhead.base,
        });
    }
    let fill = (budget as f64 * options.scene_fill_ratio.clamp(0.0, 1.0)).ceil() as usize;
    let costs: Vec<usize> = exchanges
        .iter()
        .map(|e| options.family.estimate(&format_exchange(e)))
        .collect();

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut warnings = Vec::new();
    let mut current: Option<OpenChunk> = None;
    for (i, &cost) in costs.iter().enumerate() {
        let mut open = match current.take() {
            Some(open) if open.total() + cost <= budget => open,
            Some(full) => {
                let index = chunks.len();
                chunks.push(full.close(i, index, false));
                OpenChunk::open(i, chunks.last(), &costs, options)
            }
            None => OpenChunk::open(i, chunks.last(), &costs, options),
        };
        open.owned_tokens += cost;
        if open.start == i && open.total() > budget {
            let chunk = open.close(i + 1, chunks.len(), true);
            tracing::warn!(
                exchange = i,
                tokens = cost,
                prompt = chunk.estimated_tokens,
                budget,
                "exchange exceeds chunk budget"
            );
            warnings.push(OversizedExchangeWarning {
                exchange_index: i,
                estimated_tokens: cost,
                budget,
            });
            chunks.push(chunk);
            continue;
        }
        let is_last = i + 1 == exchanges.len();
        if !is_last && open.total() >= fill && boundaries.contains(&i) {
            tracing::debug!(after = i, tokens = open.total(), "closing chunk at scene boundary");
            let index = chunks.len();
            chunks.push(open.close(i + 1, index, false));
            continue;
        }
        current = Some(open);
    }
    if let Some(open) = current {
        let index = chunks.len();
        chunks.push(open.close(exchanges.len(), index, false));
    }
    tracing::debug!(chunks = chunks.len(), exchanges = exchanges.len(), budget, "planned chunks");
    Ok(ChunkPlan { chunks, warnings })
}
