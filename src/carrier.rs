use std::ops::Range;

use crate::planner::Chunk;

pub const DEFAULT_CONTEXT_EXCHANGES: usize = 2;

/// Last `context_exchanges` owned exchanges of `previous`, as indices into
/// the transcript. Never reaches past the start of `previous`.
pub fn carry(previous: &Chunk, context_exchanges: usize) -> Range<usize> {
    let take = context_exchanges.min(previous.len());
    previous.owned.end - take..previous.owned.end
}

/// Drops the oldest carried exchanges until the rest cost at most `room`
/// tokens. `costs` is indexed like the transcript.
pub fn trim_to_fit(carried: Range<usize>, costs: &[usize], room: usize) -> Range<usize> {
    let mut start = carried.start;
    let mut total: usize = costs[carried.clone()].iter().sum();
    while total > room && start < carried.end {
        total -= costs[start];
        start += 1;
    }
    start..carried.end
}
