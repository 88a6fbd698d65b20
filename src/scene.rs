//! Scene-boundary detection.
//!
//! Cheap lexical heuristics that suggest where the story changes scene. The
//! result is advisory: the planner only splits on a boundary once the chunk
//! is full enough, and ignores boundaries that would break the budget.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::transcript::Exchange;

static TRANSITION: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(
        r"\b(?:later|the next (?:day|morning|evening|night)|the following|after\s+\w+|suddenly|meanwhile|elsewhere|(?:moments|minutes|hours?|days?|weeks?|months?|years?) passed|that (?:evening|morning|afternoon|night))\b",
    )
    .case_insensitive(true)
    .build()
    .expect("transition pattern compiles")
});

static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]{2,}\b").expect("name pattern compiles"));

// Capitalized words that are not names.
const NOT_NAMES: &[&str] = &[
    "The", "She", "Her", "Hers", "His", "Him", "They", "Them", "Their", "You", "Your", "And",
    "But", "With", "When", "Then", "This", "That", "There", "These", "Those", "What", "Where",
    "Who", "Why", "How", "Its", "Not", "For", "Yes", "Our", "Now", "Just", "Still", "After",
    "Before", "Into", "From", "Some", "Something", "Nothing", "Everything", "Once", "Maybe",
    "Well", "Okay", "Slowly", "Suddenly", "Meanwhile", "Later", "Finally", "Even", "All",
];

#[derive(Debug, Clone)]
pub struct SceneOptions {
    /// Master switch; when off no boundaries are reported.
    pub enabled: bool,
    /// Treat a complete change of named entities between consecutive
    /// responses as a scene change.
    pub entity_shift: bool,
    /// Force a boundary after this many exchanges without one. `None` or 0
    /// disables the fallback.
    pub max_exchanges_per_scene: Option<usize>,
}

impl Default for SceneOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            entity_shift: true,
            max_exchanges_per_scene: None,
        }
    }
}

/// Indices of exchanges after which a scene change is likely. The last
/// exchange is never reported.
pub fn detect_boundaries(exchanges: &[Exchange], options: &SceneOptions) -> BTreeSet<usize> {
    let mut boundaries = BTreeSet::new();
    if !options.enabled || exchanges.len() < 2 {
        return boundaries;
    }
    let known = if options.entity_shift { known_names(exchanges) } else { HashSet::new() };
    let max_run = options.max_exchanges_per_scene.filter(|&m| m > 0);
    let mut run = 0;
    for (i, pair) in exchanges.windows(2).enumerate() {
        let (current, next) = (&pair[0], &pair[1]);
        run += 1;
        let marker = has_transition_marker(next);
        let shift = options.entity_shift && entities_disjoint(&current.response, &next.response, &known);
        let forced = max_run.is_some_and(|m| run >= m);
        if marker || shift || forced {
            tracing::trace!(after = i, marker, shift, forced, "scene boundary");
            boundaries.insert(i);
            run = 0;
        }
    }
    boundaries
}

pub fn has_transition_marker(exchange: &Exchange) -> bool {
    TRANSITION.is_match(&exchange.prompt) || TRANSITION.is_match(&exchange.response)
}

/// Whether the word at byte offset `at` starts a sentence, line or quote,
/// where capitalisation says nothing about it being a name.
fn sentence_initial(text: &str, at: usize) -> bool {
    let before = &text[..at];
    let trimmed = before.trim_end();
    if before[trimmed.len()..].contains('\n') {
        return true;
    }
    trimmed
        .chars()
        .next_back()
        .is_none_or(|c| matches!(c, '.' | '!' | '?' | ':' | '"' | '\'' | '“' | '”' | '‘' | '’' | '(' | '*'))
}

/// Capitalised words that appear mid-sentence somewhere in the transcript.
/// Only these count as names, wherever they appear.
fn known_names(exchanges: &[Exchange]) -> HashSet<&str> {
    exchanges
        .iter()
        .flat_map(|e| [e.prompt.as_str(), e.response.as_str()])
        .flat_map(|text| {
            NAME.find_iter(text)
                .filter(move |m| !sentence_initial(text, m.start()))
                .map(|m| m.as_str())
        })
        .filter(|w| !NOT_NAMES.contains(w))
        .collect()
}

fn names<'a>(text: &'a str, known: &HashSet<&str>) -> HashSet<&'a str> {
    NAME.find_iter(text)
        .map(|m| m.as_str())
        .filter(|w| known.contains(w))
        .collect()
}

/// Both texts name at least two entities and share none of them.
fn entities_disjoint(a: &str, b: &str, known: &HashSet<&str>) -> bool {
    let (left, right) = (names(a, known), names(b, known));
    left.len() >= 2 && right.len() >= 2 && left.is_disjoint(&right)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(n: usize) -> Vec<Exchange> {
        (0..n)
            .map(|i| Exchange::new(format!("I keep walking ({i})."), "the road goes on."))
            .collect()
    }

    #[test]
    fn transition_marker_marks_the_previous_exchange() {
        let mut exchanges = plain(5);
        exchanges[3] = Exchange::new("I wake up.", "The next day, rain hammers the shutters.");
        let found = detect_boundaries(&exchanges, &SceneOptions::default());
        assert_eq!(found, BTreeSet::from([2]));
    }

    #[test]
    fn markers_match_case_insensitively_in_prompts_too() {
        let ex = Exchange::new("HOURS LATER I return.", "the door is open.");
        assert!(has_transition_marker(&ex));
        let ex = Exchange::new("I sit.", "After a long silence she speaks.");
        assert!(has_transition_marker(&ex));
        let ex = Exchange::new("I wait.", "She arrives late, laughing.");
        assert!(!has_transition_marker(&ex));
    }

    #[test]
    fn no_signals_no_boundaries() {
        assert!(detect_boundaries(&plain(8), &SceneOptions::default()).is_empty());
    }

    #[test]
    fn disabled_detection_reports_nothing() {
        let mut exchanges = plain(4);
        exchanges[2] = Exchange::new("Meanwhile", "elsewhere");
        let options = SceneOptions {
            enabled: false,
            ..SceneOptions::default()
        };
        assert!(detect_boundaries(&exchanges, &options).is_empty());
    }

    #[test]
    fn entity_shift_is_a_boundary() {
        let exchanges = vec![
            Exchange::new("I sit down.", "Alice and Bob share a drink at the Tavern."),
            Exchange::new("I listen.", "Bob laughs while Alice pours."),
            Exchange::new("I look around.", "Marcus waits by the Citadel gate with Livia."),
        ];
        let found = detect_boundaries(&exchanges, &SceneOptions::default());
        assert_eq!(found, BTreeSet::from([1]));
    }

    #[test]
    fn sentence_openers_are_not_entities() {
        let exchanges = vec![
            Exchange::new("I step inside.", "Dust drifts through the hall. Rain taps the glass."),
            Exchange::new("I knock.", "Warm light spills out. Nobody answers."),
        ];
        assert!(detect_boundaries(&exchanges, &SceneOptions::default()).is_empty());
    }

    #[test]
    fn names_count_at_sentence_start_once_seen_mid_sentence() {
        let exchanges = vec![
            Exchange::new("I wave to Mira and Tomas.", "the square is busy."),
            Exchange::new("I follow.", "Mira laughs. Tomas shrugs."),
        ];
        let known = known_names(&exchanges);
        assert_eq!(known, HashSet::from(["Mira", "Tomas"]));
        assert_eq!(names(&exchanges[1].response, &known), HashSet::from(["Mira", "Tomas"]));
    }

    #[test]
    fn sentence_starts_are_detected() {
        let text = "Rain falls. \"Run,\" said Ana.\nWind howls";
        let at = |w: &str| text.find(w).unwrap();
        assert!(sentence_initial(text, at("Rain")));
        assert!(sentence_initial(text, at("Run")));
        assert!(!sentence_initial(text, at("Ana")));
        assert!(sentence_initial(text, at("Wind")));
    }

    #[test]
    fn entity_shift_can_be_turned_off() {
        let exchanges = vec![
            Exchange::new("I listen.", "Bob laughs while Alice pours."),
            Exchange::new("I look around.", "Marcus waits by the Citadel gate with Livia."),
        ];
        let options = SceneOptions {
            entity_shift: false,
            ..SceneOptions::default()
        };
        assert!(detect_boundaries(&exchanges, &options).is_empty());
    }

    #[test]
    fn fallback_forces_boundaries_on_long_scenes() {
        let options = SceneOptions {
            max_exchanges_per_scene: Some(3),
            ..SceneOptions::default()
        };
        let found = detect_boundaries(&plain(10), &options);
        assert_eq!(found, BTreeSet::from([2, 5, 8]));
    }

    #[test]
    fn last_exchange_is_never_a_boundary() {
        let options = SceneOptions {
            max_exchanges_per_scene: Some(1),
            ..SceneOptions::default()
        };
        let found = detect_boundaries(&plain(3), &options);
        assert_eq!(found, BTreeSet::from([0, 1]));
    }
}
