//! Quality and diversity gates applied to raw vector-search hits before
//! they reach [`super::RetrievedContext`] (spec.md §4.5, §9).

use std::collections::HashSet;

use crate::models::TrainingDataType;

use super::ScoredRecord;

const MIN_CONTENT_LEN: usize = 10;
const MAX_CONTENT_LEN: usize = 2000;

/// Substrings that mark a SQL-bearing record as carrying an obviously
/// broken statement rather than a usable example (spec.md §9 open question
/// "what counts as an obvious SQL syntax-error pattern" — resolved here as
/// a short deny-list of incomplete-statement markers).
const SQL_SYNTAX_ERROR_MARKERS: &[&str] = &["SELECT FROM", "WHERE AND", "WHERE OR", "SELECT ,", ",  FROM", "SELCT ", "FORM "];

fn is_sql_bearing(data_type: TrainingDataType) -> bool {
    matches!(data_type, TrainingDataType::SqlExample | TrainingDataType::QaPair)
}

fn has_sql_syntax_error_pattern(content: &str) -> bool {
    let upper = content.to_uppercase();
    SQL_SYNTAX_ERROR_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// A candidate passes if it clears the similarity floor, its content falls
/// within a sane length window, and (for SQL-bearing types) it does not
/// look like a broken statement.
pub fn passes_quality(candidate: &ScoredRecord, data_type: TrainingDataType, similarity_threshold: f32) -> bool {
    if candidate.score < similarity_threshold {
        return false;
    }

    let len = candidate.record.content.len();
    if len < MIN_CONTENT_LEN || len > MAX_CONTENT_LEN {
        return false;
    }

    if is_sql_bearing(data_type) && has_sql_syntax_error_pattern(&candidate.record.content) {
        return false;
    }

    true
}

fn tokenize(content: &str) -> HashSet<&str> {
    content.split_whitespace().collect()
}

fn jaccard_similarity(a: &HashSet<&str>, b: &HashSet<&str>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Drop near-duplicate candidates (Jaccard similarity over whitespace
/// tokens at or above `diversity_threshold` against any already-kept
/// result), then cap at `budget`. Candidates are assumed pre-sorted by
/// score, highest first, so ties keep the higher-ranked candidate.
pub fn apply_diversity(candidates: Vec<ScoredRecord>, diversity_threshold: f32, budget: usize) -> Vec<ScoredRecord> {
    let mut kept: Vec<ScoredRecord> = Vec::new();
    let mut kept_tokens: Vec<HashSet<&str>> = Vec::new();

    for candidate in &candidates {
        if kept.len() >= budget {
            break;
        }

        let tokens = tokenize(&candidate.record.content);
        let is_duplicate = kept_tokens.iter().any(|existing| jaccard_similarity(existing, &tokens) >= diversity_threshold);
        if is_duplicate {
            continue;
        }

        kept_tokens.push(tokens);
        kept.push(candidate.clone());
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrainingRecord;

    fn scored(content: &str, score: f32) -> ScoredRecord {
        ScoredRecord { record: TrainingRecord::new(TrainingDataType::SqlExample, "shop", content.to_string(), Vec::new()), score }
    }

    #[test]
    fn rejects_below_similarity_threshold() {
        let candidate = scored("SELECT * FROM schools", 0.4);
        assert!(!passes_quality(&candidate, TrainingDataType::SqlExample, 0.7));
    }

    #[test]
    fn rejects_too_short_content() {
        let candidate = scored("hi", 0.9);
        assert!(!passes_quality(&candidate, TrainingDataType::Documentation, 0.0));
    }

    #[test]
    fn rejects_obvious_sql_syntax_error() {
        let candidate = scored("SELECT FROM schools WHERE id = 1", 0.95);
        assert!(!passes_quality(&candidate, TrainingDataType::SqlExample, 0.0));
    }

    #[test]
    fn accepts_well_formed_sql_example() {
        let candidate = scored("SELECT name FROM schools WHERE city = 'Plano'", 0.95);
        assert!(passes_quality(&candidate, TrainingDataType::SqlExample, 0.0));
    }

    #[test]
    fn diversity_filter_drops_near_duplicate_and_respects_budget() {
        let candidates = vec![
            scored("SELECT name FROM schools WHERE city = 'Plano'", 0.95),
            scored("SELECT name FROM schools WHERE city = 'Plano' LIMIT 10", 0.93),
            scored("SELECT AVG(sat_score) FROM schools GROUP BY district", 0.80),
        ];

        let kept = apply_diversity(candidates, 0.5, 5);
        assert_eq!(kept.len(), 2, "the near-duplicate LIMIT variant should be dropped");

        let capped = apply_diversity(
            vec![scored("a b c", 0.9), scored("d e f", 0.9), scored("g h i", 0.9)],
            0.9,
            2,
        );
        assert_eq!(capped.len(), 2);
    }
}
