//! Candidate ranking for retrieval.
//!
//! Pure functions over [`IndexMatch`] candidates: score clamping, min-max
//! normalization, keyword overlap, hybrid blending, confidence filtering, and
//! maximal marginal relevance. Everything returns [`ScoredChunk`]s whose
//! scores lie in `[0, 1]`, sorted best first.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::embedding::cosine_similarity;
use crate::index::IndexMatch;
use crate::models::ScoredChunk;

/// Candidates kept when nothing clears the confidence threshold.
pub const CONFIDENCE_FALLBACK: usize = 2;

/// Clamp a raw similarity into `[0, 1]`. NaN becomes 0.
pub fn clamp_unit(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Min-max normalize scores to `[0, 1]`. All-equal inputs map to 1.0.
pub fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let s_min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let s_max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    scores
        .iter()
        .map(|s| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of distinct query terms that occur in `text`.
pub fn keyword_score(query: &str, text: &str) -> f64 {
    let query_terms = terms(query);
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_terms = terms(text);
    let hits = query_terms.iter().filter(|t| text_terms.contains(*t)).count();
    hits as f64 / query_terms.len() as f64
}

fn by_score_desc(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
}

/// Sort best first and keep at most `k`.
pub fn finalize(mut results: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    results.sort_by(by_score_desc);
    results.truncate(k);
    results
}

/// Plain similarity ranking with clamped scores.
pub fn semantic_rank(matches: Vec<IndexMatch>, k: usize) -> Vec<ScoredChunk> {
    let results = matches
        .into_iter()
        .map(|m| ScoredChunk {
            score: clamp_unit(m.score),
            chunk: m.chunk,
        })
        .collect();
    finalize(results, k)
}

/// Blend normalized keyword and semantic scores:
/// `(1 - alpha) * keyword + alpha * semantic`.
pub fn hybrid_rank(query: &str, matches: Vec<IndexMatch>, alpha: f64, k: usize) -> Vec<ScoredChunk> {
    let semantic: Vec<f64> = matches.iter().map(|m| m.score).collect();
    let keyword: Vec<f64> = matches
        .iter()
        .map(|m| keyword_score(query, &m.chunk.text))
        .collect();
    let norm_semantic = normalize_scores(&semantic);
    let norm_keyword = normalize_scores(&keyword);

    let results = matches
        .into_iter()
        .zip(norm_keyword.iter().zip(norm_semantic.iter()))
        .map(|(m, (kw, sem))| ScoredChunk {
            score: clamp_unit((1.0 - alpha) * kw + alpha * sem),
            chunk: m.chunk,
        })
        .collect();
    finalize(results, k)
}

/// Keep matches scoring at least `min_confidence`; when none do, keep the
/// best [`CONFIDENCE_FALLBACK`] instead.
pub fn filter_confident(mut matches: Vec<IndexMatch>, min_confidence: f64) -> Vec<IndexMatch> {
    matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    let confident = matches
        .iter()
        .take_while(|m| m.score >= min_confidence)
        .count();
    if confident > 0 {
        matches.truncate(confident);
    } else {
        matches.truncate(CONFIDENCE_FALLBACK);
    }
    matches
}

/// Select `k` candidates by maximal marginal relevance.
///
/// Each step picks the candidate maximizing
/// `lambda * sim(query, d) - (1 - lambda) * max sim(d, selected)`.
/// Candidates without stored vectors contribute no redundancy penalty.
/// The selected set is returned sorted by relevance.
pub fn mmr_select(query_vec: &[f32], matches: Vec<IndexMatch>, lambda: f64, k: usize) -> Vec<ScoredChunk> {
    let relevance: Vec<f64> = matches
        .iter()
        .map(|m| match &m.values {
            Some(v) => cosine_similarity(query_vec, v) as f64,
            None => m.score,
        })
        .collect();

    let mut remaining: Vec<usize> = (0..matches.len()).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(k.min(matches.len()));

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_value = f64::NEG_INFINITY;
        for (pos, &i) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .filter_map(|&j| match (&matches[i].values, &matches[j].values) {
                    (Some(a), Some(b)) => Some(cosine_similarity(a, b) as f64),
                    _ => None,
                })
                .fold(0.0, f64::max);
            let value = lambda * relevance[i] - (1.0 - lambda) * redundancy;
            if value > best_value {
                best_value = value;
                best_pos = pos;
            }
        }
        selected.push(remaining.remove(best_pos));
    }

    let mut slots: Vec<Option<IndexMatch>> = matches.into_iter().map(Some).collect();
    let results = selected
        .into_iter()
        .filter_map(|i| {
            slots[i].take().map(|m| ScoredChunk {
                score: clamp_unit(m.score),
                chunk: m.chunk,
            })
        })
        .collect();
    finalize(results, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, DocumentChunk};

    fn candidate(id: &str, text: &str, score: f64, values: Option<Vec<f32>>) -> IndexMatch {
        IndexMatch {
            chunk: DocumentChunk {
                id: id.to_string(),
                incident_id: id.split('#').next().unwrap_or(id).to_string(),
                chunk_index: 0,
                source: "incidents".to_string(),
                text: text.to_string(),
                hash: String::new(),
                metadata: ChunkMetadata::default(),
            },
            score,
            values,
        }
    }

    fn ids(results: &[ScoredChunk]) -> Vec<&str> {
        results.iter().map(|r| r.chunk.id.as_str()).collect()
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(-0.3), 0.0);
        assert_eq!(clamp_unit(1.2), 1.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert!((clamp_unit(0.42) - 0.42).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_range() {
        let n = normalize_scores(&[10.0, 5.0, 0.0]);
        assert!((n[0] - 1.0).abs() < 1e-9);
        assert!((n[1] - 0.5).abs() < 1e-9);
        assert!(n[2].abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        assert_eq!(normalize_scores(&[0.3, 0.3]), vec![1.0, 1.0]);
    }

    #[test]
    fn test_keyword_score_fraction_of_terms() {
        let text = "Incident INC1\nState: Closed\nResolution: restarted the mail server";
        assert!((keyword_score("mail server", text) - 1.0).abs() < 1e-9);
        assert!((keyword_score("mail printer", text) - 0.5).abs() < 1e-9);
        assert_eq!(keyword_score("?!", text), 0.0);
    }

    #[test]
    fn test_hybrid_alpha_extremes() {
        let make = || {
            vec![
                candidate("A#0", "printer jam", 0.9, None),
                candidate("B#0", "vpn drops vpn", 0.2, None),
            ]
        };
        let keyword_only = hybrid_rank("vpn", make(), 0.0, 2);
        assert_eq!(ids(&keyword_only), vec!["B#0", "A#0"]);

        let semantic_only = hybrid_rank("vpn", make(), 1.0, 2);
        assert_eq!(ids(&semantic_only), vec!["A#0", "B#0"]);
    }

    #[test]
    fn test_semantic_rank_limits_and_sorts() {
        let matches = vec![
            candidate("A#0", "", 0.2, None),
            candidate("B#0", "", 0.9, None),
            candidate("C#0", "", -0.1, None),
            candidate("D#0", "", 0.5, None),
        ];
        let results = semantic_rank(matches, 3);
        assert_eq!(ids(&results), vec!["B#0", "D#0", "A#0"]);
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    }

    #[test]
    fn test_filter_confident_falls_back_to_two_best() {
        let matches = vec![
            candidate("A#0", "", 0.1, None),
            candidate("B#0", "", 0.3, None),
            candidate("C#0", "", 0.2, None),
        ];
        let kept = filter_confident(matches, 0.5);
        let kept_ids: Vec<&str> = kept.iter().map(|m| m.chunk.id.as_str()).collect();
        assert_eq!(kept_ids, vec!["B#0", "C#0"]);
    }

    #[test]
    fn test_filter_confident_keeps_all_above_threshold() {
        let matches = vec![
            candidate("A#0", "", 0.7, None),
            candidate("B#0", "", 0.5, None),
            candidate("C#0", "", 0.4, None),
        ];
        assert_eq!(filter_confident(matches, 0.5).len(), 2);
    }

    #[test]
    fn test_mmr_prefers_diverse_candidates() {
        let query = [1.0, 0.0, 0.0];
        let matches = vec![
            candidate("A#0", "", 0.95, Some(vec![0.95, 0.31, 0.0])),
            candidate("A#1", "", 0.94, Some(vec![0.94, 0.34, 0.0])),
            candidate("B#0", "", 0.80, Some(vec![0.80, -0.1, 0.59])),
        ];
        let results = mmr_select(&query, matches, 0.5, 2);
        let chosen = ids(&results);
        assert!(chosen.contains(&"A#0"));
        assert!(chosen.contains(&"B#0"), "near-duplicate A#1 should lose to B#0");
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_mmr_lambda_one_is_pure_relevance() {
        let query = [1.0, 0.0];
        let matches = vec![
            candidate("A#0", "", 0.9, Some(vec![0.9, 0.1])),
            candidate("A#1", "", 0.89, Some(vec![0.89, 0.12])),
            candidate("B#0", "", 0.1, Some(vec![0.1, 0.9])),
        ];
        let results = mmr_select(&query, matches, 1.0, 2);
        assert_eq!(ids(&results), vec!["A#0", "A#1"]);
    }
}
