use crate::store::TemplateSet;
use crate::types::Embedding;
use serde::Serialize;

/// Identity reported when no template clears the threshold.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Result of matching a probe embedding against a template set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Best-matching identity, or [`UNKNOWN_IDENTITY`].
    pub identity: String,
    /// Cosine similarity of the best candidate, even when rejected.
    /// `-inf` for an empty template set.
    pub score: f32,
    pub accepted: bool,
}

impl MatchResult {
    fn unknown(score: f32) -> Self {
        Self {
            identity: UNKNOWN_IDENTITY.to_string(),
            score,
            accepted: false,
        }
    }
}

/// Strategy for comparing a probe embedding against enrolled templates.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, templates: &TemplateSet, threshold: f32) -> MatchResult;
}

/// Dot-product matcher over unit-length templates.
///
/// Always visits every template. Equal top scores resolve to the
/// lexicographically smallest identity, since the set iterates in
/// identity order and only a strictly greater score replaces the leader.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, templates: &TemplateSet, threshold: f32) -> MatchResult {
        let mut best_score = f32::NEG_INFINITY;
        let mut best_identity: Option<&str> = None;

        for (identity, template) in templates.iter() {
            let score = probe.dot(template);
            if best_identity.is_none() || score > best_score {
                best_score = score;
                best_identity = Some(identity);
            }
        }

        match best_identity {
            Some(identity) if best_score >= threshold => MatchResult {
                identity: identity.to_string(),
                score: best_score,
                accepted: true,
            },
            _ => MatchResult::unknown(best_score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(entries: &[(&str, &[f32])]) -> TemplateSet {
        TemplateSet::from_vectors(entries.iter().map(|(id, v)| (id.to_string(), v.to_vec()))).unwrap()
    }

    fn probe(values: &[f32]) -> Embedding {
        Embedding::normalized(values.to_vec()).unwrap()
    }

    #[test]
    fn test_match_scans_every_template() {
        // Best match is the last entry in identity order.
        let templates = set(&[
            ("decoy1", &[0.0, 1.0, 0.0]),
            ("decoy2", &[0.0, 0.0, 1.0]),
            ("zed", &[1.0, 0.0, 0.0]),
        ]);
        let result = CosineMatcher.compare(&probe(&[1.0, 0.0, 0.0]), &templates, 0.5);
        assert!(result.accepted);
        assert_eq!(result.identity, "zed");
        assert!((result.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_below_threshold_reports_unknown_with_best_score() {
        let templates = set(&[("alice", &[1.0, 0.0]), ("bob", &[0.0, 1.0])]);
        let result = CosineMatcher.compare(&probe(&[1.0, 0.2]), &templates, 0.99);
        assert!(!result.accepted);
        assert_eq!(result.identity, UNKNOWN_IDENTITY);
        assert!(result.score > 0.9 && result.score < 0.99);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let templates = set(&[("alice", &[1.0, 0.0])]);
        // normalized (3, 4) = (0.6, 0.8); dot with (1, 0) is exactly 0.6
        let result = CosineMatcher.compare(&probe(&[3.0, 4.0]), &templates, 0.6);
        assert_eq!(result.score, 0.6);
        assert!(result.accepted);
        assert_eq!(result.identity, "alice");
    }

    #[test]
    fn test_tie_breaks_on_smallest_identity() {
        let templates = set(&[("carol", &[1.0, 0.0]), ("alice", &[1.0, 0.0]), ("bob", &[1.0, 0.0])]);
        for _ in 0..3 {
            let result = CosineMatcher.compare(&probe(&[1.0, 0.0]), &templates, 0.5);
            assert_eq!(result.identity, "alice");
        }
    }

    #[test]
    fn test_empty_set_is_unknown_not_error() {
        let templates = TemplateSet::default();
        let result = CosineMatcher.compare(&probe(&[1.0, 0.0]), &templates, 0.0);
        assert!(!result.accepted);
        assert_eq!(result.identity, UNKNOWN_IDENTITY);
        assert_eq!(result.score, f32::NEG_INFINITY);
    }

    #[test]
    fn test_all_negative_scores_still_pick_best() {
        let templates = set(&[("alice", &[-1.0, 0.0]), ("bob", &[-1.0, -1.0])]);
        let result = CosineMatcher.compare(&probe(&[1.0, 0.0]), &templates, -1.0);
        assert!(result.accepted);
        assert_eq!(result.identity, "bob");
    }
}
