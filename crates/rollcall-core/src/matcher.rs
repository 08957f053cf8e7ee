//! Nearest-neighbour face matching against a gallery.

use crate::gallery::Gallery;
use crate::types::{Embedding, MatchResult};
use std::collections::BTreeSet;

/// Default maximum distance accepted as a positive match.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Strategy for comparing query embeddings against a gallery of known faces.
pub trait Matcher {
    /// Classify a single query embedding.
    fn classify(&self, query: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchResult;

    /// Names of every gallery identity recognized among `queries`.
    ///
    /// The same person detected more than once collapses to one entry.
    fn recognize(&self, queries: &[Embedding], gallery: &Gallery, tolerance: f32) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for (i, query) in queries.iter().enumerate() {
            let result = self.classify(query, gallery, tolerance);
            tracing::debug!(
                face = i,
                matched = result.matched,
                distance = result.distance,
                name = result.name.as_deref().unwrap_or("unknown"),
                "query classified"
            );
            if let Some(name) = result.name {
                names.insert(name);
            }
        }
        names
    }
}

/// Euclidean nearest-neighbour matcher.
///
/// A query is accepted only when its nearest identity is itself within
/// tolerance; ties go to the earliest gallery entry.
pub struct NearestMatcher;

impl Matcher for NearestMatcher {
    fn classify(&self, query: &Embedding, gallery: &Gallery, tolerance: f32) -> MatchResult {
        let distances: Vec<f32> = gallery
            .identities()
            .iter()
            .map(|identity| query.distance(&identity.embedding))
            .collect();
        let matches: Vec<bool> = distances.iter().map(|&d| d <= tolerance).collect();

        // total_cmp orders NaN above +inf, so a NaN distance is never the nearest
        // unless every distance is NaN, and then it is not a match either.
        let nearest = distances
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(idx, &d)| (idx, d));

        let Some((best_idx, best_distance)) = nearest else {
            return MatchResult::unrecognized(f32::INFINITY);
        };

        if !matches.iter().any(|&m| m) || !matches[best_idx] {
            return MatchResult::unrecognized(best_distance);
        }

        MatchResult {
            matched: true,
            distance: best_distance,
            name: Some(gallery.identities()[best_idx].name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;

    fn gallery(entries: &[(&str, Vec<f32>)]) -> Gallery {
        let mut g = Gallery::new();
        for (i, (name, values)) in entries.iter().enumerate() {
            g.insert(Identity {
                name: name.to_string(),
                roll_number: (i + 1).to_string(),
                embedding: Embedding::new(values.clone()),
            });
        }
        g
    }

    fn query(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_single_identity_within_tolerance() {
        let g = gallery(&[("Alice", vec![0.0, 0.0]), ("Bob", vec![5.0, 5.0])]);
        let names = NearestMatcher.recognize(&[query(&[0.3, 0.0])], &g, DEFAULT_TOLERANCE);
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["Alice"]);
    }

    #[test]
    fn test_beyond_tolerance_recognizes_nothing() {
        let g = gallery(&[("Alice", vec![0.0, 0.0]), ("Bob", vec![5.0, 5.0])]);
        let names = NearestMatcher.recognize(&[query(&[2.0, 2.0])], &g, DEFAULT_TOLERANCE);
        assert!(names.is_empty());
    }

    #[test]
    fn test_tolerance_boundary_is_inclusive() {
        let g = gallery(&[("Alice", vec![0.0])]);
        let result = NearestMatcher.classify(&query(&[0.5]), &g, 0.5);
        assert!(result.matched);
        let result = NearestMatcher.classify(&query(&[0.5]), &g, 0.49);
        assert!(!result.matched);
    }

    #[test]
    fn test_nearest_wins_when_several_match() {
        let g = gallery(&[("Far", vec![0.5, 0.0]), ("Near", vec![0.1, 0.0])]);
        let result = NearestMatcher.classify(&query(&[0.0, 0.0]), &g, DEFAULT_TOLERANCE);
        assert_eq!(result.name.as_deref(), Some("Near"));
        assert!((result.distance - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_tie_goes_to_first_entry() {
        let g = gallery(&[("First", vec![1.0, 0.0]), ("Second", vec![-1.0, 0.0])]);
        let result = NearestMatcher.classify(&query(&[0.0, 0.0]), &g, 1.0);
        assert_eq!(result.name.as_deref(), Some("First"));
    }

    #[test]
    fn test_smaller_tolerance_is_stricter() {
        let g = gallery(&[("Alice", vec![0.0, 0.0])]);
        let p = [query(&[0.4, 0.0])];
        assert_eq!(NearestMatcher.recognize(&p, &g, 0.6).len(), 1);
        assert!(NearestMatcher.recognize(&p, &g, 0.3).is_empty());
    }

    #[test]
    fn test_duplicate_detections_collapse() {
        let g = gallery(&[("Alice", vec![0.0, 0.0]), ("Bob", vec![5.0, 5.0])]);
        let queries = [query(&[0.1, 0.0]), query(&[0.0, 0.1]), query(&[5.0, 5.1])];
        let names = NearestMatcher.recognize(&queries, &g, DEFAULT_TOLERANCE);
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_empty_gallery() {
        let result = NearestMatcher.classify(&query(&[0.0]), &Gallery::new(), DEFAULT_TOLERANCE);
        assert!(!result.matched);
        assert_eq!(result.distance, f32::INFINITY);
        assert!(NearestMatcher
            .recognize(&[query(&[0.0])], &Gallery::new(), DEFAULT_TOLERANCE)
            .is_empty());
    }

    #[test]
    fn test_no_queries() {
        let g = gallery(&[("Alice", vec![0.0])]);
        assert!(NearestMatcher.recognize(&[], &g, DEFAULT_TOLERANCE).is_empty());
    }

    #[test]
    fn test_nan_query_never_matches() {
        let g = gallery(&[("Alice", vec![0.0])]);
        let result = NearestMatcher.classify(&query(&[f32::NAN]), &g, DEFAULT_TOLERANCE);
        assert!(!result.matched);
        assert!(result.name.is_none());
    }

    #[test]
    fn test_mismatched_dimension_never_matches() {
        let g = gallery(&[("Alice", vec![0.0, 0.0])]);
        let result = NearestMatcher.classify(&query(&[0.0]), &g, 10.0);
        assert!(!result.matched);
    }
}
