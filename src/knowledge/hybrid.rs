use std::collections::HashMap;

use crate::config::FusionStrategy;

/// Constant `k` in the RRF formula: `1 / (k + rank)`.
const RRF_K: f64 = 60.0;

/// How keyword and vector candidate lists are combined into one score.
#[derive(Debug, Clone, Copy)]
pub struct FusionParams {
    pub strategy: FusionStrategy,
    pub vector_weight: f64,
    pub keyword_weight: f64,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            strategy: FusionStrategy::Weighted,
            vector_weight: 0.6,
            keyword_weight: 0.4,
        }
    }
}

/// Fuse candidate lists into `(row_id, score)` pairs, highest score first.
///
/// Each input is a list of `(row_id, score)` pairs **already sorted by
/// descending score**. Keyword scores are positive BM25 values (larger is
/// better); vector scores are cosine similarities.
pub fn fuse(
    keyword: &[(i64, f64)],
    vector: &[(i64, f64)],
    params: &FusionParams,
) -> Vec<(i64, f64)> {
    let mut merged = match params.strategy {
        FusionStrategy::Weighted => merge_weighted(keyword, vector, params),
        FusionStrategy::Rrf => merge_rrf(keyword, vector, params),
    };
    sort_desc(&mut merged);
    merged
}

/// Keyword-only ranking: BM25 scaled so the best match scores `1.0`.
pub fn keyword_only(keyword: &[(i64, f64)]) -> Vec<(i64, f64)> {
    let max = max_score(keyword);
    let mut out: Vec<(i64, f64)> = keyword
        .iter()
        .map(|&(id, s)| (id, if max > 0.0 { s.max(0.0) / max } else { 0.0 }))
        .collect();
    sort_desc(&mut out);
    out
}

/// `vector_weight · max(cos, 0) + keyword_weight · bm25 / max_bm25`.
fn merge_weighted(
    keyword: &[(i64, f64)],
    vector: &[(i64, f64)],
    params: &FusionParams,
) -> Vec<(i64, f64)> {
    let mut scores: HashMap<i64, f64> = HashMap::new();

    for &(id, cos) in vector {
        *scores.entry(id).or_default() += params.vector_weight * cos.max(0.0);
    }

    let max = max_score(keyword);
    if max > 0.0 {
        for &(id, bm25) in keyword {
            *scores.entry(id).or_default() += params.keyword_weight * (bm25.max(0.0) / max);
        }
    }

    scores.into_iter().collect()
}

/// Reciprocal rank fusion. Only positions matter, so the raw scores of the
/// two lists need not be comparable.
fn merge_rrf(
    keyword: &[(i64, f64)],
    vector: &[(i64, f64)],
    params: &FusionParams,
) -> Vec<(i64, f64)> {
    let mut scores: HashMap<i64, f64> = HashMap::new();

    for (rank, &(id, _score)) in keyword.iter().enumerate() {
        let rrf = params.keyword_weight / (RRF_K + (rank as f64 + 1.0));
        *scores.entry(id).or_default() += rrf;
    }

    for (rank, &(id, _score)) in vector.iter().enumerate() {
        let rrf = params.vector_weight / (RRF_K + (rank as f64 + 1.0));
        *scores.entry(id).or_default() += rrf;
    }

    scores.into_iter().collect()
}

fn max_score(results: &[(i64, f64)]) -> f64 {
    results.iter().map(|r| r.1).fold(0.0, f64::max)
}

fn sort_desc(results: &mut [(i64, f64)]) {
    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rrf() -> FusionParams {
        FusionParams {
            strategy: FusionStrategy::Rrf,
            vector_weight: 1.0,
            keyword_weight: 1.0,
        }
    }

    #[test]
    fn test_merge_empty() {
        assert!(fuse(&[], &[], &FusionParams::default()).is_empty());
        assert!(fuse(&[], &[], &rrf()).is_empty());
    }

    #[test]
    fn test_rrf_single_list() {
        let fts = vec![(1, 5.0), (2, 3.0)];
        let merged = fuse(&fts, &[], &rrf());
        assert_eq!(merged.len(), 2);
        assert!(merged[0].1 >= merged[1].1);
    }

    #[test]
    fn test_rrf_overlapping() {
        let fts = vec![(1, 5.0), (2, 3.0), (3, 1.0)];
        let vec_results = vec![(2, 0.95), (4, 0.80), (1, 0.70)];
        let merged = fuse(&fts, &vec_results, &rrf());
        // Row 2 ranks high in both lists.
        assert_eq!(merged[0].0, 2);
    }

    #[test]
    fn weighted_combines_both_signals() {
        let fts = vec![(1, 8.0), (2, 4.0)];
        let vec_results = vec![(2, 0.9), (3, 0.5)];
        let merged = fuse(&fts, &vec_results, &FusionParams::default());
        let score = |id| merged.iter().find(|r| r.0 == id).unwrap().1;
        assert!((score(1) - 0.4).abs() < 1e-9);
        assert!((score(2) - (0.6 * 0.9 + 0.4 * 0.5)).abs() < 1e-9);
        assert!((score(3) - 0.3).abs() < 1e-9);
        assert_eq!(merged[0].0, 2);
    }

    #[test]
    fn weighted_ignores_negative_similarity() {
        let merged = fuse(&[], &[(7, -0.4)], &FusionParams::default());
        assert_eq!(merged, vec![(7, 0.0)]);
    }

    #[test]
    fn keyword_only_scales_to_unit() {
        let ranked = keyword_only(&[(1, 2.0), (2, 4.0)]);
        assert_eq!(ranked[0], (2, 1.0));
        assert!((ranked[1].1 - 0.5).abs() < f64::EPSILON);
    }
}
