//! Block-wise retrieval: cosine scoring with a section-hint boost, followed
//! by Maximal Marginal Relevance diversification.

use std::cmp::Ordering;

use crate::constants::{
    DEFAULT_MMR_LAMBDA, DEFAULT_TOP_K_RETRIEVAL, DEFAULT_TOP_N_FOR_MMR, SECTION_HINT_BOOST,
};
use crate::pipeline::chunk::{NormalizedChunk, SectionHint};

/// Tuning knobs for the retrieval pass.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalParams {
    pub top_k: usize,
    pub mmr_pool: usize,
    pub mmr_lambda: f32,
    pub hint_boost: f32,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K_RETRIEVAL,
            mmr_pool: DEFAULT_TOP_N_FOR_MMR,
            mmr_lambda: DEFAULT_MMR_LAMBDA,
            hint_boost: SECTION_HINT_BOOST,
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    index: usize,
    score: f32,
}

/// Selects a diverse top-K of `chunks` for one block.
///
/// Chunks whose section hint appears in `block_hints` get their similarity
/// multiplied by `hint_boost`. The boosted scores feed both the candidate
/// pool cut and the relevance term of the MMR objective; inter-chunk
/// similarity uses the raw vectors. Ties break by score, then chunk id, so a
/// pool of all-zero vectors comes back in input order.
pub fn retrieve_for_block<'a>(
    chunks: &'a [NormalizedChunk],
    query_vector: &[f32],
    block_hints: &[SectionHint],
    params: &RetrievalParams,
) -> Vec<&'a NormalizedChunk> {
    debug_assert!(params.top_k > 0);
    debug_assert!(params.mmr_pool >= params.top_k);
    debug_assert!((0.0..=1.0).contains(&params.mmr_lambda));

    let mut candidates: Vec<Candidate> = chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| {
            let mut score = cosine_similarity(query_vector, &chunk.embedding);
            if chunk
                .section_hint
                .is_some_and(|hint| block_hints.contains(&hint))
            {
                score *= params.hint_boost;
            }
            Candidate { index, score }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.index.cmp(&b.index))
    });
    candidates.truncate(params.mmr_pool);

    let selected = mmr_select(chunks, &candidates, params);
    selected.into_iter().map(|index| &chunks[index]).collect()
}

/// Greedy MMR over the candidate pool: seed with the best-scored candidate,
/// then repeatedly take the candidate maximising
/// `λ·sim(query, d) − (1−λ)·max_{d'∈selected} sim(d, d')`.
fn mmr_select(
    chunks: &[NormalizedChunk],
    candidates: &[Candidate],
    params: &RetrievalParams,
) -> Vec<usize> {
    let mut pool: Vec<Candidate> = candidates.to_vec();
    let mut selected: Vec<usize> = Vec::with_capacity(params.top_k);

    while selected.len() < params.top_k && !pool.is_empty() {
        let mut best_pos = 0usize;
        let mut best_key = f32::NEG_INFINITY;
        for (pos, candidate) in pool.iter().enumerate() {
            let key = if selected.is_empty() {
                candidate.score
            } else {
                let max_inter = selected
                    .iter()
                    .map(|&chosen| {
                        cosine_similarity(&chunks[candidate.index].embedding, &chunks[chosen].embedding)
                    })
                    .fold(f32::NEG_INFINITY, f32::max);
                params.mmr_lambda * candidate.score - (1.0 - params.mmr_lambda) * max_inter
            };
            if key > best_key || (key == best_key && breaks_tie(candidate, &pool[best_pos])) {
                best_key = key;
                best_pos = pos;
            }
        }
        selected.push(pool.swap_remove(best_pos).index);
    }

    selected
}

/// Tie order: higher original score first, then lower chunk id.
fn breaks_tie(challenger: &Candidate, incumbent: &Candidate) -> bool {
    match challenger.score.partial_cmp(&incumbent.score) {
        Some(Ordering::Greater) => true,
        Some(Ordering::Less) => false,
        _ => challenger.index < incumbent.index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: usize, embedding: Vec<f32>, hint: Option<SectionHint>) -> NormalizedChunk {
        NormalizedChunk {
            id,
            text: format!("chunk {id}"),
            page_number: None,
            section_hint: hint,
            embedding,
        }
    }

    fn params(top_k: usize, lambda: f32) -> RetrievalParams {
        RetrievalParams {
            top_k,
            mmr_pool: 40,
            mmr_lambda: lambda,
            hint_boost: SECTION_HINT_BOOST,
        }
    }

    #[test]
    fn fewer_chunks_than_k_returns_all() {
        let chunks = vec![
            chunk(0, vec![1.0, 0.0], None),
            chunk(1, vec![0.0, 1.0], None),
        ];
        let out = retrieve_for_block(&chunks, &[1.0, 0.0], &[], &params(12, 0.7));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn all_zero_vectors_come_back_in_input_order() {
        let chunks: Vec<_> = (0..6).map(|id| chunk(id, vec![0.0, 0.0], None)).collect();
        let out = retrieve_for_block(&chunks, &[0.0, 0.0], &[], &params(6, 0.7));
        let ids: Vec<usize> = out.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn section_hint_boost_promotes_matching_chunks() {
        // Same direction but the hinted chunk is slightly less aligned; the
        // 1.15 boost must push it ahead.
        let chunks = vec![
            chunk(0, vec![1.0, 0.0], None),
            chunk(1, vec![0.95, 0.3122], Some(SectionHint::Prazos)),
        ];
        let out = retrieve_for_block(
            &chunks,
            &[1.0, 0.0],
            &[SectionHint::Prazos],
            &params(1, 1.0),
        );
        assert_eq!(out[0].id, 1);
    }

    #[test]
    fn lambda_one_equals_top_k_by_similarity() {
        let chunks = vec![
            chunk(0, vec![0.2, 0.8], None),
            chunk(1, vec![1.0, 0.0], None),
            chunk(2, vec![0.9, 0.1], None),
            chunk(3, vec![0.5, 0.5], None),
        ];
        let query = [1.0, 0.0];
        let out = retrieve_for_block(&chunks, &query, &[], &params(3, 1.0));
        let ids: Vec<usize> = out.iter().map(|c| c.id).collect();

        let mut by_score: Vec<(usize, f32)> = chunks
            .iter()
            .map(|c| (c.id, cosine_similarity(&query, &c.embedding)))
            .collect();
        by_score.sort_by(|a, b| b.1.partial_cmp(&a.1).expect("finite scores"));
        let expected: Vec<usize> = by_score.iter().take(3).map(|(id, _)| *id).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn lambda_zero_greedily_minimises_similarity_to_selected() {
        // Chunk 1 is near-identical to chunk 0; with pure-diversity MMR the
        // orthogonal chunk 2 must be picked before chunk 1.
        let chunks = vec![
            chunk(0, vec![1.0, 0.0, 0.0], None),
            chunk(1, vec![0.999, 0.04, 0.0], None),
            chunk(2, vec![0.0, 0.0, 1.0], None),
        ];
        let out = retrieve_for_block(&chunks, &[1.0, 0.0, 0.0], &[], &params(3, 0.0));
        let ids: Vec<usize> = out.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 2, 1]);
    }

    #[test]
    fn mmr_is_idempotent_on_its_own_output() {
        let chunks = vec![
            chunk(0, vec![0.9, 0.1, 0.2], None),
            chunk(1, vec![0.8, 0.5, 0.0], None),
            chunk(2, vec![0.1, 0.9, 0.3], None),
            chunk(3, vec![0.4, 0.4, 0.8], None),
            chunk(4, vec![0.7, 0.2, 0.6], None),
        ];
        let query = [1.0, 0.2, 0.1];
        let first = retrieve_for_block(&chunks, &query, &[], &params(4, 0.7));

        let reordered: Vec<NormalizedChunk> = first.iter().map(|c| (*c).clone()).collect();
        let second = retrieve_for_block(&reordered, &query, &[], &params(4, 0.7));

        let first_ids: Vec<usize> = first.iter().map(|c| c.id).collect();
        let second_ids: Vec<usize> = second.iter().map(|c| c.id).collect();
        assert_eq!(first_ids, second_ids);
    }
}
