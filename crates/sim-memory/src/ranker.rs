//! Memory retrieval scoring.
//!
//! ```text
//! score = last_access * 0.99^(now - last_access)   recency
//!       + importance / 10                          importance
//!       + cos(memory.embedding, query)             relevance
//! ```

use std::cmp::Ordering;

use crate::record::MemoryRecord;

const RECENCY_DECAY: f64 = 0.99;

/// A memory together with its score for one query.
#[derive(Debug, Clone, Copy)]
pub struct Ranked<'a> {
    /// Position of the memory in the slice that was ranked.
    pub index: usize,
    pub record: &'a MemoryRecord,
    pub score: f64,
}

/// Scores memories as of a given simulated hour. Pure: never mutates memories.
#[derive(Debug, Clone, Copy)]
pub struct MemoryRanker {
    now_hour: i64,
}

impl MemoryRanker {
    pub fn new(now_hour: i64) -> Self {
        Self { now_hour }
    }

    pub fn recency(&self, record: &MemoryRecord) -> f64 {
        let hours_since = (self.now_hour - record.last_access) as f64;
        record.last_access as f64 * RECENCY_DECAY.powf(hours_since)
    }

    pub fn score(&self, record: &MemoryRecord, query: &[f32]) -> f64 {
        self.recency(record)
            + f64::from(record.importance) / 10.0
            + cosine_similarity(&record.embedding, query)
    }

    /// Top `limit` memories for `query`, best first. Equal scores keep input order.
    pub fn rank_one<'a>(
        &self,
        memories: &'a [MemoryRecord],
        query: &[f32],
        limit: usize,
    ) -> Vec<Ranked<'a>> {
        let mut scored: Vec<Ranked<'a>> = memories
            .iter()
            .enumerate()
            .map(|(index, record)| Ranked {
                index,
                record,
                score: self.score(record, query),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(limit);
        scored
    }

    /// Rank independently for each query; the result is aligned with `queries`.
    pub fn rank<'a>(
        &self,
        memories: &'a [MemoryRecord],
        queries: &[Vec<f32>],
        limit: usize,
    ) -> Vec<Vec<Ranked<'a>>> {
        queries
            .iter()
            .map(|q| self.rank_one(memories, q, limit))
            .collect()
    }
}

/// Cosine similarity. Mismatched lengths, empty or zero vectors give 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0, 0.0, 0.0), |(d, na, nb), (x, y)| {
        let (x, y) = (f64::from(*x), f64::from(*y));
        (d + x * y, na + x * x, nb + y * y)
    });
    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if similarity.is_nan() { 0.0 } else { similarity }
}
