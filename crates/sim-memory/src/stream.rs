use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use sim_core::Result;

use crate::ranker::MemoryRanker;
use crate::record::MemoryRecord;

/// Per-agent memory storage.
///
/// Retrieval updates the last-access hour of every returned memory, which in
/// turn feeds the recency term of later rankings.
#[async_trait]
pub trait MemoryStream: Send + Sync {
    async fn save(&self, record: MemoryRecord) -> Result<()>;

    async fn save_all(&self, agent: &str, records: Vec<MemoryRecord>) -> Result<()>;

    /// For each query embedding, the `limit` best-scoring memories of `agent`
    /// as of simulated hour `now`. The outer list is aligned with `queries`.
    async fn most_relevant(
        &self,
        agent: &str,
        queries: &[Vec<f32>],
        limit: usize,
        now: i64,
    ) -> Result<Vec<Vec<MemoryRecord>>>;

    /// The `limit` most recently created memories of `agent`, newest first.
    async fn most_recent(&self, agent: &str, limit: usize) -> Result<Vec<MemoryRecord>>;

    async fn count(&self, agent: &str) -> Result<usize>;
}

/// Keeps every agent's memories in process.
#[derive(Default)]
pub struct InMemoryStream {
    memories: RwLock<HashMap<String, Vec<MemoryRecord>>>,
}

impl InMemoryStream {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStream for InMemoryStream {
    async fn save(&self, record: MemoryRecord) -> Result<()> {
        self.memories
            .write()
            .entry(record.agent.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn save_all(&self, agent: &str, records: Vec<MemoryRecord>) -> Result<()> {
        self.memories
            .write()
            .entry(agent.to_string())
            .or_default()
            .extend(records);
        Ok(())
    }

    async fn most_relevant(
        &self,
        agent: &str,
        queries: &[Vec<f32>],
        limit: usize,
        now: i64,
    ) -> Result<Vec<Vec<MemoryRecord>>> {
        let mut memories = self.memories.write();
        let Some(records) = memories.get_mut(agent) else {
            return Ok(queries.iter().map(|_| Vec::new()).collect());
        };

        let ranked: Vec<Vec<usize>> = MemoryRanker::new(now)
            .rank(records, queries, limit)
            .into_iter()
            .map(|per_query| per_query.into_iter().map(|r| r.index).collect())
            .collect();

        let results = ranked
            .iter()
            .map(|indices| indices.iter().map(|&i| records[i].clone()).collect())
            .collect();

        for &i in ranked.iter().flatten() {
            records[i].touch(now);
        }
        Ok(results)
    }

    async fn most_recent(&self, agent: &str, limit: usize) -> Result<Vec<MemoryRecord>> {
        let memories = self.memories.read();
        Ok(memories
            .get(agent)
            .map(|records| records.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn count(&self, agent: &str) -> Result<usize> {
        Ok(self.memories.read().get(agent).map_or(0, Vec::len))
    }
}
