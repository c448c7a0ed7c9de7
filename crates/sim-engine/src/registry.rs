use std::collections::BTreeMap;

use parking_lot::RwLock;
use sim_core::{AgentRef, Result, SimError};
use tracing::info;

/// Every live agent of the simulation.
///
/// Agents are created elsewhere and registered here; the registry only hands
/// out shared references.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<Vec<AgentRef>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Names are unique.
    pub fn register(&self, agent: AgentRef) -> Result<()> {
        let mut agents = self.agents.write();
        if agents.iter().any(|a| a.name() == agent.name()) {
            return Err(SimError::agent(agent.name(), "already registered"));
        }
        info!(agent = %agent.name(), location = %agent.location(), "registered agent");
        agents.push(agent);
        Ok(())
    }

    /// Snapshot of all agents partitioned by current location, ordered by
    /// location name. Registration order is kept within a group.
    pub fn grouped_by_location(&self) -> Vec<(String, Vec<AgentRef>)> {
        let mut groups: BTreeMap<String, Vec<AgentRef>> = BTreeMap::new();
        for agent in self.agents.read().iter() {
            groups.entry(agent.location()).or_default().push(agent.clone());
        }
        groups.into_iter().collect()
    }

    pub fn random(&self) -> Option<AgentRef> {
        let agents = self.agents.read();
        if agents.is_empty() {
            return None;
        }
        let index = (rand::random::<u64>() % agents.len() as u64) as usize;
        agents.get(index).cloned()
    }

    pub fn find(&self, name: &str) -> Option<AgentRef> {
        self.agents.read().iter().find(|a| a.name() == name).cloned()
    }

    /// Agents currently at `location`.
    pub fn at_location(&self, location: &str) -> Vec<AgentRef> {
        self.agents
            .read()
            .iter()
            .filter(|a| a.location() == location)
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<AgentRef> {
        self.agents.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.read().iter().map(|a| a.name().to_string()).collect()
    }

    pub fn count(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}
