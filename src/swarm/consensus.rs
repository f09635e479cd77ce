//! Consensus rounds (spec §4.5 "Consensus mode"): the Coordinator tallies
//! pre-collected votes under one of four modes and persists the outcome to
//! Distributed Memory at `consensus/<round-id>`. The core has no
//! agent-to-agent RPC (mirroring [`crate::domain::ports::TaskExecutor`]'s
//! out-of-band shape), so callers gather votes themselves within
//! `voteTimeout` and hand them to [`super::SwarmCoordinator::submit_consensus_round`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::agent::{HealthScore, HealthWeights};
use crate::domain::{AgentId, ConsensusRoundId};
use crate::error::{CoreError, CoreResult};
use crate::memory::StoreOptions;

use super::SwarmCoordinator;

/// The formal tallying rule for a round (spec Open Question #3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ConsensusMode {
    /// Passes when yes-votes reach a simple majority of participants
    /// (`N / 2 + 1`, rounded up).
    Quorum,
    /// Passes only when every participant votes yes; any abstention or no
    /// fails the round.
    Unanimous,
    /// Passes when the sum of each yes-voter's health-weighted priority
    /// reaches `threshold`.
    Weighted { threshold: f64 },
    /// The named leader's vote is the outcome; other votes are advisory and
    /// recorded but do not affect `passed`.
    Leader { leader: AgentId },
}

/// The recorded result of one round, as persisted to memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub round_id: ConsensusRoundId,
    pub topic: String,
    pub mode: ConsensusMode,
    pub participants: Vec<AgentId>,
    /// Keyed by the agent id's string form (serde_json map keys must be
    /// strings); `None` means the participant did not vote (abstention).
    pub votes: HashMap<String, Option<bool>>,
    pub passed: bool,
}

pub(crate) async fn run_round(
    coordinator: &SwarmCoordinator,
    topic: String,
    participants: Vec<AgentId>,
    mode: ConsensusMode,
    votes: HashMap<AgentId, bool>,
) -> CoreResult<ConsensusOutcome> {
    if participants.is_empty() {
        return Err(CoreError::InvalidState("consensus round requires at least one participant".to_string()));
    }

    let recorded: HashMap<AgentId, Option<bool>> = participants.iter().map(|&id| (id, votes.get(&id).copied())).collect();

    let passed = match mode {
        ConsensusMode::Quorum => {
            let yes = recorded.values().filter(|v| **v == Some(true)).count();
            let needed = participants.len() / 2 + 1;
            yes >= needed
        }
        ConsensusMode::Unanimous => recorded.values().all(|v| *v == Some(true)),
        ConsensusMode::Weighted { threshold } => {
            let mut total = 0.0;
            for (&agent_id, vote) in &recorded {
                if *vote != Some(true) {
                    continue;
                }
                let weight = match coordinator.agents().get_agent(agent_id).await {
                    Ok(agent) => agent.health.weighted(HealthWeights::default()),
                    Err(_) => HealthScore::default().weighted(HealthWeights::default()),
                };
                total += weight;
            }
            total >= threshold
        }
        ConsensusMode::Leader { leader } => recorded.get(&leader).copied().flatten().unwrap_or(false),
    };

    let round_id = ConsensusRoundId::new();
    let votes = recorded.into_iter().map(|(id, vote)| (id.to_string(), vote)).collect();
    let outcome = ConsensusOutcome { round_id, topic, mode, participants, votes, passed };

    coordinator
        .memory()
        .store(
            &format!("consensus/{round_id}"),
            json!(outcome),
            StoreOptions { namespace: Some("consensus".to_string()), ..Default::default() },
        )
        .await?;

    Ok(outcome)
}
