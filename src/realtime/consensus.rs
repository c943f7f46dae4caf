use crate::core::events::Action;
use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Tolerance for weight ties and threshold comparison, relative to total weight
pub const STRENGTH_EPSILON: f64 = 1e-9;

/// Malformed agent vote
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoteError {
    #[error("agent id must not be empty")]
    EmptyAgentId,

    #[error("agent {agent}: confidence {value} is outside [0, 1]")]
    ConfidenceOutOfRange { agent: String, value: f64 },

    #[error("agent {agent}: weight {value} must be finite and non-negative")]
    InvalidWeight { agent: String, value: f64 },
}

/// One agent's vote for a single cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentVote {
    pub agent_id: String,
    pub action: Action,
    /// Agent's own confidence in [0, 1]
    pub confidence: f64,
    /// Voting weight; `None` means the default equal weight of 1
    pub weight: Option<f64>,
}

impl AgentVote {
    pub fn new(
        agent_id: impl Into<String>,
        action: Action,
        confidence: f64,
    ) -> Result<Self, VoteError> {
        let vote = Self {
            agent_id: agent_id.into(),
            action,
            confidence,
            weight: None,
        };
        vote.validate()?;
        Ok(vote)
    }

    pub fn with_weight(mut self, weight: f64) -> Result<Self, VoteError> {
        self.weight = Some(weight);
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), VoteError> {
        if self.agent_id.trim().is_empty() {
            return Err(VoteError::EmptyAgentId);
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(VoteError::ConfidenceOutOfRange {
                agent: self.agent_id.clone(),
                value: self.confidence,
            });
        }
        if let Some(w) = self.weight {
            if !w.is_finite() || w < 0.0 {
                return Err(VoteError::InvalidWeight {
                    agent: self.agent_id.clone(),
                    value: w,
                });
            }
        }
        Ok(())
    }

    pub fn effective_weight(&self) -> f64 {
        self.weight.unwrap_or(1.0)
    }
}

/// Weighted sums per action
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionTally {
    pub buy: f64,
    pub sell: f64,
    pub hold: f64,
}

impl ActionTally {
    pub fn total(&self) -> f64 {
        self.buy + self.sell + self.hold
    }

    pub fn get(&self, action: Action) -> f64 {
        match action {
            Action::Buy => self.buy,
            Action::Sell => self.sell,
            Action::Hold => self.hold,
        }
    }

    fn add(&mut self, action: Action, weight: f64) {
        match action {
            Action::Buy => self.buy += weight,
            Action::Sell => self.sell += weight,
            Action::Hold => self.hold += weight,
        }
    }
}

/// Agreed action for one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusDecision {
    pub action: Action,
    /// Winning weight ÷ total weight
    pub strength: f64,
    /// Weight-averaged confidence of the agreeing votes
    pub confidence: f64,
    pub votes_counted: usize,
    pub tally: ActionTally,
    pub timestamp: DateTime<Utc>,
}

/// Why a vote set did not produce a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NoConsensusReason {
    NoVotes,
    ZeroWeight,
    DirectionalTie { tally: ActionTally },
    BelowThreshold {
        action: Action,
        strength: f64,
        threshold: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConsensusOutcome {
    Reached(ConsensusDecision),
    NoConsensus(NoConsensusReason),
}

impl ConsensusOutcome {
    pub fn decision(&self) -> Option<&ConsensusDecision> {
        match self {
            ConsensusOutcome::Reached(decision) => Some(decision),
            ConsensusOutcome::NoConsensus(_) => None,
        }
    }

    /// Action the loop should take; no consensus is treated as hold
    pub fn effective_action(&self) -> Action {
        self.decision().map(|d| d.action).unwrap_or(Action::Hold)
    }

    pub fn is_reached(&self) -> bool {
        self.decision().is_some()
    }
}

/// Reduce a vote set to a single action.
///
/// Ties between hold and a directional action go to hold; a buy/sell tie with hold below
/// them yields no consensus. Pure: the timestamp is supplied by the caller.
pub fn decide(votes: &[AgentVote], threshold: f64, at: DateTime<Utc>) -> ConsensusOutcome {
    let mut tally = ActionTally::default();
    let mut counted = 0usize;

    for vote in votes {
        if let Err(e) = vote.validate() {
            warn!("Ignoring invalid vote: {}", e);
            continue;
        }
        tally.add(vote.action, vote.effective_weight());
        counted += 1;
    }

    if counted == 0 {
        return ConsensusOutcome::NoConsensus(NoConsensusReason::NoVotes);
    }

    let total = tally.total();
    if total <= 0.0 {
        return ConsensusOutcome::NoConsensus(NoConsensusReason::ZeroWeight);
    }

    let max = tally.buy.max(tally.sell).max(tally.hold);
    let tied = |sum: f64| (max - sum).abs() <= STRENGTH_EPSILON * total;

    let winner = if tied(tally.hold) {
        Action::Hold
    } else if tied(tally.buy) && tied(tally.sell) {
        return ConsensusOutcome::NoConsensus(NoConsensusReason::DirectionalTie { tally });
    } else if tied(tally.buy) {
        Action::Buy
    } else {
        Action::Sell
    };

    let winning_weight = tally.get(winner);
    let strength = (winning_weight / total).clamp(0.0, 1.0);

    if strength + STRENGTH_EPSILON < threshold {
        return ConsensusOutcome::NoConsensus(NoConsensusReason::BelowThreshold {
            action: winner,
            strength,
            threshold,
        });
    }

    let confidence = if winning_weight > 0.0 {
        votes
            .iter()
            .filter(|v| v.action == winner && v.validate().is_ok())
            .map(|v| v.confidence * v.effective_weight())
            .sum::<f64>()
            / winning_weight
    } else {
        0.0
    };

    ConsensusOutcome::Reached(ConsensusDecision {
        action: winner,
        strength,
        confidence,
        votes_counted: counted,
        tally,
        timestamp: at,
    })
}

/// Consensus engine bound to a validated threshold
#[derive(Debug, Clone, Copy)]
pub struct ConsensusEngine {
    threshold: f64,
}

impl ConsensusEngine {
    pub fn new(threshold: f64) -> Result<Self, ConfigError> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn decide(&self, votes: &[AgentVote], at: DateTime<Utc>) -> ConsensusOutcome {
        decide(votes, self.threshold, at)
    }
}

/// One audited consensus round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub votes: Vec<AgentVote>,
    pub outcome: ConsensusOutcome,
}

/// Bounded ring buffer of the most recent consensus rounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionHistory {
    capacity: usize,
    records: VecDeque<DecisionRecord>,
}

impl DecisionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: DecisionRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn latest(&self) -> Option<&DecisionRecord> {
        self.records.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DecisionRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DecisionHistory {
    fn default() -> Self {
        Self::new(10)
    }
}
