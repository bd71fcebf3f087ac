use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::BudgetConfig;

#[derive(Debug, Error, PartialEq)]
pub enum BudgetError {
    #[error("privacy budget exhausted for session {session_id}: {requested} requested, {remaining} remaining")]
    Exhausted {
        session_id: u64,
        requested: f64,
        remaining: f64,
    },
    #[error("release limit exceeded for session {session_id}")]
    ReleaseLimit { session_id: u64 },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BudgetLedgerSnapshot {
    pub session_id: u64,
    pub epsilon_consumed: f64,
    pub releases_seen: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BudgetClaim {
    pub epsilon_spent: f64,
    pub epsilon_remaining: f64,
    pub releases_remaining: u32,
}

#[derive(Clone, Debug, Default)]
struct SessionBudget {
    epsilon_spent: f64,
    releases: u32,
}

/// Per-session epsilon accounting under sequential composition. A claim is
/// all-or-nothing and must succeed before the mechanism draws any noise.
pub struct PrivacyBudgetLedger {
    config: BudgetConfig,
    sessions: HashMap<u64, SessionBudget>,
}

impl PrivacyBudgetLedger {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }

    pub fn claim(&mut self, session_id: u64, epsilon: f64) -> Result<BudgetClaim, BudgetError> {
        let state = self.sessions.entry(session_id).or_default();
        if state.releases >= self.config.max_releases_per_session {
            return Err(BudgetError::ReleaseLimit { session_id });
        }
        let total = state.epsilon_spent + epsilon;
        if total > self.config.session_epsilon {
            return Err(BudgetError::Exhausted {
                session_id,
                requested: epsilon,
                remaining: (self.config.session_epsilon - state.epsilon_spent).max(0.0),
            });
        }
        state.epsilon_spent = total;
        state.releases += 1;
        Ok(BudgetClaim {
            epsilon_spent: epsilon,
            epsilon_remaining: (self.config.session_epsilon - total).max(0.0),
            releases_remaining: self
                .config
                .max_releases_per_session
                .saturating_sub(state.releases),
        })
    }

    /// Closes a session and drops its entry, returning what it spent.
    /// Callers must not reuse a settled id for the same data.
    pub fn settle(&mut self, session_id: u64) -> Option<BudgetLedgerSnapshot> {
        self.sessions
            .remove(&session_id)
            .map(|state| BudgetLedgerSnapshot {
                session_id,
                epsilon_consumed: state.epsilon_spent,
                releases_seen: state.releases,
            })
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn snapshot(&self, session_id: u64) -> BudgetLedgerSnapshot {
        let state = self
            .sessions
            .get(&session_id)
            .cloned()
            .unwrap_or_default();
        BudgetLedgerSnapshot {
            session_id,
            epsilon_consumed: state.epsilon_spent,
            releases_seen: state.releases,
        }
    }
}
