use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use crate::models::{StepReading, StepSource};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub(crate) struct PendingRedirect {
    pub token: String,
    pub generation: u64,
}

/// In-memory session state of the aggregator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorState {
    pub current_steps: u64,
    pub last_source: Option<StepSource>,
    pub daily_goal: NonZeroU32,
    /// Set by the first failed connection; no source connects again this session.
    pub degraded: bool,
    connections: BTreeMap<StepSource, ConnectionState>,
    #[serde(skip)]
    generations: HashMap<StepSource, u64>,
    #[serde(skip)]
    next_generation: u64,
    #[serde(skip)]
    notice_shown: bool,
    #[serde(skip)]
    pending_redirects: HashMap<StepSource, PendingRedirect>,
}

impl AggregatorState {
    pub fn new(daily_goal: NonZeroU32) -> Self {
        Self {
            current_steps: 0,
            last_source: None,
            daily_goal,
            degraded: false,
            connections: BTreeMap::new(),
            generations: HashMap::new(),
            next_generation: 0,
            notice_shown: false,
            pending_redirects: HashMap::new(),
        }
    }

    pub fn connection(&self, source: StepSource) -> ConnectionState {
        self.connections.get(&source).copied().unwrap_or_default()
    }

    pub fn connections(&self) -> &BTreeMap<StepSource, ConnectionState> {
        &self.connections
    }

    /// Optimistic update: the last reported value wins in memory.
    pub fn apply_reading(&mut self, reading: &StepReading) {
        self.current_steps = reading.step_count;
        self.last_source = Some(reading.source);
    }

    /// Percentage of the goal reached, capped at 100.
    pub fn goal_progress(&self) -> u8 {
        let ratio = self.current_steps.saturating_mul(100) / u64::from(self.daily_goal.get());
        ratio.min(100) as u8
    }

    /// Starts a connection attempt and returns its generation, or `None` when degraded.
    pub fn begin_connect(&mut self, source: StepSource) -> Option<u64> {
        if self.degraded {
            return None;
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        self.generations.insert(source, generation);
        self.connections.insert(source, ConnectionState::Connecting);
        Some(generation)
    }

    /// Whether a result from attempt `generation` may still touch state.
    pub fn accepts(&self, source: StepSource, generation: u64) -> bool {
        !self.degraded
            && self.generations.get(&source) == Some(&generation)
            && self.connection(source) != ConnectionState::Disconnected
    }

    pub fn mark_connected(&mut self, source: StepSource) {
        self.connections.insert(source, ConnectionState::Connected);
    }

    /// Drops `source` back to disconnected and invalidates its in-flight attempt.
    pub fn mark_disconnected(&mut self, source: StepSource) {
        self.generations.remove(&source);
        self.pending_redirects.remove(&source);
        if source.is_connectable() {
            self.connections.insert(source, ConnectionState::Disconnected);
        }
    }

    /// One strike: every source is pinned disconnected until the session restarts.
    pub fn enter_degraded(&mut self) {
        self.degraded = true;
        self.generations.clear();
        self.pending_redirects.clear();
        for state in self.connections.values_mut() {
            *state = ConnectionState::Disconnected;
        }
    }

    /// True exactly once per session.
    pub fn claim_notice(&mut self) -> bool {
        !std::mem::replace(&mut self.notice_shown, true)
    }

    pub(crate) fn set_pending_redirect(&mut self, source: StepSource, pending: PendingRedirect) {
        self.pending_redirects.insert(source, pending);
    }

    pub(crate) fn take_pending_redirect(&mut self, source: StepSource) -> Option<PendingRedirect> {
        self.pending_redirects.remove(&source)
    }
}
