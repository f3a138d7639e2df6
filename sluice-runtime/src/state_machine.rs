//! Pipeline state machine

use crate::metrics::PIPELINE_TRANSITIONS_TOTAL;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Init,

    /// Base fact and dimension tables exist
    TablesEnsured,

    /// Base tables are populated
    DataLoaded,

    /// Base tables fetched and checked
    FetchedAndValidated,

    /// Staging schema rebuilt
    Staged,

    /// Aggregate table exists
    Aggregated,

    Done,

    /// A fatal error stopped the run
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    /// The state the happy path moves to next
    pub fn next(&self) -> Option<PipelineState> {
        use PipelineState::*;

        match self {
            Init => Some(TablesEnsured),
            TablesEnsured => Some(DataLoaded),
            DataLoaded => Some(FetchedAndValidated),
            FetchedAndValidated => Some(Staged),
            Staged => Some(Aggregated),
            Aggregated => Some(Done),
            Done | Failed => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Init => "init",
            PipelineState::TablesEnsured => "tables_ensured",
            PipelineState::DataLoaded => "data_loaded",
            PipelineState::FetchedAndValidated => "fetched_and_validated",
            PipelineState::Staged => "staged",
            PipelineState::Aggregated => "aggregated",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State machine for one pipeline run
pub struct PipelineStateMachine {
    current_state: PipelineState,
    state_history: Vec<(PipelineState, DateTime<Utc>)>,
}

impl PipelineStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: PipelineState::Init,
            state_history: vec![(PipelineState::Init, Utc::now())],
        }
    }

    pub fn current_state(&self) -> PipelineState {
        self.current_state
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: PipelineState) -> Result<()> {
        if !self.is_valid_transition(new_state) {
            return Err(Error::InvalidState(format!(
                "Invalid transition from {} to {}",
                self.current_state, new_state
            )));
        }

        let status = if new_state == PipelineState::Failed {
            "failure"
        } else {
            "success"
        };
        PIPELINE_TRANSITIONS_TOTAL
            .with_label_values(&[new_state.as_str(), status])
            .inc();

        self.current_state = new_state;
        self.state_history.push((new_state, Utc::now()));
        Ok(())
    }

    /// Move along the happy path
    pub fn advance(&mut self) -> Result<PipelineState> {
        let next = self.current_state.next().ok_or_else(|| {
            Error::InvalidState(format!("{} is terminal", self.current_state))
        })?;
        self.transition(next)?;
        Ok(next)
    }

    /// Only the next stage, or FAILED from any non-terminal stage
    fn is_valid_transition(&self, new_state: PipelineState) -> bool {
        if new_state == PipelineState::Failed {
            return !self.current_state.is_terminal();
        }
        self.current_state.next() == Some(new_state)
    }

    pub fn history(&self) -> &[(PipelineState, DateTime<Utc>)] {
        &self.state_history
    }
}

impl Default for PipelineStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
