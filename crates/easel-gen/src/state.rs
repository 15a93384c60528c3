//! Progress and outcome of one request
//!
//! Only the coordinator driving a request mutates its state. Everyone else
//! sees cloned snapshots.

use crate::request::{GenerationRequest, GenerationUnit, UnitError, UnitResult, UnitStatus};
use chrono::{DateTime, Utc};
use easel_core::{RequestId, UnitId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
}

impl OverallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OverallStatus::Completed | OverallStatus::Partial | OverallStatus::Failed
        )
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallStatus::Pending => write!(f, "pending"),
            OverallStatus::Running => write!(f, "running"),
            OverallStatus::Completed => write!(f, "completed"),
            OverallStatus::Partial => write!(f, "partial"),
            OverallStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Derived, mutable aggregate over a request's units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationState {
    pub request_id: RequestId,
    pub overall_status: OverallStatus,
    /// Units that succeeded
    pub completed_count: usize,
    pub total_count: usize,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Units in request order
    pub units: Vec<GenerationUnit>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl GenerationState {
    /// Fresh state for a request that has not been dispatched yet
    pub fn new(request: &GenerationRequest) -> Self {
        let mut state = Self {
            request_id: request.request_id.clone(),
            overall_status: OverallStatus::Pending,
            completed_count: 0,
            total_count: request.units.len(),
            error_message: None,
            units: request.units.clone(),
            started_at: None,
            finished_at: None,
        };
        state.refresh();
        state
    }

    /// Record that dispatch began
    pub fn begin(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.refresh();
    }

    /// Fraction of units in a terminal state (0.0 ..= 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_count == 0 {
            return 1.0;
        }
        let terminal = self.units.iter().filter(|u| u.is_terminal()).count();
        terminal as f64 / self.total_count as f64
    }

    pub fn unit(&self, unit_id: &UnitId) -> Option<&GenerationUnit> {
        self.units.iter().find(|u| &u.unit_id == unit_id)
    }

    pub fn failed_count(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.status == UnitStatus::Failed)
            .count()
    }

    /// `pending -> in_flight` for the unit at `index`
    pub fn mark_in_flight(&mut self, index: usize) -> bool {
        let changed = self
            .units
            .get_mut(index)
            .map(|u| u.mark_in_flight())
            .unwrap_or(false);
        self.refresh();
        changed
    }

    /// Record a succeeded unit
    pub fn record_success(&mut self, index: usize, result: UnitResult, attempted: Vec<String>) -> bool {
        let changed = self
            .units
            .get_mut(index)
            .map(|u| u.succeed(result, attempted))
            .unwrap_or(false);
        self.refresh();
        changed
    }

    /// Record a failed unit
    pub fn record_failure(&mut self, index: usize, error: UnitError, attempted: Vec<String>) -> bool {
        let changed = self
            .units
            .get_mut(index)
            .map(|u| u.fail(error, attempted))
            .unwrap_or(false);
        self.refresh();
        changed
    }

    /// Recompute counts and the overall status from the units
    pub fn refresh(&mut self) {
        self.total_count = self.units.len();
        self.completed_count = self
            .units
            .iter()
            .filter(|u| u.status == UnitStatus::Succeeded)
            .count();
        let failed = self.failed_count();
        let all_terminal = self.units.iter().all(|u| u.is_terminal());

        self.overall_status = if self.units.is_empty() {
            OverallStatus::Failed
        } else if !all_terminal {
            if self.started_at.is_some() {
                OverallStatus::Running
            } else {
                OverallStatus::Pending
            }
        } else if failed == 0 {
            OverallStatus::Completed
        } else if self.completed_count == 0 {
            OverallStatus::Failed
        } else {
            OverallStatus::Partial
        };

        self.error_message = match self.overall_status {
            OverallStatus::Failed if self.units.is_empty() => {
                Some("request has no units".to_string())
            }
            OverallStatus::Failed | OverallStatus::Partial => Some(self.failure_summary(failed)),
            _ => None,
        };

        if self.overall_status.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
    }

    fn failure_summary(&self, failed: usize) -> String {
        let first = self
            .units
            .iter()
            .find_map(|u| u.error.as_ref().map(|e| format!("{}: {}", u.unit_id, e)));
        match first {
            Some(first) if failed > 1 => {
                format!("{} of {} units failed; first: {}", failed, self.total_count, first)
            }
            Some(first) => format!("{} of {} units failed: {}", failed, self.total_count, first),
            None => format!("{} of {} units failed", failed, self.total_count),
        }
    }
}
