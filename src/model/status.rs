// src/model/status.rs

//! Task status state machine and derived Stage/Request statuses.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a single host role command.
///
/// ```text
/// PENDING -> QUEUED -> IN_PROGRESS -> COMPLETED | FAILED | TIMEDOUT | ABORTED
///                          |
///                          +-> HOLDING | HOLDING_FAILED | HOLDING_TIMEDOUT
/// ```
///
/// `HOLDING*` statuses are parked: they wait for an operator to retry, skip
/// or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostRoleStatus {
    Pending,
    Queued,
    InProgress,
    Holding,
    HoldingFailed,
    HoldingTimedout,
    Completed,
    Failed,
    Timedout,
    Aborted,
    SkippedFailed,
}

impl HostRoleStatus {
    pub const ALL: [HostRoleStatus; 11] = [
        HostRoleStatus::Pending,
        HostRoleStatus::Queued,
        HostRoleStatus::InProgress,
        HostRoleStatus::Holding,
        HostRoleStatus::HoldingFailed,
        HostRoleStatus::HoldingTimedout,
        HostRoleStatus::Completed,
        HostRoleStatus::Failed,
        HostRoleStatus::Timedout,
        HostRoleStatus::Aborted,
        HostRoleStatus::SkippedFailed,
    ];

    /// No further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HostRoleStatus::Completed
                | HostRoleStatus::Failed
                | HostRoleStatus::Timedout
                | HostRoleStatus::Aborted
                | HostRoleStatus::SkippedFailed
        )
    }

    pub fn is_holding(self) -> bool {
        matches!(
            self,
            HostRoleStatus::Holding | HostRoleStatus::HoldingFailed | HostRoleStatus::HoldingTimedout
        )
    }

    /// Terminal and counted as a failure for Stage/Request purposes.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            HostRoleStatus::Failed | HostRoleStatus::Timedout | HostRoleStatus::Aborted
        )
    }

    /// Terminal and counted as a success for Stage gating.
    pub fn is_success(self) -> bool {
        matches!(self, HostRoleStatus::Completed | HostRoleStatus::SkippedFailed)
    }

    /// Work is outstanding on (or about to be sent to) an agent.
    pub fn is_in_flight(self) -> bool {
        matches!(self, HostRoleStatus::Queued | HostRoleStatus::InProgress)
    }

    /// Whether `self -> next` is an edge of the state machine.
    ///
    /// Terminal statuses have no outgoing edges. `IN_PROGRESS -> QUEUED` is the
    /// automatic retry edge; `HOLDING_FAILED/HOLDING_TIMEDOUT -> QUEUED` is the
    /// operator retry edge.
    pub fn can_transition_to(self, next: HostRoleStatus) -> bool {
        use HostRoleStatus::*;

        match self {
            Pending => matches!(next, Queued | Aborted | SkippedFailed),
            Queued => matches!(next, InProgress | Failed | Aborted),
            InProgress => matches!(
                next,
                Completed
                    | Failed
                    | Timedout
                    | Aborted
                    | Queued
                    | Holding
                    | HoldingFailed
                    | HoldingTimedout
            ),
            Holding => matches!(next, Completed | Aborted),
            HoldingFailed | HoldingTimedout => matches!(next, Queued | SkippedFailed | Aborted),
            Completed | Failed | Timedout | Aborted | SkippedFailed => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HostRoleStatus::Pending => "PENDING",
            HostRoleStatus::Queued => "QUEUED",
            HostRoleStatus::InProgress => "IN_PROGRESS",
            HostRoleStatus::Holding => "HOLDING",
            HostRoleStatus::HoldingFailed => "HOLDING_FAILED",
            HostRoleStatus::HoldingTimedout => "HOLDING_TIMEDOUT",
            HostRoleStatus::Completed => "COMPLETED",
            HostRoleStatus::Failed => "FAILED",
            HostRoleStatus::Timedout => "TIMEDOUT",
            HostRoleStatus::Aborted => "ABORTED",
            HostRoleStatus::SkippedFailed => "SKIPPED_FAILED",
        }
    }
}

impl fmt::Display for HostRoleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Count of tasks per status, used to derive the status of a Stage or a
/// Request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    counts: BTreeMap<HostRoleStatus, usize>,
    total: usize,
}

impl StatusSummary {
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = HostRoleStatus>,
    {
        let mut summary = StatusSummary::default();
        for status in statuses {
            *summary.counts.entry(status).or_insert(0) += 1;
            summary.total += 1;
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn count(&self, status: HostRoleStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> impl Iterator<Item = (HostRoleStatus, usize)> + '_ {
        self.counts.iter().map(|(s, n)| (*s, *n))
    }

    fn count_where(&self, pred: impl Fn(HostRoleStatus) -> bool) -> usize {
        self.counts
            .iter()
            .filter(|(s, _)| pred(**s))
            .map(|(_, n)| *n)
            .sum()
    }

    pub fn all_terminal(&self) -> bool {
        self.count_where(HostRoleStatus::is_terminal) == self.total
    }

    pub fn any_failure(&self) -> bool {
        self.count_where(HostRoleStatus::is_failure) > 0
    }

    /// Percentage of tasks that reached a terminal status.
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.count_where(HostRoleStatus::is_terminal) as f64 * 100.0 / self.total as f64
    }

    /// Derive the overall status, worst child first.
    ///
    /// With `tolerate_failures`, failed/timed-out children of a finished set
    /// count as completed (skippable Stages); aborted children never do.
    pub fn calculate(&self, tolerate_failures: bool) -> HostRoleStatus {
        use HostRoleStatus::*;

        if self.total == 0 {
            return Completed;
        }

        for holding in [HoldingTimedout, HoldingFailed, Holding] {
            if self.count(holding) > 0 {
                return holding;
            }
        }

        if self.all_terminal() {
            if !tolerate_failures {
                if self.count(Failed) > 0 {
                    return Failed;
                }
                if self.count(Timedout) > 0 {
                    return Timedout;
                }
            }
            if self.count(Aborted) > 0 {
                return Aborted;
            }
            return Completed;
        }

        if self.count(Pending) == self.total {
            Pending
        } else {
            InProgress
        }
    }
}

#[cfg(test)]
mod tests {
    use super::HostRoleStatus::*;
    use super::*;

    #[test]
    fn terminal_statuses_have_no_outgoing_edges() {
        for from in HostRoleStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for to in HostRoleStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn holding_only_resumes_to_operator_outcomes() {
        assert!(Holding.can_transition_to(Completed));
        assert!(!Holding.can_transition_to(Queued));
        assert!(HoldingFailed.can_transition_to(Queued));
        assert!(HoldingTimedout.can_transition_to(SkippedFailed));
        assert!(!HoldingFailed.can_transition_to(Pending));
    }

    #[test]
    fn summary_reports_worst_child() {
        let s = StatusSummary::from_statuses([Completed, Failed, Aborted]);
        assert_eq!(s.calculate(false), Failed);
        assert_eq!(s.calculate(true), Aborted);

        let s = StatusSummary::from_statuses([Completed, InProgress, HoldingFailed]);
        assert_eq!(s.calculate(false), HoldingFailed);

        let s = StatusSummary::from_statuses([Pending, Pending]);
        assert_eq!(s.calculate(false), Pending);

        let s = StatusSummary::from_statuses([Completed, Pending]);
        assert_eq!(s.calculate(false), InProgress);
        assert_eq!(s.percent_complete(), 50.0);
    }
}
