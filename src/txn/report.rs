use std::fmt;

use crate::types::Unid;

/// Queue an element was drained from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueOp {
    /// Pending save.
    Update,
    /// Pending permanent delete.
    Remove,
}

/// What happened to one queued element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// The document was persisted.
    Saved,
    /// The save reported failure or raised; the reason is attached.
    SaveFailed(String),
    /// The document was deleted permanently.
    Removed,
    /// The delete raised.
    RemoveFailed(String),
    /// In-memory changes were discarded instead of applied.
    Reverted,
    /// Discarding in-memory changes raised.
    RevertFailed(String),
}

impl OutcomeStatus {
    /// True for the failure variants.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            OutcomeStatus::SaveFailed(_)
                | OutcomeStatus::RemoveFailed(_)
                | OutcomeStatus::RevertFailed(_)
        )
    }
}

/// Outcome of one queued element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementOutcome {
    /// Document key.
    pub unid: Unid,
    /// Queue the element came from.
    pub op: QueueOp,
    /// Result of processing it.
    pub status: OutcomeStatus,
}

/// Per-element result of a commit or rollback, in processing order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// One entry per drained element.
    pub outcomes: Vec<ElementOutcome>,
    /// Set when an abort-on-failure commit stopped early.
    pub aborted: bool,
}

impl CommitReport {
    pub(crate) fn push(&mut self, unid: Unid, op: QueueOp, status: OutcomeStatus) {
        self.outcomes.push(ElementOutcome { unid, op, status });
    }

    /// True when nothing failed and the commit was not aborted.
    pub fn is_clean(&self) -> bool {
        !self.aborted && self.failures().next().is_none()
    }

    /// Outcomes that failed.
    pub fn failures(&self) -> impl Iterator<Item = &ElementOutcome> {
        self.outcomes.iter().filter(|o| o.status.is_failure())
    }

    /// Number of outcomes with the given status.
    pub fn count(&self, status: &OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| &o.status == status).count()
    }

    /// Keys in processing order.
    pub fn unids(&self) -> impl Iterator<Item = &Unid> {
        self.outcomes.iter().map(|o| &o.unid)
    }

    /// Whether nothing was queued.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

impl fmt::Display for CommitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failures().count();
        write!(
            f,
            "{} element(s), {} failed{}",
            self.outcomes.len(),
            failed,
            if self.aborted { ", aborted" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_report_has_no_failures() {
        let mut report = CommitReport::default();
        report.push(Unid::random(), QueueOp::Update, OutcomeStatus::Saved);
        report.push(Unid::random(), QueueOp::Remove, OutcomeStatus::Removed);
        assert!(report.is_clean());
        assert_eq!(report.count(&OutcomeStatus::Saved), 1);

        report.push(
            Unid::random(),
            QueueOp::Update,
            OutcomeStatus::SaveFailed("disk".into()),
        );
        assert!(!report.is_clean());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.to_string(), "3 element(s), 1 failed");
    }
}
