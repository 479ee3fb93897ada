use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::BatchId;

/// A group of participants sharing one execution timer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    /// Participant arena indexes, append-only
    pub members: Vec<usize>,
    /// `None` until the first successful execution
    pub last_execution: Option<DateTime<Utc>>,
    /// Minimum elapsed seconds between executions
    pub interval_secs: u64,
    /// Number of successful executions
    pub executions: u64,
}

impl Batch {
    pub fn new(id: BatchId, interval_secs: u64) -> Self {
        Self {
            id,
            members: Vec::new(),
            last_execution: None,
            interval_secs,
            executions: 0,
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// `None` when the interval is too long for a `Duration`
    fn interval(&self) -> Option<Duration> {
        i64::try_from(self.interval_secs)
            .ok()
            .and_then(Duration::try_seconds)
    }

    /// Earliest time the batch may run again; `None` means "now"
    pub fn next_eligible_at(&self) -> Option<DateTime<Utc>> {
        let last = self.last_execution?;
        Some(
            self.interval()
                .and_then(|interval| last.checked_add_signed(interval))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }

    /// `now - last_execution >= interval`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.last_execution {
            None => true,
            Some(last) => self
                .interval()
                .map_or(false, |interval| now.signed_duration_since(last) >= interval),
        }
    }

    pub fn mark_executed(&mut self, now: DateTime<Utc>) {
        self.last_execution = Some(now);
        self.executions += 1;
    }
}

/// Read-only batch view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchView {
    pub id: BatchId,
    pub member_count: usize,
    pub last_execution: Option<DateTime<Utc>>,
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub interval_secs: u64,
    pub executions: u64,
}

impl From<&Batch> for BatchView {
    fn from(batch: &Batch) -> Self {
        Self {
            id: batch.id,
            member_count: batch.member_count(),
            last_execution: batch.last_execution,
            next_eligible_at: batch.next_eligible_at(),
            interval_secs: batch.interval_secs,
            executions: batch.executions,
        }
    }
}

/// Pre-trigger check a keeper runs before paying for an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReadiness {
    pub batch_id: BatchId,
    pub eligible: bool,
    pub member_count: usize,
    pub funded_members: usize,
    pub investable_input: super::Amount,
    pub next_eligible_at: Option<DateTime<Utc>>,
}

impl BatchReadiness {
    pub fn is_ready(&self) -> bool {
        self.eligible && self.funded_members > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_batch_is_eligible() {
        let batch = Batch::new(0, 86_400);
        assert!(batch.is_eligible(Utc::now()));
        assert_eq!(batch.next_eligible_at(), None);
    }

    #[test]
    fn test_eligibility_boundary() {
        let t0 = Utc::now();
        let mut batch = Batch::new(0, 120);
        batch.mark_executed(t0);

        assert!(!batch.is_eligible(t0));
        assert!(!batch.is_eligible(t0 + Duration::seconds(119)));
        assert!(batch.is_eligible(t0 + Duration::seconds(120)));
        assert_eq!(batch.next_eligible_at(), Some(t0 + Duration::seconds(120)));
        assert_eq!(batch.executions, 1);
    }

    #[test]
    fn test_unrepresentable_interval_never_elapses() {
        let t0 = Utc::now();
        for interval_secs in [10u64.pow(16), u64::MAX] {
            let mut batch = Batch::new(0, interval_secs);
            assert!(batch.is_eligible(t0));
            batch.mark_executed(t0);

            assert!(!batch.is_eligible(t0 + Duration::seconds(1)));
            assert!(!batch.is_eligible(t0 + Duration::days(365 * 100)));
            assert_eq!(batch.next_eligible_at(), Some(DateTime::<Utc>::MAX_UTC));
        }
    }

    #[test]
    fn test_clock_behind_last_execution_is_not_eligible() {
        let t0 = Utc::now();
        let mut batch = Batch::new(0, 0);
        batch.mark_executed(t0);
        assert!(!batch.is_eligible(t0 - Duration::seconds(1)));
        assert!(batch.is_eligible(t0));
    }
}
