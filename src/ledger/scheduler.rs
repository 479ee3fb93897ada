//! Batch Scheduler
//!
//! Places first-time depositors into batches, answers eligibility questions
//! and turns a batch into a concrete cycle plan for the executor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::LedgerState;
use crate::config::{BatchAssignment, ProtocolConfig};
use crate::domain::{Amount, BatchId, BatchReadiness};
use crate::error::{DcaeError, Result};

/// One member's share of a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedDebit {
    pub index: usize,
    pub invest_amount: Amount,
}

/// Members included in one execution, in batch order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CyclePlan {
    pub batch_id: BatchId,
    pub debits: Vec<PlannedDebit>,
    pub total_input: Amount,
    /// Members skipped because their balance cannot cover the invest amount
    pub skipped: usize,
}

/// Pick (or open) the batch a first-time depositor joins
pub fn assign_batch(state: &mut LedgerState, protocol: &ProtocolConfig) -> BatchId {
    match protocol.batch_assignment {
        BatchAssignment::FewestMembers => {
            while (state.batches.len() as u64) < protocol.batch_count.max(1) {
                state.open_batch(protocol.investment_interval_secs);
            }
            state
                .batches
                .iter()
                .min_by_key(|b| (b.member_count(), b.id))
                .map(|b| b.id)
                .unwrap_or_default()
        }
        BatchAssignment::Capacity => match state.batches.last() {
            Some(open) if open.member_count() < protocol.batch_capacity.max(1) => open.id,
            _ => state.open_batch(protocol.investment_interval_secs),
        },
    }
}

pub fn is_eligible(state: &LedgerState, batch_id: BatchId, now: DateTime<Utc>) -> Result<bool> {
    state
        .batch(batch_id)
        .map(|b| b.is_eligible(now))
        .ok_or(DcaeError::UnknownBatch(batch_id))
}

pub fn ensure_eligible(state: &LedgerState, batch_id: BatchId, now: DateTime<Utc>) -> Result<()> {
    let batch = state
        .batch(batch_id)
        .ok_or(DcaeError::UnknownBatch(batch_id))?;
    if batch.is_eligible(now) {
        return Ok(());
    }
    Err(DcaeError::IntervalNotElapsed {
        batch_id,
        next_eligible_at: batch.next_eligible_at().unwrap_or(now),
    })
}

/// Batches whose timer has run out
pub fn eligible_batches(state: &LedgerState, now: DateTime<Utc>) -> Vec<BatchId> {
    state
        .batches
        .iter()
        .filter(|b| b.is_eligible(now))
        .map(|b| b.id)
        .collect()
}

/// Eligibility check plus the members that would take part in the next cycle
pub fn plan_cycle(
    state: &LedgerState,
    batch_id: BatchId,
    now: DateTime<Utc>,
    min_deposit: Amount,
) -> Result<CyclePlan> {
    ensure_eligible(state, batch_id, now)?;
    let plan = collect_debits(state, batch_id, min_deposit)?;
    if plan.total_input == 0 {
        return Err(DcaeError::NothingToInvest { batch_id });
    }
    Ok(plan)
}

pub fn readiness(
    state: &LedgerState,
    batch_id: BatchId,
    now: DateTime<Utc>,
    min_deposit: Amount,
) -> Result<BatchReadiness> {
    let batch = state
        .batch(batch_id)
        .ok_or(DcaeError::UnknownBatch(batch_id))?;
    let plan = collect_debits(state, batch_id, min_deposit)?;

    Ok(BatchReadiness {
        batch_id,
        eligible: batch.is_eligible(now),
        member_count: batch.member_count(),
        funded_members: plan.debits.len(),
        investable_input: plan.total_input,
        next_eligible_at: batch.next_eligible_at(),
    })
}

fn collect_debits(state: &LedgerState, batch_id: BatchId, min_deposit: Amount) -> Result<CyclePlan> {
    let batch = state
        .batch(batch_id)
        .ok_or(DcaeError::UnknownBatch(batch_id))?;

    let mut debits = Vec::with_capacity(batch.member_count());
    let mut total_input: Amount = 0;
    let mut skipped = 0;

    for &index in &batch.members {
        let Some(participant) = state.participant_at(index) else {
            return Err(DcaeError::Internal(format!(
                "batch {batch_id} references missing participant {index}"
            )));
        };
        if !participant.can_cover_cycle(min_deposit) {
            skipped += 1;
            continue;
        }
        let invest_amount = participant.effective_invest_amount(min_deposit);
        total_input = total_input
            .checked_add(invest_amount)
            .ok_or(DcaeError::Overflow("total_input"))?;
        debits.push(PlannedDebit {
            index,
            invest_amount,
        });
    }

    Ok(CyclePlan {
        batch_id,
        debits,
        total_input,
        skipped,
    })
}
