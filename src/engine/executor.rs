//! Investment Executor
//!
//! Synchronous half of a batch execution: the slippage floor derived from the
//! oracle quote, the split of the swap output, and the ledger writes that
//! follow a successful swap. The engine performs the adapter calls in between.
//!
//! Split order for `actual_output`:
//! 1. protocol fee into the reward reserve
//! 2. caller incentive, only when the caller is not an included member
//! 3. pro-rata floor shares of the rest by invest amount
//! 4. the rounding remainder to the configured dust recipient

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::math::{apply_bps, mul_div_floor};
use crate::config::{DustRecipient, ExecutionConfig};
use crate::domain::{Amount, BatchId, ParticipantId, BPS_DENOMINATOR};
use crate::error::{DcaeError, Result};
use crate::ledger::{accounts, CyclePlan, LedgerState};

/// Lowest acceptable swap output for `quote`
pub fn min_output(quote: Amount, max_slippage_bps: u32) -> Result<Amount> {
    let tolerated = BPS_DENOMINATOR.checked_sub(max_slippage_bps).ok_or_else(|| {
        DcaeError::Validation(format!("max_slippage_bps {max_slippage_bps} exceeds 10000"))
    })?;
    apply_bps(quote, tolerated, "min_output")
}

/// Reject a fill below the slippage floor
pub fn check_fill(actual_output: Amount, min_output: Amount) -> Result<()> {
    if actual_output < min_output {
        return Err(DcaeError::SwapFailed(format!(
            "output {actual_output} below minimum {min_output}"
        )));
    }
    Ok(())
}

/// One included member's share of a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberCredit {
    pub participant: ParticipantId,
    pub index: usize,
    pub invest_amount: Amount,
    /// Target asset credited; also the number of receipt units minted
    pub credit: Amount,
}

/// How one swap output is divided
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub members: Vec<MemberCredit>,
    pub protocol_fee: Amount,
    pub caller_incentive: Amount,
    pub dust: Amount,
    pub dust_recipient: DustRecipient,
}

impl Distribution {
    /// Everything credited to the caller's target balance
    pub fn caller_credit(&self) -> Amount {
        match self.dust_recipient {
            DustRecipient::Caller => self.caller_incentive + self.dust,
            DustRecipient::LastMember => self.caller_incentive,
        }
    }

    pub fn member_total(&self) -> Amount {
        self.members.iter().map(|m| m.credit).sum()
    }

    /// Must equal the swap output
    pub fn total_credited(&self) -> Amount {
        self.member_total() + self.caller_credit() + self.protocol_fee
    }
}

/// Divide `actual_output` between reserve, caller and the planned members
pub fn split_output(
    state: &LedgerState,
    plan: &CyclePlan,
    actual_output: Amount,
    caller_is_member: bool,
    execution: &ExecutionConfig,
) -> Result<Distribution> {
    let protocol_fee = apply_bps(actual_output, execution.protocol_fee_bps, "protocol_fee")?;
    let caller_incentive = if caller_is_member {
        0
    } else {
        apply_bps(actual_output, execution.caller_incentive_bps, "caller_incentive")?
    };
    let distributable = actual_output
        .checked_sub(protocol_fee)
        .and_then(|rest| rest.checked_sub(caller_incentive))
        .ok_or_else(|| DcaeError::Internal("fee and incentive exceed swap output".into()))?;

    let mut members = Vec::with_capacity(plan.debits.len());
    let mut assigned: Amount = 0;
    for debit in &plan.debits {
        let participant = state.participant_at(debit.index).ok_or_else(|| {
            DcaeError::Internal(format!("planned participant {} missing", debit.index))
        })?;
        let credit = mul_div_floor(distributable, debit.invest_amount, plan.total_input, "pro_rata")?;
        assigned += credit;
        members.push(MemberCredit {
            participant: participant.id.clone(),
            index: debit.index,
            invest_amount: debit.invest_amount,
            credit,
        });
    }

    let dust = distributable - assigned;
    if execution.dust_recipient == DustRecipient::LastMember {
        if let Some(last) = members.last_mut() {
            last.credit += dust;
        }
    }

    Ok(Distribution {
        members,
        protocol_fee,
        caller_incentive,
        dust,
        dust_recipient: execution.dust_recipient,
    })
}

/// Take every planned invest amount out of the members' funding balances
pub fn debit_members(state: &mut LedgerState, plan: &CyclePlan) -> Result<()> {
    for debit in &plan.debits {
        accounts::debit_funding(state, debit.index, debit.invest_amount)?;
    }
    Ok(())
}

/// Post a distribution: credits, receipt mints, reserve and totals
pub fn apply_distribution(
    state: &mut LedgerState,
    plan: &CyclePlan,
    distribution: &Distribution,
    caller: &ParticipantId,
    actual_output: Amount,
    now: DateTime<Utc>,
) -> Result<()> {
    for member in &distribution.members {
        accounts::credit_target(state, member.index, member.credit)?;
        state
            .participant_at_mut(member.index)?
            .receipt
            .mint(member.credit, now)?;
        state.receipt_supply = state
            .receipt_supply
            .checked_add(member.credit)
            .ok_or(DcaeError::Overflow("receipt_supply"))?;
    }

    let caller_credit = distribution.caller_credit();
    if caller_credit > 0 {
        let index = state.get_or_insert(caller, now);
        accounts::credit_target(state, index, caller_credit)?;
    }

    state.credit_reserve(distribution.protocol_fee)?;
    state.total_invested = state
        .total_invested
        .checked_add(plan.total_input)
        .ok_or(DcaeError::Overflow("total_invested"))?;
    state.total_acquired = state
        .total_acquired
        .checked_add(actual_output)
        .ok_or(DcaeError::Overflow("total_acquired"))?;
    Ok(())
}

/// Result of one committed batch execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub batch_id: BatchId,
    pub caller: ParticipantId,
    pub total_input: Amount,
    pub quoted_output: Amount,
    pub min_output: Amount,
    pub actual_output: Amount,
    pub members: Vec<MemberCredit>,
    /// Members skipped for insufficient funding
    pub skipped_members: usize,
    pub protocol_fee: Amount,
    pub caller_credit: Amount,
    pub dust: Amount,
    pub executed_at: DateTime<Utc>,
    pub next_eligible_at: Option<DateTime<Utc>>,
}

impl ExecutionReport {
    pub fn total_credited(&self) -> Amount {
        let members: Amount = self.members.iter().map(|m| m.credit).sum();
        members + self.caller_credit + self.protocol_fee
    }
}
