//! Account Ledger
//!
//! Balance bookkeeping for participants. Everything here is a pure mutation of
//! [`LedgerState`]; asset transfers are performed by the engine after these
//! functions succeed on the working copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{scheduler, LedgerState};
use crate::config::ProtocolConfig;
use crate::domain::{Amount, Asset, BatchId, ParticipantId, ParticipantView};
use crate::error::{DcaeError, Result};

/// Post-state of a deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositOutcome {
    pub participant: ParticipantView,
    pub amount: Amount,
    pub first_deposit: bool,
    pub batch_id: BatchId,
}

/// Post-state of a withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalOutcome {
    pub participant: ParticipantView,
    pub asset: Asset,
    pub amount: Amount,
}

pub fn deposit(
    state: &mut LedgerState,
    protocol: &ProtocolConfig,
    who: &ParticipantId,
    amount: Amount,
    now: DateTime<Utc>,
) -> Result<DepositOutcome> {
    let minimum = Amount::from(protocol.min_deposit);
    if amount < minimum {
        return Err(DcaeError::BelowMinimum { amount, minimum });
    }

    let index = state.get_or_insert(who, now);
    let first_deposit = !state.participants[index].exists;

    let assigned = state.participants[index].batch_id;
    let batch_id = match assigned {
        Some(batch_id) => batch_id,
        None => {
            let batch_id = scheduler::assign_batch(state, protocol);
            state.batch_mut(batch_id)?.members.push(index);
            batch_id
        }
    };

    let participant = state.participant_at_mut(index)?;
    participant.funding_balance = participant
        .funding_balance
        .checked_add(amount)
        .ok_or(DcaeError::Overflow("funding_balance"))?;
    participant.batch_id = Some(batch_id);
    participant.exists = true;
    participant.updated_at = now;

    Ok(DepositOutcome {
        participant: ParticipantView::from_participant(participant, minimum),
        amount,
        first_deposit,
        batch_id,
    })
}

pub fn set_invest_amount(
    state: &mut LedgerState,
    protocol: &ProtocolConfig,
    who: &ParticipantId,
    amount: Amount,
    now: DateTime<Utc>,
) -> Result<ParticipantView> {
    let minimum = Amount::from(protocol.min_deposit);
    if amount < minimum {
        return Err(DcaeError::BelowMinimum { amount, minimum });
    }

    let participant = state.participant_mut(who)?;
    if !participant.exists {
        return Err(DcaeError::UnknownParticipant(who.to_string()));
    }
    participant.invest_amount = Some(amount);
    participant.updated_at = now;

    Ok(ParticipantView::from_participant(participant, minimum))
}

/// Zero the participant's whole balance of `asset` and return what it held
pub fn drain_balance(
    state: &mut LedgerState,
    protocol: &ProtocolConfig,
    who: &ParticipantId,
    asset: Asset,
    now: DateTime<Utc>,
) -> Result<WithdrawalOutcome> {
    let participant = state.participant_mut(who)?;
    let balance = match asset {
        Asset::Funding => &mut participant.funding_balance,
        Asset::Target => &mut participant.target_balance,
    };
    if *balance == 0 {
        return Err(DcaeError::NothingToWithdraw { asset });
    }
    let amount = std::mem::take(balance);
    participant.updated_at = now;

    Ok(WithdrawalOutcome {
        participant: ParticipantView::from_participant(
            participant,
            Amount::from(protocol.min_deposit),
        ),
        asset,
        amount,
    })
}

pub fn debit_funding(state: &mut LedgerState, index: usize, amount: Amount) -> Result<()> {
    let participant = state.participant_at_mut(index)?;
    participant.funding_balance = participant
        .funding_balance
        .checked_sub(amount)
        .ok_or_else(|| {
            DcaeError::Internal(format!(
                "participant {} cannot cover debit of {amount}",
                participant.id
            ))
        })?;
    Ok(())
}

pub fn credit_target(state: &mut LedgerState, index: usize, amount: Amount) -> Result<()> {
    let participant = state.participant_at_mut(index)?;
    participant.target_balance = participant
        .target_balance
        .checked_add(amount)
        .ok_or(DcaeError::Overflow("target_balance"))?;
    Ok(())
}
