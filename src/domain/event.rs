use serde::{Deserialize, Serialize};

use super::{Amount, Asset, BatchId, ParticipantId};

/// Committed ledger mutations, recorded in the event journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Deposited {
        participant: ParticipantId,
        amount: Amount,
        funding_balance: Amount,
        batch_id: Option<BatchId>,
        first_deposit: bool,
    },
    InvestAmountSet {
        participant: ParticipantId,
        invest_amount: Amount,
    },
    Withdrawn {
        participant: ParticipantId,
        asset: Asset,
        amount: Amount,
    },
    BatchExecuted {
        batch_id: BatchId,
        caller: ParticipantId,
        total_input: Amount,
        quoted_output: Amount,
        min_output: Amount,
        actual_output: Amount,
        included_members: usize,
    },
    ReceiptMinted {
        participant: ParticipantId,
        amount: Amount,
    },
    ReceiptTransferred {
        from: ParticipantId,
        to: ParticipantId,
        amount: Amount,
    },
    RewardPaid {
        participant: ParticipantId,
        burned: Amount,
        nominal: Amount,
        payout: Amount,
    },
    ReserveFunded {
        from: ParticipantId,
        amount: Amount,
        reserve_balance: Amount,
    },
}

impl LedgerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::Deposited { .. } => "deposited",
            LedgerEvent::InvestAmountSet { .. } => "invest_amount_set",
            LedgerEvent::Withdrawn { .. } => "withdrawn",
            LedgerEvent::BatchExecuted { .. } => "batch_executed",
            LedgerEvent::ReceiptMinted { .. } => "receipt_minted",
            LedgerEvent::ReceiptTransferred { .. } => "receipt_transferred",
            LedgerEvent::RewardPaid { .. } => "reward_paid",
            LedgerEvent::ReserveFunded { .. } => "reserve_funded",
        }
    }
}
