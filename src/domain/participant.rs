use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Amount, BatchId, ParticipantId, ReceiptHolding};

/// Participant record (arena entry, never removed)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    /// Stable insertion index
    pub index: usize,
    /// Unallocated funding asset, withdrawable
    pub funding_balance: Amount,
    /// Per-cycle debit; `None` falls back to the protocol minimum deposit
    pub invest_amount: Option<Amount>,
    /// `None` only for keeper records that never deposited
    pub batch_id: Option<BatchId>,
    /// Accumulated target-asset proceeds, withdrawable
    pub target_balance: Amount,
    /// Set on first deposit
    pub exists: bool,
    pub receipt: ReceiptHolding,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(id: ParticipantId, index: usize, now: DateTime<Utc>) -> Self {
        Self {
            id,
            index,
            funding_balance: 0,
            invest_amount: None,
            batch_id: None,
            target_balance: 0,
            exists: false,
            receipt: ReceiptHolding::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount debited per executed cycle
    pub fn effective_invest_amount(&self, min_deposit: Amount) -> Amount {
        self.invest_amount.unwrap_or(min_deposit)
    }

    /// Whether this participant takes part in the next cycle
    pub fn can_cover_cycle(&self, min_deposit: Amount) -> bool {
        let invest = self.effective_invest_amount(min_deposit);
        invest > 0 && self.funding_balance >= invest
    }
}

/// Read-only view of a participant returned by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub id: ParticipantId,
    pub index: usize,
    pub funding_balance: Amount,
    pub invest_amount: Amount,
    pub batch_id: Option<BatchId>,
    pub target_balance: Amount,
    pub receipt_balance: Amount,
    pub exists: bool,
}

impl ParticipantView {
    pub fn from_participant(participant: &Participant, min_deposit: Amount) -> Self {
        Self {
            id: participant.id.clone(),
            index: participant.index,
            funding_balance: participant.funding_balance,
            invest_amount: participant.effective_invest_amount(min_deposit),
            batch_id: participant.batch_id,
            target_balance: participant.target_balance,
            receipt_balance: participant.receipt.balance,
            exists: participant.exists,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invest_amount_defaults_to_minimum() {
        let mut p = Participant::new(ParticipantId::from("alice"), 0, Utc::now());
        assert_eq!(p.effective_invest_amount(1_000_000), 1_000_000);

        p.invest_amount = Some(5_000_000);
        assert_eq!(p.effective_invest_amount(1_000_000), 5_000_000);
    }

    #[test]
    fn test_can_cover_cycle() {
        let mut p = Participant::new(ParticipantId::from("alice"), 0, Utc::now());
        p.funding_balance = 999_999;
        assert!(!p.can_cover_cycle(1_000_000));

        p.funding_balance = 1_000_000;
        assert!(p.can_cover_cycle(1_000_000));

        p.invest_amount = Some(2_000_000);
        assert!(!p.can_cover_cycle(1_000_000));
    }
}
