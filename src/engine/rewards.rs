//! Receipt rewards
//!
//! Receipt units age from their (weighted) mint time. Between the minimum and
//! maximum age the redeemable ratio climbs linearly from the floor ratio to 1.
//! Burning always consumes the holder's whole bucket.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::math::mul_div_floor;
use crate::config::{RewardConfig, MAX_FLOOR_RATIO_SCALE};
use crate::domain::{Amount, ClaimStage, ParticipantId, ReceiptHolding};
use crate::error::{DcaeError, Result};
use crate::ledger::LedgerState;

const SECS_PER_DAY: i64 = 86_400;

/// Linear vesting curve for receipt burns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardSchedule {
    min_age_secs: i64,
    max_age_secs: i64,
    /// Normalized so `mantissa / 10^scale` is exact
    floor_ratio: Decimal,
}

impl RewardSchedule {
    pub fn new(min_age_secs: i64, max_age_secs: i64, floor_ratio: Decimal) -> Result<Self> {
        if min_age_secs < 0 || max_age_secs <= min_age_secs {
            return Err(DcaeError::Validation(format!(
                "reward ages must satisfy 0 <= min < max, got {min_age_secs}..{max_age_secs}"
            )));
        }
        if floor_ratio < Decimal::ZERO || floor_ratio > Decimal::ONE {
            return Err(DcaeError::Validation(format!(
                "floor ratio {floor_ratio} outside [0, 1]"
            )));
        }
        let floor_ratio = floor_ratio.normalize();
        if floor_ratio.scale() > MAX_FLOOR_RATIO_SCALE {
            return Err(DcaeError::Validation(format!(
                "floor ratio {floor_ratio} has more than {MAX_FLOOR_RATIO_SCALE} decimal places"
            )));
        }
        Ok(Self {
            min_age_secs,
            max_age_secs,
            floor_ratio,
        })
    }

    pub fn from_config(config: &RewardConfig) -> Result<Self> {
        Self::new(
            i64::from(config.min_age_days) * SECS_PER_DAY,
            i64::from(config.max_age_days) * SECS_PER_DAY,
            config.floor_ratio,
        )
    }

    /// Ratio for a holding of `age_secs`; errors below the minimum age
    pub fn ratio_at(&self, age_secs: i64) -> Result<Decimal> {
        if age_secs < self.min_age_secs {
            return Err(DcaeError::ClaimNotMature {
                age_secs,
                min_age_secs: self.min_age_secs,
            });
        }
        if age_secs >= self.max_age_secs {
            return Ok(Decimal::ONE);
        }
        let elapsed = Decimal::from(age_secs - self.min_age_secs);
        let span = Decimal::from(self.max_age_secs - self.min_age_secs);
        let ratio = self.floor_ratio + elapsed / span * (Decimal::ONE - self.floor_ratio);
        Ok(ratio.min(Decimal::ONE).max(self.floor_ratio))
    }

    /// `floor(claim * ratio_at(age))`, computed in integers
    pub fn nominal_payout(&self, claim: Amount, age_secs: i64) -> Result<Amount> {
        if age_secs < self.min_age_secs {
            return Err(DcaeError::ClaimNotMature {
                age_secs,
                min_age_secs: self.min_age_secs,
            });
        }
        if age_secs >= self.max_age_secs {
            return Ok(claim);
        }

        // ratio = (floor * span + elapsed * (1 - floor)) / span
        //       = (fm * span + elapsed * (10^s - fm)) / (10^s * span)
        let scale = 10u128
            .checked_pow(self.floor_ratio.scale())
            .ok_or(DcaeError::Overflow("floor ratio scale"))?;
        let fm = u128::try_from(self.floor_ratio.mantissa())
            .map_err(|_| DcaeError::Internal("negative floor ratio".into()))?;
        let span = (self.max_age_secs - self.min_age_secs) as u128;
        let elapsed = (age_secs - self.min_age_secs) as u128;

        let numerator = fm
            .checked_mul(span)
            .and_then(|a| elapsed.checked_mul(scale - fm).and_then(|b| a.checked_add(b)))
            .ok_or(DcaeError::Overflow("reward ratio"))?;
        let denominator = scale
            .checked_mul(span)
            .ok_or(DcaeError::Overflow("reward ratio"))?;
        mul_div_floor(claim, numerator, denominator, "reward payout")
    }

    pub fn stage(&self, holding: &ReceiptHolding, now: DateTime<Utc>) -> ClaimStage {
        if holding.is_empty() {
            return ClaimStage::Empty;
        }
        let age = holding.age_secs(now);
        if age < self.min_age_secs {
            ClaimStage::Maturing
        } else if age >= self.max_age_secs {
            ClaimStage::Matured
        } else {
            ClaimStage::Redeemable
        }
    }
}

/// Result of burning a holder's receipts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnOutcome {
    pub participant: ParticipantId,
    pub burned: Amount,
    pub age_secs: i64,
    pub ratio: Decimal,
    /// Entitlement before the reserve cap
    pub nominal: Amount,
    pub payout: Amount,
    pub reserve_after: Amount,
}

impl BurnOutcome {
    /// Entitlement the reserve could not cover
    pub fn shortfall(&self) -> Amount {
        self.nominal - self.payout
    }
}

/// Burn the whole holding and take the payout out of the reserve
pub fn burn(
    state: &mut LedgerState,
    schedule: &RewardSchedule,
    who: &ParticipantId,
    now: DateTime<Utc>,
) -> Result<BurnOutcome> {
    // an identity never seen holds zero receipts
    let holding = match state.participant(who) {
        Some(p) if !p.receipt.is_empty() => p.receipt.clone(),
        _ => return Err(DcaeError::NoClaims),
    };

    let age_secs = holding.age_secs(now);
    let ratio = schedule.ratio_at(age_secs)?;
    let nominal = schedule.nominal_payout(holding.balance, age_secs)?;
    let payout = nominal.min(state.reserve);

    let participant = state.participant_mut(who)?;
    participant.receipt.take(holding.balance)?;
    participant.updated_at = now;

    state.receipt_supply = state
        .receipt_supply
        .checked_sub(holding.balance)
        .ok_or_else(|| DcaeError::Internal("receipt supply below holder balance".into()))?;
    state.reserve -= payout;

    Ok(BurnOutcome {
        participant: who.clone(),
        burned: holding.balance,
        age_secs,
        ratio,
        nominal,
        payout,
        reserve_after: state.reserve,
    })
}

/// Result of moving receipt units between holders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub from: ParticipantId,
    pub to: ParticipantId,
    pub amount: Amount,
    pub from_balance: Amount,
    pub to_balance: Amount,
}

/// Move `amount` receipt units; they keep the sender's weighted mint time
pub fn transfer(
    state: &mut LedgerState,
    from: &ParticipantId,
    to: &ParticipantId,
    amount: Amount,
    now: DateTime<Utc>,
) -> Result<TransferOutcome> {
    if amount == 0 {
        return Err(DcaeError::Validation("transfer amount must be positive".into()));
    }
    if from == to {
        return Err(DcaeError::Validation("cannot transfer receipts to self".into()));
    }

    let sender = state.participant_mut(from)?;
    let mint_secs = sender.receipt.weighted_mint_secs;
    sender.receipt.take(amount)?;
    sender.updated_at = now;
    let from_balance = sender.receipt.balance;

    let index = state.get_or_insert(to, now);
    let recipient = state.participant_at_mut(index)?;
    recipient.receipt.absorb(amount, mint_secs)?;
    recipient.updated_at = now;

    Ok(TransferOutcome {
        from: from.clone(),
        to: to.clone(),
        amount,
        from_balance,
        to_balance: recipient.receipt.balance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn schedule() -> RewardSchedule {
        RewardSchedule::from_config(&AppConfig::default_config().rewards).unwrap()
    }

    fn days(n: i64) -> i64 {
        n * SECS_PER_DAY
    }

    fn holder(state: &mut LedgerState, who: &str, amount: Amount, minted: DateTime<Utc>) {
        let index = state.get_or_insert(&ParticipantId::from(who), minted);
        state.participants[index].receipt.mint(amount, minted).unwrap();
        state.receipt_supply += amount;
    }

    #[test]
    fn test_fine_grained_floor_ratio() {
        let s = RewardSchedule::new(days(30), days(180), dec!(0.123456789012345)).unwrap();
        // 0.2 + 0.8 * floor at 60 days
        assert_eq!(
            s.nominal_payout(10u128.pow(18), days(60)).unwrap(),
            298_765_431_209_876_000
        );
        assert_eq!(s.nominal_payout(Amount::MAX, days(180)).unwrap(), Amount::MAX);

        let err = RewardSchedule::new(days(30), days(180), dec!(0.1234567890123456789));
        assert!(matches!(err, Err(DcaeError::Validation(_))));
    }

    #[test]
    fn test_ratio_curve() {
        let s = schedule();
        assert_eq!(s.ratio_at(days(30)).unwrap(), dec!(0.40));
        assert_eq!(s.ratio_at(days(60)).unwrap(), dec!(0.52));
        assert_eq!(s.ratio_at(days(105)).unwrap(), dec!(0.70));
        assert_eq!(s.ratio_at(days(180)).unwrap(), Decimal::ONE);
        assert_eq!(s.ratio_at(days(400)).unwrap(), Decimal::ONE);
        assert!(matches!(
            s.ratio_at(days(30) - 1),
            Err(DcaeError::ClaimNotMature { .. })
        ));
    }

    #[test]
    fn test_nominal_payout_is_floor_of_ratio() {
        let s = schedule();
        assert_eq!(s.nominal_payout(1_000, days(30)).unwrap(), 400);
        assert_eq!(s.nominal_payout(1_000, days(60)).unwrap(), 520);
        assert_eq!(s.nominal_payout(1_000, days(180)).unwrap(), 1_000);
        assert_eq!(s.nominal_payout(3, days(60)).unwrap(), 1);
    }

    #[test]
    fn test_nominal_payout_large_claim() {
        let s = schedule();
        let claim: Amount = 10u128.pow(30);
        assert_eq!(s.nominal_payout(claim, days(60)).unwrap(), claim / 100 * 52);
    }

    #[test]
    fn test_schedule_rejects_bad_config() {
        assert!(RewardSchedule::new(100, 100, dec!(0.4)).is_err());
        assert!(RewardSchedule::new(0, 100, dec!(1.1)).is_err());
    }

    #[test]
    fn test_stage_progression() {
        let s = schedule();
        let t0 = Utc::now();
        let mut holding = ReceiptHolding::default();
        assert_eq!(s.stage(&holding, t0), ClaimStage::Empty);

        holding.mint(10, t0).unwrap();
        assert_eq!(s.stage(&holding, t0 + Duration::days(1)), ClaimStage::Maturing);
        assert_eq!(s.stage(&holding, t0 + Duration::days(30)), ClaimStage::Redeemable);
        assert_eq!(s.stage(&holding, t0 + Duration::days(180)), ClaimStage::Matured);
    }

    #[test]
    fn test_burn_pays_and_zeroes() {
        let t0 = Utc::now();
        let mut state = LedgerState::new();
        holder(&mut state, "alice", 1_000, t0);
        state.reserve = 10_000;

        let out = burn(&mut state, &schedule(), &ParticipantId::from("alice"), t0 + Duration::days(60))
            .unwrap();
        assert_eq!(out.burned, 1_000);
        assert_eq!(out.ratio, dec!(0.52));
        assert_eq!(out.payout, 520);
        assert_eq!(out.shortfall(), 0);
        assert_eq!(state.reserve(), 9_480);
        assert_eq!(state.receipt_supply(), 0);
        assert!(state.participant(&ParticipantId::from("alice")).unwrap().receipt.is_empty());
    }

    #[test]
    fn test_burn_capped_by_reserve() {
        let t0 = Utc::now();
        let mut state = LedgerState::new();
        holder(&mut state, "alice", 1_000, t0);
        state.reserve = 100;

        let out = burn(&mut state, &schedule(), &ParticipantId::from("alice"), t0 + Duration::days(200))
            .unwrap();
        assert_eq!(out.nominal, 1_000);
        assert_eq!(out.payout, 100);
        assert_eq!(out.shortfall(), 900);
        assert_eq!(state.reserve(), 0);
    }

    #[test]
    fn test_burn_errors() {
        let t0 = Utc::now();
        let mut state = LedgerState::new();
        let alice = ParticipantId::from("alice");
        assert!(matches!(
            burn(&mut state, &schedule(), &alice, t0),
            Err(DcaeError::NoClaims)
        ));
        assert!(state.participant(&alice).is_none());

        state.get_or_insert(&alice, t0);
        assert!(matches!(
            burn(&mut state, &schedule(), &alice, t0),
            Err(DcaeError::NoClaims)
        ));

        holder(&mut state, "alice", 1_000, t0);
        assert!(matches!(
            burn(&mut state, &schedule(), &alice, t0 + Duration::days(29)),
            Err(DcaeError::ClaimNotMature { .. })
        ));
        assert_eq!(state.receipt_supply(), 1_000);
    }

    #[test]
    fn test_transfer_carries_age() {
        let t0 = Utc::now();
        let mut state = LedgerState::new();
        holder(&mut state, "alice", 1_000, t0);
        let alice = ParticipantId::from("alice");
        let bob = ParticipantId::from("bob");

        let out = transfer(&mut state, &alice, &bob, 400, t0 + Duration::days(50)).unwrap();
        assert_eq!(out.from_balance, 600);
        assert_eq!(out.to_balance, 400);

        let bob_record = state.participant(&bob).unwrap();
        assert!(!bob_record.exists);
        assert_eq!(bob_record.receipt.weighted_mint_secs, t0.timestamp());
        assert_eq!(state.receipt_supply(), 1_000);
    }

    #[test]
    fn test_transfer_validation() {
        let t0 = Utc::now();
        let mut state = LedgerState::new();
        holder(&mut state, "alice", 10, t0);
        let alice = ParticipantId::from("alice");
        let bob = ParticipantId::from("bob");

        assert!(matches!(
            transfer(&mut state, &alice, &bob, 0, t0),
            Err(DcaeError::Validation(_))
        ));
        assert!(matches!(
            transfer(&mut state, &alice, &alice, 1, t0),
            Err(DcaeError::Validation(_))
        ));
        assert!(matches!(
            transfer(&mut state, &alice, &bob, 11, t0),
            Err(DcaeError::InsufficientReceiptBalance {
                available: 10,
                requested: 11
            })
        ));
        assert!(matches!(
            transfer(&mut state, &bob, &alice, 1, t0),
            Err(DcaeError::UnknownParticipant(_))
        ));
    }
}
