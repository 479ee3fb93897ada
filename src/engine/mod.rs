//! DCA engine facade
//!
//! `DcaEngine` is the only public entry point that mutates the ledger. Every
//! operation:
//! 1. locks the ledger (single writer, held across adapter awaits)
//! 2. stages its effects in a [`UnitOfWork`]
//! 3. performs custody, oracle and swap calls
//! 4. commits and journals the resulting events
//!
//! Any error before step 4 drops the unit and leaves the ledger untouched.

pub mod executor;
pub mod math;
pub mod rewards;
pub mod transaction;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{AppConfig, ExecutionConfig, ProtocolConfig};
use crate::domain::{
    Amount, Asset, BatchId, BatchReadiness, BatchView, ClaimStage, LedgerEvent, ParticipantId,
    ParticipantView,
};
use crate::error::{DcaeError, Result};
use crate::exchange::{AssetCustody, PriceOracle, SwapExecutor};
use crate::ledger::{accounts, scheduler, DepositOutcome, LedgerState, WithdrawalOutcome};
use crate::persistence::{EventJournal, EventMetadata, LedgerSnapshot, StoredEvent};

pub use executor::{Distribution, ExecutionReport, MemberCredit};
pub use rewards::{BurnOutcome, RewardSchedule, TransferOutcome};
pub use transaction::{TransactionScope, UnitOfWork};

/// Engine parameters resolved from [`AppConfig`]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub protocol: ProtocolConfig,
    pub execution: ExecutionConfig,
    pub rewards: RewardSchedule,
}

impl EngineConfig {
    pub fn from_app(config: &AppConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| DcaeError::Validation(errors.join("; ")))?;
        Ok(Self {
            protocol: config.protocol.clone(),
            execution: config.execution.clone(),
            rewards: RewardSchedule::from_config(&config.rewards)?,
        })
    }

    fn min_deposit(&self) -> Amount {
        Amount::from(self.protocol.min_deposit)
    }
}

/// Post-state of a reserve top-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveFunding {
    pub from: ParticipantId,
    pub amount: Amount,
    pub reserve_balance: Amount,
}

/// Protocol-wide totals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTotals {
    pub participants: usize,
    pub batches: usize,
    pub reserve: Amount,
    pub receipt_supply: Amount,
    pub total_invested: Amount,
    pub total_acquired: Amount,
    pub funding_liability: Amount,
    pub target_liability: Amount,
}

struct Ledger {
    state: LedgerState,
    journal: EventJournal,
}

/// Pooled periodic DCA engine
pub struct DcaEngine {
    config: EngineConfig,
    ledger: Mutex<Ledger>,
    oracle: Arc<dyn PriceOracle>,
    swap: Arc<dyn SwapExecutor>,
    custody: Arc<dyn AssetCustody>,
    clock: Arc<dyn Clock>,
}

impl DcaEngine {
    pub fn new(
        config: EngineConfig,
        oracle: Arc<dyn PriceOracle>,
        swap: Arc<dyn SwapExecutor>,
        custody: Arc<dyn AssetCustody>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_state(config, LedgerState::new(), oracle, swap, custody, clock)
    }

    /// Start from an existing ledger (e.g. a restored snapshot)
    pub fn with_state(
        config: EngineConfig,
        mut state: LedgerState,
        oracle: Arc<dyn PriceOracle>,
        swap: Arc<dyn SwapExecutor>,
        custody: Arc<dyn AssetCustody>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        state.reindex();
        Self {
            config,
            ledger: Mutex::new(Ledger {
                state,
                journal: EventJournal::new(),
            }),
            oracle,
            swap,
            custody,
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ==================== Accounts ====================

    #[instrument(skip(self), fields(participant = %who))]
    pub async fn deposit(&self, who: &ParticipantId, amount: Amount) -> Result<DepositOutcome> {
        let mut guard = self.ledger.lock().await;
        let Ledger { state, journal } = &mut *guard;
        let now = self.clock.now();

        let mut uow = UnitOfWork::begin(state, TransactionScope::Deposit);
        let outcome = accounts::deposit(uow.state_mut(), &self.config.protocol, who, amount, now)?;
        self.custody.pull(Asset::Funding, who, amount).await?;
        uow.commit();

        journal.append_all(
            vec![LedgerEvent::Deposited {
                participant: who.clone(),
                amount,
                funding_balance: outcome.participant.funding_balance,
                batch_id: Some(outcome.batch_id),
                first_deposit: outcome.first_deposit,
            }],
            &EventMetadata::new().with_triggered_by(who.as_str()),
            now,
        );
        info!(
            amount = %amount,
            batch_id = outcome.batch_id,
            first_deposit = outcome.first_deposit,
            "Deposit accepted"
        );
        Ok(outcome)
    }

    #[instrument(skip(self), fields(participant = %who))]
    pub async fn set_invest_amount(
        &self,
        who: &ParticipantId,
        amount: Amount,
    ) -> Result<ParticipantView> {
        let mut guard = self.ledger.lock().await;
        let Ledger { state, journal } = &mut *guard;
        let now = self.clock.now();

        let mut uow = UnitOfWork::begin(state, TransactionScope::SetInvestAmount);
        let view =
            accounts::set_invest_amount(uow.state_mut(), &self.config.protocol, who, amount, now)?;
        uow.commit();

        journal.append_all(
            vec![LedgerEvent::InvestAmountSet {
                participant: who.clone(),
                invest_amount: amount,
            }],
            &EventMetadata::new().with_triggered_by(who.as_str()),
            now,
        );
        debug!(invest_amount = %amount, "Invest amount updated");
        Ok(view)
    }

    pub async fn withdraw_funding(&self, who: &ParticipantId) -> Result<WithdrawalOutcome> {
        self.withdraw(who, Asset::Funding).await
    }

    pub async fn withdraw_target(&self, who: &ParticipantId) -> Result<WithdrawalOutcome> {
        self.withdraw(who, Asset::Target).await
    }

    #[instrument(skip(self), fields(participant = %who, asset = %asset))]
    async fn withdraw(&self, who: &ParticipantId, asset: Asset) -> Result<WithdrawalOutcome> {
        let mut guard = self.ledger.lock().await;
        let Ledger { state, journal } = &mut *guard;
        let now = self.clock.now();

        let mut uow = UnitOfWork::begin(state, TransactionScope::Withdrawal);
        let outcome =
            accounts::drain_balance(uow.state_mut(), &self.config.protocol, who, asset, now)?;
        self.custody.push(asset, who, outcome.amount).await?;
        uow.commit();

        journal.append_all(
            vec![LedgerEvent::Withdrawn {
                participant: who.clone(),
                asset,
                amount: outcome.amount,
            }],
            &EventMetadata::new().with_triggered_by(who.as_str()),
            now,
        );
        info!(amount = %outcome.amount, "Withdrawal paid");
        Ok(outcome)
    }

    // ==================== Execution ====================

    /// Convert one batch's pooled principal into the target asset.
    ///
    /// Anyone may call this; a caller outside the batch earns the configured
    /// incentive.
    #[instrument(skip(self), fields(caller = %caller))]
    pub async fn execute_investment(
        &self,
        caller: &ParticipantId,
        batch_id: BatchId,
    ) -> Result<ExecutionReport> {
        let mut guard = self.ledger.lock().await;
        let Ledger { state, journal } = &mut *guard;
        let now = self.clock.now();
        let execution_id = Uuid::new_v4();

        let mut uow = UnitOfWork::begin(state, TransactionScope::BatchExecution);
        let plan = scheduler::plan_cycle(uow.state(), batch_id, now, self.config.min_deposit())?;
        uow.state_mut().batch_mut(batch_id)?.mark_executed(now);

        let caller_is_member = match (uow.state().index_of(caller), uow.state().batch(batch_id)) {
            (Some(index), Some(batch)) => batch.members.contains(&index),
            _ => false,
        };

        let quoted_output = self.oracle.quote(plan.total_input).await.map_err(|e| match e {
            DcaeError::OracleUnavailable(_) => e,
            other => DcaeError::OracleUnavailable(other.to_string()),
        })?;
        let min_output = executor::min_output(quoted_output, self.config.execution.max_slippage_bps)?;

        executor::debit_members(uow.state_mut(), &plan)?;

        let actual_output = self
            .swap
            .swap(plan.total_input, min_output)
            .await
            .map_err(|e| match e {
                DcaeError::SwapFailed(_) => e,
                other => DcaeError::SwapFailed(other.to_string()),
            })?;
        executor::check_fill(actual_output, min_output)?;

        let distribution = executor::split_output(
            uow.state(),
            &plan,
            actual_output,
            caller_is_member,
            &self.config.execution,
        )?;
        if distribution.total_credited() != actual_output {
            return Err(DcaeError::Internal(format!(
                "distribution credits {} but swap returned {actual_output}",
                distribution.total_credited()
            )));
        }
        executor::apply_distribution(
            uow.state_mut(),
            &plan,
            &distribution,
            caller,
            actual_output,
            now,
        )?;

        let next_eligible_at = uow
            .state()
            .batch(batch_id)
            .and_then(|b| b.next_eligible_at());
        uow.commit();

        let mut events = Vec::with_capacity(distribution.members.len() + 1);
        events.push(LedgerEvent::BatchExecuted {
            batch_id,
            caller: caller.clone(),
            total_input: plan.total_input,
            quoted_output,
            min_output,
            actual_output,
            included_members: distribution.members.len(),
        });
        events.extend(
            distribution
                .members
                .iter()
                .filter(|m| m.credit > 0)
                .map(|m| LedgerEvent::ReceiptMinted {
                    participant: m.participant.clone(),
                    amount: m.credit,
                }),
        );
        journal.append_all(
            events,
            &EventMetadata {
                correlation_id: execution_id,
                triggered_by: Some(caller.to_string()),
            },
            now,
        );

        if plan.skipped > 0 {
            warn!(batch_id, skipped = plan.skipped, "Members skipped for insufficient funding");
        }
        info!(
            batch_id,
            total_input = %plan.total_input,
            quoted_output = %quoted_output,
            actual_output = %actual_output,
            members = distribution.members.len(),
            "Batch executed"
        );

        Ok(ExecutionReport {
            execution_id,
            batch_id,
            caller: caller.clone(),
            total_input: plan.total_input,
            quoted_output,
            min_output,
            actual_output,
            skipped_members: plan.skipped,
            protocol_fee: distribution.protocol_fee,
            caller_credit: distribution.caller_credit(),
            dust: distribution.dust,
            members: distribution.members,
            executed_at: now,
            next_eligible_at,
        })
    }

    // ==================== Rewards ====================

    /// Burn every receipt unit the participant holds for a share of the reserve
    #[instrument(skip(self), fields(participant = %who))]
    pub async fn burn_for_reward(&self, who: &ParticipantId) -> Result<BurnOutcome> {
        let mut guard = self.ledger.lock().await;
        let Ledger { state, journal } = &mut *guard;
        let now = self.clock.now();

        let mut uow = UnitOfWork::begin(state, TransactionScope::RewardBurn);
        let outcome = rewards::burn(uow.state_mut(), &self.config.rewards, who, now)?;
        if outcome.payout > 0 {
            self.custody.push(Asset::Target, who, outcome.payout).await?;
        }
        uow.commit();

        journal.append_all(
            vec![LedgerEvent::RewardPaid {
                participant: who.clone(),
                burned: outcome.burned,
                nominal: outcome.nominal,
                payout: outcome.payout,
            }],
            &EventMetadata::new().with_triggered_by(who.as_str()),
            now,
        );
        if outcome.shortfall() > 0 {
            warn!(shortfall = %outcome.shortfall(), "Reserve could not cover full reward");
        }
        info!(
            burned = %outcome.burned,
            ratio = %outcome.ratio,
            payout = %outcome.payout,
            "Receipts burned"
        );
        Ok(outcome)
    }

    /// Reward the participant would receive if they burned now
    pub async fn preview_burn(&self, who: &ParticipantId) -> Result<BurnOutcome> {
        let guard = self.ledger.lock().await;
        let mut scratch = guard.state.clone();
        rewards::burn(&mut scratch, &self.config.rewards, who, self.clock.now())
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    pub async fn transfer_receipt(
        &self,
        from: &ParticipantId,
        to: &ParticipantId,
        amount: Amount,
    ) -> Result<TransferOutcome> {
        let mut guard = self.ledger.lock().await;
        let Ledger { state, journal } = &mut *guard;
        let now = self.clock.now();

        let mut uow = UnitOfWork::begin(state, TransactionScope::ReceiptTransfer);
        let outcome = rewards::transfer(uow.state_mut(), from, to, amount, now)?;
        uow.commit();

        journal.append_all(
            vec![LedgerEvent::ReceiptTransferred {
                from: from.clone(),
                to: to.clone(),
                amount,
            }],
            &EventMetadata::new().with_triggered_by(from.as_str()),
            now,
        );
        debug!(amount = %amount, "Receipts transferred");
        Ok(outcome)
    }

    /// Top up the reward reserve with target asset
    #[instrument(skip(self), fields(from = %from))]
    pub async fn fund_reserve(&self, from: &ParticipantId, amount: Amount) -> Result<ReserveFunding> {
        if amount == 0 {
            return Err(DcaeError::Validation("reserve top-up must be positive".into()));
        }
        let mut guard = self.ledger.lock().await;
        let Ledger { state, journal } = &mut *guard;
        let now = self.clock.now();

        let mut uow = UnitOfWork::begin(state, TransactionScope::ReserveFunding);
        uow.state_mut().credit_reserve(amount)?;
        self.custody.pull(Asset::Target, from, amount).await?;
        let reserve_balance = uow.state().reserve();
        uow.commit();

        journal.append_all(
            vec![LedgerEvent::ReserveFunded {
                from: from.clone(),
                amount,
                reserve_balance,
            }],
            &EventMetadata::new().with_triggered_by(from.as_str()),
            now,
        );
        info!(amount = %amount, reserve = %reserve_balance, "Reserve funded");
        Ok(ReserveFunding {
            from: from.clone(),
            amount,
            reserve_balance,
        })
    }

    // ==================== Views ====================

    pub async fn participant(&self, who: &ParticipantId) -> Option<ParticipantView> {
        let guard = self.ledger.lock().await;
        guard
            .state
            .participant(who)
            .map(|p| ParticipantView::from_participant(p, self.config.min_deposit()))
    }

    pub async fn participant_at(&self, index: usize) -> Option<ParticipantView> {
        let guard = self.ledger.lock().await;
        guard
            .state
            .participant_at(index)
            .map(|p| ParticipantView::from_participant(p, self.config.min_deposit()))
    }

    pub async fn participant_count(&self) -> usize {
        self.ledger.lock().await.state.participant_count()
    }

    pub async fn batch(&self, batch_id: BatchId) -> Option<BatchView> {
        self.ledger.lock().await.state.batch(batch_id).map(BatchView::from)
    }

    pub async fn batches(&self) -> Vec<BatchView> {
        let guard = self.ledger.lock().await;
        guard.state.batches().iter().map(BatchView::from).collect()
    }

    pub async fn batch_members(&self, batch_id: BatchId) -> Result<Vec<ParticipantId>> {
        let guard = self.ledger.lock().await;
        let state = &guard.state;
        let batch = state
            .batch(batch_id)
            .ok_or(DcaeError::UnknownBatch(batch_id))?;
        Ok(batch
            .members
            .iter()
            .filter_map(|&i| state.participant_at(i).map(|p| p.id.clone()))
            .collect())
    }

    /// Whether the batch's interval has elapsed at the current clock time
    pub async fn is_eligible(&self, batch_id: BatchId) -> Result<bool> {
        let guard = self.ledger.lock().await;
        scheduler::is_eligible(&guard.state, batch_id, self.clock.now())
    }

    pub async fn next_eligible_at(&self, batch_id: BatchId) -> Result<Option<DateTime<Utc>>> {
        let guard = self.ledger.lock().await;
        guard
            .state
            .batch(batch_id)
            .map(|b| b.next_eligible_at())
            .ok_or(DcaeError::UnknownBatch(batch_id))
    }

    pub async fn eligible_batches(&self) -> Vec<BatchId> {
        let guard = self.ledger.lock().await;
        scheduler::eligible_batches(&guard.state, self.clock.now())
    }

    pub async fn batch_readiness(&self, batch_id: BatchId) -> Result<BatchReadiness> {
        let guard = self.ledger.lock().await;
        scheduler::readiness(
            &guard.state,
            batch_id,
            self.clock.now(),
            self.config.min_deposit(),
        )
    }

    pub async fn reserve_balance(&self) -> Amount {
        self.ledger.lock().await.state.reserve()
    }

    pub async fn receipt_supply(&self) -> Amount {
        self.ledger.lock().await.state.receipt_supply()
    }

    pub async fn claim_stage(&self, who: &ParticipantId) -> ClaimStage {
        let guard = self.ledger.lock().await;
        match guard.state.participant(who) {
            Some(p) => self.config.rewards.stage(&p.receipt, self.clock.now()),
            None => ClaimStage::Empty,
        }
    }

    pub async fn totals(&self) -> LedgerTotals {
        let guard = self.ledger.lock().await;
        let state = &guard.state;
        LedgerTotals {
            participants: state.participant_count(),
            batches: state.batches().len(),
            reserve: state.reserve(),
            receipt_supply: state.receipt_supply(),
            total_invested: state.total_invested(),
            total_acquired: state.total_acquired(),
            funding_liability: state.total_funding_liability(),
            target_liability: state.total_target_liability(),
        }
    }

    pub async fn events(&self) -> Vec<StoredEvent> {
        self.ledger.lock().await.journal.all().to_vec()
    }

    pub async fn events_since(&self, sequence: u64) -> Vec<StoredEvent> {
        self.ledger.lock().await.journal.since(sequence).to_vec()
    }

    // ==================== Snapshots ====================

    pub async fn snapshot(&self) -> LedgerSnapshot {
        let guard = self.ledger.lock().await;
        LedgerSnapshot::new(
            guard.state.clone(),
            guard.journal.last_sequence(),
            self.clock.now(),
        )
    }

    /// Replace the ledger with a snapshot; the journal starts empty
    pub async fn restore(&self, snapshot: LedgerSnapshot) {
        let mut guard = self.ledger.lock().await;
        let last_sequence = snapshot.last_sequence;
        guard.state = snapshot.into_state();
        guard.journal = EventJournal::new();
        info!(
            last_sequence,
            participants = guard.state.participant_count(),
            "Ledger restored from snapshot"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::exchange::{MockAssetCustody, MockPriceOracle, MockSwapExecutor};
    use chrono::Duration;
    use mockall::predicate::*;
    use rust_decimal_macros::dec;

    fn config() -> EngineConfig {
        let mut app = AppConfig::default_config();
        app.protocol.investment_interval_secs = 120;
        app.execution.protocol_fee_bps = 0;
        app.execution.caller_incentive_bps = 0;
        EngineConfig::from_app(&app).unwrap()
    }

    fn permissive_custody() -> MockAssetCustody {
        let mut custody = MockAssetCustody::new();
        custody.expect_pull().returning(|_, _, _| Ok(()));
        custody.expect_push().returning(|_, _, _| Ok(()));
        custody
    }

    fn engine(
        oracle: MockPriceOracle,
        swap: MockSwapExecutor,
        custody: MockAssetCustody,
    ) -> (DcaEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = DcaEngine::new(
            config(),
            Arc::new(oracle),
            Arc::new(swap),
            Arc::new(custody),
            clock.clone(),
        );
        (engine, clock)
    }

    #[tokio::test]
    async fn test_single_member_cycle() {
        let mut oracle = MockPriceOracle::new();
        oracle.expect_quote().with(eq(1_000_000)).returning(|_| Ok(500));
        let mut swap = MockSwapExecutor::new();
        swap.expect_swap()
            .with(eq(1_000_000), eq(495))
            .returning(|_, _| Ok(500));
        let (engine, _clock) = engine(oracle, swap, permissive_custody());
        let alice = ParticipantId::from("alice");

        engine.deposit(&alice, 1_000_000).await.unwrap();
        let report = engine.execute_investment(&alice, 0).await.unwrap();

        assert_eq!(report.actual_output, 500);
        assert_eq!(report.total_credited(), 500);
        let view = engine.participant(&alice).await.unwrap();
        assert_eq!(view.funding_balance, 0);
        assert_eq!(view.target_balance, 500);
        assert_eq!(view.receipt_balance, 500);
        assert_eq!(engine.receipt_supply().await, 500);
    }

    #[tokio::test]
    async fn test_second_trigger_within_interval_fails() {
        let mut oracle = MockPriceOracle::new();
        oracle.expect_quote().returning(|input| Ok(input));
        let mut swap = MockSwapExecutor::new();
        swap.expect_swap().returning(|input, _| Ok(input));
        let (engine, clock) = engine(oracle, swap, permissive_custody());
        let alice = ParticipantId::from("alice");

        engine.deposit(&alice, 3_000_000).await.unwrap();
        engine.execute_investment(&alice, 0).await.unwrap();

        clock.advance(Duration::seconds(119));
        let err = engine.execute_investment(&alice, 0).await.unwrap_err();
        assert!(matches!(err, DcaeError::IntervalNotElapsed { batch_id: 0, .. }));

        clock.advance(Duration::seconds(1));
        assert!(engine.execute_investment(&alice, 0).await.is_ok());
    }

    #[tokio::test]
    async fn test_swap_failure_rolls_back_everything() {
        let mut oracle = MockPriceOracle::new();
        oracle.expect_quote().returning(|_| Ok(1_000));
        let mut swap = MockSwapExecutor::new();
        swap.expect_swap()
            .returning(|_, _| Err(DcaeError::SwapFailed("venue reverted".into())));
        let (engine, _clock) = engine(oracle, swap, permissive_custody());
        let alice = ParticipantId::from("alice");
        engine.deposit(&alice, 1_000_000).await.unwrap();
        let events_before = engine.events().await.len();

        let err = engine.execute_investment(&alice, 0).await.unwrap_err();
        assert!(matches!(err, DcaeError::SwapFailed(_)));

        let batch = engine.batch(0).await.unwrap();
        assert_eq!(batch.last_execution, None);
        assert_eq!(batch.executions, 0);
        let view = engine.participant(&alice).await.unwrap();
        assert_eq!(view.funding_balance, 1_000_000);
        assert_eq!(view.receipt_balance, 0);
        assert_eq!(engine.events().await.len(), events_before);
    }

    #[tokio::test]
    async fn test_short_fill_is_rejected() {
        let mut oracle = MockPriceOracle::new();
        oracle.expect_quote().returning(|_| Ok(1_000));
        let mut swap = MockSwapExecutor::new();
        swap.expect_swap().returning(|_, _| Ok(989));
        let (engine, _clock) = engine(oracle, swap, permissive_custody());
        let alice = ParticipantId::from("alice");
        engine.deposit(&alice, 1_000_000).await.unwrap();

        let err = engine.execute_investment(&alice, 0).await.unwrap_err();
        assert!(matches!(err, DcaeError::SwapFailed(_)));
        assert!(engine.batch_readiness(0).await.unwrap().is_ready());
    }

    #[tokio::test]
    async fn test_oracle_failure_is_retryable_and_rolls_back() {
        let mut oracle = MockPriceOracle::new();
        oracle
            .expect_quote()
            .returning(|_| Err(DcaeError::Internal("stale feed".into())));
        let mut swap = MockSwapExecutor::new();
        swap.expect_swap().never();
        let (engine, _clock) = engine(oracle, swap, permissive_custody());
        let alice = ParticipantId::from("alice");
        engine.deposit(&alice, 1_000_000).await.unwrap();

        let err = engine.execute_investment(&alice, 0).await.unwrap_err();
        assert!(matches!(err, DcaeError::OracleUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(engine.eligible_batches().await, vec![0]);
    }

    #[tokio::test]
    async fn test_failed_pull_leaves_no_record() {
        let mut custody = MockAssetCustody::new();
        custody
            .expect_pull()
            .returning(|_, _, _| Err(DcaeError::TransferFailed("no allowance".into())));
        let (engine, _clock) = engine(MockPriceOracle::new(), MockSwapExecutor::new(), custody);
        let alice = ParticipantId::from("alice");

        let err = engine.deposit(&alice, 1_000_000).await.unwrap_err();
        assert!(matches!(err, DcaeError::TransferFailed(_)));
        assert_eq!(engine.participant_count().await, 0);
        assert!(engine.batches().await.is_empty());
    }

    #[tokio::test]
    async fn test_nothing_to_invest_does_not_touch_timer() {
        let (engine, _clock) = engine(
            MockPriceOracle::new(),
            MockSwapExecutor::new(),
            permissive_custody(),
        );
        let alice = ParticipantId::from("alice");
        engine.deposit(&alice, 1_000_000).await.unwrap();
        engine.set_invest_amount(&alice, 2_000_000).await.unwrap();

        let err = engine.execute_investment(&alice, 0).await.unwrap_err();
        assert!(matches!(err, DcaeError::NothingToInvest { batch_id: 0 }));
        assert_eq!(engine.next_eligible_at(0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_withdraw_pushes_exact_balance() {
        let mut custody = MockAssetCustody::new();
        custody.expect_pull().returning(|_, _, _| Ok(()));
        custody
            .expect_push()
            .with(eq(Asset::Funding), eq(ParticipantId::from("alice")), eq(4_000_000))
            .times(1)
            .returning(|_, _, _| Ok(()));
        let (engine, _clock) = engine(MockPriceOracle::new(), MockSwapExecutor::new(), custody);
        let alice = ParticipantId::from("alice");
        engine.deposit(&alice, 4_000_000).await.unwrap();

        let out = engine.withdraw_funding(&alice).await.unwrap();
        assert_eq!(out.amount, 4_000_000);
        assert!(matches!(
            engine.withdraw_funding(&alice).await,
            Err(DcaeError::NothingToWithdraw { .. })
        ));
    }

    #[tokio::test]
    async fn test_burn_failed_push_keeps_receipts() {
        let mut oracle = MockPriceOracle::new();
        oracle.expect_quote().returning(|_| Ok(1_000));
        let mut swap = MockSwapExecutor::new();
        swap.expect_swap().returning(|_, _| Ok(1_000));
        let mut custody = MockAssetCustody::new();
        custody.expect_pull().returning(|_, _, _| Ok(()));
        custody
            .expect_push()
            .returning(|_, _, _| Err(DcaeError::TransferFailed("paused".into())));
        let (engine, clock) = engine(oracle, swap, custody);
        let alice = ParticipantId::from("alice");
        let treasury = ParticipantId::from("treasury");

        engine.deposit(&alice, 1_000_000).await.unwrap();
        engine.execute_investment(&alice, 0).await.unwrap();
        engine.fund_reserve(&treasury, 10_000).await.unwrap();
        clock.advance(Duration::days(60));

        let preview = engine.preview_burn(&alice).await.unwrap();
        assert_eq!(preview.ratio, dec!(0.52));
        assert_eq!(preview.payout, 520);

        assert!(engine.burn_for_reward(&alice).await.is_err());
        assert_eq!(engine.participant(&alice).await.unwrap().receipt_balance, 1_000);
        assert_eq!(engine.reserve_balance().await, 10_000);
        assert_eq!(engine.claim_stage(&alice).await, ClaimStage::Redeemable);
    }
}
