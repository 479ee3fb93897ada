//! Keeper service
//!
//! Periodically scans batches and triggers the ones that are due. External
//! adapter failures (oracle, venue, custody) are retried with exponential
//! backoff; anything else is reported and left for the next tick. With a
//! snapshot store attached, the ledger is saved after every scan that
//! executed something and once more on shutdown.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KeeperConfig;
use crate::domain::{BatchId, ParticipantId};
use crate::engine::{DcaEngine, ExecutionReport};
use crate::error::{DcaeError, ErrorCategory, Result};
use crate::persistence::SnapshotStore;

/// Why a batch was not triggered this tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    NotEligible { next_eligible_at: Option<DateTime<Utc>> },
    NoFundedMembers,
    UnknownBatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeeperFailure {
    pub batch_id: BatchId,
    pub category: ErrorCategory,
    pub error: String,
    pub attempts: u8,
}

/// Summary of one scan
#[derive(Debug, Clone, Default, Serialize)]
pub struct KeeperReport {
    pub executed: Vec<ExecutionReport>,
    pub skipped: Vec<(BatchId, SkipReason)>,
    pub failed: Vec<KeeperFailure>,
}

impl KeeperReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Keeper {
    engine: Arc<DcaEngine>,
    config: KeeperConfig,
    identity: ParticipantId,
    snapshots: Option<Arc<dyn SnapshotStore>>,
}

impl Keeper {
    pub fn new(engine: Arc<DcaEngine>, config: KeeperConfig) -> Self {
        let identity = ParticipantId::new(config.identity.clone());
        Self {
            engine,
            config,
            identity,
            snapshots: None,
        }
    }

    pub fn with_snapshots(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    /// Save the current ledger; no-op without a store
    pub async fn save_snapshot(&self) -> Result<()> {
        if let Some(store) = &self.snapshots {
            store.save(&self.engine.snapshot().await).await?;
        }
        Ok(())
    }

    pub fn identity(&self) -> &ParticipantId {
        &self.identity
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u8) -> Duration {
        let exp = u32::from(attempt.saturating_sub(1)).min(32);
        let delay = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Scan the watched batches once and trigger those that are due
    pub async fn run_once(&self) -> KeeperReport {
        let batch_ids = if self.config.batch_ids.is_empty() {
            self.engine.batches().await.into_iter().map(|b| b.id).collect()
        } else {
            self.config.batch_ids.clone()
        };

        let mut report = KeeperReport::default();
        for batch_id in batch_ids {
            let readiness = match self.engine.batch_readiness(batch_id).await {
                Ok(readiness) => readiness,
                Err(DcaeError::UnknownBatch(_)) => {
                    report.skipped.push((batch_id, SkipReason::UnknownBatch));
                    continue;
                }
                Err(e) => {
                    report.failed.push(KeeperFailure {
                        batch_id,
                        category: e.category(),
                        error: e.to_string(),
                        attempts: 0,
                    });
                    continue;
                }
            };

            if !readiness.eligible {
                debug!(batch_id, "Batch not yet eligible");
                report.skipped.push((
                    batch_id,
                    SkipReason::NotEligible {
                        next_eligible_at: readiness.next_eligible_at,
                    },
                ));
                continue;
            }
            if readiness.funded_members == 0 {
                debug!(batch_id, "Batch has no funded members");
                report.skipped.push((batch_id, SkipReason::NoFundedMembers));
                continue;
            }

            match self.execute_with_retry(batch_id).await {
                Ok(execution) => report.executed.push(execution),
                Err((e, attempts)) => {
                    error!(batch_id, attempts, error = %e, "Batch execution failed");
                    report.failed.push(KeeperFailure {
                        batch_id,
                        category: e.category(),
                        error: e.to_string(),
                        attempts,
                    });
                }
            }
        }
        report
    }

    async fn execute_with_retry(
        &self,
        batch_id: BatchId,
    ) -> std::result::Result<ExecutionReport, (DcaeError, u8)> {
        let mut attempts: u8 = 0;
        loop {
            attempts += 1;
            match self.engine.execute_investment(&self.identity, batch_id).await {
                Ok(report) => {
                    info!(
                        batch_id,
                        attempts,
                        actual_output = %report.actual_output,
                        "Keeper executed batch"
                    );
                    return Ok(report);
                }
                Err(e) if e.is_retryable() && attempts < self.config.max_retries => {
                    let delay = self.backoff_delay(attempts);
                    warn!(
                        batch_id,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retryable execution failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err((e, attempts)),
            }
        }
    }

    /// Tick every `poll_interval_secs` until `shutdown` turns true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        info!(
            identity = %self.identity,
            poll_interval_secs = self.config.poll_interval_secs,
            "Keeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_once().await;
                    info!(
                        executed = report.executed.len(),
                        skipped = report.skipped.len(),
                        failed = report.failed.len(),
                        "Keeper scan complete"
                    );
                    if !report.executed.is_empty() {
                        if let Err(e) = self.save_snapshot().await {
                            warn!(error = %e, "Snapshot after scan failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.save_snapshot().await?;
        info!("Keeper stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryCustody, SimulatedSwapExecutor};
    use crate::clock::ManualClock;
    use crate::config::AppConfig;
    use crate::domain::Asset;
    use crate::engine::EngineConfig;
    use crate::exchange::MockPriceOracle;
    use crate::persistence::FileSnapshotStore;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    struct Harness {
        engine: Arc<DcaEngine>,
        custody: Arc<InMemoryCustody>,
        venue: Arc<SimulatedSwapExecutor>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let mut app = AppConfig::default_config();
        app.protocol.investment_interval_secs = 120;
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let custody = Arc::new(InMemoryCustody::new());
        let venue = Arc::new(SimulatedSwapExecutor::new(dec!(1), 0).with_custody(custody.clone()));
        let mut oracle = MockPriceOracle::new();
        oracle.expect_quote().returning(|input| Ok(input));

        let engine = Arc::new(DcaEngine::new(
            EngineConfig::from_app(&app).unwrap(),
            Arc::new(oracle),
            venue.clone(),
            custody.clone(),
            clock.clone(),
        ));
        Harness {
            engine,
            custody,
            venue,
            clock,
        }
    }

    fn keeper_config() -> KeeperConfig {
        KeeperConfig {
            base_delay_ms: 1,
            max_delay_ms: 4,
            max_retries: 3,
            ..KeeperConfig::default()
        }
    }

    async fn fund(h: &Harness, who: &str, amount: u128) {
        let id = ParticipantId::from(who);
        h.custody.mint_to(Asset::Funding, &id, amount).await;
        h.custody.approve(Asset::Funding, &id, amount).await;
        h.engine.deposit(&id, amount).await.unwrap();
    }

    #[test]
    fn test_backoff_is_capped() {
        let h = harness();
        let keeper = Keeper::new(
            h.engine.clone(),
            KeeperConfig {
                base_delay_ms: 5_000,
                max_delay_ms: 60_000,
                ..KeeperConfig::default()
            },
        );
        assert_eq!(keeper.backoff_delay(1), Duration::from_millis(5_000));
        assert_eq!(keeper.backoff_delay(2), Duration::from_millis(10_000));
        assert_eq!(keeper.backoff_delay(4), Duration::from_millis(40_000));
        assert_eq!(keeper.backoff_delay(5), Duration::from_millis(60_000));
    }

    #[tokio::test]
    async fn test_run_once_executes_then_skips() {
        let h = harness();
        fund(&h, "alice", 2_000_000).await;
        let keeper = Keeper::new(h.engine.clone(), keeper_config());

        let report = keeper.run_once().await;
        assert_eq!(report.executed.len(), 1);
        assert!(report.is_clean());

        let report = keeper.run_once().await;
        assert!(report.executed.is_empty());
        assert!(matches!(report.skipped[0].1, SkipReason::NotEligible { .. }));

        h.clock.advance(ChronoDuration::seconds(120));
        assert_eq!(keeper.run_once().await.executed.len(), 1);
        // two cycles of the 1_000_000 default invest amount
        let alice = h.engine.participant(&ParticipantId::from("alice")).await.unwrap();
        assert_eq!(alice.funding_balance, 0);
    }

    #[tokio::test]
    async fn test_run_once_retries_venue_outage() {
        let h = harness();
        fund(&h, "alice", 1_000_000).await;
        h.venue.fail_next(2);
        let keeper = Keeper::new(h.engine.clone(), keeper_config());

        let report = keeper.run_once().await;
        assert_eq!(report.executed.len(), 1);
    }

    #[tokio::test]
    async fn test_run_once_gives_up_after_max_retries() {
        let h = harness();
        fund(&h, "alice", 1_000_000).await;
        h.venue.fail_next(10);
        let keeper = Keeper::new(h.engine.clone(), keeper_config());

        let report = keeper.run_once().await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].attempts, 3);
        assert_eq!(report.failed[0].category, ErrorCategory::ExternalAdapter);
    }

    #[tokio::test]
    async fn test_unfunded_and_unknown_batches_are_skipped() {
        let h = harness();
        fund(&h, "alice", 1_000_000).await;
        h.engine
            .set_invest_amount(&ParticipantId::from("alice"), 5_000_000)
            .await
            .unwrap();
        let keeper = Keeper::new(
            h.engine.clone(),
            KeeperConfig {
                batch_ids: vec![0, 9],
                ..keeper_config()
            },
        );

        let report = keeper.run_once().await;
        assert_eq!(
            report.skipped,
            vec![(0, SkipReason::NoFundedMembers), (9, SkipReason::UnknownBatch)]
        );
    }

    #[tokio::test]
    async fn test_run_snapshots_after_execution_and_on_shutdown() {
        let h = harness();
        fund(&h, "alice", 1_000_000).await;
        let path = std::env::temp_dir()
            .join(format!("dcae-keeper-{}", uuid::Uuid::new_v4()))
            .join("ledger.json");
        let store = Arc::new(FileSnapshotStore::new(path));
        let keeper = Keeper::new(h.engine.clone(), keeper_config()).with_snapshots(store.clone());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { keeper.run(rx).await });
        // first tick fires immediately
        for _ in 0..200 {
            if h.engine.batch(0).await.unwrap().executions == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        assert!(handle.await.unwrap().is_ok());

        let snapshot = store.load().await.unwrap().unwrap();
        let state = snapshot.into_state();
        assert_eq!(state.batch(0).unwrap().executions, 1);
        assert_eq!(
            state.participant(&ParticipantId::from("alice")).unwrap().funding_balance,
            0
        );
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness();
        let keeper = Keeper::new(h.engine.clone(), keeper_config());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { keeper.run(rx).await });
        tx.send(true).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }
}
