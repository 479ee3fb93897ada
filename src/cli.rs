use chrono::Duration;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::adapters::{amount_to_decimal, InMemoryCustody, SimulatedSwapExecutor, TwapConfig, TwapOracle};
use crate::clock::{Clock, ManualClock, SystemClock};
use crate::config::AppConfig;
use crate::domain::{Amount, Asset, ParticipantId};
use crate::engine::{DcaEngine, EngineConfig};
use crate::error::{DcaeError, Result};
use crate::keeper::Keeper;
use crate::ledger::LedgerState;
use crate::persistence::{FileSnapshotStore, SnapshotStore};

#[derive(Parser)]
#[command(name = "dcae")]
#[command(version)]
#[command(about = "Pooled periodic DCA ledger with time-weighted receipt rewards", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml plus $DCAE_ENV overrides)
    #[arg(short, long, default_value = "config", global = true)]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an in-memory simulation driven by the keeper
    Simulate {
        /// Number of depositing participants
        #[arg(short, long, default_value = "3")]
        participants: usize,
        /// Investment cycles to run
        #[arg(long, default_value = "10")]
        cycles: u32,
        /// Starting price, target units per funding unit
        #[arg(long, default_value = "333333.33")]
        price: Decimal,
        /// Per-cycle price drift (e.g. 0.01 = +1%)
        #[arg(long, default_value = "0.005")]
        drift: Decimal,
        /// Days to wait after the last cycle before burning receipts
        #[arg(long, default_value = "60")]
        hold_days: i64,
        /// Write the final ledger snapshot here
        #[arg(long)]
        snapshot: Option<String>,
    },
    /// Run the keeper service on the wall clock against the paper venue
    Keeper {
        /// Venue mark price, target units per funding unit
        #[arg(long, default_value = "333333.33")]
        price: Decimal,
        /// Venue fee in basis points
        #[arg(long, default_value = "5")]
        fee_bps: u32,
        /// Seconds between oracle observations of the venue mark
        #[arg(long, default_value = "60")]
        observe_secs: u64,
    },
    /// Load and validate configuration
    CheckConfig,
}

/// Options for [`run_keeper`]
#[derive(Debug, Clone)]
pub struct KeeperOptions {
    pub price: Decimal,
    pub fee_bps: u32,
    pub observe_secs: u64,
}

/// Everything the keeper command runs
pub struct KeeperService {
    pub engine: Arc<DcaEngine>,
    pub keeper: Keeper,
    pub oracle: Arc<TwapOracle>,
    pub venue: Arc<SimulatedSwapExecutor>,
    pub custody: Arc<InMemoryCustody>,
}

/// Options for [`run_simulation`]
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub participants: usize,
    pub cycles: u32,
    pub price: Decimal,
    pub drift: Decimal,
    pub hold_days: i64,
    pub snapshot: Option<String>,
}

/// Load configuration and print every validation problem
pub fn check_config(config_dir: &str) -> Result<()> {
    println!("Checking configuration in {config_dir}...\n");
    let config = AppConfig::load_from(config_dir)?;

    println!("  min_deposit:         {}", config.protocol.min_deposit);
    println!("  interval:            {}s", config.protocol.investment_interval_secs);
    println!("  batch assignment:    {:?}", config.protocol.batch_assignment);
    println!("  max slippage:        {} bps", config.execution.max_slippage_bps);
    println!("  protocol fee:        {} bps", config.execution.protocol_fee_bps);
    println!("  caller incentive:    {} bps", config.execution.caller_incentive_bps);
    println!(
        "  reward curve:        {}d..{}d from {}",
        config.rewards.min_age_days, config.rewards.max_age_days, config.rewards.floor_ratio
    );

    match config.validate() {
        Ok(()) => {
            println!("\n\x1b[32mOK\x1b[0m");
            Ok(())
        }
        Err(errors) => {
            println!("\n\x1b[31mINVALID\x1b[0m");
            for e in &errors {
                println!("  - {e}");
            }
            Err(DcaeError::Validation(errors.join("; ")))
        }
    }
}

/// Build the engine on the system clock, restoring from `persistence.snapshot_path`
pub async fn build_keeper_service(
    config: &AppConfig,
    options: &KeeperOptions,
) -> Result<KeeperService> {
    let engine_config = EngineConfig::from_app(config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let custody = Arc::new(InMemoryCustody::new());
    let venue = Arc::new(
        SimulatedSwapExecutor::new(options.price, options.fee_bps).with_custody(custody.clone()),
    );
    let oracle = Arc::new(TwapOracle::new(TwapConfig::default(), clock.clone()));

    let store: Option<Arc<dyn SnapshotStore>> = config
        .persistence
        .snapshot_path
        .as_ref()
        .map(|path| Arc::new(FileSnapshotStore::new(path)) as Arc<dyn SnapshotStore>);
    let state = match &store {
        Some(store) => match store.load().await? {
            Some(snapshot) => {
                info!(
                    last_sequence = snapshot.last_sequence,
                    taken_at = %snapshot.taken_at,
                    "Restoring ledger from snapshot"
                );
                snapshot.into_state()
            }
            None => LedgerState::new(),
        },
        None => LedgerState::new(),
    };

    // paper custody must back what the ledger owes
    custody
        .seed_protocol(Asset::Funding, state.total_funding_liability())
        .await;
    custody
        .seed_protocol(Asset::Target, state.total_target_liability())
        .await;

    let engine = Arc::new(DcaEngine::with_state(
        engine_config,
        state,
        oracle.clone(),
        venue.clone(),
        custody.clone(),
        clock,
    ));
    let mut keeper = Keeper::new(engine.clone(), config.keeper.clone());
    if let Some(store) = store {
        keeper = keeper.with_snapshots(store);
    }

    Ok(KeeperService {
        engine,
        keeper,
        oracle,
        venue,
        custody,
    })
}

/// Run the keeper until `shutdown` turns true, then write a final snapshot
pub async fn run_keeper(
    config: AppConfig,
    options: KeeperOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let service = build_keeper_service(&config, &options).await?;
    let participants = service.engine.participant_count().await;
    let batches = service.engine.batches().await.len();
    info!(
        participants = participants,
        batches = batches,
        snapshot_path = ?config.persistence.snapshot_path,
        "Keeper service ready"
    );

    let feed = tokio::spawn(feed_prices(
        service.oracle.clone(),
        service.venue.clone(),
        std::time::Duration::from_secs(options.observe_secs.max(1)),
        shutdown.clone(),
    ));
    let result = service.keeper.run(shutdown).await;
    if let Err(e) = feed.await {
        warn!(error = %e, "Price feed task ended abnormally");
    }
    result
}

/// Record the venue mark into the oracle until shutdown
async fn feed_prices(
    oracle: Arc<TwapOracle>,
    venue: Arc<SimulatedSwapExecutor>,
    every: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => oracle.record(venue.price().await).await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Drive a full deposit → cycles → burn lifecycle against in-memory adapters
pub async fn run_simulation(config: AppConfig, options: SimulationOptions) -> Result<()> {
    let engine_config = EngineConfig::from_app(&config)?;
    let interval = i64::try_from(config.protocol.investment_interval_secs)
        .map_err(|_| DcaeError::Validation("interval too large".into()))?;
    let step = (interval / 4).max(1);

    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let custody = Arc::new(InMemoryCustody::new());
    let venue = Arc::new(SimulatedSwapExecutor::new(options.price, 5).with_custody(custody.clone()));
    let oracle = Arc::new(TwapOracle::new(
        TwapConfig {
            window_secs: interval,
            min_observations: 2,
            min_window_secs: step,
        },
        clock.clone(),
    ));
    let engine = Arc::new(DcaEngine::new(
        engine_config,
        oracle.clone(),
        venue.clone(),
        custody.clone(),
        clock.clone(),
    ));
    let keeper = Keeper::new(engine.clone(), config.keeper.clone());

    let min_deposit = Amount::from(config.protocol.min_deposit);
    let people: Vec<ParticipantId> = (0..options.participants)
        .map(|i| ParticipantId::new(format!("participant-{i}")))
        .collect();
    for (i, who) in people.iter().enumerate() {
        let invest = min_deposit * (i as Amount + 1);
        let deposit = invest * Amount::from(options.cycles.max(1));
        custody.mint_to(Asset::Funding, who, deposit).await;
        custody.approve(Asset::Funding, who, deposit).await;
        engine.deposit(who, deposit).await?;
        engine.set_invest_amount(who, invest).await?;
    }

    println!("Simulating {} cycles for {} participants\n", options.cycles, people.len());
    let mut price = options.price;
    for cycle in 1..=options.cycles {
        // four observations spread over exactly one interval
        for k in 0..4 {
            oracle.record(price).await;
            let advance = if k == 3 { interval - 3 * step } else { step };
            clock.advance(Duration::seconds(advance));
        }
        venue.set_price(price).await;

        let report = keeper.run_once().await;
        let output: Amount = report.executed.iter().map(|r| r.actual_output).sum();
        println!(
            "  cycle {cycle:>3} │ price {price:.8} │ executed {} │ skipped {} │ failed {} │ output {output}",
            report.executed.len(),
            report.skipped.len(),
            report.failed.len(),
        );
        price *= Decimal::ONE + options.drift;
    }

    clock.advance(Duration::days(options.hold_days));
    println!("\nAfter holding {} days:", options.hold_days);
    for who in &people {
        match engine.burn_for_reward(who).await {
            Ok(out) => println!(
                "  {who} │ burned {} │ ratio {} │ payout {}",
                out.burned, out.ratio, out.payout
            ),
            Err(e) => println!("  {who} │ \x1b[33m{e}\x1b[0m"),
        }
        if let Err(e) = engine.withdraw_target(who).await {
            println!("  {who} │ \x1b[33m{e}\x1b[0m");
        }
    }

    let totals = engine.totals().await;
    println!("\nTotals:");
    println!("  invested:       {}", totals.total_invested);
    println!("  acquired:       {}", totals.total_acquired);
    println!("  reserve:        {}", totals.reserve);
    println!("  receipt supply: {}", totals.receipt_supply);
    println!("  events:         {}", engine.events().await.len());
    println!(
        "  average price:  {}",
        average_price(totals.total_acquired, totals.total_invested)
    );

    if let Some(path) = options.snapshot {
        let store = FileSnapshotStore::new(path);
        store.save(&engine.snapshot().await).await?;
        println!("\nSnapshot written to {}", store.path().display());
    }
    println!("\nFinished at {}", clock.now());
    Ok(())
}

/// Target units acquired per funding unit invested
fn average_price(acquired: Amount, invested: Amount) -> Decimal {
    match (amount_to_decimal(acquired), amount_to_decimal(invested)) {
        (Ok(a), Ok(i)) if !i.is_zero() => (a / i).round_dp(10),
        _ => dec!(0),
    }
}
