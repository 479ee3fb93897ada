pub mod adapters;
pub mod cli;
pub mod clock;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod keeper;
pub mod ledger;
pub mod persistence;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use domain::{Amount, Asset, BatchId, ClaimStage, LedgerEvent, ParticipantId, ParticipantView};
pub use engine::{BurnOutcome, DcaEngine, EngineConfig, ExecutionReport, RewardSchedule};
pub use error::{DcaeError, ErrorCategory, Result};
pub use exchange::{AssetCustody, PriceOracle, SwapExecutor};
pub use keeper::{Keeper, KeeperReport};
pub use persistence::{
    EventJournal, EventMetadata, FileSnapshotStore, LedgerSnapshot, SnapshotStore, StoredEvent,
};
