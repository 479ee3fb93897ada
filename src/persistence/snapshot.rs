//! Ledger snapshots for crash recovery
//!
//! A snapshot captures the full ledger plus the journal sequence it
//! corresponds to. Restoring rebuilds the participant lookup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;
use crate::ledger::LedgerState;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    /// Last journal sequence included in `state`
    pub last_sequence: u64,
    pub state: LedgerState,
}

impl LedgerSnapshot {
    pub fn new(state: LedgerState, last_sequence: u64, taken_at: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            taken_at,
            last_sequence,
            state,
        }
    }

    /// Consume the snapshot, returning a ready-to-use ledger
    pub fn into_state(self) -> LedgerState {
        let mut state = self.state;
        state.reindex();
        state
    }
}

/// Storage for ledger snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<()>;

    /// Latest snapshot, if any was saved
    async fn load(&self) -> Result<Option<LedgerSnapshot>>;
}

/// JSON file snapshot store
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Write-then-rename so a crash never leaves a torn snapshot
        let tmp = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        info!(
            path = %self.path.display(),
            last_sequence = snapshot.last_sequence,
            participants = snapshot.state.participant_count(),
            "Saved ledger snapshot"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<LedgerSnapshot>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let snapshot: LedgerSnapshot = serde_json::from_slice(&bytes)?;
                debug!(path = %self.path.display(), "Loaded ledger snapshot");
                Ok(Some(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
