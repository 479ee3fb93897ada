pub mod batch;
pub mod event;
pub mod participant;
pub mod receipt;

pub use batch::*;
pub use event::*;
pub use participant::*;
pub use receipt::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Token amount in the asset's smallest unit
pub type Amount = u128;

/// Batch identifier, assigned from 0 upwards
pub type BatchId = u64;

/// Basis-point denominator (10_000 = 100%)
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Participant identity (wallet address or any opaque account key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The two assets the ledger handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Asset {
    /// Stable asset participants deposit (e.g. USDC)
    Funding,
    /// Asset bought each cycle (e.g. WETH)
    Target,
}

impl Asset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Asset::Funding => "funding",
            Asset::Target => "target",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
