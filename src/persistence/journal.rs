//! Event Journal
//!
//! Append-only record of committed ledger mutations. Events are appended only
//! after the unit of work that produced them has committed, so a rolled-back
//! operation never leaves a trace here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::LedgerEvent;

/// Metadata for journaled events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Shared by all events produced by one operation
    pub correlation_id: Uuid,
    /// Identity that triggered the operation
    pub triggered_by: Option<String>,
}

impl EventMetadata {
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            triggered_by: None,
        }
    }

    pub fn with_triggered_by(mut self, triggered_by: &str) -> Self {
        self.triggered_by = Some(triggered_by.to_string());
        self
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// A journaled event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Gapless, starting at 1
    pub sequence: u64,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub metadata: EventMetadata,
    pub event: LedgerEvent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventJournal {
    events: Vec<StoredEvent>,
}

impl EventJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the events of one committed operation; returns the last sequence
    pub fn append_all(
        &mut self,
        events: Vec<LedgerEvent>,
        metadata: &EventMetadata,
        occurred_at: DateTime<Utc>,
    ) -> u64 {
        for event in events {
            let sequence = self.last_sequence() + 1;
            self.events.push(StoredEvent {
                sequence,
                event_type: event.event_type().to_string(),
                occurred_at,
                metadata: metadata.clone(),
                event,
            });
        }
        self.last_sequence()
    }

    pub fn last_sequence(&self) -> u64 {
        self.events.last().map(|e| e.sequence).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn all(&self) -> &[StoredEvent] {
        &self.events
    }

    /// Events with a sequence greater than `sequence`
    pub fn since(&self, sequence: u64) -> &[StoredEvent] {
        let start = self.events.partition_point(|e| e.sequence <= sequence);
        &self.events[start..]
    }

    pub fn by_correlation(&self, correlation_id: Uuid) -> Vec<&StoredEvent> {
        self.events
            .iter()
            .filter(|e| e.metadata.correlation_id == correlation_id)
            .collect()
    }
}
