//! Durable record of redemption outcomes, keyed by key id.
//!
//! Entries are append-only; when a key appears more than once the most
//! recent entry wins. Keys whose latest outcome is non-retryable are never
//! attempted again.

mod jsonl;
mod legacy;

pub use jsonl::JsonlLedgerStore;
pub use legacy::{LegacyEntry, fold_legacy_title, load_legacy_exports, parse_legacy_export};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::keys::KeyRecord;
use crate::redemption::RedemptionOutcome;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub key_id: String,
    pub order_id: String,
    pub title: String,
    pub outcome: RedemptionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(key: &KeyRecord, outcome: RedemptionOutcome) -> Self {
        Self {
            key_id: key.id.clone(),
            order_id: key.order_id.clone(),
            title: key.title.clone(),
            outcome,
            code: None,
            detail: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_code(mut self, code: Option<i64>) -> Self {
        self.code = code;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Where ledger entries are persisted.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// All readable entries in write order.
    async fn load(&self) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Durably append one entry.
    async fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError>;
}

/// In-memory store, used for dry runs and tests.
#[derive(Default)]
pub struct MemoryLedgerStore {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<LedgerEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    pub fn snapshot(&self) -> Vec<LedgerEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn load(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.entries.lock().clone())
    }

    async fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

/// The loaded ledger plus its backing store.
pub struct Ledger {
    latest: HashMap<String, LedgerEntry>,
    legacy: HashMap<(String, String), RedemptionOutcome>,
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    pub async fn open(store: Arc<dyn LedgerStore>) -> Result<Self, LedgerError> {
        let mut latest = HashMap::new();
        for entry in store.load().await? {
            latest.insert(entry.key_id.clone(), entry);
        }
        debug!(keys = latest.len(), "Ledger loaded");
        Ok(Self {
            latest,
            legacy: HashMap::new(),
            store,
        })
    }

    /// Merge entries from the older per-outcome CSV exports.
    pub fn with_legacy(mut self, entries: Vec<LegacyEntry>) -> Self {
        for entry in entries {
            self.legacy
                .insert((entry.order_id, entry.title), entry.outcome);
        }
        self
    }

    /// Latest recorded outcome for `key`, falling back to legacy exports.
    pub fn outcome_for(&self, key: &KeyRecord) -> Option<RedemptionOutcome> {
        if let Some(entry) = self.latest.get(&key.id) {
            return Some(entry.outcome);
        }
        self.legacy
            .get(&(key.order_id.clone(), fold_legacy_title(&key.title)))
            .copied()
    }

    /// The non-retryable outcome that settles `key`, if any.
    pub fn settled_outcome(&self, key: &KeyRecord) -> Option<RedemptionOutcome> {
        self.outcome_for(key).filter(|o| !o.is_retryable())
    }

    pub fn entry(&self, key_id: &str) -> Option<&LedgerEntry> {
        self.latest.get(key_id)
    }

    /// Persist `entry`, then make it visible.
    pub async fn record(&mut self, entry: LedgerEntry) -> Result<(), LedgerError> {
        self.store.append(&entry).await?;
        self.latest.insert(entry.key_id.clone(), entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty() && self.legacy.is_empty()
    }
}
