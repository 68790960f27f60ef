//! Mining pool statistics.
//!
//! [`PoolSource`] wraps a [`PoolClient`] with a per-wallet TTL cache. Callers
//! asking for the same wallet at the same time share one remote query.

mod nodejs;

pub use nodejs::{NodeJsPoolClient, parse_stats};

use crate::contribution::Amount;
use crate::error::{MinerHatError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Pool software the wallet mines on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    #[default]
    SupportXmr,
    MoneroOcean,
    /// Any nodejs-pool deployment; requires `pool_api_url`.
    Custom,
}

impl PoolKind {
    pub fn default_api_url(&self) -> Option<&'static str> {
        match self {
            Self::SupportXmr => Some("https://supportxmr.com/api"),
            Self::MoneroOcean => Some("https://api.moneroocean.stream"),
            Self::Custom => None,
        }
    }
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SupportXmr => "supportxmr",
            Self::MoneroOcean => "moneroocean",
            Self::Custom => "custom",
        };
        write!(f, "{}", name)
    }
}

/// Lifetime totals reported by a pool for one wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolTotals {
    pub paid: Amount,
    pub unpaid: Amount,
}

/// Remote statistics query.
pub trait PoolClient: Send + Sync {
    fn fetch(&self, wallet: &str) -> Result<PoolTotals>;
}

/// Cached pool statistics for one wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub wallet_address: String,
    pub cryptocurrency: String,
    pub total_paid: Amount,
    pub total_unpaid: Amount,
    pub fetched_at: DateTime<Utc>,
}

impl PoolSnapshot {
    /// Everything the wallet has ever earned.
    pub fn total(&self) -> Amount {
        self.total_paid + self.total_unpaid
    }
}

#[derive(Default)]
struct CacheSlot {
    snapshot: Option<PoolSnapshot>,
    fetched: Option<Instant>,
    /// Most recent failed query, cleared by the next success.
    failed: Option<(Instant, String)>,
}

/// Cache hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub remote_queries: u64,
    pub cache_hits: u64,
}

/// Wallet metadata plus a TTL cache in front of a [`PoolClient`].
pub struct PoolSource {
    client: Box<dyn PoolClient>,
    wallet_address: String,
    cryptocurrency: String,
    worker_prefix: String,
    ttl: Duration,
    slots: Mutex<HashMap<String, Arc<Mutex<CacheSlot>>>>,
    remote_queries: AtomicU64,
    cache_hits: AtomicU64,
}

impl PoolSource {
    pub fn new(
        client: Box<dyn PoolClient>,
        wallet_address: impl Into<String>,
        cryptocurrency: impl Into<String>,
        worker_prefix: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            client,
            wallet_address: wallet_address.into(),
            cryptocurrency: cryptocurrency.into(),
            worker_prefix: worker_prefix.into(),
            ttl,
            slots: Mutex::new(HashMap::new()),
            remote_queries: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    pub fn wallet_address(&self) -> &str {
        &self.wallet_address
    }

    pub fn cryptocurrency_name(&self) -> &str {
        &self.cryptocurrency
    }

    pub fn worker_prefix(&self) -> &str {
        &self.worker_prefix
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Snapshot for the configured wallet.
    pub fn get_snapshot(&self, force_refresh: bool) -> Result<PoolSnapshot> {
        self.snapshot_for(&self.wallet_address, force_refresh)
    }

    /// Snapshot for `wallet`, served from cache while it is fresh.
    ///
    /// Concurrent callers for one wallet are serialized on that wallet's slot:
    /// the first one fetches and the rest reuse its result, success or
    /// failure. A forced refresh is satisfied by any fetch that completed
    /// after the call began. On failure the cached snapshot is left untouched.
    pub fn snapshot_for(&self, wallet: &str, force_refresh: bool) -> Result<PoolSnapshot> {
        let requested = Instant::now();
        let slot = self.slot(wallet);
        let mut slot = lock(&slot);

        if let (Some(snapshot), Some(fetched)) = (&slot.snapshot, slot.fetched) {
            let fresh = fetched.elapsed() < self.ttl;
            if (fresh && !force_refresh) || fetched >= requested {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(snapshot.clone());
            }
        }
        if let Some((failed_at, message)) = &slot.failed
            && *failed_at >= requested
        {
            return Err(MinerHatError::PoolUnavailable(message.clone()));
        }

        self.remote_queries.fetch_add(1, Ordering::Relaxed);
        let totals = match self.client.fetch(wallet) {
            Ok(totals) => totals,
            Err(e) => {
                tracing::warn!(wallet = %wallet, error = %e, "Pool query failed");
                let message = match &e {
                    MinerHatError::PoolUnavailable(message) => message.clone(),
                    other => other.to_string(),
                };
                slot.failed = Some((Instant::now(), message));
                return Err(e);
            }
        };

        // fetched_at never goes backwards, even if the wall clock does.
        let now = Utc::now();
        let fetched_at = match &slot.snapshot {
            Some(prev) if prev.fetched_at > now => prev.fetched_at,
            _ => now,
        };
        let snapshot = PoolSnapshot {
            wallet_address: wallet.to_string(),
            cryptocurrency: self.cryptocurrency.clone(),
            total_paid: totals.paid,
            total_unpaid: totals.unpaid,
            fetched_at,
        };
        tracing::debug!(
            wallet = %wallet,
            paid = %snapshot.total_paid,
            unpaid = %snapshot.total_unpaid,
            "Pool snapshot refreshed"
        );

        slot.snapshot = Some(snapshot.clone());
        slot.fetched = Some(Instant::now());
        slot.failed = None;
        Ok(snapshot)
    }

    /// Last snapshot for the configured wallet, however old.
    pub fn cached_snapshot(&self) -> Option<PoolSnapshot> {
        let slot = self.slot(&self.wallet_address);
        let slot = lock(&slot);
        slot.snapshot.clone()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            remote_queries: self.remote_queries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, wallet: &str) -> Arc<Mutex<CacheSlot>> {
        let mut slots = lock(&self.slots);
        slots.entry(wallet.to_string()).or_default().clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
