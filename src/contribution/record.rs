//! Per-player contribution record.

use super::Amount;
use crate::error::{MinerHatError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Current on-disk record format.
pub const RECORD_VERSION: u32 = 1;

pub type PlayerId = Uuid;

/// A dated revenue amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueEntry {
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    pub amount: Amount,
}

/// Result of moving pending revenue into the realized history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Realized {
    pub realized: Amount,
    pub forfeited: Amount,
}

/// Everything the ledger knows about one player.
///
/// `accumulative_revenue` always equals the sum of `revenue_history`; the
/// mutators below are the only way to change either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerContribution {
    version: u32,
    player: PlayerId,
    worker_name: String,
    accumulative_revenue: Amount,
    /// Attributed but not yet checked out, oldest first.
    #[serde(default)]
    pending: Vec<RevenueEntry>,
    #[serde(default)]
    revenue_history: BTreeMap<i64, Amount>,
    /// Pending revenue that expired before checkout.
    #[serde(default)]
    forfeited: Vec<RevenueEntry>,
    /// Latest pool distribution credited to this record.
    #[serde(default)]
    last_distribution: i64,
}

impl PlayerContribution {
    pub fn new(player: PlayerId, worker_name: impl Into<String>) -> Self {
        Self {
            version: RECORD_VERSION,
            player,
            worker_name: worker_name.into(),
            accumulative_revenue: Amount::ZERO,
            pending: Vec::new(),
            revenue_history: BTreeMap::new(),
            forfeited: Vec::new(),
            last_distribution: 0,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    pub fn accumulative_revenue(&self) -> Amount {
        self.accumulative_revenue
    }

    /// Revenue attributed but not yet checked out.
    pub fn pending_revenue(&self) -> Amount {
        self.pending.iter().map(|e| e.amount).sum()
    }

    pub fn pending(&self) -> &[RevenueEntry] {
        &self.pending
    }

    pub fn history(&self) -> &BTreeMap<i64, Amount> {
        &self.revenue_history
    }

    pub fn forfeited(&self) -> &[RevenueEntry] {
        &self.forfeited
    }

    pub fn forfeited_revenue(&self) -> Amount {
        self.forfeited.iter().map(|e| e.amount).sum()
    }

    /// Attribute `share` earned at `timestamp`. Zero shares are ignored.
    pub fn accrue(&mut self, timestamp: i64, share: Amount) {
        if share.is_zero() {
            return;
        }
        let at = self.pending.partition_point(|e| e.timestamp <= timestamp);
        self.pending.insert(
            at,
            RevenueEntry {
                timestamp,
                amount: share,
            },
        );
    }

    pub fn last_distribution(&self) -> i64 {
        self.last_distribution
    }

    /// Attribute this player's share of pool distribution `distribution`.
    ///
    /// Distributions must be applied in increasing order. Returns false and
    /// changes nothing if this one, or a later one, was already applied.
    pub fn accrue_distribution(&mut self, distribution: i64, timestamp: i64, share: Amount) -> bool {
        if distribution <= self.last_distribution {
            return false;
        }
        self.last_distribution = distribution;
        self.accrue(timestamp, share);
        true
    }

    /// Realize pending revenue earned within `window_secs` of `now`.
    ///
    /// Realized entries move into the history under their original
    /// timestamps. Older entries are forfeited.
    pub fn realize(&mut self, now: i64, window_secs: i64) -> Realized {
        let cutoff = now.saturating_sub(window_secs);
        let mut outcome = Realized::default();

        for entry in std::mem::take(&mut self.pending) {
            if entry.timestamp >= cutoff {
                self.record(entry.timestamp, entry.amount);
                outcome.realized += entry.amount;
            } else {
                outcome.forfeited += entry.amount;
                self.forfeited.push(entry);
            }
        }
        outcome
    }

    /// Remove `amount` from the realized total.
    pub fn withdraw(&mut self, amount: Amount, now: i64) -> Result<()> {
        if !amount.is_positive() {
            return Err(MinerHatError::InvalidAmount(format!(
                "withdrawal must be positive, got {}",
                amount
            )));
        }
        if amount > self.accumulative_revenue {
            return Err(MinerHatError::InsufficientRevenue {
                requested: amount,
                available: self.accumulative_revenue,
            });
        }
        self.record(now, -amount);
        Ok(())
    }

    /// True when the realized total matches its history.
    pub fn is_consistent(&self) -> bool {
        let sum: Amount = self.revenue_history.values().sum();
        sum == self.accumulative_revenue
    }

    /// Validate a record read from storage.
    pub fn check(&self, expected: PlayerId) -> Result<()> {
        if self.version == 0 || self.version > RECORD_VERSION {
            return Err(MinerHatError::Storage(format!(
                "record for {} has unsupported version {}",
                self.player, self.version
            )));
        }
        if self.player != expected {
            return Err(MinerHatError::Storage(format!(
                "record for {} found in the file of {}",
                self.player, expected
            )));
        }
        if !self.is_consistent() {
            return Err(MinerHatError::Storage(format!(
                "record for {} is corrupt: total {} does not match its history",
                self.player, self.accumulative_revenue
            )));
        }
        Ok(())
    }

    fn record(&mut self, timestamp: i64, delta: Amount) {
        let slot = self.revenue_history.entry(timestamp).or_insert(Amount::ZERO);
        *slot += delta;
        if slot.is_zero() {
            self.revenue_history.remove(&timestamp);
        }
        self.accumulative_revenue += delta;
    }
}
