//! Contribution ledger.
//!
//! Attributes pool revenue to the players who were online while it was
//! earned, and lets them check it out, withdraw it, or exchange it.
//!
//! Locking: the player map is behind an `RwLock` and each record behind its
//! own `Mutex`, so operations on different players never contend. Pool
//! synchronisation queries the pool first, then holds the sync mutex and
//! individual player locks; nothing takes them in the opposite order.
//!
//! A distribution is first saved in the ledger state as owed shares together
//! with the new baseline, then written into each player's record. Shares
//! whose record cannot be written stay owed and are retried on every sync.

use super::Amount;
use super::checkout::CheckoutCoordinator;
use super::exchange::{Economy, ExchangeReceipt};
use super::record::{PlayerContribution, PlayerId};
use super::store::{ContributionStore, LEDGER_STATE_VERSION, LedgerState, OwedShare};
use crate::error::{MinerHatError, Result};
use crate::pool::PoolSource;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Pending revenue older than this is forfeited at checkout.
pub const CHECKOUT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Tunables applied to every ledger operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSettings {
    /// Fraction of pool revenue passed on to players.
    pub revenue_factor: Amount,
    pub worker_prefix: String,
    pub minimum_exchange: Amount,
    pub checkout_window: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            revenue_factor: Amount::from_whole(1),
            worker_prefix: "minerhat_".to_string(),
            minimum_exchange: Amount::ZERO,
            checkout_window: CHECKOUT_WINDOW,
        }
    }
}

/// Result of a checkout: the new realized total and what was just added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckoutOutcome {
    pub total: Amount,
    pub delta: Amount,
    /// Pending revenue that had expired.
    pub forfeited: Amount,
}

/// What a pool synchronisation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No pool attached.
    Disabled,
    /// First observation; recorded as the baseline only.
    Baseline(Amount),
    Unchanged,
    /// The pool total went down; the baseline was reset.
    Reset { previous: Amount, current: Amount },
    Distributed { delta: Amount, players: usize },
    /// Revenue earned while nobody was online.
    Unattributed(Amount),
}

struct Wiring {
    settings: LedgerSettings,
    pool: Option<Arc<PoolSource>>,
    economy: Option<Arc<dyn Economy>>,
}

struct SyncState {
    baseline: LedgerState,
    /// `fetched_at` of the snapshot the baseline was taken from.
    observed_at: Option<DateTime<Utc>>,
    online: BTreeSet<PlayerId>,
    /// Everyone online at some point since the last distribution.
    attended: BTreeSet<PlayerId>,
}

type Entry = Arc<Mutex<PlayerContribution>>;

pub struct ContributionLedger {
    wiring: RwLock<Wiring>,
    players: RwLock<HashMap<PlayerId, Entry>>,
    store: Option<ContributionStore>,
    sync: Mutex<SyncState>,
    checkouts: Arc<CheckoutCoordinator>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ContributionLedger {
    /// In-memory ledger.
    pub fn new(settings: LedgerSettings) -> Self {
        Self::build(settings, None)
    }

    /// Ledger persisted to `store`, resuming its pool baseline.
    pub fn with_store(settings: LedgerSettings, store: ContributionStore) -> Self {
        Self::build(settings, Some(store))
    }

    fn build(settings: LedgerSettings, store: Option<ContributionStore>) -> Self {
        let baseline = store
            .as_ref()
            .map(ContributionStore::load_state)
            .unwrap_or_default();
        Self {
            wiring: RwLock::new(Wiring {
                settings,
                pool: None,
                economy: None,
            }),
            players: RwLock::new(HashMap::new()),
            store,
            sync: Mutex::new(SyncState {
                baseline,
                observed_at: None,
                online: BTreeSet::new(),
                attended: BTreeSet::new(),
            }),
            checkouts: Arc::new(CheckoutCoordinator::new()),
        }
    }

    pub fn with_pool(mut self, pool: Arc<PoolSource>) -> Self {
        self.wiring_mut().pool = Some(pool);
        self
    }

    pub fn with_economy(mut self, economy: Arc<dyn Economy>) -> Self {
        self.wiring_mut().economy = Some(economy);
        self
    }

    fn wiring_mut(&mut self) -> &mut Wiring {
        self.wiring.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap settings and collaborators in place.
    ///
    /// Records and attendance survive; the pool baseline is kept only if the
    /// wallet is unchanged.
    pub fn rewire(
        &self,
        settings: LedgerSettings,
        pool: Option<Arc<PoolSource>>,
        economy: Option<Arc<dyn Economy>>,
    ) {
        let _sync = lock(&self.sync);
        let mut wiring = self.wiring.write().unwrap_or_else(PoisonError::into_inner);
        *wiring = Wiring {
            settings,
            pool,
            economy,
        };
    }

    pub fn settings(&self) -> LedgerSettings {
        self.wiring.read().unwrap_or_else(PoisonError::into_inner).settings.clone()
    }

    pub fn pool(&self) -> Option<Arc<PoolSource>> {
        self.wiring.read().unwrap_or_else(PoisonError::into_inner).pool.clone()
    }

    fn economy(&self) -> Option<Arc<dyn Economy>> {
        self.wiring.read().unwrap_or_else(PoisonError::into_inner).economy.clone()
    }

    pub fn has_economy(&self) -> bool {
        self.economy().is_some()
    }

    pub fn is_checkout_in_progress(&self, player: PlayerId) -> bool {
        self.checkouts.is_in_progress(player)
    }

    /// Pool worker name assigned to `player`.
    pub fn worker_name_for(&self, player: PlayerId) -> String {
        format!("{}{}", self.settings().worker_prefix, player.simple())
    }

    fn entry(&self, player: PlayerId) -> Result<Entry> {
        if let Some(entry) = self
            .players
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&player)
        {
            return Ok(Arc::clone(entry));
        }

        let mut players = self.players.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = players.get(&player) {
            return Ok(Arc::clone(entry));
        }
        let stored = match &self.store {
            Some(store) => store.load(player)?,
            None => None,
        };
        let record =
            stored.unwrap_or_else(|| PlayerContribution::new(player, self.worker_name_for(player)));
        let entry = Arc::new(Mutex::new(record));
        players.insert(player, Arc::clone(&entry));
        Ok(entry)
    }

    fn persist(&self, record: &PlayerContribution) -> Result<()> {
        match &self.store {
            Some(store) => store.save(record),
            None => Ok(()),
        }
    }

    /// Apply `f` to a copy of the record, persist it, then commit.
    ///
    /// If `f` or the write fails the record is left untouched.
    fn mutate<T>(
        &self,
        player: PlayerId,
        f: impl FnOnce(&mut PlayerContribution) -> Result<T>,
    ) -> Result<T> {
        let entry = self.entry(player)?;
        let mut record = lock(&entry);
        let mut updated = record.clone();
        let out = f(&mut updated)?;
        debug_assert!(updated.is_consistent());
        self.persist(&updated)?;
        *record = updated;
        Ok(out)
    }

    /// Copy of a player's record.
    pub fn contribution(&self, player: PlayerId) -> Result<PlayerContribution> {
        let entry = self.entry(player)?;
        let record = lock(&entry);
        Ok(record.clone())
    }

    /// Unrealized revenue.
    pub fn get_player_revenue(&self, player: PlayerId) -> Result<Amount> {
        Ok(self.contribution(player)?.pending_revenue())
    }

    /// Realized lifetime total.
    pub fn get_accumulative_revenue(&self, player: PlayerId) -> Result<Amount> {
        Ok(self.contribution(player)?.accumulative_revenue())
    }

    /// Realized history, oldest first.
    pub fn history(&self, player: PlayerId) -> Result<BTreeMap<i64, Amount>> {
        Ok(self.contribution(player)?.history().clone())
    }

    pub fn mark_online(&self, player: PlayerId) {
        let mut sync = lock(&self.sync);
        sync.online.insert(player);
        sync.attended.insert(player);
    }

    pub fn mark_offline(&self, player: PlayerId) {
        lock(&self.sync).online.remove(&player);
    }

    pub fn online_players(&self) -> BTreeSet<PlayerId> {
        lock(&self.sync).online.clone()
    }

    /// Players who will share the next distributed delta.
    pub fn attendance(&self) -> BTreeSet<PlayerId> {
        lock(&self.sync).attended.clone()
    }

    pub fn baseline(&self) -> LedgerState {
        lock(&self.sync).baseline.clone()
    }

    /// Split `total_delta` (scaled by the revenue factor) equally among
    /// `active` and credit each share as pending revenue.
    ///
    /// Remainder units go one each to the lowest player ids. Players outside
    /// `active` are never touched. Every record is loaded before any is
    /// changed, so an unreadable record fails the call without crediting
    /// anyone.
    pub fn record_delta(
        &self,
        total_delta: Amount,
        active: impl IntoIterator<Item = PlayerId>,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<(PlayerId, Amount)>> {
        let shares = self.shares(total_delta, active)?;
        for (player, _) in &shares {
            self.entry(*player)?;
        }

        let at = timestamp.timestamp();
        for (player, share) in &shares {
            if !share.is_zero() {
                self.mutate(*player, |record| {
                    record.accrue(at, *share);
                    Ok(())
                })?;
            }
        }
        debug!(delta = %total_delta, players = shares.len(), "Recorded revenue delta");
        Ok(shares)
    }

    fn shares(
        &self,
        total_delta: Amount,
        active: impl IntoIterator<Item = PlayerId>,
    ) -> Result<Vec<(PlayerId, Amount)>> {
        if total_delta.is_negative() {
            return Err(MinerHatError::InvalidAmount(format!(
                "revenue delta must not be negative, got {}",
                total_delta
            )));
        }
        let active: BTreeSet<PlayerId> = active.into_iter().collect();
        if active.is_empty() {
            return Ok(Vec::new());
        }
        let scaled = total_delta.mul_factor(self.settings().revenue_factor);
        let shares = scaled.split_even(active.len());
        Ok(active.into_iter().zip(shares).collect())
    }

    /// Compare the pool total with the last known one and distribute any
    /// increase to the players who attended since the previous distribution.
    ///
    /// Deltas are only ever computed from a successful query; on failure the
    /// baseline stays where it was and the error is returned. The pool is
    /// queried before the sync lock is taken, so joins and leaves never wait
    /// on it. Snapshots older than the current baseline are ignored.
    #[instrument(level = "debug", skip(self))]
    pub fn sync_from_pool(&self, now: DateTime<Utc>) -> Result<SyncOutcome> {
        let Some(pool) = self.pool() else {
            return Ok(SyncOutcome::Disabled);
        };
        let snapshot = pool.get_snapshot(false)?;
        let total = snapshot.total();

        let mut sync = lock(&self.sync);
        let same_wallet = sync.baseline.wallet_address.as_deref() == Some(pool.wallet_address());
        if same_wallet
            && sync
                .observed_at
                .is_some_and(|observed| snapshot.fetched_at < observed)
        {
            debug!(fetched_at = %snapshot.fetched_at, "Ignoring pool snapshot older than the baseline");
            self.settle_owed(&mut sync);
            return Ok(SyncOutcome::Unchanged);
        }
        let previous = sync.baseline.last_known_total.filter(|_| same_wallet);

        let outcome = match previous {
            None => SyncOutcome::Baseline(total),
            Some(prev) if total < prev => SyncOutcome::Reset {
                previous: prev,
                current: total,
            },
            Some(prev) if total == prev => SyncOutcome::Unchanged,
            Some(prev) if sync.attended.is_empty() => SyncOutcome::Unattributed(total - prev),
            Some(prev) => SyncOutcome::Distributed {
                delta: total - prev,
                players: sync.attended.len(),
            },
        };

        let mut next = LedgerState {
            version: LEDGER_STATE_VERSION,
            wallet_address: Some(pool.wallet_address().to_string()),
            last_known_total: Some(total),
            last_sync: Some(now),
            last_distribution: sync.baseline.last_distribution,
            owed: sync.baseline.owed.clone(),
        };
        if let SyncOutcome::Distributed { delta, .. } = outcome {
            let distribution = now.timestamp_millis().max(next.last_distribution + 1);
            next.last_distribution = distribution;
            for (player, amount) in self.shares(delta, sync.attended.iter().copied())? {
                if !amount.is_zero() {
                    next.owed.push(OwedShare {
                        distribution,
                        player,
                        timestamp: now.timestamp(),
                        amount,
                    });
                }
            }
        }

        // Nothing in memory changes unless the new baseline and its owed
        // shares are on disk.
        if let Some(store) = &self.store {
            store.save_state(&next)?;
        }
        sync.baseline = next;
        sync.observed_at = Some(snapshot.fetched_at);
        if outcome != SyncOutcome::Unchanged {
            sync.attended = sync.online.clone();
        }

        match outcome {
            SyncOutcome::Distributed { delta, players } => {
                info!(delta = %delta, total = %total, players, "Distributed pool revenue");
            }
            SyncOutcome::Reset { previous, current } => {
                warn!(previous = %previous, current = %current, "Pool total decreased, baseline reset");
            }
            SyncOutcome::Unattributed(delta) => {
                info!(delta = %delta, "Pool revenue earned with nobody online");
            }
            SyncOutcome::Baseline(total) => {
                info!(total = %total, wallet = %pool.wallet_address(), "Recorded pool baseline");
            }
            SyncOutcome::Unchanged | SyncOutcome::Disabled => {}
        }
        self.settle_owed(&mut sync);
        Ok(outcome)
    }

    /// Write owed shares into player records, oldest first.
    ///
    /// A player whose record cannot be loaded or saved keeps all their
    /// remaining shares owed until a later sync.
    fn settle_owed(&self, sync: &mut SyncState) {
        if sync.baseline.owed.is_empty() {
            return;
        }
        let mut blocked = BTreeSet::new();
        let mut remaining = Vec::new();
        let mut settled = 0usize;

        for share in std::mem::take(&mut sync.baseline.owed) {
            if blocked.contains(&share.player) {
                remaining.push(share);
                continue;
            }
            let credited = self.mutate(share.player, |record| {
                Ok(record.accrue_distribution(share.distribution, share.timestamp, share.amount))
            });
            match credited {
                Ok(_) => settled += 1,
                Err(e) => {
                    warn!(player = %share.player, amount = %share.amount, error = %e, "Cannot credit pool revenue, keeping it owed");
                    blocked.insert(share.player);
                    remaining.push(share);
                }
            }
        }
        sync.baseline.owed = remaining;

        // Records already carry their distribution id, so shares left in an
        // unsaved state are skipped when retried.
        if settled > 0
            && let Some(store) = &self.store
            && let Err(e) = store.save_state(&sync.baseline)
        {
            warn!(error = %e, "Failed to save settled pool shares");
        }
    }

    /// Distributed revenue not yet written to player records.
    pub fn owed_shares(&self) -> Vec<OwedShare> {
        lock(&self.sync).baseline.owed.clone()
    }

    /// Realize the player's pending revenue from the last 24 hours.
    ///
    /// Runs on the blocking pool so the caller's task is never stalled by the
    /// pool query. Fails immediately with `CheckoutInProgress` if another
    /// checkout for this player is outstanding.
    #[instrument(level = "debug", skip(self))]
    pub async fn checkout_revenue_24h(self: &Arc<Self>, player: PlayerId) -> Result<CheckoutOutcome> {
        let guard = self
            .checkouts
            .guard(player)
            .ok_or(MinerHatError::CheckoutInProgress)?;

        let ledger = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            ledger.checkout_blocking(player, Utc::now())
        })
        .await
        .map_err(|e| MinerHatError::Task(format!("checkout for {} failed: {}", player, e)))?
    }

    fn checkout_blocking(&self, player: PlayerId, now: DateTime<Utc>) -> Result<CheckoutOutcome> {
        if self.pool().is_some()
            && let Err(e) = self.sync_from_pool(now)
        {
            warn!(player = %player, error = %e, "Pool sync before checkout failed, realizing recorded revenue only");
        }

        let window = self.settings().checkout_window.as_secs() as i64;
        let (realized, total) = self.mutate(player, |record| {
            let realized = record.realize(now.timestamp(), window);
            Ok((realized, record.accumulative_revenue()))
        })?;

        if !realized.forfeited.is_zero() {
            info!(player = %player, forfeited = %realized.forfeited, "Expired pending revenue forfeited");
        }
        debug!(player = %player, delta = %realized.realized, total = %total, "Checkout complete");

        Ok(CheckoutOutcome {
            total,
            delta: realized.realized,
            forfeited: realized.forfeited,
        })
    }

    /// Remove `amount` from the player's realized total.
    ///
    /// Returns the remaining total.
    pub fn withdraw_player_revenue(&self, player: PlayerId, amount: Amount) -> Result<Amount> {
        let now = Utc::now().timestamp();
        self.mutate(player, |record| {
            record.withdraw(amount, now)?;
            Ok(record.accumulative_revenue())
        })
    }

    /// Withdraw `amount` and deposit `amount * rate` into the economy.
    ///
    /// The player's record stays locked for the whole exchange. If the
    /// deposit fails or panics the withdrawal is rolled back before the error
    /// is returned.
    pub fn exchange(&self, player: PlayerId, amount: Amount, rate: f64) -> Result<ExchangeReceipt> {
        let economy = self
            .economy()
            .ok_or_else(|| MinerHatError::Config("economy integration is disabled".to_string()))?;
        if !amount.is_positive() {
            return Err(MinerHatError::InvalidAmount(format!(
                "exchange amount must be positive, got {}",
                amount
            )));
        }
        let minimum = self.settings().minimum_exchange;
        if amount < minimum {
            return Err(MinerHatError::ExchangeAmountTooSmall { amount, minimum });
        }
        if !rate.is_finite() || rate <= 0.0 {
            return Err(MinerHatError::InvalidAmount(format!(
                "exchange rate must be positive, got {}",
                rate
            )));
        }
        let converted = amount.to_f64() * rate;

        let entry = self.entry(player)?;
        let mut record = lock(&entry);
        let original = record.clone();
        let mut updated = original.clone();
        updated.withdraw(amount, Utc::now().timestamp())?;
        self.persist(&updated)?;
        *record = updated;

        let failure =
            match std::panic::catch_unwind(AssertUnwindSafe(|| economy.deposit(player, converted))) {
                Ok(Ok(formatted)) => {
                    let formatted = if formatted.trim().is_empty() {
                        converted.to_string()
                    } else {
                        formatted
                    };
                    info!(player = %player, amount = %amount, converted, "Exchanged revenue");
                    return Ok(ExchangeReceipt {
                        player,
                        withdrawn: amount,
                        converted,
                        formatted,
                        remaining: record.accumulative_revenue(),
                    });
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

        warn!(player = %player, amount = %amount, error = %failure, "Deposit failed, rolling back withdrawal");
        let saved = self.persist(&original);
        *record = original;
        match saved {
            Ok(()) => Err(MinerHatError::ExchangeSettlement(failure)),
            Err(e) => {
                error!(player = %player, amount = %amount, error = %e, "Failed to persist exchange rollback");
                Err(MinerHatError::ExchangeRollback {
                    deposit: failure,
                    storage: e.to_string(),
                })
            }
        }
    }

    /// Players with a record in memory or on disk.
    pub fn known_players(&self) -> Result<BTreeSet<PlayerId>> {
        let mut players: BTreeSet<PlayerId> = self
            .players
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        if let Some(store) = &self.store {
            players.extend(store.players()?);
        }
        Ok(players)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("deposit panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("deposit panicked: {}", s)
    } else {
        "deposit panicked".to_string()
    }
}
