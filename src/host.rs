//! The MinerHat host: one scheduler, one ledger, and the timers that drive
//! them, wired together from a [`MinerHatConfig`].
//!
//! The embedding game server owns a single [`MinerHat`] and forwards player
//! join/leave events to it. Checkout and exchange go straight to the shared
//! [`ContributionLedger`] handle.

use crate::config::MinerHatConfig;
use crate::contribution::{ContributionLedger, ContributionStore, Economy, PlayerId};
use crate::error::{MinerHatError, Result};
use crate::miner::{LaunchVars, MinerPolicy, MiningScheduler, PeriodicTask, SchedulerSettings};
use crate::paths::DataPaths;
use crate::pool::{NodeJsPoolClient, PoolSource};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a player needs to mine for the server on their own machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MiningInfo {
    pub wallet_address: String,
    pub cryptocurrency: String,
    pub worker_name: String,
    pub note: String,
}

pub struct MinerHat {
    paths: DataPaths,
    config: MinerHatConfig,
    economy: Option<Arc<dyn Economy>>,
    ledger: Arc<ContributionLedger>,
    scheduler: Option<Arc<MiningScheduler>>,
    timers: Vec<PeriodicTask>,
    online: BTreeSet<PlayerId>,
}

impl MinerHat {
    /// Build every component from `config` and start the timers.
    ///
    /// A broken miner policy is logged and leaves mining disabled; the
    /// ledger still works.
    pub fn start(
        paths: DataPaths,
        config: MinerHatConfig,
        economy: Option<Arc<dyn Economy>>,
    ) -> Result<Self> {
        config.validate()?;
        paths.ensure()?;

        let store = ContributionStore::open(paths.contribution_dir())?;
        let mut ledger = ContributionLedger::with_store(config.ledger_settings(), store);
        if let Some(pool) = build_pool(&config)? {
            ledger = ledger.with_pool(pool);
        }
        if let Some(economy) = economy.clone().filter(|_| config.economy.enabled) {
            ledger = ledger.with_economy(economy);
        }

        let mut host = Self {
            paths,
            config,
            economy,
            ledger: Arc::new(ledger),
            scheduler: None,
            timers: Vec::new(),
            online: BTreeSet::new(),
        };
        host.bring_up()?;
        Ok(host)
    }

    /// Construct the scheduler and timers for the current config.
    fn bring_up(&mut self) -> Result<()> {
        self.scheduler = self.build_scheduler();

        if let Some(scheduler) = &self.scheduler {
            if let Err(e) = scheduler.evaluate_and_toggle(self.online_count()) {
                warn!(error = %e, "Initial miner evaluation failed");
            }

            if let Some(interval) = self.config.mining.check_interval() {
                let scheduler = Arc::clone(scheduler);
                self.timers.push(PeriodicTask::spawn("miner-check", interval, move || {
                    if let Err(e) = scheduler.check() {
                        warn!(error = %e, "Miner check failed");
                    }
                })?);
            }

            if let Some(interval) = self.config.mining.restart_interval() {
                let scheduler = Arc::clone(scheduler);
                self.timers.push(PeriodicTask::spawn("miner-restart", interval, move || {
                    if let Err(e) = scheduler.scheduled_restart() {
                        warn!(error = %e, "Scheduled miner restart failed");
                    }
                })?);
            }
        }

        if self.ledger.pool().is_some()
            && let Some(interval) = self.config.contribution.pool_sync_interval()
        {
            let ledger = Arc::clone(&self.ledger);
            self.timers.push(PeriodicTask::spawn("pool-sync", interval, move || {
                match ledger.sync_from_pool(Utc::now()) {
                    Ok(outcome) => debug!(?outcome, "Pool sync"),
                    Err(e) => warn!(error = %e, "Pool sync failed"),
                }
            })?);
        }

        info!(
            mining = self.scheduler.is_some(),
            contribution = self.ledger.pool().is_some(),
            economy = self.ledger.has_economy(),
            timers = self.timers.len(),
            "MinerHat started"
        );
        Ok(())
    }

    fn build_scheduler(&self) -> Option<Arc<MiningScheduler>> {
        if !self.config.mining.enabled {
            info!("Mining disabled in configuration");
            return None;
        }
        let name = &self.config.mining.miner;
        let policy = match MinerPolicy::load(name, &self.paths.policy_file(name)) {
            Ok(policy) => policy,
            Err(e) => {
                error!(miner = %name, error = %e, "Cannot load miner policy, mining disabled");
                return None;
            }
        };

        let settings = SchedulerSettings {
            stop_grace: self.config.mining.stop_grace(),
            backoff: self.config.mining.restart_backoff.clone(),
            launch: LaunchVars {
                wallet: self.config.contribution.wallet_address.clone(),
                worker: self.config.contribution.server_worker(),
            },
        };
        Some(Arc::new(MiningScheduler::new(policy, settings)))
    }

    pub fn config(&self) -> &MinerHatConfig {
        &self.config
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    pub fn ledger(&self) -> &Arc<ContributionLedger> {
        &self.ledger
    }

    pub fn scheduler(&self) -> Option<&Arc<MiningScheduler>> {
        self.scheduler.as_ref()
    }

    pub fn online_count(&self) -> u32 {
        u32::try_from(self.online.len()).unwrap_or(u32::MAX)
    }

    pub fn on_player_join(&mut self, player: PlayerId) -> Result<bool> {
        if !self.online.insert(player) {
            return Ok(false);
        }
        self.ledger.mark_online(player);
        info!(player = %player, online = self.online.len(), "Player joined");
        self.on_population_changed(self.online_count())
    }

    pub fn on_player_leave(&mut self, player: PlayerId) -> Result<bool> {
        if !self.online.remove(&player) {
            return Ok(false);
        }
        self.ledger.mark_offline(player);
        info!(player = %player, online = self.online.len(), "Player left");
        self.on_population_changed(self.online_count())
    }

    /// Population signal. Returns whether the miner was started or stopped.
    pub fn on_population_changed(&self, count: u32) -> Result<bool> {
        match &self.scheduler {
            Some(scheduler) => scheduler.evaluate_and_toggle(count),
            None => Ok(false),
        }
    }

    /// Wallet, worker and instructions for `player`.
    pub fn mining_info(&self, player: PlayerId) -> Result<MiningInfo> {
        let pool = self.ledger.pool().ok_or_else(|| {
            MinerHatError::Config("contribution tracking is disabled".to_string())
        })?;
        let worker_name = self.ledger.worker_name_for(player);
        Ok(MiningInfo {
            wallet_address: pool.wallet_address().to_string(),
            cryptocurrency: pool.cryptocurrency_name().to_string(),
            note: self
                .config
                .mining_note
                .render(pool.wallet_address(), &worker_name),
            worker_name,
        })
    }

    /// Apply a new configuration.
    ///
    /// Everything that can reject the new config is checked first; on error
    /// the old miner and timers keep running. Then timers and the miner under
    /// the old config are fully torn down before new ones are started. Player
    /// records and attendance carry over.
    pub fn reconfigure(&mut self, config: MinerHatConfig) -> Result<()> {
        config.validate()?;
        let pool = build_pool(&config)?;

        info!("Reconfiguring");
        self.teardown();
        let economy = self.economy.clone().filter(|_| config.economy.enabled);
        self.ledger.rewire(config.ledger_settings(), pool, economy);
        self.config = config;
        self.bring_up()
    }

    /// Reload `config.json` from disk and apply it.
    pub fn reload(&mut self) -> Result<()> {
        let config = MinerHatConfig::load(&self.paths.config_file())?;
        self.reconfigure(config)
    }

    fn teardown(&mut self) {
        for mut timer in self.timers.drain(..) {
            timer.cancel();
        }
        if let Some(scheduler) = self.scheduler.take()
            && let Err(e) = scheduler.shutdown()
        {
            warn!(error = %e, "Miner did not stop cleanly");
        }
    }

    /// Cancel all timers, wait for them, and stop the miner.
    pub fn shutdown(&mut self) {
        self.teardown();
        info!("MinerHat stopped");
    }
}

impl Drop for MinerHat {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn build_pool(config: &MinerHatConfig) -> Result<Option<Arc<PoolSource>>> {
    let c = &config.contribution;
    if !c.enabled {
        return Ok(None);
    }
    let url = c.api_url().ok_or_else(|| {
        MinerHatError::Config(format!("no API URL for pool '{}'", c.pool))
    })?;
    let client = NodeJsPoolClient::new(url, c.coin_decimals, c.request_timeout())?;
    Ok(Some(Arc::new(PoolSource::new(
        Box::new(client),
        c.wallet_address.clone(),
        c.cryptocurrency.clone(),
        c.worker_prefix.clone(),
        c.wallet_info_ttl(),
    ))))
}
