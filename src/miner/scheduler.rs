//! Mining scheduler.
//!
//! Owns at most one miner process and decides, from the online population,
//! whether it should run. Every state transition happens under one mutex so
//! concurrent population signals, periodic checks and reloads can never
//! spawn a second miner or leak a running one.

use super::backoff::BackoffConfig;
use super::exit::ExitReason;
use super::policy::{LaunchVars, MinerPolicy};
use super::process::MinerProcess;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Knobs that do not come from the policy file.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// How long a miner gets to exit after SIGTERM.
    pub stop_grace: Duration,
    pub backoff: BackoffConfig,
    pub launch: LaunchVars,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
            launch: LaunchVars::default(),
        }
    }
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub miner: String,
    pub mining: bool,
    pub pid: Option<u32>,
    pub population: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_exit: Option<String>,
    pub consecutive_failures: u32,
    pub retry_in_secs: Option<u64>,
    pub spawn_count: u64,
}

struct SchedulerState {
    policy: MinerPolicy,
    process: Option<MinerProcess>,
    population: u32,
    started_at: Option<DateTime<Utc>>,
    last_check: Option<DateTime<Utc>>,
    last_exit: Option<ExitReason>,
    failures: u32,
    retry_at: Option<Instant>,
    spawn_count: u64,
}

impl SchedulerState {
    fn backoff_remaining(&self) -> Option<Duration> {
        self.retry_at
            .and_then(|at| at.checked_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    fn clear_failures(&mut self) {
        self.failures = 0;
        self.retry_at = None;
    }
}

/// Runs at most one miner process for a single policy.
pub struct MiningScheduler {
    settings: SchedulerSettings,
    state: Mutex<SchedulerState>,
}

impl MiningScheduler {
    pub fn new(policy: MinerPolicy, settings: SchedulerSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(SchedulerState {
                policy,
                process: None,
                population: 0,
                started_at: None,
                last_check: None,
                last_exit: None,
                failures: 0,
                retry_at: None,
                spawn_count: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the online population and start or stop the miner to match.
    ///
    /// Returns whether the miner was started or stopped.
    pub fn evaluate_and_toggle(&self, online: u32) -> Result<bool> {
        let mut state = self.lock();
        state.population = online;
        self.reconcile(&mut state)
    }

    /// Periodic health check.
    ///
    /// Reaps a miner that died, restarts it once its backoff has passed and
    /// otherwise re-applies the policy to the last known population.
    pub fn check(&self) -> Result<bool> {
        let mut state = self.lock();
        state.last_check = Some(Utc::now());
        self.reconcile(&mut state)
    }

    /// Start the miner, stopping any running instance first.
    pub fn start(&self) -> Result<()> {
        let mut state = self.lock();
        self.reap(&mut state);
        self.stop_locked(&mut state)?;
        self.start_locked(&mut state)
    }

    /// Stop the miner. A no-op when nothing is running.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.lock();
        self.reap(&mut state);
        self.stop_locked(&mut state)
    }

    /// Stop then start.
    pub fn restart(&self) -> Result<()> {
        self.start()
    }

    /// Periodic restart: bounce the miner only if it is currently running.
    pub fn scheduled_restart(&self) -> Result<bool> {
        let mut state = self.lock();
        self.reap(&mut state);
        if state.process.is_none() {
            debug!("Skipping scheduled restart, miner is not running");
            return Ok(false);
        }
        info!(miner = %state.policy.name(), "Scheduled miner restart");
        self.stop_locked(&mut state)?;
        self.start_locked(&mut state)?;
        Ok(true)
    }

    /// Replace the policy.
    ///
    /// The old miner is fully stopped before the new policy takes effect, then
    /// the new policy is applied to the current population.
    pub fn reload(&self, policy: MinerPolicy) -> Result<()> {
        let mut state = self.lock();
        self.reap(&mut state);
        self.stop_locked(&mut state)?;
        info!(old = %state.policy.name(), new = %policy.name(), "Miner policy reloaded");
        state.policy = policy;
        state.clear_failures();
        self.reconcile(&mut state)?;
        Ok(())
    }

    /// Stop the miner for good.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.lock();
        self.reap(&mut state);
        self.stop_locked(&mut state)
    }

    /// True iff a miner process exists and is alive.
    pub fn is_mining_active(&self) -> bool {
        let mut state = self.lock();
        self.reap(&mut state);
        state.process.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        let mut state = self.lock();
        self.reap(&mut state);
        state.process.as_ref().map(MinerProcess::pid)
    }

    pub fn policy(&self) -> MinerPolicy {
        self.lock().policy.clone()
    }

    pub fn status(&self) -> SchedulerStatus {
        let mut state = self.lock();
        self.reap(&mut state);
        SchedulerStatus {
            miner: state.policy.name().to_string(),
            mining: state.process.is_some(),
            pid: state.process.as_ref().map(MinerProcess::pid),
            population: state.population,
            started_at: state.process.as_ref().and(state.started_at),
            last_check: state.last_check,
            last_exit: state.last_exit.map(|r| r.to_string()),
            consecutive_failures: state.failures,
            retry_in_secs: state.backoff_remaining().map(|d| d.as_secs().max(1)),
            spawn_count: state.spawn_count,
        }
    }

    fn reconcile(&self, state: &mut SchedulerState) -> Result<bool> {
        self.reap(state);
        let should_mine = state.policy.condition().should_mine(state.population);
        let active = state.process.is_some();

        match (should_mine, active) {
            (true, false) => {
                if let Some(wait) = state.backoff_remaining() {
                    debug!(retry_in_secs = wait.as_secs(), "Miner start deferred by backoff");
                    return Ok(false);
                }
                self.start_locked(state)?;
                Ok(true)
            }
            (false, true) => {
                self.stop_locked(state)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Drop a handle whose process has already exited.
    fn reap(&self, state: &mut SchedulerState) {
        let Some(process) = state.process.as_mut() else {
            return;
        };
        let reason = match process.try_exit() {
            Ok(None) => return,
            Ok(Some(reason)) => reason,
            Err(e) => {
                warn!(pid = process.pid(), error = %e, "Lost track of miner process");
                ExitReason::Unknown
            }
        };

        let uptime = process.uptime();
        let pid = process.pid();
        state.process = None;
        state.started_at = None;
        state.last_exit = Some(reason);

        if uptime >= self.settings.backoff.stable_after() {
            state.failures = 1;
        } else {
            state.failures = state.failures.saturating_add(1);
        }
        let delay = self.settings.backoff.delay_for_attempt(state.failures);
        state.retry_at = Some(Instant::now() + delay);
        warn!(
            pid,
            reason = %reason,
            uptime_secs = uptime.as_secs(),
            retry_in_secs = delay.as_secs(),
            "Miner exited unexpectedly"
        );
    }

    fn start_locked(&self, state: &mut SchedulerState) -> Result<()> {
        debug_assert!(state.process.is_none());
        state.policy.verify_executable()?;

        match MinerProcess::spawn(&state.policy, &self.settings.launch) {
            Ok(process) => {
                info!(
                    miner = %state.policy.name(),
                    pid = process.pid(),
                    population = state.population,
                    "Miner started"
                );
                state.process = Some(process);
                state.started_at = Some(Utc::now());
                state.spawn_count += 1;
                Ok(())
            }
            Err(e) => {
                state.failures = state.failures.saturating_add(1);
                let delay = self.settings.backoff.delay_for_attempt(state.failures);
                state.retry_at = Some(Instant::now() + delay);
                error!(
                    miner = %state.policy.name(),
                    error = %e,
                    retry_in_secs = delay.as_secs(),
                    "Failed to start miner"
                );
                Err(e)
            }
        }
    }

    fn stop_locked(&self, state: &mut SchedulerState) -> Result<()> {
        let Some(mut process) = state.process.take() else {
            return Ok(());
        };
        state.started_at = None;
        state.clear_failures();

        let pid = process.pid();
        match process.stop(self.settings.stop_grace) {
            Ok(reason) => {
                info!(miner = %state.policy.name(), pid, reason = %reason, "Miner stopped");
                state.last_exit = Some(reason);
                Ok(())
            }
            Err(e) => {
                // Dropping the handle kills whatever is left.
                error!(pid, error = %e, "Failed to stop miner cleanly");
                drop(process);
                state.last_exit = Some(ExitReason::Killed);
                Err(e)
            }
        }
    }
}

impl Drop for MiningScheduler {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut process) = state.process.take() {
            let _ = process.stop(self.settings.stop_grace);
        }
    }
}
