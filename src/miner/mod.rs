//! Miner process supervision.
//!
//! A [`MinerPolicy`] says how to launch the miner and when it should run.
//! [`MiningScheduler`] owns the single [`MinerProcess`] and reconciles it with
//! the online population; [`PeriodicTask`] drives its periodic checks and
//! restarts.

mod backoff;
mod exit;
mod policy;
mod process;
mod scheduler;
mod timer;

pub use backoff::BackoffConfig;
pub use exit::ExitReason;
pub use policy::{
    EXAMPLE_XMRIG_POLICY, LaunchVars, MinerPolicy, MiningCondition, POLICY_SCHEMA_VERSION,
};
pub use process::MinerProcess;
pub use scheduler::{MiningScheduler, SchedulerSettings, SchedulerStatus};
pub use timer::PeriodicTask;
