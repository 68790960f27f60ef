//! minerhat - run a miner on an idle game server and credit the pool
//! revenue to the players who were online while it mined.
//!
//! The two engines are the [`miner::MiningScheduler`], which owns the miner
//! process, and the [`contribution::ContributionLedger`], which attributes
//! pool revenue to players. [`host::MinerHat`] wires both together from a
//! [`config::MinerHatConfig`].

pub mod config;
pub mod console;
pub mod contribution;
pub mod error;
pub mod host;
pub mod logging;
pub mod miner;
pub mod paths;
pub mod pool;

pub use error::{MinerHatError, Result};
