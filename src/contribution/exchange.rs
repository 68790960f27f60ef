//! Exchange of settled revenue into an external currency.

use super::Amount;
use super::record::PlayerId;
use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub type DepositError = Box<dyn std::error::Error + Send + Sync>;

/// External balance system that receives exchanged revenue.
pub trait Economy: Send + Sync {
    /// Credit `amount` to `player`, returning the amount formatted for display.
    fn deposit(&self, player: PlayerId, amount: f64) -> Result<String, DepositError>;
}

/// Outcome of a successful exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeReceipt {
    pub player: PlayerId,
    pub withdrawn: Amount,
    pub converted: f64,
    /// Converted amount as rendered by the economy.
    pub formatted: String,
    pub remaining: Amount,
}

#[derive(Serialize)]
struct JournalLine<'a> {
    timestamp: chrono::DateTime<Utc>,
    player: PlayerId,
    amount: f64,
    currency: &'a str,
}

/// Economy that appends each deposit as a JSON line to a journal file.
///
/// An external integration tails the file and applies the deposits.
pub struct JournalEconomy {
    path: PathBuf,
    currency: String,
    write_lock: Mutex<()>,
}

impl JournalEconomy {
    pub fn new(path: impl Into<PathBuf>, currency: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            currency: currency.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Economy for JournalEconomy {
    fn deposit(&self, player: PlayerId, amount: f64) -> Result<String, DepositError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(format!("refusing to deposit {}", amount).into());
        }
        let line = serde_json::to_string(&JournalLine {
            timestamp: Utc::now(),
            player,
            amount,
            currency: &self.currency,
        })?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        file.sync_data()?;

        Ok(format!("{:.2} {}", amount, self.currency))
    }
}
