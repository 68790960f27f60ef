//! JSON file storage for contribution records.
//!
//! One file per player plus a small ledger state file holding the pool
//! baseline. Every write goes to a temp file first and is renamed into place,
//! so a crash never leaves a half-written record behind.

use super::Amount;
use super::record::{PlayerContribution, PlayerId};
use crate::error::{MinerHatError, Result};
use crate::paths::LEDGER_STATE_FILENAME;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Current ledger state file format.
pub const LEDGER_STATE_VERSION: u32 = 1;

fn storage_error(msg: impl Into<String>) -> MinerHatError {
    MinerHatError::Storage(msg.into())
}

/// One player's share of a pool distribution that is not yet in their record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwedShare {
    pub distribution: i64,
    pub player: PlayerId,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    pub amount: Amount,
}

/// Pool baseline persisted across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    pub version: u32,
    /// Wallet the baseline belongs to.
    pub wallet_address: Option<String>,
    /// Pool total observed by the last sync.
    pub last_known_total: Option<Amount>,
    pub last_sync: Option<DateTime<Utc>>,
    /// Id of the latest distribution, milliseconds since the epoch.
    #[serde(default)]
    pub last_distribution: i64,
    /// Distributed shares still waiting to be written to player records.
    #[serde(default)]
    pub owed: Vec<OwedShare>,
}

impl LedgerState {
    pub fn owed_revenue(&self) -> Amount {
        self.owed.iter().map(|s| s.amount).sum()
    }
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            version: LEDGER_STATE_VERSION,
            wallet_address: None,
            last_known_total: None,
            last_sync: None,
            last_distribution: 0,
            owed: Vec::new(),
        }
    }
}

/// Directory of per-player JSON records.
#[derive(Debug, Clone)]
pub struct ContributionStore {
    dir: PathBuf,
}

impl ContributionStore {
    /// Open (creating if needed) the store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            storage_error(format!("cannot create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, player: PlayerId) -> PathBuf {
        self.dir.join(format!("{}.json", player))
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(LEDGER_STATE_FILENAME)
    }

    /// Load a player's record, `None` if they have never contributed.
    pub fn load(&self, player: PlayerId) -> Result<Option<PlayerContribution>> {
        let path = self.record_path(player);
        if !path.exists() {
            return Ok(None);
        }
        let record: PlayerContribution = read_json(&path)?;
        record.check(player)?;
        Ok(Some(record))
    }

    pub fn save(&self, record: &PlayerContribution) -> Result<()> {
        write_json_atomic(&self.record_path(record.player()), record)?;
        debug!(player = %record.player(), total = %record.accumulative_revenue(), "Saved contribution record");
        Ok(())
    }

    /// Players with a record on disk.
    pub fn players(&self) -> Result<Vec<PlayerId>> {
        let mut players = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<PlayerId>().ok())
            {
                players.push(id);
            }
        }
        players.sort();
        Ok(players)
    }

    /// Load the ledger state, starting fresh when missing or unreadable.
    pub fn load_state(&self) -> LedgerState {
        let path = self.state_path();
        if !path.exists() {
            return LedgerState::default();
        }
        match read_json::<LedgerState>(&path) {
            Ok(state) if state.version == LEDGER_STATE_VERSION => state,
            Ok(state) => {
                warn!(?path, version = state.version, "Unsupported ledger state version, starting a new baseline");
                LedgerState::default()
            }
            Err(e) => {
                warn!(?path, error = %e, "Failed to load ledger state, starting a new baseline");
                LedgerState::default()
            }
        }
    }

    pub fn save_state(&self, state: &LedgerState) -> Result<()> {
        write_json_atomic(&self.state_path(), state)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)
        .map_err(|e| storage_error(format!("failed to open {}: {}", path.display(), e)))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| storage_error(format!("failed to decode {}: {}", path.display(), e)))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let temp_path = path.with_extension("json.tmp");
    let file = File::create(&temp_path).map_err(|e| {
        storage_error(format!("failed to create {}: {}", temp_path.display(), e))
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| storage_error(format!("failed to encode {}: {}", path.display(), e)))?;
    writer
        .flush()
        .and_then(|_| writer.get_ref().sync_all())
        .map_err(|e| storage_error(format!("failed to write {}: {}", temp_path.display(), e)))?;

    std::fs::rename(&temp_path, path).map_err(|e| {
        storage_error(format!(
            "failed to rename {} -> {}: {}",
            temp_path.display(),
            path.display(),
            e
        ))
    })
}
