//! Data directory layout.
//!
//! ```text
//! <data dir>/
//! ├── config.json
//! ├── economy.log
//! ├── miner/
//! │   ├── xmrig.json        policy
//! │   └── xmrig/            miner working directory
//! └── contribution/
//!     ├── ledger.json       pool baseline
//!     └── <uuid>.json       one record per player
//! ```

use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "config.json";
pub const LEDGER_STATE_FILENAME: &str = "ledger.json";
pub const ECONOMY_JOURNAL_FILENAME: &str = "economy.log";

/// Default data directory.
///
/// - Linux: `~/.local/share/minerhat`
/// - macOS: `~/Library/Application Support/minerhat`
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("minerhat"))
        .unwrap_or_else(|| PathBuf::from(".minerhat"))
}

/// Resolved locations under one data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILENAME)
    }

    pub fn miner_dir(&self) -> PathBuf {
        self.root.join("miner")
    }

    /// Policy file for the named miner.
    pub fn policy_file(&self, miner: &str) -> PathBuf {
        self.miner_dir().join(format!("{}.json", miner))
    }

    pub fn contribution_dir(&self) -> PathBuf {
        self.root.join("contribution")
    }

    pub fn economy_journal(&self) -> PathBuf {
        self.root.join(ECONOMY_JOURNAL_FILENAME)
    }

    /// Create the directory skeleton if missing.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.miner_dir())?;
        std::fs::create_dir_all(self.contribution_dir())?;
        Ok(())
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if let Ok(stripped) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    path.to_path_buf()
}
