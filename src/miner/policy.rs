//! Miner launch policies.
//!
//! A policy is a small JSON document next to the miner binary describing how
//! to launch it. It is read once at load time and never mutated afterwards;
//! changing it means loading a new policy and calling
//! [`MiningScheduler::reload`](super::MiningScheduler::reload).

use crate::error::{MinerHatError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Highest policy schema version this build understands.
pub const POLICY_SCHEMA_VERSION: u32 = 1;

/// Policy written by `minerhat init`.
pub const EXAMPLE_XMRIG_POLICY: &str = r#"{
  "schema_version": 1,
  "executable": "./xmrig/xmrig",
  "arguments": [
    "-o", "pool.supportxmr.com:443", "--tls",
    "-u", "{wallet}",
    "-p", "{worker}",
    "--cpu-max-threads-hint", "50",
    "--no-color"
  ],
  "working_directory": "./xmrig",
  "log_file": "./xmrig/miner.log",
  "mining_condition": { "when": "players_online", "min_players": 1 }
}
"#;

/// When the miner should be running, as a function of online players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum MiningCondition {
    /// Mine while at least `min_players` are online.
    PlayersOnline {
        #[serde(default = "default_min_players")]
        min_players: u32,
    },
    /// Mine while no more than `max_players` are online.
    ServerIdle {
        #[serde(default)]
        max_players: u32,
    },
    Always,
}

fn default_min_players() -> u32 {
    1
}

impl Default for MiningCondition {
    fn default() -> Self {
        Self::PlayersOnline {
            min_players: default_min_players(),
        }
    }
}

impl MiningCondition {
    pub fn should_mine(&self, online: u32) -> bool {
        match self {
            Self::PlayersOnline { min_players } => online >= (*min_players).max(1),
            Self::ServerIdle { max_players } => online <= *max_players,
            Self::Always => true,
        }
    }
}

/// On-disk shape of a policy file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    schema_version: u32,
    executable: PathBuf,
    #[serde(default)]
    arguments: Vec<String>,
    working_directory: Option<PathBuf>,
    log_file: Option<PathBuf>,
    #[serde(default)]
    mining_condition: MiningCondition,
}

/// Values substituted into `{wallet}` / `{worker}` argument placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchVars {
    pub wallet: String,
    pub worker: String,
}

/// A validated, immutable miner launch policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerPolicy {
    name: String,
    executable: PathBuf,
    arguments: Vec<String>,
    working_directory: PathBuf,
    log_file: Option<PathBuf>,
    condition: MiningCondition,
}

impl MinerPolicy {
    /// Load and validate the policy stored at `path`.
    ///
    /// Relative paths inside the policy resolve against the policy file's
    /// directory.
    pub fn load(name: &str, path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            MinerHatError::Policy(format!("cannot read policy {}: {}", path.display(), e))
        })?;
        let base_dir = path.parent().unwrap_or(Path::new("."));
        Self::from_json(name, &json, base_dir)
    }

    /// Parse and validate a policy document.
    pub fn from_json(name: &str, json: &str, base_dir: &Path) -> Result<Self> {
        let file: PolicyFile = serde_json::from_str(json)
            .map_err(|e| MinerHatError::Policy(format!("malformed policy '{}': {}", name, e)))?;

        if file.schema_version == 0 || file.schema_version > POLICY_SCHEMA_VERSION {
            return Err(MinerHatError::Policy(format!(
                "policy '{}' has schema version {}, this build supports up to {}",
                name, file.schema_version, POLICY_SCHEMA_VERSION
            )));
        }

        let executable = resolve(base_dir, &file.executable);
        check_executable(name, &executable)?;

        let working_directory = match file.working_directory {
            Some(dir) => resolve(base_dir, &dir),
            None => executable
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| base_dir.to_path_buf()),
        };
        if !working_directory.is_dir() {
            return Err(MinerHatError::Policy(format!(
                "policy '{}': working directory {} does not exist",
                name,
                working_directory.display()
            )));
        }

        Ok(Self {
            name: name.to_string(),
            executable,
            arguments: file.arguments,
            working_directory,
            log_file: file.log_file.map(|p| resolve(base_dir, &p)),
            condition: file.mining_condition,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    pub fn condition(&self) -> &MiningCondition {
        &self.condition
    }

    /// Re-check that the executable is still reachable.
    pub fn verify_executable(&self) -> Result<()> {
        check_executable(&self.name, &self.executable)
    }

    /// Arguments with placeholders filled in.
    pub fn command_args(&self, vars: &LaunchVars) -> Vec<String> {
        self.arguments
            .iter()
            .map(|arg| {
                arg.replace("{wallet}", &vars.wallet)
                    .replace("{worker}", &vars.worker)
            })
            .collect()
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    let path = crate::paths::expand_tilde(path);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

fn check_executable(name: &str, path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path).map_err(|_| {
        MinerHatError::Policy(format!(
            "policy '{}': executable {} not found",
            name,
            path.display()
        ))
    })?;
    if !meta.is_file() {
        return Err(MinerHatError::Policy(format!(
            "policy '{}': executable {} is not a file",
            name,
            path.display()
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(MinerHatError::Policy(format!(
                "policy '{}': {} is not executable",
                name,
                path.display()
            )));
        }
    }

    Ok(())
}
