//! Handle to a running miner subprocess.

use super::exit::ExitReason;
use super::policy::{LaunchVars, MinerPolicy};
use crate::error::{MinerHatError, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// How often `stop` polls for exit during the grace period.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Owned miner subprocess.
///
/// Dropping the handle kills the process if it is still running, so a
/// handle that goes out of scope never leaks a miner.
pub struct MinerProcess {
    child: Child,
    pid: Pid,
    started: Instant,
    /// Set once the process has been reaped.
    exit: Option<ExitReason>,
}

impl MinerProcess {
    /// Launch the miner described by `policy`.
    ///
    /// Output goes to the policy's log file when one is set, otherwise it is
    /// discarded.
    pub fn spawn(policy: &MinerPolicy, vars: &LaunchVars) -> Result<Self> {
        let (stdout, stderr) = match policy.log_file() {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| {
                        MinerHatError::Process(format!(
                            "cannot open miner log {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                let err = file.try_clone()?;
                (Stdio::from(file), Stdio::from(err))
            }
            None => (Stdio::null(), Stdio::null()),
        };

        let mut command = Command::new(policy.executable());
        command
            .args(policy.command_args(vars))
            .current_dir(policy.working_directory())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        // Own process group: terminal signals go to the host, not the miner.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn().map_err(|e| {
            MinerHatError::Process(format!(
                "failed to spawn {}: {}",
                policy.executable().display(),
                e
            ))
        })?;
        let pid = Pid::from_raw(child.id() as i32);

        Ok(Self {
            child,
            pid,
            started: Instant::now(),
            exit: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Exit reason once the process has been reaped.
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exit
    }

    /// Check if the process is still running (non-blocking).
    pub fn is_running(&mut self) -> bool {
        matches!(self.try_exit(), Ok(None))
    }

    /// Reap the process if it has exited on its own.
    ///
    /// Returns `None` while it is still running.
    pub fn try_exit(&mut self) -> Result<Option<ExitReason>> {
        if let Some(reason) = self.exit {
            return Ok(Some(reason));
        }
        match self.child.try_wait() {
            Ok(None) => Ok(None),
            Ok(Some(status)) => {
                let reason = ExitReason::from_status(status);
                self.exit = Some(reason);
                Ok(Some(reason))
            }
            Err(e) => Err(MinerHatError::Process(format!(
                "waitpid failed for {}: {}",
                self.pid, e
            ))),
        }
    }

    /// Send SIGTERM to the process.
    pub fn terminate(&self) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGTERM)
            .map_err(|e| MinerHatError::Process(format!("failed to send SIGTERM: {}", e)))
    }

    /// Send SIGKILL and wait for the process to exit.
    pub fn kill(&mut self) -> Result<ExitReason> {
        if let Some(reason) = self.exit {
            return Ok(reason);
        }
        self.child
            .kill()
            .map_err(|e| MinerHatError::Process(format!("failed to send SIGKILL: {}", e)))?;
        self.child
            .wait()
            .map_err(|e| MinerHatError::Process(format!("waitpid failed: {}", e)))?;
        self.exit = Some(ExitReason::Killed);
        Ok(ExitReason::Killed)
    }

    /// Stop the miner: SIGTERM, wait up to `grace`, then SIGKILL.
    pub fn stop(&mut self, grace: Duration) -> Result<ExitReason> {
        if let Some(reason) = self.exit {
            return Ok(reason);
        }

        if let Err(e) = self.terminate() {
            tracing::debug!(pid = %self.pid, error = %e, "SIGTERM failed, escalating");
            return self.kill();
        }

        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    let reason = ExitReason::after_terminate(status);
                    self.exit = Some(reason);
                    return Ok(reason);
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(STOP_POLL_INTERVAL);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(pid = %self.pid, error = %e, "try_wait failed, escalating");
                    break;
                }
            }
        }

        tracing::warn!(pid = %self.pid, grace_secs = grace.as_secs(), "Miner ignored SIGTERM, killing");
        self.kill()
    }
}

impl std::fmt::Debug for MinerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinerProcess")
            .field("pid", &self.pid)
            .field("uptime", &self.uptime())
            .field("exit", &self.exit)
            .finish()
    }
}

impl Drop for MinerProcess {
    fn drop(&mut self) {
        if self.exit.is_none() {
            let _ = self.terminate();
            std::thread::sleep(Duration::from_millis(10));
            if let Ok(Some(_)) = self.try_exit() {
                return;
            }
            let _ = self.child.kill();
            let _ = self.child.wait();
            self.exit = Some(ExitReason::Killed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::tempdir;

    fn policy_with_script(dir: &Path, script: &str, log: bool) -> MinerPolicy {
        let exe = dir.join("fake-miner");
        std::fs::write(&exe, script).unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
        let json = if log {
            r#"{"schema_version":1,"executable":"fake-miner","arguments":["{worker}"],"log_file":"miner.log"}"#
        } else {
            r#"{"schema_version":1,"executable":"fake-miner","arguments":["{worker}"]}"#
        };
        MinerPolicy::from_json("fake", json, dir).unwrap()
    }

    #[test]
    fn test_spawn_and_stop() {
        let tmp = tempdir().unwrap();
        let policy = policy_with_script(tmp.path(), "#!/bin/sh\nexec sleep 60\n", false);

        let mut proc = MinerProcess::spawn(&policy, &LaunchVars::default()).unwrap();
        assert!(proc.is_running());
        assert!(proc.pid() > 0);

        let reason = proc.stop(Duration::from_secs(2)).unwrap();
        assert_eq!(reason, ExitReason::Terminated);
        assert!(!proc.is_running());
        // Stopping twice is a no-op
        assert_eq!(proc.stop(Duration::from_secs(1)).unwrap(), reason);
    }

    #[test]
    fn test_stop_escalates_to_kill() {
        let tmp = tempdir().unwrap();
        let policy = policy_with_script(
            tmp.path(),
            "#!/bin/sh\ntrap '' TERM\nwhile true; do sleep 1; done\n",
            false,
        );

        let mut proc = MinerProcess::spawn(&policy, &LaunchVars::default()).unwrap();
        // Let the shell install its trap
        std::thread::sleep(Duration::from_millis(200));
        let reason = proc.stop(Duration::from_millis(300)).unwrap();
        assert_eq!(reason, ExitReason::Killed);
    }

    #[test]
    fn test_unexpected_exit_is_observed() {
        let tmp = tempdir().unwrap();
        let policy = policy_with_script(tmp.path(), "#!/bin/sh\nexit 7\n", false);

        let mut proc = MinerProcess::spawn(&policy, &LaunchVars::default()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while proc.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(proc.try_exit().unwrap(), Some(ExitReason::Exited(7)));
    }

    #[test]
    fn test_output_goes_to_log_file() {
        let tmp = tempdir().unwrap();
        let policy = policy_with_script(tmp.path(), "#!/bin/sh\necho \"hello $1\"\n", true);
        let vars = LaunchVars {
            wallet: "w".into(),
            worker: "mh_server".into(),
        };

        let mut proc = MinerProcess::spawn(&policy, &vars).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while proc.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let log = std::fs::read_to_string(tmp.path().join("miner.log")).unwrap();
        assert!(log.contains("hello mh_server"));
    }

    #[test]
    fn test_drop_kills_process() {
        let tmp = tempdir().unwrap();
        let policy = policy_with_script(tmp.path(), "#!/bin/sh\nexec sleep 60\n", false);

        let proc = MinerProcess::spawn(&policy, &LaunchVars::default()).unwrap();
        let pid = Pid::from_raw(proc.pid() as i32);
        drop(proc);

        // Signal 0 probes for existence; the process is reaped so it is gone.
        assert!(signal::kill(pid, None).is_err());
    }
}
