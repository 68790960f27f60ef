//! Exit analysis for miner processes.

use nix::sys::signal::Signal;
use std::process::ExitStatus;

/// Why a miner process is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Terminated by a signal we did not send.
    Signaled(Signal),
    /// Stopped by the scheduler with SIGTERM.
    Terminated,
    /// Stopped by the scheduler with SIGKILL after the grace period.
    Killed,
    Unknown,
}

impl ExitReason {
    /// Classify an exit status observed without the scheduler asking for it.
    pub fn from_status(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        match status.signal().map(Signal::try_from) {
            Some(Ok(signal)) => Self::Signaled(signal),
            _ => Self::Unknown,
        }
    }

    /// Classify an exit status observed after the scheduler sent SIGTERM.
    pub fn after_terminate(status: ExitStatus) -> Self {
        match Self::from_status(status) {
            Self::Signaled(Signal::SIGTERM) => Self::Terminated,
            other => other,
        }
    }

    /// Whether the scheduler asked for this exit.
    pub fn is_requested(&self) -> bool {
        matches!(self, Self::Terminated | Self::Killed)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::Terminated => "stopped".to_string(),
            Self::Killed => "killed after grace period".to_string(),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn test_from_status_exit_code() {
        let status = ExitStatus::from_raw(3 << 8);
        assert_eq!(ExitReason::from_status(status), ExitReason::Exited(3));
        assert!(!ExitReason::from_status(status).is_success());
        assert!(ExitReason::from_status(ExitStatus::from_raw(0)).is_success());
    }

    #[test]
    fn test_from_status_signal() {
        let status = ExitStatus::from_raw(Signal::SIGSEGV as i32);
        assert_eq!(
            ExitReason::from_status(status),
            ExitReason::Signaled(Signal::SIGSEGV)
        );
    }

    #[test]
    fn test_after_terminate() {
        let status = ExitStatus::from_raw(Signal::SIGTERM as i32);
        assert_eq!(ExitReason::after_terminate(status), ExitReason::Terminated);
        assert!(ExitReason::Terminated.is_requested());
        // A miner that catches SIGTERM and exits cleanly keeps its code.
        assert_eq!(
            ExitReason::after_terminate(ExitStatus::from_raw(0)),
            ExitReason::Exited(0)
        );
    }

    #[test]
    fn test_description() {
        assert_eq!(ExitReason::Exited(1).to_string(), "exited with code 1");
        assert!(ExitReason::Killed.to_string().contains("grace"));
        assert!(
            ExitReason::Signaled(Signal::SIGKILL)
                .to_string()
                .contains("SIGKILL")
        );
    }
}
