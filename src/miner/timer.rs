//! Cancellable periodic background task.

use crate::error::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Runs a closure on a dedicated thread every `interval`.
///
/// Once [`cancel`](Self::cancel) returns the closure will never run again; a
/// tick already in progress is waited for. Dropping the task cancels it.
pub struct PeriodicTask {
    name: String,
    cancelled: Arc<AtomicBool>,
    wake: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (wake, sleeper) = mpsc::channel::<()>();

        let flag = cancelled.clone();
        let thread_name = name.to_string();
        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                tracing::debug!(task = %thread_name, interval_secs = interval.as_secs(), "Periodic task started");
                loop {
                    match sleeper.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if flag.load(Ordering::SeqCst) {
                                break;
                            }
                            tick();
                        }
                        // Sender dropped or explicit wake: cancelled.
                        _ => break,
                    }
                }
                tracing::debug!(task = %thread_name, "Periodic task stopped");
            })?;

        Ok(Self {
            name: name.to_string(),
            cancelled,
            wake: Some(wake),
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the task and wait for its thread. Idempotent.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!(task = %self.name, "Periodic task panicked");
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[test]
    fn test_ticks_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mut task = PeriodicTask::spawn("test-tick", Duration::from_millis(20), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        std::thread::sleep(Duration::from_millis(200));
        assert!(task.is_running());
        task.cancel();
        let after_cancel = count.load(Ordering::SeqCst);
        assert!(after_cancel >= 2);

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
        assert!(!task.is_running());
        task.cancel();
    }

    #[test]
    fn test_cancel_does_not_wait_for_interval() {
        let mut task =
            PeriodicTask::spawn("test-slow", Duration::from_secs(3600), || {}).unwrap();
        let start = Instant::now();
        task.cancel();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_drop_cancels() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = PeriodicTask::spawn("test-drop", Duration::from_millis(10), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(task.name(), "test-drop");
        drop(task);
        let after_drop = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), after_drop);
    }
}
