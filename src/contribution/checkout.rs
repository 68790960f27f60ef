//! Per-player single-flight guard for revenue checkout.

use super::record::PlayerId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Tracks which players have a checkout running.
#[derive(Debug, Default)]
pub struct CheckoutCoordinator {
    in_progress: Mutex<HashSet<PlayerId>>,
}

impl CheckoutCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PlayerId>> {
        self.in_progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `player` as checking out. False if a checkout is already running.
    pub fn try_acquire(&self, player: PlayerId) -> bool {
        self.lock().insert(player)
    }

    pub fn release(&self, player: PlayerId) {
        self.lock().remove(&player);
    }

    pub fn is_in_progress(&self, player: PlayerId) -> bool {
        self.lock().contains(&player)
    }

    /// Scoped acquisition: the slot is released when the guard drops,
    /// including on error and panic paths.
    pub fn guard(self: &Arc<Self>, player: PlayerId) -> Option<CheckoutGuard> {
        self.try_acquire(player).then(|| CheckoutGuard {
            coordinator: Arc::clone(self),
            player,
        })
    }
}

/// Holds a player's checkout slot until dropped.
#[derive(Debug)]
pub struct CheckoutGuard {
    coordinator: Arc<CheckoutCoordinator>,
    player: PlayerId,
}

impl CheckoutGuard {
    pub fn player(&self) -> PlayerId {
        self.player
    }
}

impl Drop for CheckoutGuard {
    fn drop(&mut self) {
        self.coordinator.release(self.player);
    }
}
