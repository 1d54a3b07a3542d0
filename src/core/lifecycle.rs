//! Reactor lifecycle state and in-flight request accounting.
//!
//! ```text
//! Initialized → Starting → Started → Stopping → Stopped
//! ```
//!
//! Transitions only move forward. `Stopping` can be entered from any earlier
//! state, so a reactor that never finished starting still releases its
//! components.
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use tokio::sync::watch;

use crate::core::error::ReactorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Initialized,
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Starting => write!(f, "starting"),
            Self::Started => write!(f, "started"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Forward-only lifecycle state observable by waiters.
#[derive(Debug)]
pub struct LifecycleCell {
    tx: watch::Sender<LifecycleState>,
}

impl Default for LifecycleCell {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::Initialized);
        Self { tx }
    }

    pub fn get(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Move to `to`, returning the previous state. Fails without side effect
    /// when `to` is not strictly after the current state.
    pub fn advance(&self, to: LifecycleState) -> Result<LifecycleState, ReactorError> {
        let mut previous = LifecycleState::Initialized;
        let mut rejected = None;
        self.tx.send_if_modified(|state| {
            previous = *state;
            if to > *state {
                *state = to;
                true
            } else {
                rejected = Some(*state);
                false
            }
        });
        match rejected {
            Some(from) => Err(ReactorError::InvalidTransition { from, to }),
            None => Ok(previous),
        }
    }

    /// Resolve once the state has reached (or passed) `target`.
    pub async fn wait_for(&self, target: LifecycleState) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail.
        let _ = rx.wait_for(|state| *state >= target).await;
    }
}

/// Number of pipelines between their start and their terminal hook.
#[derive(Debug, Clone, Default)]
pub struct PendingRequests(Arc<AtomicUsize>);

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    pub fn increment(&self) -> usize {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Saturates at zero.
    pub fn decrement(&self) -> usize {
        match self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => {
                tracing::warn!("Pending request counter decremented below zero");
                0
            }
        }
    }
}
