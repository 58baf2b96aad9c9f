use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::info;

const ACTIVE: u8 = 0;
const BY_USER: u8 = 1;
const BY_TIMEOUT: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    User,
    Timeout,
}

/// Cooperative cancellation signal shared between a loop and its caller.
/// The first reason recorded wins.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<AtomicU8>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.set(BY_USER);
    }

    pub fn expire(&self) {
        self.set(BY_TIMEOUT);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) != ACTIVE
    }

    pub fn reason(&self) -> Option<StopReason> {
        match self.state.load(Ordering::SeqCst) {
            BY_USER => Some(StopReason::User),
            BY_TIMEOUT => Some(StopReason::Timeout),
            _ => None,
        }
    }

    /// Starts a caller-owned timer that expires this token after `after`.
    /// Dropping the guard disarms the timer.
    pub fn arm_timeout(&self, after: Duration) -> TimeoutGuard {
        let (disarm_tx, disarm_rx) = mpsc::channel::<()>();
        let token = self.clone();
        let handle = thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = disarm_rx.recv_timeout(after) {
                info!(after_secs = after.as_secs(), "loop timeout reached");
                token.expire();
            }
        });
        TimeoutGuard {
            disarm: Some(disarm_tx),
            handle: Some(handle),
        }
    }

    fn set(&self, reason: u8) {
        let _ = self
            .state
            .compare_exchange(ACTIVE, reason, Ordering::SeqCst, Ordering::SeqCst);
    }
}

pub struct TimeoutGuard {
    disarm: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        drop(self.disarm.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
