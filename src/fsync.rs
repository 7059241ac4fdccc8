//! Group Commit
//!
//! Turns many concurrent durability requests into few physical fsyncs.
//!
//! ## Rounds
//! ```text
//!   IDLE ──fsync()──▶ LEADING ──▶ SYNCING ──▶ hand off
//!                        ▲                        │
//!                        │   waiters queued?      │
//!                        └──── elect next group ◀─┘
//!                                 none: IDLE
//! ```
//!
//! - A caller that finds no sync running leads: it fsyncs itself.
//! - A caller that finds a sync running joins the *next* group. Its data
//!   may have been written after the running sync started, so it cannot
//!   ride on that one.
//!   Two overlapping callers therefore cost two fsyncs. Sharing begins with
//!   the second caller queued behind the same running sync.
//! - When a sync finishes, the next group (if anyone joined) is elected and
//!   one of its members performs a single fsync for all of them.
//! - Followers wait at most `timeout` and then fail with `FsyncTimeout`. A
//!   follower whose group was already elected but not yet led takes the
//!   lead instead of timing out, so an elected group always gets its sync.
//!
//! ## Concurrency:
//! - Lock order: `state` before a group's `inner`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{LogError, Result};

/// Something that can be made durable.
pub trait Syncer {
    fn sync(&self) -> Result<()>;
}

/// Result a round hands to its followers. Errors travel as messages.
type RoundOutcome = std::result::Result<(), String>;

#[derive(Debug, Default)]
struct GroupInner {
    waiters: usize,
    elected: bool,
    leader_taken: bool,
    outcome: Option<RoundOutcome>,
}

/// Callers waiting for the same future fsync.
#[derive(Debug, Default)]
struct SyncGroup {
    inner: Mutex<GroupInner>,
    cv: Condvar,
}

enum Wake {
    Done(RoundOutcome),
    Lead,
    TimedOut,
}

impl SyncGroup {
    fn wait(&self, timeout: Duration) -> Wake {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(outcome) = &inner.outcome {
                return Wake::Done(outcome.clone());
            }
            if inner.elected && !inner.leader_taken {
                inner.leader_taken = true;
                return Wake::Lead;
            }
            if self.cv.wait_until(&mut inner, deadline).timed_out() {
                if let Some(outcome) = &inner.outcome {
                    return Wake::Done(outcome.clone());
                }
                if inner.elected && !inner.leader_taken {
                    inner.leader_taken = true;
                    return Wake::Lead;
                }
                inner.waiters -= 1;
                return Wake::TimedOut;
            }
        }
    }

    fn finish(&self, result: &Result<()>) {
        let mut inner = self.inner.lock();
        inner.outcome = Some(match result {
            Ok(()) => Ok(()),
            Err(e) => Err(e.to_string()),
        });
        self.cv.notify_all();
    }
}

struct SyncState {
    in_progress: bool,
    next_group: Arc<SyncGroup>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FSyncStats {
    /// Calls to `fsync`
    pub n_requests: u64,
    /// Physical fsyncs performed
    pub n_fsyncs: u64,
    /// Followers that gave up waiting
    pub n_timeouts: u64,
}

/// Coordinates concurrent fsync requests into group commits.
pub struct FSyncManager {
    timeout: Duration,
    state: Mutex<SyncState>,
    n_requests: AtomicU64,
    n_fsyncs: AtomicU64,
    n_timeouts: AtomicU64,
}

impl FSyncManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: Mutex::new(SyncState {
                in_progress: false,
                next_group: Arc::new(SyncGroup::default()),
            }),
            n_requests: AtomicU64::new(0),
            n_fsyncs: AtomicU64::new(0),
            n_timeouts: AtomicU64::new(0),
        }
    }

    /// Make everything written so far durable, sharing the work with
    /// concurrent callers.
    pub fn fsync(&self, syncer: &dyn Syncer) -> Result<()> {
        self.n_requests.fetch_add(1, Ordering::SeqCst);

        let group = {
            let mut state = self.state.lock();
            if state.in_progress {
                let group = Arc::clone(&state.next_group);
                group.inner.lock().waiters += 1;
                Some(group)
            } else {
                state.in_progress = true;
                None
            }
        };

        let group = match group {
            None => {
                let result = self.execute(syncer);
                self.hand_off();
                return result;
            }
            Some(group) => group,
        };

        match group.wait(self.timeout) {
            Wake::Done(outcome) => outcome.map_err(LogError::FsyncFailed),
            Wake::Lead => {
                let result = self.execute(syncer);
                group.finish(&result);
                self.hand_off();
                result
            }
            Wake::TimedOut => {
                self.n_timeouts.fetch_add(1, Ordering::SeqCst);
                warn!(timeout_ms = self.timeout.as_millis() as u64, "group fsync wait timed out");
                Err(LogError::FsyncTimeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    pub fn stats(&self) -> FSyncStats {
        FSyncStats {
            n_requests: self.n_requests.load(Ordering::SeqCst),
            n_fsyncs: self.n_fsyncs.load(Ordering::SeqCst),
            n_timeouts: self.n_timeouts.load(Ordering::SeqCst),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute(&self, syncer: &dyn Syncer) -> Result<()> {
        self.n_fsyncs.fetch_add(1, Ordering::SeqCst);
        syncer.sync()
    }

    /// Elect the queued group to run next, or go idle.
    fn hand_off(&self) {
        let mut state = self.state.lock();
        let group = Arc::clone(&state.next_group);
        let mut inner = group.inner.lock();
        if inner.waiters == 0 {
            state.in_progress = false;
            return;
        }
        inner.elected = true;
        group.cv.notify_all();
        debug!(waiters = inner.waiters, "elected next fsync group");
        drop(inner);
        state.next_group = Arc::new(SyncGroup::default());
    }
}
