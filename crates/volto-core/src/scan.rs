//! Scan lifecycle flag.
//!
//! Each `begin` starts a new epoch. A frame in flight holds the ticket of
//! the epoch it was started under and drops its results once the ticket
//! is no longer live, so a late frame never paints over a stopped or
//! restarted scan.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct ScanState {
    epoch: AtomicU64,
    active: AtomicBool,
}

#[derive(Debug, Clone, Default)]
pub struct ScanFlag {
    state: Arc<ScanState>,
}

impl ScanFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) scanning. Tickets from earlier epochs go stale.
    pub fn begin(&self) -> ScanTicket {
        let epoch = self.state.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.active.store(true, Ordering::SeqCst);
        ScanTicket {
            state: Arc::clone(&self.state),
            epoch,
        }
    }

    /// Stop scanning. Returns whether a scan was running.
    pub fn cancel(&self) -> bool {
        self.state.epoch.fetch_add(1, Ordering::SeqCst);
        self.state.active.swap(false, Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ScanTicket {
    state: Arc<ScanState>,
    epoch: u64,
}

impl ScanTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_live(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
            && self.state.epoch.load(Ordering::SeqCst) == self.epoch
    }
}
