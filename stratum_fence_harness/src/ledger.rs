// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fence accounting.
//!
//! [`FenceLedger`] is a [`SyncPrimitives`] implementation that hands out
//! numbered handles and remembers which are open. Every create, dup and close
//! goes through it, so a test can check at any point that nothing leaked and
//! nothing was closed twice.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use stratum_core::error::FenceError;
use stratum_core::fence::{Fence, FenceFd, SharedSync, SyncPrimitives};
use stratum_core::time::Duration;

/// First handle number the ledger hands out.
pub const FIRST_FD: i32 = 1000;

#[derive(Debug, Default)]
struct Books {
    next: i32,
    open: BTreeSet<i32>,
    created: u64,
    duplicated: u64,
    closed: u64,
    double_closed: Vec<i32>,
    timeouts: u64,
}

/// Snapshot of the ledger's counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerReport {
    /// Fences created with [`FenceLedger::make`].
    pub created: u64,
    /// Successful duplications.
    pub duplicated: u64,
    /// Handles closed exactly once.
    pub closed: u64,
    /// Handles still open, ascending.
    pub open: Vec<i32>,
    /// Handles closed after they were already closed, or never issued.
    pub double_closed: Vec<i32>,
    /// Waits that reported a timeout.
    pub timeouts: u64,
}

impl LedgerReport {
    /// No handle is open and none was closed twice.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.open.is_empty() && self.double_closed.is_empty()
    }

    /// Handles issued in total, by creation or duplication.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.created + self.duplicated
    }
}

/// Counting [`SyncPrimitives`] that tracks every handle it issues.
#[derive(Debug)]
pub struct FenceLedger {
    books: Mutex<Books>,
    fail_dup: Mutex<bool>,
    stalled: Mutex<HashSet<i32>>,
}

impl FenceLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            books: Mutex::new(Books {
                next: FIRST_FD,
                ..Books::default()
            }),
            fail_dup: Mutex::new(false),
            stalled: Mutex::new(HashSet::new()),
        })
    }

    /// Issues a fresh, owned fence.
    pub fn make(self: &Arc<Self>) -> Fence {
        let fd = {
            let mut books = self.books.lock();
            books.created += 1;
            issue(&mut books)
        };
        Fence::adopt(FenceFd(fd), Arc::clone(self) as SharedSync)
    }

    /// Makes every later duplication fail until turned off.
    pub fn set_fail_dup(&self, fail: bool) {
        *self.fail_dup.lock() = fail;
    }

    /// Makes waits on `fd` time out.
    pub fn stall(&self, fd: FenceFd) {
        self.stalled.lock().insert(fd.0);
    }

    /// Whether `fd` was issued and not yet closed.
    #[must_use]
    pub fn is_open(&self, fd: FenceFd) -> bool {
        self.books.lock().open.contains(&fd.0)
    }

    /// Number of handles currently open.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.books.lock().open.len()
    }

    /// Current counters.
    #[must_use]
    pub fn report(&self) -> LedgerReport {
        let books = self.books.lock();
        LedgerReport {
            created: books.created,
            duplicated: books.duplicated,
            closed: books.closed,
            open: books.open.iter().copied().collect(),
            double_closed: books.double_closed.clone(),
            timeouts: books.timeouts,
        }
    }
}

fn issue(books: &mut Books) -> i32 {
    let fd = books.next;
    books.next += 1;
    books.open.insert(fd);
    fd
}

impl SyncPrimitives for FenceLedger {
    fn dup(&self, fd: FenceFd) -> Result<FenceFd, FenceError> {
        if *self.fail_dup.lock() {
            return Err(FenceError::Dup { fd: fd.0 });
        }
        let mut books = self.books.lock();
        if !books.open.contains(&fd.0) {
            tracing::error!(fd = fd.0, "dup of a closed fence");
            return Err(FenceError::Invalid { fd: fd.0 });
        }
        books.duplicated += 1;
        Ok(FenceFd(issue(&mut books)))
    }

    fn wait(&self, fd: FenceFd, timeout: Duration) -> Result<(), FenceError> {
        if !self.books.lock().open.contains(&fd.0) {
            tracing::error!(fd = fd.0, "wait on a closed fence");
            return Err(FenceError::Invalid { fd: fd.0 });
        }
        if self.stalled.lock().contains(&fd.0) {
            self.books.lock().timeouts += 1;
            return Err(FenceError::Timeout {
                fd: fd.0,
                timeout_ms: timeout.as_millis(),
            });
        }
        Ok(())
    }

    fn close(&self, fd: FenceFd) {
        let mut books = self.books.lock();
        if books.open.remove(&fd.0) {
            books.closed += 1;
        } else {
            tracing::error!(fd = fd.0, "fence closed twice");
            books.double_closed.push(fd.0);
        }
    }
}
