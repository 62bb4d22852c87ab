use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::debug;

use crate::{
    conn::ConnPool,
    queue::{SlotIdx, SlotQueue},
    signals::{StopSignal, WakePipe},
};

/// State guarded by `com_lock`: the I/O queue plus the wakeup pipe.
///
/// The pipe lives here because its descriptors are only valid while the
/// lock-holder says so; cleanup closes them under this same lock, so no
/// worker can race a trigger against the close.
pub struct IoShared {
    pub queue: SlotQueue,
    pub wake: Option<WakePipe>,
}

impl IoShared {
    /// Wakes the selector if the pipe is still open. Callers hold
    /// `com_lock` by construction (they hold `&mut self`).
    pub fn wake_selector(&self) {
        if let Some(wake) = &self.wake {
            wake.trigger();
        }
    }
}

/// State guarded by `action_lock`, paired with the worker condvar.
pub struct ActionState {
    pub queue: SlotQueue,
    pub stop_workers: bool,
}

/// Action queue hand-off between the selector and the worker pool.
pub struct ActionQueue {
    pub state: Mutex<ActionState>,
    pub cond: Condvar,
}

impl ActionQueue {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ActionState { queue: SlotQueue::new(capacity), stop_workers: false }),
            cond: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ActionState> {
        self.state.lock().expect("action queue poisoned")
    }

    /// Wakes exactly one worker; used by the selector when handing a
    /// connection over.
    pub fn notify(&self) {
        self.cond.notify_one();
    }
}

/// Everything the selector, the workers, and the signal path share.
///
/// Lock order: `io` (`com_lock`) strictly before `actions`
/// (`action_lock`). The pool's free-list mutex and the per-slot
/// connection mutexes are leaf level.
pub struct ServerShared {
    pub pool: ConnPool,
    io: Mutex<IoShared>,
    pub actions: ActionQueue,
    pub stop: StopSignal,
}

impl ServerShared {
    pub fn new(capacity: usize, wake: WakePipe, stop: StopSignal) -> Self {
        Self {
            pool: ConnPool::new(capacity),
            io: Mutex::new(IoShared { queue: SlotQueue::new(capacity), wake: Some(wake) }),
            actions: ActionQueue::new(capacity),
            stop,
        }
    }

    /// Acquires `com_lock`.
    pub fn lock_io(&self) -> MutexGuard<'_, IoShared> {
        self.io.lock().expect("I/O queue poisoned")
    }

    /// Trips the stop flag and wakes the selector, exactly as a POSIX
    /// stop signal would.
    pub fn request_stop(&self) {
        self.stop.signal();
        self.lock_io().wake_selector();
    }

    /// Closes a connection and returns its slot to the pool.
    ///
    /// The caller holds `com_lock` (witnessed by `io`); the slot is
    /// unlinked from the I/O queue if present, the socket is dropped
    /// (which closes it and removes any poll registration), and the
    /// per-request state is cleared before the slot is freed.
    pub fn close_connection(&self, io: &mut IoShared, idx: SlotIdx) {
        if io.queue.contains(idx) {
            io.queue.remove(idx);
        }
        {
            let mut conn = self.pool.lock_slot(idx);
            debug!(peer = ?conn.peer_addr, slot = idx, "closing connection");
            conn.clear();
        }
        self.pool.deallocate(idx);
    }
}
