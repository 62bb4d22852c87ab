use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use tracing::{debug, info};

use crate::{backend::FenceBackend, dispatch, state::ServerShared};

/// Fixed pool of worker threads draining the action queue.
///
/// Workers hold `action_lock` while idle and release it around the
/// actual dispatch, so the selector can keep handing connections over
/// while a back-end call is in flight.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(
        worker_count: usize,
        shared: &Arc<ServerShared>,
        backend: &Arc<dyn FenceBackend>,
    ) -> Self {
        let handles = (0..worker_count)
            .map(|worker| {
                let shared = Arc::clone(shared);
                let backend = Arc::clone(backend);
                thread::Builder::new()
                    .name(format!("fence-worker-{worker}"))
                    .spawn(move || worker_loop(&shared, backend.as_ref()))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self { handles }
    }

    /// Stops and joins every worker. Queued actions that were not yet
    /// picked up are left for the selector's cleanup to close.
    pub fn stop(self, shared: &ServerShared) {
        {
            let mut state = shared.actions.lock();
            state.stop_workers = true;
            shared.actions.cond.notify_all();
        }
        for handle in self.handles {
            let _ = handle.join();
        }
        info!("worker pool stopped");
    }
}

fn worker_loop(shared: &ServerShared, backend: &dyn FenceBackend) {
    let mut state = shared.actions.lock();
    loop {
        while let Some(idx) = state.queue.pop_front() {
            // The action lock must not be held while the back-end runs.
            drop(state);
            dispatch::execute(shared, backend, idx);
            state = shared.actions.lock();
        }
        if state.stop_workers {
            break;
        }
        state = shared.actions.cond.wait(state).expect("action queue poisoned");
    }
    debug!("worker exiting");
}
