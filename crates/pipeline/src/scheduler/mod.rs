//! Shares a fixed set of backend slots among queued jobs.
//!
//! Each configured backend entry is one slot; listing a backend twice gives
//! it two. A single loop task pairs the oldest queued job with the next free
//! slot and hands the job a [`SlotLease`]. The job returns the slot by
//! releasing or dropping the lease, typically after its remote call finishes.

mod backend;


use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{panic_message, PipelineError};

pub use backend::Backend;

type Job = Box<dyn FnOnce(SlotLease) + Send + 'static>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Shared {
    jobs: Mutex<VecDeque<Job>>,
    job_ready: Notify,
    /// Signalled when the loop takes the last queued job.
    drained: Notify,
    slots: Mutex<VecDeque<Backend>>,
    slot_free: Notify,
    /// Signalled when every slot is back in the free queue.
    idle: Notify,
    running: AtomicBool,
    slot_count: usize,
}

impl Shared {
    /// Next queued job, or `None` once the scheduler has stopped and the
    /// queue is empty.
    async fn next_job(&self) -> Option<Job> {
        loop {
            let notified = self.job_ready.notified();
            {
                let mut jobs = lock(&self.jobs);
                if let Some(job) = jobs.pop_front() {
                    if jobs.is_empty() {
                        self.drained.notify_waiters();
                    }
                    return Some(job);
                }
                if !self.running.load(Ordering::SeqCst) {
                    return None;
                }
            }
            notified.await;
        }
    }

    async fn next_slot(&self) -> Backend {
        loop {
            let notified = self.slot_free.notified();
            if let Some(backend) = lock(&self.slots).pop_front() {
                return backend;
            }
            notified.await;
        }
    }

    fn release(&self, backend: Backend) {
        let all_free = {
            let mut slots = lock(&self.slots);
            slots.push_back(backend);
            slots.len() == self.slot_count
        };
        self.slot_free.notify_one();
        if all_free {
            self.idle.notify_waiters();
        }
    }
}

/// Exclusive use of one backend slot.
///
/// The slot goes back to the free queue on [`SlotLease::release`] or when
/// the lease is dropped, whichever comes first.
pub struct SlotLease {
    backend: Backend,
    shared: Arc<Shared>,
    released: bool,
}

impl SlotLease {
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if !self.released {
            self.released = true;
            self.shared.release(self.backend.clone());
        }
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.give_back();
    }
}

impl std::fmt::Debug for SlotLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotLease")
            .field("backend", &self.backend)
            .field("released", &self.released)
            .finish()
    }
}

pub struct BackendScheduler {
    shared: Arc<Shared>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackendScheduler {
    /// Start the dispatch loop on the current tokio runtime.
    pub fn start(backends: Vec<Backend>) -> Result<Self, PipelineError> {
        if backends.is_empty() {
            return Err(PipelineError::Config("no backends configured".into()));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            PipelineError::Config("the backend scheduler needs a tokio runtime".into())
        })?;

        let shared = Arc::new(Shared {
            jobs: Mutex::new(VecDeque::new()),
            job_ready: Notify::new(),
            drained: Notify::new(),
            slot_count: backends.len(),
            slots: Mutex::new(backends.into()),
            slot_free: Notify::new(),
            idle: Notify::new(),
            running: AtomicBool::new(true),
        });

        info!(slots = shared.slot_count, "backend scheduler started");
        let handle = runtime.spawn(run(Arc::clone(&shared)));
        Ok(Self {
            shared,
            loop_handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a job. It runs on the loop task once a slot is free, and must
    /// not block: start the remote call on its own task and move the lease
    /// into it.
    pub fn schedule<F>(&self, dispatch: F) -> Result<(), PipelineError>
    where
        F: FnOnce(SlotLease) + Send + 'static,
    {
        {
            let mut jobs = lock(&self.shared.jobs);
            if !self.shared.running.load(Ordering::SeqCst) {
                return Err(PipelineError::Shutdown);
            }
            jobs.push_back(Box::new(dispatch));
        }
        self.shared.job_ready.notify_one();
        Ok(())
    }

    /// Wait until every queued job has been handed a slot, then stop the
    /// loop. Leases already handed out are not waited for; see
    /// [`BackendScheduler::wait_idle`].
    pub async fn shutdown(&self) {
        loop {
            let drained = self.shared.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            {
                let jobs = lock(&self.shared.jobs);
                if jobs.is_empty() {
                    self.shared.running.store(false, Ordering::SeqCst);
                    break;
                }
            }
            drained.await;
        }
        self.shared.job_ready.notify_one();

        let handle = lock(&self.loop_handle).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "backend scheduler loop failed");
            }
            info!("backend scheduler stopped");
        }
    }

    /// Wait until every slot has been returned.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.shared.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.free_slots() == self.shared.slot_count {
                return;
            }
            idle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn free_slots(&self) -> usize {
        lock(&self.shared.slots).len()
    }

    pub fn pending_jobs(&self) -> usize {
        lock(&self.shared.jobs).len()
    }

    pub fn slot_count(&self) -> usize {
        self.shared.slot_count
    }
}

impl Drop for BackendScheduler {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.loop_handle).take() {
            handle.abort();
        }
    }
}

async fn run(shared: Arc<Shared>) {
    while let Some(job) = shared.next_job().await {
        let backend = shared.next_slot().await;
        debug!(backend = %backend, "dispatching job");
        let lease = SlotLease {
            backend,
            shared: Arc::clone(&shared),
            released: false,
        };
        // The lease is dropped while unwinding, which frees the slot.
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || job(lease))) {
            error!(error = %panic_message(payload.as_ref()), "scheduled job panicked");
        }
    }
}
