use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::models::error::CaptureError;
use crate::traits::loopback_backend::ThreadGuard;
use crate::traits::ready_signal::ReadySignal;

/// A deferred unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs once at the start of every queue thread; the returned guard lives
/// until the thread exits.
pub type ThreadInit = Arc<dyn Fn() -> Option<ThreadGuard> + Send + Sync>;

/// How long the waiter blocks on a signal before re-checking for
/// cancellation and shutdown.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Handle for a pending waiting work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitKey(u64);

/// Deferred-work scheduler for a capture session.
///
/// A fixed pool of worker threads runs jobs in submission order. One extra
/// waiter thread services a single *waiting work item*: a job that is
/// queued only when its [`ReadySignal`] fires. A waiting item fires at most
/// once; the owner re-arms it after each run.
///
/// ```text
/// put_work_item ───────────────────────────────┐
///                                              ├→ [channel] → worker threads
/// put_waiting_work_item → [waiter: signal?] ───┘
/// ```
pub struct WorkQueue {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    waiter: Arc<Waiter>,
    waiter_handle: Mutex<Option<thread::JoinHandle<()>>>,
    next_key: AtomicU64,
}

struct Waiter {
    slot: Mutex<WaitSlot>,
    armed: Condvar,
}

#[derive(Default)]
struct WaitSlot {
    pending: Option<PendingWait>,
    shutdown: bool,
}

struct PendingWait {
    key: WaitKey,
    signal: Arc<dyn ReadySignal>,
    job: Job,
}

impl WorkQueue {
    pub fn new(name: &str, worker_count: usize) -> Result<Self, CaptureError> {
        Self::with_thread_init(name, worker_count, None)
    }

    pub fn with_thread_init(
        name: &str,
        worker_count: usize,
        thread_init: Option<ThreadInit>,
    ) -> Result<Self, CaptureError> {
        if worker_count == 0 {
            return Err(CaptureError::Scheduling("work queue needs at least one worker".into()));
        }

        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let receiver = Arc::clone(&receiver);
            let thread_init = thread_init.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-worker-{}", name, index))
                .spawn(move || {
                    let _guard = thread_init.as_ref().and_then(|init| init());
                    loop {
                        let job = receiver.lock().recv();
                        match job {
                            Ok(job) => run_job(job),
                            Err(_) => break,
                        }
                    }
                })
                .map_err(|e| CaptureError::Scheduling(format!("failed to spawn worker thread: {}", e)))?;
            workers.push(handle);
        }

        let waiter = Arc::new(Waiter {
            slot: Mutex::new(WaitSlot::default()),
            armed: Condvar::new(),
        });

        let waiter_handle = {
            let waiter = Arc::clone(&waiter);
            let sender = sender.clone();
            thread::Builder::new()
                .name(format!("{}-waiter", name))
                .spawn(move || {
                    let _guard = thread_init.as_ref().and_then(|init| init());
                    waiter.run(sender);
                })
                .map_err(|e| CaptureError::Scheduling(format!("failed to spawn waiter thread: {}", e)))?
        };

        Ok(Self {
            name: name.to_string(),
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            waiter,
            waiter_handle: Mutex::new(Some(waiter_handle)),
            next_key: AtomicU64::new(1),
        })
    }

    /// Queue `job` for execution on a worker thread.
    pub fn put_work_item(&self, job: impl FnOnce() + Send + 'static) -> Result<(), CaptureError> {
        let sender = self.sender.lock();
        let sender = sender
            .as_ref()
            .ok_or_else(|| CaptureError::Scheduling(format!("work queue '{}' is shut down", self.name)))?;
        sender
            .send(Box::new(job))
            .map_err(|_| CaptureError::Scheduling(format!("work queue '{}' has no workers", self.name)))
    }

    /// Queue `job` once `signal` fires.
    ///
    /// Only one waiting item may be pending at a time.
    pub fn put_waiting_work_item(
        &self,
        signal: Arc<dyn ReadySignal>,
        job: impl FnOnce() + Send + 'static,
    ) -> Result<WaitKey, CaptureError> {
        let mut slot = self.waiter.slot.lock();
        if slot.shutdown {
            return Err(CaptureError::Scheduling(format!("work queue '{}' is shut down", self.name)));
        }
        if slot.pending.is_some() {
            return Err(CaptureError::Scheduling("a waiting work item is already pending".into()));
        }

        let key = WaitKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        slot.pending = Some(PendingWait {
            key,
            signal,
            job: Box::new(job),
        });
        self.waiter.armed.notify_one();
        Ok(key)
    }

    /// Cancel a pending waiting item. Returns `false` if it already fired
    /// or was cancelled.
    pub fn cancel_waiting_work_item(&self, key: WaitKey) -> bool {
        let cancelled = {
            let mut slot = self.waiter.slot.lock();
            match &slot.pending {
                Some(pending) if pending.key == key => slot.pending.take(),
                _ => None,
            }
        };
        cancelled.is_some()
    }

    pub fn has_pending_wait(&self) -> bool {
        self.waiter.slot.lock().pending.is_some()
    }

    /// Stop accepting work, run what is already queued, and join all threads.
    ///
    /// Pending waiting items are dropped without running.
    pub fn shutdown(&self) {
        let dropped = {
            let mut slot = self.waiter.slot.lock();
            slot.shutdown = true;
            self.waiter.armed.notify_all();
            slot.pending.take()
        };
        drop(dropped);

        let current = thread::current().id();

        if let Some(handle) = self.waiter_handle.lock().take() {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }

        // Dropping the last sender lets workers exit once the channel drains.
        self.sender.lock().take();

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Waiter {
    fn run(&self, sender: mpsc::Sender<Job>) {
        loop {
            let (key, signal) = {
                let mut slot = self.slot.lock();
                loop {
                    if slot.shutdown {
                        return;
                    }
                    if let Some(pending) = &slot.pending {
                        break (pending.key, Arc::clone(&pending.signal));
                    }
                    self.armed.wait(&mut slot);
                }
            };

            if !signal.wait_timeout(WAIT_SLICE) {
                continue;
            }

            let job = {
                let mut slot = self.slot.lock();
                match &slot.pending {
                    Some(pending) if pending.key == key => slot.pending.take().map(|p| p.job),
                    _ => None,
                }
            };

            if let Some(job) = job {
                if sender.send(job).is_err() {
                    return;
                }
            }
        }
    }
}

fn run_job(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        log::error!("Work item panicked on {:?}", thread::current().name());
    }
}
