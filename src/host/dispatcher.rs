//! Host-thread dispatcher
//!
//! Work produced on I/O threads is queued here and run on the host thread
//! during the next drain. The queue is the only state shared between the
//! receive loop and the host tick.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::Result;

type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// FIFO queue of callbacks drained on the host thread
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    queue: Mutex<VecDeque<Job>>,
    /// Set while a host loop is draining this dispatcher
    attached: AtomicBool,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a callback; callable from any thread, never blocks on a drain
    ///
    /// Callbacks queued while no host loop is attached stay queued until
    /// one attaches.
    pub fn enqueue<F>(&self, job: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let pending = {
            let mut queue = self.inner.queue.lock();
            queue.push_back(Box::new(job));
            queue.len()
        };

        if !self.inner.attached.load(Ordering::Acquire) {
            tracing::debug!(pending, "Callback queued with no host loop attached");
        }
    }

    /// Run every callback queued before this call, in order
    ///
    /// The queue is swapped out under the lock and the callbacks run after
    /// it is released, so anything they enqueue waits for the next drain.
    /// A failing or panicking callback is logged and does not stop the rest.
    pub fn drain(&self) -> usize {
        let jobs = std::mem::take(&mut *self.inner.queue.lock());
        let count = jobs.len();

        for job in jobs {
            match catch_unwind(AssertUnwindSafe(job)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(code = e.code(), "Dispatched callback failed: {}", e);
                }
                Err(panic) => {
                    tracing::error!("Dispatched callback panicked: {}", panic_message(&panic));
                }
            }
        }

        count
    }

    /// Number of callbacks waiting for a drain
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Mark a host loop as draining this dispatcher
    pub fn attach(&self) {
        self.inner.attached.store(true, Ordering::Release);
    }

    /// Host loop teardown; queued and future callbacks are kept, not run
    pub fn detach(&self) {
        self.inner.attached.store(false, Ordering::Release);
        let pending = self.pending();
        if pending > 0 {
            tracing::debug!(pending, "Host loop detached with callbacks still queued");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.attached.load(Ordering::Acquire)
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
