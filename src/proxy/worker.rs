use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{debug, error};

use super::AppContext;
use super::handler::handle_connection;
use super::listener::Connection;

/// Fixed set of threads draining the connection queue until it is closed.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(app: &AppContext) -> Result<Self> {
        let count = app.settings.worker_count;
        let mut workers = Vec::with_capacity(count);
        for id in 0..count {
            let worker_app = app.clone();
            let spawned = thread::Builder::new()
                .name(format!("proxy-worker-{id}"))
                .spawn(move || worker_loop(id, worker_app));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    app.queue.close();
                    WorkerPool { workers }.join();
                    return Err(err).with_context(|| format!("failed to spawn worker {id}"));
                }
            }
        }
        debug!(count, "worker pool started");
        Ok(Self { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Waits for every worker. Returns only once the queue has been closed and drained.
    pub fn join(self) {
        for handle in self.workers {
            if handle.join().is_err() {
                error!("worker thread exited with a panic");
            }
        }
    }
}

fn worker_loop(id: usize, app: AppContext) {
    debug!(worker = id, "worker started");
    while let Some(Connection { stream, peer }) = app.queue.remove() {
        crate::metrics::set_queue_depth(app.queue.len());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            handle_connection(stream, peer, &app, id)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(worker = id, peer = %peer, error = %err, "connection closed with error");
            }
            Err(payload) => {
                crate::metrics::record_worker_panic();
                error!(
                    worker = id,
                    peer = %peer,
                    reason = panic_message(payload.as_ref()),
                    "connection handler panicked"
                );
            }
        }
    }
    debug!(worker = id, "worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
