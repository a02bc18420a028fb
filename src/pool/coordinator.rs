//! The coordinator-facing pool: submission, callback drain, shutdown.
//!
//! All methods here run on the coordinator thread. Callbacks never cross a
//! thread boundary: they are registered here keyed by work id, and work
//! items travel with identifiers only. The shared callback channel is the
//! wake primitive — any number of worker signals before a drain coalesce
//! into one blocking receive.

use crate::pool::config::PoolConfig;
use crate::pool::engine::{EngineError, ScriptEngine};
use crate::pool::error::{SpawnError, SubmitError};
use crate::pool::loader::{FileKey, ModuleLoader};
use crate::pool::marshal::materialize;
use crate::pool::work::{CompletedWork, WorkError, WorkItem, WorkRequest};
use crate::pool::worker::{spawn_worker, ContextDisposal};
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Caller-supplied completion callback, invoked on the coordinator thread
/// with the result materialized into the coordinator's own context:
/// `(host, result_or_none, work_id, error_or_none)`. Exactly one of
/// result/error is present.
pub type Callback<E> =
    Box<dyn FnMut(&mut E, Option<<E as ScriptEngine>::Value>, u64, Option<&WorkError>)>;

/// A fixed set of worker threads, each bound 1:1 to its own execution
/// context, fed through per-worker FIFO task queues and drained through a
/// single ordered callback channel.
pub struct WorkerPool<E: ScriptEngine> {
    workers: usize,
    task_txs: Vec<Sender<WorkItem>>,
    callback_rx: Receiver<CompletedWork>,
    disposal_rx: Receiver<ContextDisposal<E>>,
    threads: Vec<JoinHandle<()>>,
    callbacks: HashMap<u64, Callback<E>>,
    disposed: Vec<usize>,
    closed: bool,
}

impl<E: ScriptEngine> WorkerPool<E> {
    /// Spawn `config.workers` worker threads, each constructing its own
    /// engine context via `engine_factory` on its own thread. Any engine
    /// or thread initialization failure is fatal: already-started workers
    /// are torn down and the error is returned.
    pub fn spawn<F>(
        config: PoolConfig,
        loader: Arc<dyn ModuleLoader>,
        engine_factory: F,
    ) -> Result<Self, SpawnError>
    where
        F: Fn(usize) -> Result<E, EngineError> + Send + Sync + 'static,
    {
        config.validate()?;

        let factory = Arc::new(engine_factory);
        let (callback_tx, callback_rx) = std::sync::mpsc::channel();
        let (disposal_tx, disposal_rx) = std::sync::mpsc::channel();

        let mut task_txs = Vec::with_capacity(config.workers);
        let mut threads = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let (task_tx, task_rx) = std::sync::mpsc::channel();
            let spawned = spawn_worker(
                index,
                config.thread_name(index),
                factory.clone(),
                loader.clone(),
                task_rx,
                callback_tx.clone(),
                disposal_tx.clone(),
            );
            match spawned {
                Ok(handle) => {
                    task_txs.push(task_tx);
                    threads.push(handle);
                }
                Err(err) => {
                    task_txs.clear();
                    for handle in threads {
                        let _ = handle.join();
                    }
                    return Err(err);
                }
            }
        }

        debug!(workers = config.workers, "worker pool started");
        Ok(Self {
            workers: config.workers,
            task_txs,
            callback_rx,
            disposal_rx,
            threads,
            callbacks: HashMap::new(),
            disposed: Vec::new(),
            closed: false,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Stable routing: the worker a `file_key` maps to never changes for
    /// the pool's lifetime, keeping cached module affinity intact.
    pub fn route(&self, key: FileKey) -> usize {
        key.0 as usize % self.workers
    }

    /// Submit a work request, routed by its file key.
    pub fn submit(&mut self, request: WorkRequest, callback: Callback<E>) -> Result<(), SubmitError> {
        let worker = self.route(request.file_key);
        self.submit_to(request, worker, callback)
    }

    /// Submit a work request to an explicit worker. The callback stays on
    /// the coordinator, keyed by the request's work id, and fires during a
    /// later drain.
    pub fn submit_to(
        &mut self,
        request: WorkRequest,
        worker: usize,
        callback: Callback<E>,
    ) -> Result<(), SubmitError> {
        if self.closed {
            return Err(SubmitError::QueueClosed);
        }
        request.validate()?;
        if worker >= self.workers {
            return Err(SubmitError::NoSuchWorker {
                index: worker,
                workers: self.workers,
            });
        }
        if self.callbacks.contains_key(&request.work_id) {
            return Err(SubmitError::InvalidRequest(format!(
                "work id {} is already in flight",
                request.work_id
            )));
        }

        let work_id = request.work_id;
        self.task_txs[worker]
            .send(WorkItem::from(request))
            .map_err(|_| SubmitError::QueueClosed)?;
        self.callbacks.insert(work_id, callback);
        debug!(work_id, worker, "work item queued");
        Ok(())
    }

    /// Number of submitted work items whose callbacks have not fired yet.
    pub fn pending(&self) -> usize {
        self.callbacks.len()
    }

    /// Drain every completed work item currently on the callback queue,
    /// invoking callbacks in publish order, then run the disposal
    /// maintenance step. Returns the number of callbacks fired.
    pub fn drain(&mut self, host: &mut E) -> usize {
        let mut delivered = 0;
        while let Ok(completed) = self.callback_rx.try_recv() {
            self.deliver(host, completed);
            delivered += 1;
        }
        self.reap_disposals();
        delivered
    }

    /// Block until at least one completion arrives (the coalesced wake),
    /// then drain until the queue is empty. Returns 0 only if every
    /// worker has exited and the queue is empty.
    pub fn drain_blocking(&mut self, host: &mut E) -> usize {
        match self.callback_rx.recv() {
            Ok(completed) => {
                self.deliver(host, completed);
                1 + self.drain(host)
            }
            Err(_) => {
                self.reap_disposals();
                0
            }
        }
    }

    /// Drive blocking drains until no callback is pending.
    pub fn run_until_complete(&mut self, host: &mut E) {
        while !self.callbacks.is_empty() {
            if self.drain_blocking(host) == 0 {
                break;
            }
        }
    }

    fn deliver(&mut self, host: &mut E, completed: CompletedWork) {
        let Some(mut callback) = self.callbacks.remove(&completed.work_id) else {
            warn!(
                work_id = completed.work_id,
                "completed work item without a registered callback"
            );
            return;
        };

        match completed.outcome {
            Ok(value) => {
                let result = materialize(host, &value);
                callback(host, Some(result), completed.work_id, None);
            }
            Err(err) => {
                callback(host, None, completed.work_id, Some(&err));
            }
        }
        // The work item's owned resources (marshaled value, error text,
        // function name, callback) are all released here.
    }

    /// Maintenance step: consume contexts posted by exited workers and
    /// tear them down from this known-idle point.
    fn reap_disposals(&mut self) {
        while let Ok(mut disposal) = self.disposal_rx.try_recv() {
            disposal.engine.dispose();
            debug!(worker = disposal.worker, "worker context disposed");
            self.disposed.push(disposal.worker);
        }
    }

    /// Worker contexts torn down so far; equals the worker count after
    /// [`Self::shutdown`] returns.
    pub fn disposed_contexts(&self) -> usize {
        self.disposed.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop accepting submissions, let workers drain their queues and
    /// exit, join all worker threads, fire the callbacks of every item
    /// that was still in flight, and dispose all worker contexts. After
    /// this returns no further callbacks fire.
    pub fn shutdown(&mut self, host: &mut E) {
        if self.closed && self.threads.is_empty() {
            return;
        }
        self.closed = true;

        // Disconnecting the task channels signals the workers to drain
        // remaining items and stop.
        self.task_txs.clear();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }

        // Every worker-side sender is gone once the threads have joined,
        // so this observes every remaining completion.
        while let Ok(completed) = self.callback_rx.try_recv() {
            self.deliver(host, completed);
        }
        self.reap_disposals();
        debug!("worker pool shut down");
    }
}

impl<E: ScriptEngine> Drop for WorkerPool<E> {
    /// Best-effort teardown for pools dropped without [`Self::shutdown`]:
    /// joins workers and disposes contexts, but cannot fire callbacks
    /// (there is no host context to materialize into).
    fn drop(&mut self) {
        self.closed = true;
        self.task_txs.clear();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        self.reap_disposals();
    }
}
