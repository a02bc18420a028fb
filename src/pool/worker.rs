//! Worker threads: one execution context per OS thread.
//!
//! Each worker owns its engine context and a private module cache for its
//! whole lifetime; neither is ever touched by another thread. The loop is
//! Idle -> Dequeue -> Resolve Module -> Invoke -> Marshal Result ->
//! Publish Callback -> Idle, reaching Stopped only once the task channel
//! disconnects with an empty queue. At exit the worker releases its cached
//! module objects and posts the whole context on the disposal channel;
//! actual teardown happens later, from the coordinator's maintenance step.

use crate::pool::engine::{EngineError, ScriptEngine, ValueKind};
use crate::pool::error::{ExecErrorKind, SpawnError};
use crate::pool::loader::{FileKey, ModuleLoader};
use crate::pool::marshal::{marshal, materialize};
use crate::pool::value::MarshaledValue;
use crate::pool::work::{CompletedWork, WorkError, WorkItem};
use std::collections::HashMap;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

/// A worker context posted for deferred teardown after its thread exited.
pub(crate) struct ContextDisposal<E> {
    pub worker: usize,
    pub engine: E,
}

/// Spawn one worker thread. The engine is constructed on the worker
/// thread itself; success or failure is reported back over a one-shot
/// init channel before this function returns.
pub(crate) fn spawn_worker<E, F>(
    index: usize,
    thread_name: String,
    factory: Arc<F>,
    loader: Arc<dyn ModuleLoader>,
    task_rx: Receiver<WorkItem>,
    callback_tx: Sender<CompletedWork>,
    disposal_tx: Sender<ContextDisposal<E>>,
) -> Result<JoinHandle<()>, SpawnError>
where
    E: ScriptEngine,
    F: Fn(usize) -> Result<E, EngineError> + Send + Sync + 'static,
{
    let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<(), String>>();

    let handle = std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let engine = match factory(index) {
                Ok(engine) => {
                    let _ = init_tx.send(Ok(()));
                    engine
                }
                Err(err) => {
                    let _ = init_tx.send(Err(err.message));
                    return;
                }
            };

            let worker = Worker {
                index,
                engine,
                modules: HashMap::new(),
                loader,
                callback_tx,
            };
            worker.run(task_rx, disposal_tx);
        })?;

    match init_rx.recv() {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(message)) => {
            let _ = handle.join();
            Err(SpawnError::WorkerInit {
                worker: index,
                message,
            })
        }
        Err(_) => {
            let _ = handle.join();
            Err(SpawnError::WorkerInit {
                worker: index,
                message: "worker thread exited during initialization".to_string(),
            })
        }
    }
}

struct Worker<E: ScriptEngine> {
    index: usize,
    engine: E,
    /// Worker-private module cache; entries live exactly as long as the
    /// worker, never shared or migrated.
    modules: HashMap<FileKey, E::Value>,
    loader: Arc<dyn ModuleLoader>,
    callback_tx: Sender<CompletedWork>,
}

impl<E: ScriptEngine> Worker<E> {
    fn run(mut self, task_rx: Receiver<WorkItem>, disposal_tx: Sender<ContextDisposal<E>>) {
        debug!(worker = self.index, "worker context ready");

        while let Ok(item) = task_rx.recv() {
            let work_id = item.work_id;
            debug!(worker = self.index, work_id, "dequeued work item");

            let outcome = self.execute(item);
            let completed = CompletedWork {
                work_id,
                worker: self.index,
                outcome,
            };
            if self.callback_tx.send(completed).is_err() {
                debug!(worker = self.index, "callback queue closed, stopping");
                break;
            }
        }

        // Release cached module objects before the context leaves this
        // thread; engine teardown itself is deferred to the coordinator's
        // maintenance step.
        self.modules.clear();
        debug!(worker = self.index, "worker stopped");
        let _ = disposal_tx.send(ContextDisposal {
            worker: self.index,
            engine: self.engine,
        });
    }

    fn execute(&mut self, item: WorkItem) -> Result<MarshaledValue, WorkError> {
        let module = self.module_object(item.file_key)?;

        let function = match self.engine.named_property(&module, &item.function) {
            Some(function) if self.engine.is_callable(&function) => function,
            _ => {
                return Err(WorkError::new(
                    ExecErrorKind::Invocation,
                    format!(
                        "module {} has no callable function '{}'",
                        item.file_key, item.function
                    ),
                ))
            }
        };

        let param = materialize(&mut self.engine, &item.param);
        let result = self
            .engine
            .call(&function, &module, &[param])
            .map_err(|err| WorkError::new(ExecErrorKind::Runtime, err.message))?;

        Ok(marshal(&mut self.engine, &result))
    }

    /// Return the ready-to-invoke module object for `key`, compiling and
    /// instantiating at most once per worker. Nothing is cached on
    /// failure, so the next request for the same key retries compilation.
    fn module_object(&mut self, key: FileKey) -> Result<E::Value, WorkError> {
        if let Some(cached) = self.modules.get(&key) {
            return Ok(cached.clone());
        }

        let source = self
            .loader
            .resolve(key)
            .map_err(|err| WorkError::new(ExecErrorKind::Resolution, err.to_string()))?;

        self.engine.set_origin_properties(&source);

        let unit = self
            .engine
            .compile(&source.source, &source.path)
            .map_err(|err| WorkError::new(ExecErrorKind::Compile, err.message))?;
        self.engine
            .run(&unit)
            .map_err(|err| WorkError::new(ExecErrorKind::Runtime, err.message))?;

        // The module's exported object is the long-lived cached instance:
        // its properties are copied onto a fresh host object so the cache
        // entry outlives engine housekeeping of the module namespace.
        let global = self.engine.global();
        let host = self.engine.new_object();
        let exports = self
            .engine
            .named_property(&global, "module")
            .and_then(|module| self.engine.named_property(&module, "exports"));
        if let Some(exports) = exports {
            if self.engine.classify(&exports) == ValueKind::Object {
                for property_key in self.engine.property_keys(&exports) {
                    if let Some(value) = self.engine.property(&exports, &property_key) {
                        self.engine.set_property(&host, &property_key, &value);
                    }
                }
            }
        }

        self.modules.insert(key, host.clone());
        debug!(worker = self.index, file_key = %key, "module compiled and cached");
        Ok(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::loader::MemoryLoader;
    use crate::pool::testing::{StubCounters, StubEngine};
    use std::sync::atomic::Ordering;

    fn test_worker(
        loader: Arc<MemoryLoader>,
        counters: Arc<StubCounters>,
    ) -> (Worker<StubEngine>, Receiver<CompletedWork>) {
        let (callback_tx, callback_rx) = std::sync::mpsc::channel();
        let worker = Worker {
            index: 0,
            engine: StubEngine::with_counters(counters),
            modules: HashMap::new(),
            loader,
            callback_tx,
        };
        (worker, callback_rx)
    }

    fn item(work_id: u64, key: u32, function: &str, param: MarshaledValue) -> WorkItem {
        WorkItem {
            work_id,
            file_key: FileKey(key),
            function: function.to_string(),
            param,
        }
    }

    #[test]
    fn cache_hit_compiles_at_most_once_per_key() {
        let loader = Arc::new(MemoryLoader::new());
        loader.register(FileKey(1), "export double = double", "a.mod");
        loader.register(FileKey(2), "export copy = echo", "b.mod");
        let counters = StubCounters::shared();
        let (mut worker, _rx) = test_worker(loader, counters.clone());

        let first = worker.execute(item(1, 1, "double", MarshaledValue::Int32(21)));
        assert_eq!(first.unwrap(), MarshaledValue::Int32(42));
        let second = worker.execute(item(2, 1, "double", MarshaledValue::Int32(4)));
        assert_eq!(second.unwrap(), MarshaledValue::Int32(8));
        assert_eq!(counters.compiles.load(Ordering::SeqCst), 1);

        let third = worker.execute(item(3, 2, "copy", MarshaledValue::Null));
        assert_eq!(third.unwrap(), MarshaledValue::Null);
        assert_eq!(counters.compiles.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn compile_failure_is_not_cached() {
        let loader = Arc::new(MemoryLoader::new());
        loader.register(FileKey(1), "exprt broken = echo", "broken.mod");
        let counters = StubCounters::shared();
        let (mut worker, _rx) = test_worker(loader.clone(), counters.clone());

        let err = worker
            .execute(item(1, 1, "broken", MarshaledValue::Null))
            .unwrap_err();
        assert_eq!(err.kind, ExecErrorKind::Compile);

        // No negative caching: the same key compiles again, and succeeds
        // once the source is fixed.
        loader.register(FileKey(1), "export broken = echo", "broken.mod");
        let ok = worker.execute(item(2, 1, "broken", MarshaledValue::Int32(1)));
        assert_eq!(ok.unwrap(), MarshaledValue::Int32(1));
        assert_eq!(counters.compiles.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn missing_source_is_a_resolution_error() {
        let loader = Arc::new(MemoryLoader::new());
        let (mut worker, _rx) = test_worker(loader, StubCounters::shared());

        let err = worker
            .execute(item(1, 9, "any", MarshaledValue::Null))
            .unwrap_err();
        assert_eq!(err.kind, ExecErrorKind::Resolution);
        assert!(!err.message.is_empty());
    }

    #[test]
    fn missing_function_is_an_invocation_error() {
        let loader = Arc::new(MemoryLoader::new());
        loader.register(FileKey(1), "export double = double", "a.mod");
        let (mut worker, _rx) = test_worker(loader, StubCounters::shared());

        let err = worker
            .execute(item(1, 1, "missing", MarshaledValue::Object(Vec::new())))
            .unwrap_err();
        assert_eq!(err.kind, ExecErrorKind::Invocation);
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn runtime_error_captures_exception_text() {
        let loader = Arc::new(MemoryLoader::new());
        loader.register(FileKey(1), r#"export boom = raise "kapow""#, "a.mod");
        let (mut worker, _rx) = test_worker(loader, StubCounters::shared());

        let err = worker
            .execute(item(1, 1, "boom", MarshaledValue::Null))
            .unwrap_err();
        assert_eq!(err.kind, ExecErrorKind::Runtime);
        assert_eq!(err.message, "kapow");
    }

    #[test]
    fn invoked_function_observes_equivalent_structure() {
        let loader = Arc::new(MemoryLoader::new());
        loader.register(FileKey(1), "export copy = echo", "a.mod");
        let (mut worker, _rx) = test_worker(loader, StubCounters::shared());

        let param = MarshaledValue::Object(vec![
            (MarshaledValue::String("a".into()), MarshaledValue::Int32(1)),
            (
                MarshaledValue::String("b".into()),
                MarshaledValue::Array(vec![
                    MarshaledValue::Int32(1),
                    MarshaledValue::Int32(2),
                    MarshaledValue::String("x".into()),
                ]),
            ),
        ]);
        let result = worker.execute(item(1, 1, "copy", param.clone()));
        assert_eq!(result.unwrap(), param);
    }
}
