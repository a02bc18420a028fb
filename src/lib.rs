//! scriptpool: a fixed-size worker pool for embedded scripting engines.
//!
//! The pool spawns N OS threads, each bound 1:1 to an isolated engine
//! context built through a caller-supplied factory. Callers submit
//! `(file key, function name, parameter)` requests and receive results on
//! the coordinator thread, in completion-publish order, through callbacks
//! that never leave that thread. Engines plug in behind the
//! [`ScriptEngine`] trait; module sources come from a [`ModuleLoader`].

pub mod pool;

pub use pool::{
    BinaryKind, Callback, CompletedWork, EngineError, ExecErrorKind, FileKey, MarshaledValue,
    ModuleLoader, ModuleSource, PoolConfig, ResolveError, ScriptEngine, SpawnError, SubmitError,
    ValueKind, WorkError, WorkRequest, WorkerPool,
};
