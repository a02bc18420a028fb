//! Thread pool for embedded script execution.
//!
//! Each worker thread owns exactly one isolated engine context for its
//! whole lifetime. Work requests carry a module key, a function name, and
//! one marshaled parameter; results flow back through a single ordered
//! callback channel that the coordinator drains on its own thread. No
//! engine handle, module object, or callback ever crosses a thread
//! boundary — values do, as owned deep copies.

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod loader;
pub mod marshal;
pub mod testing;
pub mod value;
pub mod work;

mod worker;

// Re-export key types for convenience
pub use config::PoolConfig;
pub use coordinator::{Callback, WorkerPool};
pub use engine::{EngineError, ScriptEngine, ValueKind};
pub use error::{ExecErrorKind, ResolveError, SpawnError, SubmitError};
pub use loader::{CachingFileLoader, FileKey, MemoryLoader, ModuleLoader, ModuleSource};
pub use value::{BinaryKind, MarshaledValue};
pub use work::{CompletedWork, WorkError, WorkRequest};
