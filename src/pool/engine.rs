//! Script-engine binding: the trait seam between the pool and whatever
//! engine actually compiles and runs module source.
//!
//! One engine instance is a single isolated execution context with its own
//! global bindings and heap. The pool binds each instance to exactly one
//! worker thread for that thread's entire lifetime; the instance crosses
//! threads only as a whole owned context, once, through the disposal
//! channel. Raw engine values never leave their owning thread.

use crate::pool::loader::ModuleSource;
use crate::pool::value::BinaryKind;

/// Runtime classification of an engine value, in the engine's own
/// type-check priority order. The marshaler takes the first match, so an
/// integral value representable as `Int32` classifies as `Int32` even when
/// it also fits `UInt32` or `Float64`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Int32,
    UInt32,
    Float64,
    Boolean,
    Null,
    Undefined,
    String,
    Binary,
    Array,
    Object,
    /// Functions, symbols, and anything else the marshaler cannot copy.
    Unsupported,
}

/// Error raised by the engine binding during compile, run, or call.
///
/// The message carries whatever exception text the engine formats; the
/// pool attaches it to the work item rather than propagating it across
/// threads.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An isolated script-execution context.
///
/// `Send` is required because a context is constructed on its worker
/// thread and later handed, whole, to the coordinator's disposal reaper.
/// It is never accessed by two threads concurrently.
pub trait ScriptEngine: Send + 'static {
    /// A handle to a value inside this context. Cloning must be cheap
    /// (handles, not deep copies).
    type Value: Clone;
    /// A compiled-but-not-yet-run unit of module source.
    type Compiled;

    /// Compile module source. `origin` labels the script for error text.
    fn compile(&mut self, source: &str, origin: &str) -> Result<Self::Compiled, EngineError>;

    /// Run a compiled unit to completion, returning its completion value.
    /// Module side effects (populating `module.exports`) land on the
    /// global object.
    fn run(&mut self, unit: &Self::Compiled) -> Result<Self::Value, EngineError>;

    /// The context's global object.
    fn global(&mut self) -> Self::Value;

    /// Invoke a callable with an explicit receiver.
    fn call(
        &mut self,
        callable: &Self::Value,
        receiver: &Self::Value,
        args: &[Self::Value],
    ) -> Result<Self::Value, EngineError>;

    fn is_callable(&self, value: &Self::Value) -> bool;

    /// Classify a value by the engine's own type-check order.
    fn classify(&self, value: &Self::Value) -> ValueKind;

    // Readers, called only for values of the matching classification.
    fn int32_value(&self, value: &Self::Value) -> Option<i32>;
    fn uint32_value(&self, value: &Self::Value) -> Option<u32>;
    fn float64_value(&self, value: &Self::Value) -> Option<f64>;
    fn boolean_value(&self, value: &Self::Value) -> Option<bool>;
    fn string_value(&mut self, value: &Self::Value) -> Option<String>;
    /// Full copy of a binary buffer, never a view. Bindings report
    /// unsupported element kinds as `BinaryKind::Uint8`.
    fn binary_value(&self, value: &Self::Value) -> Option<(BinaryKind, Vec<u8>)>;

    /// Own and inherited enumerable property keys, in the engine's
    /// enumeration order.
    fn property_keys(&mut self, object: &Self::Value) -> Vec<Self::Value>;

    /// Look up a property by key value. `None` means absent.
    fn property(&mut self, object: &Self::Value, key: &Self::Value) -> Option<Self::Value>;

    /// Look up a property by name. Convenience over [`Self::property`].
    fn named_property(&mut self, object: &Self::Value, name: &str) -> Option<Self::Value> {
        let key = self.new_string(name);
        self.property(object, &key)
    }

    fn array_length(&self, array: &Self::Value) -> u32;

    /// Element at `index`; `None` for a hole, which marshals as
    /// `Undefined`.
    fn array_element(&mut self, array: &Self::Value, index: u32) -> Option<Self::Value>;

    // Constructors, used to materialize marshaled values back into the
    // context.
    fn undefined(&mut self) -> Self::Value;
    fn null(&mut self) -> Self::Value;
    fn new_boolean(&mut self, value: bool) -> Self::Value;
    fn new_int32(&mut self, value: i32) -> Self::Value;
    fn new_uint32(&mut self, value: u32) -> Self::Value;
    fn new_float64(&mut self, value: f64) -> Self::Value;
    fn new_string(&mut self, value: &str) -> Self::Value;
    fn new_binary(&mut self, kind: BinaryKind, bytes: &[u8]) -> Self::Value;
    fn new_object(&mut self) -> Self::Value;
    fn new_array(&mut self) -> Self::Value;
    fn set_property(&mut self, object: &Self::Value, key: &Self::Value, value: &Self::Value);
    fn set_element(&mut self, array: &Self::Value, index: u32, value: &Self::Value);

    /// Update context-level file properties before compiling a module
    /// (e.g. `__filename`-style bindings). Default: nothing.
    fn set_origin_properties(&mut self, _source: &ModuleSource) {}

    /// Tear down context resources. Called exactly once, from the
    /// coordinator's maintenance step, after the owning worker thread has
    /// exited and no frame or handle into the context can exist.
    fn dispose(&mut self) {}
}
