//! Deterministic in-memory script engine for tests and examples.
//!
//! `StubEngine` implements [`ScriptEngine`] over a tiny line-based module
//! grammar, just enough surface to exercise the pool: compile counting for
//! cache assertions, compile/runtime failures, artificial execution
//! delays, and a `module.exports`-shaped global after running a module.
//!
//! Module grammar, one export per line (`#` starts a comment):
//!
//! ```text
//! export double = double        # numeric doubling
//! export copy   = echo          # returns its first argument
//! export join   = concat        # string concatenation
//! export slow   = delay 25      # sleeps 25ms, then echoes
//! export boom   = raise "nope"  # raises a runtime error
//! ```

use crate::pool::engine::{EngineError, ScriptEngine, ValueKind};
use crate::pool::loader::ModuleSource;
use crate::pool::value::BinaryKind;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type StubFn = dyn Fn(&[StubValue]) -> Result<StubValue, String> + Send + Sync;

/// A value inside a `StubEngine` context. Containers use shared interior
/// mutability so handles behave like engine handles: cloning is cheap and
/// aliases the same underlying object.
#[derive(Clone)]
pub enum StubValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    UInt(u32),
    Float(f64),
    Str(Arc<str>),
    Bytes(BinaryKind, Arc<Vec<u8>>),
    Array(Arc<Mutex<Vec<StubValue>>>),
    Object(Arc<Mutex<IndexMap<String, StubValue>>>),
    Function(Arc<StubFn>),
}

impl std::fmt::Debug for StubValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StubValue::Undefined => f.write_str("Undefined"),
            StubValue::Null => f.write_str("Null"),
            StubValue::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            StubValue::Int(i) => f.debug_tuple("Int").field(i).finish(),
            StubValue::UInt(u) => f.debug_tuple("UInt").field(u).finish(),
            StubValue::Float(x) => f.debug_tuple("Float").field(x).finish(),
            StubValue::Str(s) => f.debug_tuple("Str").field(s).finish(),
            StubValue::Bytes(kind, data) => {
                f.debug_tuple("Bytes").field(kind).field(data).finish()
            }
            StubValue::Array(a) => f.debug_tuple("Array").field(a).finish(),
            StubValue::Object(o) => f.debug_tuple("Object").field(o).finish(),
            StubValue::Function(_) => f.write_str("Function(..)"),
        }
    }
}

impl StubValue {
    pub fn function(
        f: impl Fn(&[StubValue]) -> Result<StubValue, String> + Send + Sync + 'static,
    ) -> Self {
        StubValue::Function(Arc::new(f))
    }

    fn empty_object() -> Self {
        StubValue::Object(Arc::new(Mutex::new(IndexMap::new())))
    }

    /// Property-name coercion, the way an engine stringifies keys.
    fn key_string(&self) -> String {
        match self {
            StubValue::Str(s) => s.to_string(),
            StubValue::Int(i) => i.to_string(),
            StubValue::UInt(u) => u.to_string(),
            StubValue::Float(f) => f.to_string(),
            StubValue::Bool(b) => b.to_string(),
            StubValue::Null => "null".to_string(),
            StubValue::Undefined => "undefined".to_string(),
            _ => String::new(),
        }
    }
}

/// Shared observation counters, handed to every engine a factory creates.
#[derive(Default)]
pub struct StubCounters {
    pub compiles: AtomicUsize,
    pub disposals: AtomicUsize,
}

impl StubCounters {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Builtin {
    Double,
    Echo,
    Concat,
    Delay(u64),
    Raise(String),
}

impl Builtin {
    fn parse(spec: &str) -> Result<Self, String> {
        match spec {
            "double" => return Ok(Builtin::Double),
            "echo" => return Ok(Builtin::Echo),
            "concat" => return Ok(Builtin::Concat),
            _ => {}
        }
        if let Some(ms) = spec.strip_prefix("delay ") {
            return ms
                .trim()
                .parse()
                .map(Builtin::Delay)
                .map_err(|_| format!("invalid delay duration '{}'", ms.trim()));
        }
        if let Some(message) = spec.strip_prefix("raise ") {
            let message = message.trim();
            return message
                .strip_prefix('"')
                .and_then(|m| m.strip_suffix('"'))
                .map(|m| Builtin::Raise(m.to_string()))
                .ok_or_else(|| "raise expects a quoted message".to_string());
        }
        Err(format!("unknown builtin '{}'", spec))
    }

    fn instantiate(&self) -> StubValue {
        match self {
            Builtin::Double => StubValue::function(|args| match args.first() {
                Some(StubValue::Int(i)) => Ok(StubValue::Int(i * 2)),
                Some(StubValue::UInt(u)) => Ok(StubValue::UInt(u * 2)),
                Some(StubValue::Float(f)) => Ok(StubValue::Float(f * 2.0)),
                _ => Err("double expects a numeric argument".to_string()),
            }),
            Builtin::Echo => {
                StubValue::function(|args| Ok(args.first().cloned().unwrap_or(StubValue::Undefined)))
            }
            Builtin::Concat => StubValue::function(|args| {
                let mut joined = String::new();
                for arg in args {
                    match arg {
                        StubValue::Str(s) => joined.push_str(s),
                        _ => return Err("concat expects string arguments".to_string()),
                    }
                }
                Ok(StubValue::Str(joined.into()))
            }),
            Builtin::Delay(ms) => {
                let ms = *ms;
                StubValue::function(move |args| {
                    std::thread::sleep(Duration::from_millis(ms));
                    Ok(args.first().cloned().unwrap_or(StubValue::Undefined))
                })
            }
            Builtin::Raise(message) => {
                let message = message.clone();
                StubValue::function(move |_args| Err(message.clone()))
            }
        }
    }
}

/// A compiled-but-not-yet-run stub module.
#[derive(Debug)]
pub struct StubModule {
    exports: Vec<(String, Builtin)>,
}

/// In-memory script engine with one isolated global per instance.
pub struct StubEngine {
    global: StubValue,
    counters: Arc<StubCounters>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::with_counters(StubCounters::shared())
    }

    pub fn with_counters(counters: Arc<StubCounters>) -> Self {
        Self {
            global: StubValue::empty_object(),
            counters,
        }
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for StubEngine {
    type Value = StubValue;
    type Compiled = StubModule;

    fn compile(&mut self, source: &str, origin: &str) -> Result<StubModule, EngineError> {
        self.counters.compiles.fetch_add(1, Ordering::SeqCst);

        let mut exports = Vec::new();
        for (index, raw) in source.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry = line.strip_prefix("export ").ok_or_else(|| {
                EngineError::new(format!(
                    "{}:{}: expected 'export <name> = <builtin>'",
                    origin,
                    index + 1
                ))
            })?;
            let (name, spec) = entry.split_once('=').ok_or_else(|| {
                EngineError::new(format!("{}:{}: missing '='", origin, index + 1))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(EngineError::new(format!(
                    "{}:{}: export name must not be empty",
                    origin,
                    index + 1
                )));
            }
            let builtin = Builtin::parse(spec.trim()).map_err(|err| {
                EngineError::new(format!("{}:{}: {}", origin, index + 1, err))
            })?;
            exports.push((name.to_string(), builtin));
        }

        Ok(StubModule { exports })
    }

    fn run(&mut self, unit: &StubModule) -> Result<StubValue, EngineError> {
        let exports = StubValue::empty_object();
        for (name, builtin) in &unit.exports {
            let function = builtin.instantiate();
            if let StubValue::Object(map) = &exports {
                map.lock().unwrap().insert(name.clone(), function);
            }
        }

        let module = StubValue::empty_object();
        if let StubValue::Object(map) = &module {
            map.lock().unwrap().insert("exports".to_string(), exports);
        }
        if let StubValue::Object(map) = &self.global {
            map.lock().unwrap().insert("module".to_string(), module);
        }
        Ok(StubValue::Undefined)
    }

    fn global(&mut self) -> StubValue {
        self.global.clone()
    }

    fn call(
        &mut self,
        callable: &StubValue,
        _receiver: &StubValue,
        args: &[StubValue],
    ) -> Result<StubValue, EngineError> {
        match callable {
            StubValue::Function(f) => (**f)(args).map_err(EngineError::new),
            _ => Err(EngineError::new("value is not callable")),
        }
    }

    fn is_callable(&self, value: &StubValue) -> bool {
        matches!(value, StubValue::Function(_))
    }

    fn classify(&self, value: &StubValue) -> ValueKind {
        match value {
            StubValue::Int(_) => ValueKind::Int32,
            StubValue::UInt(_) => ValueKind::UInt32,
            StubValue::Float(_) => ValueKind::Float64,
            StubValue::Bool(_) => ValueKind::Boolean,
            StubValue::Null => ValueKind::Null,
            StubValue::Undefined => ValueKind::Undefined,
            StubValue::Str(_) => ValueKind::String,
            StubValue::Bytes(..) => ValueKind::Binary,
            StubValue::Array(_) => ValueKind::Array,
            StubValue::Object(_) => ValueKind::Object,
            StubValue::Function(_) => ValueKind::Unsupported,
        }
    }

    fn int32_value(&self, value: &StubValue) -> Option<i32> {
        match value {
            StubValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn uint32_value(&self, value: &StubValue) -> Option<u32> {
        match value {
            StubValue::UInt(u) => Some(*u),
            _ => None,
        }
    }

    fn float64_value(&self, value: &StubValue) -> Option<f64> {
        match value {
            StubValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn boolean_value(&self, value: &StubValue) -> Option<bool> {
        match value {
            StubValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn string_value(&mut self, value: &StubValue) -> Option<String> {
        match value {
            StubValue::Str(s) => Some(s.to_string()),
            _ => None,
        }
    }

    fn binary_value(&self, value: &StubValue) -> Option<(BinaryKind, Vec<u8>)> {
        match value {
            StubValue::Bytes(kind, bytes) => Some((*kind, bytes.as_ref().clone())),
            _ => None,
        }
    }

    fn property_keys(&mut self, object: &StubValue) -> Vec<StubValue> {
        match object {
            StubValue::Object(map) => map
                .lock()
                .unwrap()
                .keys()
                .map(|key| StubValue::Str(key.as_str().into()))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn property(&mut self, object: &StubValue, key: &StubValue) -> Option<StubValue> {
        match object {
            StubValue::Object(map) => map.lock().unwrap().get(&key.key_string()).cloned(),
            _ => None,
        }
    }

    fn array_length(&self, array: &StubValue) -> u32 {
        match array {
            StubValue::Array(items) => items.lock().unwrap().len() as u32,
            _ => 0,
        }
    }

    fn array_element(&mut self, array: &StubValue, index: u32) -> Option<StubValue> {
        match array {
            StubValue::Array(items) => items.lock().unwrap().get(index as usize).cloned(),
            _ => None,
        }
    }

    fn undefined(&mut self) -> StubValue {
        StubValue::Undefined
    }

    fn null(&mut self) -> StubValue {
        StubValue::Null
    }

    fn new_boolean(&mut self, value: bool) -> StubValue {
        StubValue::Bool(value)
    }

    fn new_int32(&mut self, value: i32) -> StubValue {
        StubValue::Int(value)
    }

    fn new_uint32(&mut self, value: u32) -> StubValue {
        StubValue::UInt(value)
    }

    fn new_float64(&mut self, value: f64) -> StubValue {
        StubValue::Float(value)
    }

    fn new_string(&mut self, value: &str) -> StubValue {
        StubValue::Str(value.into())
    }

    fn new_binary(&mut self, kind: BinaryKind, bytes: &[u8]) -> StubValue {
        StubValue::Bytes(kind, Arc::new(bytes.to_vec()))
    }

    fn new_object(&mut self) -> StubValue {
        StubValue::empty_object()
    }

    fn new_array(&mut self) -> StubValue {
        StubValue::Array(Arc::new(Mutex::new(Vec::new())))
    }

    fn set_property(&mut self, object: &StubValue, key: &StubValue, value: &StubValue) {
        if let StubValue::Object(map) = object {
            map.lock().unwrap().insert(key.key_string(), value.clone());
        }
    }

    fn set_element(&mut self, array: &StubValue, index: u32, value: &StubValue) {
        if let StubValue::Array(items) = array {
            let mut items = items.lock().unwrap();
            let index = index as usize;
            if index >= items.len() {
                items.resize(index + 1, StubValue::Undefined);
            }
            items[index] = value.clone();
        }
    }

    fn set_origin_properties(&mut self, source: &ModuleSource) {
        if let StubValue::Object(map) = &self.global {
            map.lock()
                .unwrap()
                .insert("__filename".to_string(), StubValue::Str(source.path.as_str().into()));
        }
    }

    fn dispose(&mut self) {
        if let StubValue::Object(map) = &self.global {
            map.lock().unwrap().clear();
        }
        self.counters.disposals.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exports_object(engine: &mut StubEngine) -> StubValue {
        let global = engine.global();
        let module = engine.named_property(&global, "module").unwrap();
        engine.named_property(&module, "exports").unwrap()
    }

    #[test]
    fn compile_and_run_populates_module_exports() {
        let mut engine = StubEngine::new();
        let unit = engine
            .compile("export double = double\nexport copy = echo", "mod.a")
            .unwrap();
        engine.run(&unit).unwrap();

        let exports = exports_object(&mut engine);
        let double = engine.named_property(&exports, "double").unwrap();
        assert!(engine.is_callable(&double));

        let arg = engine.new_int32(21);
        let result = engine.call(&double, &exports, &[arg]).unwrap();
        assert_eq!(engine.int32_value(&result), Some(42));
    }

    #[test]
    fn compile_error_carries_origin_and_line() {
        let mut engine = StubEngine::new();
        let err = engine
            .compile("export ok = echo\nexprt broken = echo", "broken.mod")
            .unwrap_err();
        assert!(err.message.contains("broken.mod:2"), "got: {}", err.message);
    }

    #[test]
    fn unknown_builtin_is_a_compile_error() {
        let mut engine = StubEngine::new();
        let err = engine.compile("export f = frobnicate", "m").unwrap_err();
        assert!(err.message.contains("unknown builtin"));
    }

    #[test]
    fn raise_builtin_fails_at_call_time() {
        let mut engine = StubEngine::new();
        let unit = engine.compile(r#"export boom = raise "nope""#, "m").unwrap();
        engine.run(&unit).unwrap();
        let exports = exports_object(&mut engine);
        let boom = engine.named_property(&exports, "boom").unwrap();
        let err = engine.call(&boom, &exports, &[]).unwrap_err();
        assert_eq!(err.message, "nope");
    }

    #[test]
    fn compile_counter_counts_attempts() {
        let counters = StubCounters::shared();
        let mut engine = StubEngine::with_counters(counters.clone());
        let _ = engine.compile("export a = echo", "m");
        let _ = engine.compile("not a module", "m");
        assert_eq!(counters.compiles.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let mut engine = StubEngine::new();
        let unit = engine
            .compile("# header\n\nexport a = echo\n  # trailing\n", "m")
            .unwrap();
        assert_eq!(unit.exports.len(), 1);
    }
}
