//! Module-source resolution: the file/module loader collaborator.
//!
//! Loaders must be callable from any worker thread concurrently. Two
//! reference implementations are provided: [`MemoryLoader`] for sources
//! registered up front, and [`CachingFileLoader`] for sources read from
//! disk once and cached by key.

use crate::pool::error::ResolveError;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::RwLock;

/// Identifier of a registered module, the routing key for worker affinity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileKey(pub u32);

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolved module source plus the canonical path used as its script
/// origin label.
#[derive(Clone, Debug)]
pub struct ModuleSource {
    pub source: String,
    pub path: String,
}

/// Resolves a `FileKey` to module source. Implementations may cache file
/// contents by key; they must be safe to call from any worker thread.
pub trait ModuleLoader: Send + Sync {
    fn resolve(&self, key: FileKey) -> Result<ModuleSource, ResolveError>;
}

/// Loader over sources registered directly in memory.
#[derive(Default)]
pub struct MemoryLoader {
    modules: RwLock<HashMap<FileKey, ModuleSource>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: FileKey, source: impl Into<String>, path: impl Into<String>) {
        self.modules.write().unwrap().insert(
            key,
            ModuleSource {
                source: source.into(),
                path: path.into(),
            },
        );
    }
}

impl ModuleLoader for MemoryLoader {
    fn resolve(&self, key: FileKey) -> Result<ModuleSource, ResolveError> {
        self.modules
            .read()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(ResolveError::NotFound(key))
    }
}

/// Loader that maps keys to filesystem paths, reads each file once, and
/// serves subsequent resolutions from its content cache.
#[derive(Default)]
pub struct CachingFileLoader {
    paths: RwLock<HashMap<FileKey, PathBuf>>,
    cache: RwLock<HashMap<FileKey, ModuleSource>>,
}

impl CachingFileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_path(&self, key: FileKey, path: impl Into<PathBuf>) {
        self.paths.write().unwrap().insert(key, path.into());
    }
}

impl ModuleLoader for CachingFileLoader {
    fn resolve(&self, key: FileKey) -> Result<ModuleSource, ResolveError> {
        if let Some(cached) = self.cache.read().unwrap().get(&key) {
            return Ok(cached.clone());
        }

        let path = {
            let paths = self.paths.read().unwrap();
            paths.get(&key).cloned().ok_or(ResolveError::NotFound(key))?
        };

        let source = std::fs::read_to_string(&path)?;
        let resolved = ModuleSource {
            source,
            path: path.to_string_lossy().into_owned(),
        };
        self.cache.write().unwrap().insert(key, resolved.clone());
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_loader_resolves_registered_source() {
        let loader = MemoryLoader::new();
        loader.register(FileKey(1), "export double = double", "worker.mod");

        let resolved = loader.resolve(FileKey(1)).unwrap();
        assert_eq!(resolved.source, "export double = double");
        assert_eq!(resolved.path, "worker.mod");
    }

    #[test]
    fn memory_loader_reports_unknown_key() {
        let loader = MemoryLoader::new();
        assert!(matches!(
            loader.resolve(FileKey(9)),
            Err(ResolveError::NotFound(FileKey(9)))
        ));
    }

    #[test]
    fn file_loader_reads_once_and_caches() {
        let dir = std::env::temp_dir().join(format!("scriptpool-loader-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cached.mod");
        std::fs::write(&path, "export echo = echo").unwrap();

        let loader = CachingFileLoader::new();
        loader.register_path(FileKey(3), &path);

        let first = loader.resolve(FileKey(3)).unwrap();
        assert_eq!(first.source, "export echo = echo");

        // Second resolution comes from the cache even after the file is
        // gone.
        std::fs::remove_file(&path).unwrap();
        let second = loader.resolve(FileKey(3)).unwrap();
        assert_eq!(second.source, first.source);
    }

    #[test]
    fn file_loader_unregistered_key_is_not_found() {
        let loader = CachingFileLoader::new();
        assert!(matches!(
            loader.resolve(FileKey(7)),
            Err(ResolveError::NotFound(_))
        ));
    }
}
