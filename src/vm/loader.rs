//! Object program loading and caching.
//!
//! Each object path is compiled at most once per loader. Later `inherit`
//! lines and `load()` calls naming the same path get the same
//! [`Compilation`], so every construction of that object runs one program.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use ahash::AHashMap;
use tracing::{debug, warn};

use crate::error::LoadError;

use super::chunk::Compilation;
use super::compiler_objects::compile_object;

/// Where object source text comes from.
pub trait ObjectSource {
    /// Read the source of the object at a normalized path such as `/std/base`.
    fn read(&self, path: &str) -> io::Result<String>;
}

/// Objects stored as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsSource {
    pub root: PathBuf,
    pub extension: String,
}

impl FsSource {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    /// `/std/base` maps to `<root>/std/base.<extension>`. Paths that would
    /// leave the root are rejected.
    pub fn file_path(&self, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let inside_root = relative
            .components()
            .all(|part| matches!(part, Component::Normal(_) | Component::CurDir));
        if relative.as_os_str().is_empty() || !inside_root {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("object path '{}' is outside the object root", path),
            ));
        }

        let mut file = self.root.join(relative).into_os_string();
        if !self.extension.is_empty() {
            file.push(".");
            file.push(&self.extension);
        }
        Ok(PathBuf::from(file))
    }
}

impl ObjectSource for FsSource {
    fn read(&self, path: &str) -> io::Result<String> {
        fs::read_to_string(self.file_path(path)?)
    }
}

/// Objects held in memory, keyed by normalized path.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: HashMap<String, String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, source: impl Into<String>) {
        self.files.insert(normalize_path(path, ""), source.into());
    }

    pub fn with(mut self, path: &str, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }
}

impl ObjectSource for MemorySource {
    fn read(&self, path: &str) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no object at {}", path))
        })
    }
}

/// Canonical form of an object path: trimmed, rooted, without the source extension.
pub fn normalize_path(path: &str, extension: &str) -> String {
    let trimmed = path.trim();
    let stem = if extension.is_empty() {
        trimmed
    } else {
        trimmed
            .strip_suffix(extension)
            .and_then(|s| s.strip_suffix('.'))
            .unwrap_or(trimmed)
    };
    if stem.starts_with('/') {
        stem.to_string()
    } else {
        format!("/{}", stem)
    }
}

/// Memoizing front end over an [`ObjectSource`].
pub struct ObjectLoader {
    source: Box<dyn ObjectSource>,
    extension: String,
    cache: AHashMap<String, Rc<Compilation>>,
    compiles: usize,
}

impl ObjectLoader {
    pub fn new(source: Box<dyn ObjectSource>, extension: impl Into<String>) -> Self {
        Self {
            source,
            extension: extension.into(),
            cache: AHashMap::new(),
            compiles: 0,
        }
    }

    pub fn from_fs(root: impl Into<PathBuf>, extension: &str) -> Self {
        Self::new(Box::new(FsSource::new(root, extension)), extension)
    }

    pub fn from_memory(source: MemorySource) -> Self {
        Self::new(Box::new(source), "")
    }

    /// The compiled program for `path`, compiling it on first use.
    /// Failures are not cached.
    pub fn load(&mut self, path: &str) -> Result<Rc<Compilation>, LoadError> {
        let path = normalize_path(path, &self.extension);
        if let Some(compilation) = self.cache.get(&path) {
            debug!(path = %path, "object cache hit");
            return Ok(compilation.clone());
        }
        debug!(path = %path, "object cache miss");

        let source = self.source.read(&path).map_err(|source| LoadError::Io {
            path: path.clone(),
            source,
        })?;
        let compilation = compile_object(&path, &source).map_err(|errors| {
            warn!(path = %path, errors = errors.len(), "object failed to compile");
            LoadError::Compile {
                path: path.clone(),
                errors,
            }
        })?;

        self.compiles += 1;
        self.cache.insert(path, compilation.clone());
        Ok(compilation)
    }

    /// Number of successful compiles so far.
    pub fn compiles(&self) -> usize {
        self.compiles
    }

    pub fn is_cached(&self, path: &str) -> bool {
        self.cache
            .contains_key(&normalize_path(path, &self.extension))
    }
}
