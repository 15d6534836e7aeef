//! Partial resolution: the `resolve(name) -> bytes | not found` collaborator
//! the Compiler calls into whenever it hits a `{{>name}}` tag.
//!
//! Kept as a trait (rather than hardcoding filesystem access) so the crate's
//! own test suite, and embedders who keep their partials in something other
//! than a directory tree, can plug in their own source instead of always
//! touching disk.

use std::collections::HashMap;
use std::path::Path;

use crate::error::CompileError;

/// Looks up template source by candidate path.
///
/// The Compiler, not the resolver, is responsible for building the list of
/// candidate paths to try (walking the parsing stack's directory chain and
/// appending the `.mustache` fallback); the resolver only needs to answer
/// "does this exact candidate exist, and if so what are its bytes".
pub trait PartialResolver: Send + Sync {
    /// Return `Ok(Some(bytes))` if `candidate` resolves to readable source,
    /// `Ok(None)` if it simply doesn't exist, or `Err` for a real I/O
    /// failure (permissions, etc.) distinct from "not found".
    fn read(&self, candidate: &str) -> Result<Option<Vec<u8>>, CompileError>;
}

/// Resolves candidates against the real filesystem.
#[derive(Debug, Default, Clone)]
pub struct FilesystemResolver;

impl FilesystemResolver {
    pub fn new() -> Self {
        FilesystemResolver
    }
}

impl PartialResolver for FilesystemResolver {
    fn read(&self, candidate: &str) -> Result<Option<Vec<u8>>, CompileError> {
        let path = Path::new(candidate);
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CompileError::Io {
                path: path.to_path_buf(),
                source: err,
            }),
        }
    }
}

/// Resolves candidates against an in-memory map, keyed by the exact
/// candidate string the Compiler tries (i.e. the directory-prefixed name,
/// the same string a `FilesystemResolver` would treat as a path). Useful
/// for tests and for embedding templates that never touch disk.
#[derive(Debug, Default, Clone)]
pub struct InMemoryResolver {
    templates: HashMap<String, Vec<u8>>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        InMemoryResolver {
            templates: HashMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.templates.insert(name.into(), source.into().into_bytes());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into().into_bytes());
    }
}

impl PartialResolver for InMemoryResolver {
    fn read(&self, candidate: &str) -> Result<Option<Vec<u8>>, CompileError> {
        Ok(self.templates.get(candidate).cloned())
    }
}
