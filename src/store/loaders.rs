//! The loader registration table.
//!
//! Decoding raw bytes into payloads is driven by an explicit table built
//! once at startup: a kind tag maps to a factory function, and file
//! extensions map to kind tags for stores that synthesize manifests from a
//! directory tree. Nothing is discovered at runtime.

use std::any::Any;

use inlinable_string::InlinableString;

use crate::errors::*;
use crate::utils::FastHashMap;

pub type LoaderFn = Box<dyn Fn(&[u8]) -> Result<Box<dyn Any>>>;

pub struct LoaderRegistry {
    loaders: FastHashMap<InlinableString, LoaderFn>,
    extensions: FastHashMap<InlinableString, InlinableString>,
}

impl LoaderRegistry {
    /// Creates a registry with the built-in `bytes` and `text` loaders and
    /// their default extension mappings.
    pub fn new() -> Self {
        let mut registry = LoaderRegistry {
            loaders: FastHashMap::default(),
            extensions: FastHashMap::default(),
        };

        registry.register("bytes", |bytes| {
            Ok(Box::new(bytes.to_vec()) as Box<dyn Any>)
        });

        registry.register("text", |bytes| {
            let v = ::std::str::from_utf8(bytes)
                .map_err(|err| Error::Malformed(format!("Text asset is not UTF-8. {}", err)))?;
            Ok(Box::new(v.to_string()) as Box<dyn Any>)
        });

        registry.map_extension("bin", "bytes");
        registry.map_extension("txt", "text");
        registry
    }

    /// Registers a loader under `kind`, replacing any previous one.
    pub fn register<T, F>(&mut self, kind: T, loader: F)
    where
        T: Into<InlinableString>,
        F: Fn(&[u8]) -> Result<Box<dyn Any>> + 'static,
    {
        self.loaders.insert(kind.into(), Box::new(loader));
    }

    /// Maps a file extension onto a registered kind tag.
    pub fn map_extension<T1, T2>(&mut self, extension: T1, kind: T2)
    where
        T1: Into<InlinableString>,
        T2: Into<InlinableString>,
    {
        self.extensions.insert(extension.into(), kind.into());
    }

    /// Returns the kind tag mapped to the extension of `path`, if any.
    pub fn kind_of(&self, path: &str) -> Option<InlinableString> {
        let extension = ::std::path::Path::new(path)
            .extension()
            .and_then(|v| v.to_str())?;
        self.extensions.get(&InlinableString::from(extension)).cloned()
    }

    /// Checks if a loader is registered under `kind`.
    #[inline]
    pub fn contains(&self, kind: &str) -> bool {
        self.loaders.contains_key(&InlinableString::from(kind))
    }

    /// Decodes `bytes` with the loader registered under `kind`.
    pub fn decode(&self, kind: &str, bytes: &[u8]) -> Result<Box<dyn Any>> {
        let loader = self
            .loaders
            .get(&InlinableString::from(kind))
            .ok_or_else(|| Error::Malformed(format!("No loader registered for kind '{}'.", kind)))?;

        loader(bytes)
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        LoaderRegistry::new()
    }
}
