#![forbid(unsafe_code)]

//! External resource resolution for references outside the document.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use strom_core::Error;
use tracing::debug;

/// Fetches the byte stream behind an external reference URI.
///
/// Any failure is reported as [`Error::ResolutionFailed`].
pub trait ResourceResolver: Send + Sync {
    /// Whether this resolver handles `uri` at all.
    fn can_resolve(&self, uri: &str) -> bool;

    fn resolve(&self, uri: &str) -> Result<Box<dyn Read + Send>, Error>;
}

fn failed(uri: &str, reason: impl std::fmt::Display) -> Error {
    Error::ResolutionFailed {
        uri: uri.to_owned(),
        reason: reason.to_string(),
    }
}

/// Serves resources from memory.
#[derive(Debug, Default, Clone)]
pub struct MapResolver {
    resources: HashMap<String, Vec<u8>>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uri: &str, data: impl Into<Vec<u8>>) -> &mut Self {
        self.resources.insert(uri.to_owned(), data.into());
        self
    }
}

impl ResourceResolver for MapResolver {
    fn can_resolve(&self, uri: &str) -> bool {
        self.resources.contains_key(uri)
    }

    fn resolve(&self, uri: &str) -> Result<Box<dyn Read + Send>, Error> {
        let data = self
            .resources
            .get(uri)
            .ok_or_else(|| failed(uri, "no such resource"))?;
        Ok(Box::new(Cursor::new(data.clone())))
    }
}

/// Resolves URIs to local files, through explicit URL-to-file mappings
/// (prefix match) or relative to a base directory.
#[derive(Debug, Default, Clone)]
pub struct FileResolver {
    base_dir: Option<PathBuf>,
    url_maps: Vec<(String, PathBuf)>,
}

impl FileResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Map an external URI (or URI prefix) to a local file path.
    pub fn add_url_map(&mut self, url: &str, file_path: impl Into<PathBuf>) -> &mut Self {
        self.url_maps.push((url.to_owned(), file_path.into()));
        self
    }

    fn path_for(&self, uri: &str) -> Option<PathBuf> {
        if let Some((_, path)) = self
            .url_maps
            .iter()
            .find(|(url, _)| uri == url || uri.starts_with(url.as_str()))
        {
            return Some(path.clone());
        }
        let relative = uri.strip_prefix("file://").unwrap_or(uri);
        if relative.contains("://") {
            return None;
        }
        let path = Path::new(relative);
        match &self.base_dir {
            Some(base) if path.is_relative() => Some(base.join(path)),
            _ => Some(path.to_path_buf()),
        }
    }
}

impl ResourceResolver for FileResolver {
    fn can_resolve(&self, uri: &str) -> bool {
        self.path_for(uri).is_some()
    }

    fn resolve(&self, uri: &str) -> Result<Box<dyn Read + Send>, Error> {
        let path = self
            .path_for(uri)
            .ok_or_else(|| failed(uri, "not a file reference"))?;
        debug!(uri, path = %path.display(), "resolving external reference");
        let file = File::open(&path).map_err(|e| failed(uri, format!("{}: {e}", path.display())))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Tries resolvers in order; the first that accepts the URI answers.
#[derive(Default)]
pub struct ChainResolver {
    resolvers: Vec<Box<dyn ResourceResolver>>,
}

impl ChainResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, resolver: impl ResourceResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }
}

impl ResourceResolver for ChainResolver {
    fn can_resolve(&self, uri: &str) -> bool {
        self.resolvers.iter().any(|r| r.can_resolve(uri))
    }

    fn resolve(&self, uri: &str) -> Result<Box<dyn Read + Send>, Error> {
        self.resolvers
            .iter()
            .find(|r| r.can_resolve(uri))
            .ok_or_else(|| failed(uri, "no resolver accepts this URI"))?
            .resolve(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(mut r: Box<dyn Read + Send>) -> Vec<u8> {
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_map_resolver() {
        let mut map = MapResolver::new();
        map.insert("urn:doc", "payload");
        assert!(map.can_resolve("urn:doc"));
        assert_eq!(read_all(map.resolve("urn:doc").unwrap()), b"payload");
        assert!(matches!(
            map.resolve("urn:other"),
            Err(Error::ResolutionFailed { .. })
        ));
    }

    #[test]
    fn test_file_resolver_url_map_and_base_dir() {
        let dir = std::env::temp_dir().join(format!("strom-resolver-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("data.txt"), b"file data").unwrap();

        let resolver = FileResolver::new().with_base_dir(&dir);
        assert_eq!(read_all(resolver.resolve("data.txt").unwrap()), b"file data");
        assert!(!resolver.can_resolve("http://example.com/x"));

        let mut mapped = FileResolver::new();
        mapped.add_url_map("http://example.com/", dir.join("data.txt"));
        assert_eq!(
            read_all(mapped.resolve("http://example.com/anything").unwrap()),
            b"file data"
        );

        assert!(matches!(
            resolver.resolve("missing.txt"),
            Err(Error::ResolutionFailed { .. })
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_chain_resolver() {
        let mut a = MapResolver::new();
        a.insert("urn:a", "A");
        let mut b = MapResolver::new();
        b.insert("urn:b", "B");
        let chain = ChainResolver::new().push(a).push(b);
        assert_eq!(read_all(chain.resolve("urn:b").unwrap()), b"B");
        assert!(!chain.can_resolve("urn:c"));
        assert!(chain.resolve("urn:c").is_err());
    }
}
