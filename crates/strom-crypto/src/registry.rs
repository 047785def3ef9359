#![forbid(unsafe_code)]

//! Algorithm registry mapping URIs to algorithm variants.
//!
//! The processing core only ever sees resolved [`DigestMethod`]s and
//! signature sinks. The registry is where an application maps the
//! identifiers found in configuration or in a `SignedInfo` to them,
//! including aliases and externally provided signature primitives.

use crate::digest::{DigestAlgorithm, DigestMethod};
use crate::sign::{SignatureAlgorithm, SignatureMethod, SignatureSink, SigningKey};
use std::collections::HashMap;
use std::sync::Arc;
use strom_core::Error;

type SignatureFactory = Arc<dyn Fn() -> Box<dyn SignatureAlgorithm> + Send + Sync>;

/// Central registry for digest and signature algorithms.
#[derive(Clone, Default)]
pub struct AlgorithmRegistry {
    digest_aliases: HashMap<String, DigestMethod>,
    signatures: HashMap<String, SignatureFactory>,
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an additional identifier to a built-in digest method.
    pub fn register_digest_alias(&mut self, uri: &str, method: DigestMethod) -> &mut Self {
        self.digest_aliases.insert(uri.to_owned(), method);
        self
    }

    /// Register an external signature primitive under `uri`.
    pub fn register_signature<F>(&mut self, uri: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn SignatureAlgorithm> + Send + Sync + 'static,
    {
        self.signatures.insert(uri.to_owned(), Arc::new(factory));
        self
    }

    /// Resolve a digest method by URI.
    pub fn digest_method(&self, uri: &str) -> Result<DigestMethod, Error> {
        match self.digest_aliases.get(uri) {
            Some(method) => Ok(*method),
            None => DigestMethod::from_uri(uri),
        }
    }

    /// Look up a digest algorithm by URI.
    pub fn digest(&self, uri: &str) -> Result<Box<dyn DigestAlgorithm>, Error> {
        self.digest_method(uri).map(|m| m.hasher())
    }

    /// Look up a signature algorithm by URI. Registered primitives take
    /// precedence over the built-in HMAC methods.
    pub fn signature(&self, uri: &str) -> Result<Box<dyn SignatureAlgorithm>, Error> {
        match self.signatures.get(uri) {
            Some(factory) => Ok(factory()),
            None => crate::sign::from_uri(uri),
        }
    }

    /// A signature sink for `uri` keyed with `key`.
    pub fn signature_sink(&self, uri: &str, key: &SigningKey) -> Result<SignatureSink, Error> {
        match self.signatures.get(uri) {
            Some(factory) => Ok(SignatureSink::external(factory(), key.clone())),
            None => SignatureMethod::from_uri(uri)?.sink(key),
        }
    }

    /// Whether `uri` names a known signature algorithm.
    pub fn supports_signature(&self, uri: &str) -> bool {
        self.signatures.contains_key(uri) || SignatureMethod::from_uri(uri).is_ok()
    }
}

impl std::fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmRegistry")
            .field("digest_aliases", &self.digest_aliases)
            .field("signatures", &self.signatures.keys().collect::<Vec<_>>())
            .finish()
    }
}
