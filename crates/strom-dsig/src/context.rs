#![forbid(unsafe_code)]

//! DSig context: keys, algorithms and configuration for signature operations.

use std::sync::Arc;
use strom_c14n::C14nMode;
use strom_core::{algorithm, Error, SecurityProperties};
use strom_crypto::{AlgorithmRegistry, SignatureSink, SigningKey};
use strom_stream::ResourceResolver;

/// Context for XML-DSig operations.
pub struct DsigContext {
    pub properties: SecurityProperties,
    /// Canonicalization applied to `SignedInfo` when signing.
    pub c14n_mode: C14nMode,
    /// Signature method URI used when signing.
    pub signature_method: String,
    key: Option<SigningKey>,
    registry: AlgorithmRegistry,
    resolver: Option<Arc<dyn ResourceResolver>>,
}

impl DsigContext {
    pub fn new(properties: SecurityProperties) -> Self {
        Self {
            properties,
            c14n_mode: C14nMode::Exclusive,
            signature_method: algorithm::HMAC_SHA256.to_owned(),
            key: None,
            registry: AlgorithmRegistry::new(),
            resolver: None,
        }
    }

    pub fn with_key(mut self, key: SigningKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_c14n_mode(mut self, mode: C14nMode) -> Self {
        self.c14n_mode = mode;
        self
    }

    pub fn with_signature_method(mut self, uri: &str) -> Self {
        self.signature_method = uri.to_owned();
        self
    }

    pub fn with_registry(mut self, registry: AlgorithmRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Resolver for external references.
    pub fn with_resolver(mut self, resolver: Arc<dyn ResourceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Add an ID attribute name to register during processing.
    pub fn add_id_attr(&mut self, name: &str) {
        self.properties.add_id_attribute(name);
    }

    pub fn resolver(&self) -> Option<Arc<dyn ResourceResolver>> {
        self.resolver.clone()
    }

    pub fn registry(&self) -> &AlgorithmRegistry {
        &self.registry
    }

    /// A signature sink for `uri` keyed with the context's key.
    pub fn signature_sink(&self, uri: &str) -> Result<SignatureSink, Error> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::Key("no signing key configured".into()))?;
        self.registry.signature_sink(uri, key)
    }
}

impl std::fmt::Debug for DsigContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DsigContext")
            .field("properties", &self.properties)
            .field("c14n_mode", &self.c14n_mode)
            .field("signature_method", &self.signature_method)
            .field("key", &self.key)
            .field("registry", &self.registry)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}
