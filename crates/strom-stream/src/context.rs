#![forbid(unsafe_code)]

//! Per-document security context shared by the processors of one chain.

use crate::part::SignaturePartDef;
use std::collections::HashSet;
use strom_core::{Error, SecurityProperties};

/// Outcome of digesting one expected reference during verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceResult {
    pub uri: String,
    pub expected: String,
    /// `None` when the referenced fragment never showed up.
    pub calculated: Option<String>,
}

impl ReferenceResult {
    pub fn is_valid(&self) -> bool {
        self.calculated.as_deref() == Some(self.expected.as_str())
    }
}

/// State shared by the processors of a chain for one document.
#[derive(Debug, Default)]
pub struct SecurityContext {
    properties: SecurityProperties,
    /// Part descriptors, in the order their processing started.
    pub parts: Vec<SignaturePartDef>,
    /// Index into `parts` of the part whose digest processor is active.
    pub active_part: Option<usize>,
    ids: HashSet<String>,
    /// Verification outcomes, in document order of the references' ends.
    pub reference_results: Vec<ReferenceResult>,
}

impl SecurityContext {
    pub fn new(properties: SecurityProperties) -> Self {
        Self {
            properties,
            ..Self::default()
        }
    }

    pub fn properties(&self) -> &SecurityProperties {
        &self.properties
    }

    /// Record an element ID value. Two elements sharing an ID make
    /// references ambiguous, so the second one is rejected.
    pub fn register_id(&mut self, id: &str) -> Result<(), Error> {
        if !self.ids.insert(id.to_owned()) {
            return Err(Error::DuplicateId(id.to_owned()));
        }
        Ok(())
    }

    pub fn has_id(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Append a part descriptor and return its index.
    pub fn add_part(&mut self, part: SignaturePartDef) -> usize {
        self.parts.push(part);
        self.parts.len() - 1
    }

    pub fn part(&self, id: &str) -> Option<&SignaturePartDef> {
        self.parts.iter().find(|p| p.id == id)
    }

    /// Descriptor of the active part, if any.
    pub fn active(&self) -> Option<&SignaturePartDef> {
        self.active_part.and_then(|i| self.parts.get(i))
    }

    /// Hand the part descriptors over, e.g. to the signature-value step.
    pub fn take_parts(&mut self) -> Vec<SignaturePartDef> {
        self.active_part = None;
        std::mem::take(&mut self.parts)
    }
}
