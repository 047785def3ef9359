#![forbid(unsafe_code)]

//! Security properties consumed by the processor chains.

use crate::{algorithm, Error, Result};
use serde::{Deserialize, Serialize};

/// Default nesting limit for incoming documents.
pub const DEFAULT_MAX_STRUCTURE_DEPTH: usize = 100;

/// Tunables shared by the input and output processor chains.
///
/// The algorithm registry and its configuration file live outside this
/// crate; callers hand a resolved set of properties to the chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityProperties {
    /// Maximum element nesting accepted by the input chain. Must be at least 1.
    pub max_structure_depth: usize,
    /// Digest algorithm URI used when a part does not declare one.
    pub default_digest_algorithm: String,
    /// Record an InclusiveNamespaces PrefixList for exclusive c14n transforms.
    pub add_exc_c14n_inclusive_prefixes: bool,
    /// Add a generated `Id` attribute to part roots that lack one.
    pub signature_generate_ids: bool,
    /// Attribute local names treated as element identifiers.
    pub id_attributes: Vec<String>,
}

impl Default for SecurityProperties {
    fn default() -> Self {
        Self {
            max_structure_depth: DEFAULT_MAX_STRUCTURE_DEPTH,
            default_digest_algorithm: algorithm::SHA256.to_owned(),
            add_exc_c14n_inclusive_prefixes: true,
            signature_generate_ids: true,
            id_attributes: vec!["Id".into(), "ID".into(), "id".into()],
        }
    }
}

impl SecurityProperties {
    /// Load properties from a JSON document. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let props: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        props.validate()?;
        Ok(props)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_structure_depth == 0 {
            return Err(Error::Config(
                "max_structure_depth must be at least 1".into(),
            ));
        }
        if self.default_digest_algorithm.is_empty() {
            return Err(Error::Config("default_digest_algorithm is empty".into()));
        }
        Ok(())
    }

    pub fn with_max_structure_depth(mut self, depth: usize) -> Self {
        self.max_structure_depth = depth;
        self
    }

    pub fn with_default_digest_algorithm(mut self, uri: &str) -> Self {
        self.default_digest_algorithm = uri.to_owned();
        self
    }

    pub fn with_inclusive_prefixes(mut self, enabled: bool) -> Self {
        self.add_exc_c14n_inclusive_prefixes = enabled;
        self
    }

    pub fn with_generated_ids(mut self, enabled: bool) -> Self {
        self.signature_generate_ids = enabled;
        self
    }

    /// Register an additional ID attribute name (e.g. `"AssertionID"`).
    pub fn add_id_attribute(&mut self, name: &str) {
        if !self.id_attributes.iter().any(|n| n == name) {
            self.id_attributes.push(name.to_owned());
        }
    }

    pub fn is_id_attribute(&self, local_name: &str) -> bool {
        self.id_attributes.iter().any(|n| n == local_name)
    }
}
