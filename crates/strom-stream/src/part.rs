#![forbid(unsafe_code)]

//! Signable parts.
//!
//! A [`SecurePart`] is what the application asks to have signed. Each
//! occurrence the output chain finds becomes a [`SignaturePartDef`], the
//! part descriptor that collects the digest.

use strom_core::{Error, SecurityProperties};
use strom_xml::{QName, StartElement};

/// How a secure part is located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartSelector {
    /// Every element with this name.
    Element(QName),
    /// The element carrying this ID attribute value.
    Id(String),
    /// A resource outside the document, fetched through a resolver.
    External(String),
}

/// A part the application wants signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurePart {
    pub selector: PartSelector,
    /// Transform algorithm URIs, applied in order.
    pub transforms: Vec<String>,
    /// Digest method URI; the configured default is used when unset.
    pub digest_method: Option<String>,
    /// Drop prefixes the fragment root already makes visible from the
    /// inclusive-prefix list.
    pub exclude_visible_prefixes: bool,
}

impl SecurePart {
    fn new(selector: PartSelector) -> Self {
        let external = matches!(selector, PartSelector::External(_));
        Self {
            selector,
            transforms: Vec::new(),
            digest_method: None,
            exclude_visible_prefixes: external,
        }
    }

    pub fn element(name: QName) -> Self {
        Self::new(PartSelector::Element(name))
    }

    pub fn id(id: &str) -> Self {
        Self::new(PartSelector::Id(id.to_owned()))
    }

    pub fn external(uri: &str) -> Self {
        Self::new(PartSelector::External(uri.to_owned()))
    }

    pub fn with_transform(mut self, uri: &str) -> Self {
        self.transforms.push(uri.to_owned());
        self
    }

    pub fn with_digest_method(mut self, uri: &str) -> Self {
        self.digest_method = Some(uri.to_owned());
        self
    }

    pub fn with_exclude_visible_prefixes(mut self, exclude: bool) -> Self {
        self.exclude_visible_prefixes = exclude;
        self
    }

    pub fn is_external(&self) -> bool {
        matches!(self.selector, PartSelector::External(_))
    }

    /// Whether `element` is the root of this part.
    pub fn matches(&self, element: &StartElement, properties: &SecurityProperties) -> bool {
        match &self.selector {
            PartSelector::Element(name) => &element.name == name,
            PartSelector::Id(id) => {
                element.id_attribute(&properties.id_attributes) == Some(id.as_str())
            }
            PartSelector::External(_) => false,
        }
    }

    /// The part descriptor for one occurrence, identified by `id`.
    pub fn to_part_def(&self, id: &str, properties: &SecurityProperties) -> SignaturePartDef {
        SignaturePartDef {
            id: id.to_owned(),
            transforms: self.transforms.clone(),
            digest_algorithm: self
                .digest_method
                .clone()
                .unwrap_or_else(|| properties.default_digest_algorithm.clone()),
            digest_value: None,
            external: self.is_external(),
            exclude_visible_prefixes: self.exclude_visible_prefixes,
            inclusive_prefixes: None,
        }
    }
}

/// Part descriptor: one reference of the eventual signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePartDef {
    /// Element ID for in-document parts, resource URI for external ones.
    pub id: String,
    /// Transform algorithm URIs, possibly empty.
    pub transforms: Vec<String>,
    pub digest_algorithm: String,
    digest_value: Option<String>,
    pub external: bool,
    pub exclude_visible_prefixes: bool,
    /// Space-joined `PrefixList` recorded when the pipeline was built.
    pub inclusive_prefixes: Option<String>,
}

impl SignaturePartDef {
    /// A descriptor read back from a `SignedInfo` reference, with its
    /// expected digest. `#id` URIs are in-document; anything else is
    /// external.
    pub fn expected(
        reference_uri: &str,
        transforms: Vec<String>,
        digest_algorithm: &str,
        digest_value: &str,
    ) -> Self {
        let (id, external) = match same_document_id(reference_uri) {
            Some(id) => (id, false),
            None => (reference_uri, true),
        };
        Self {
            id: id.to_owned(),
            transforms,
            digest_algorithm: digest_algorithm.to_owned(),
            digest_value: Some(digest_value.to_owned()),
            external,
            exclude_visible_prefixes: external,
            inclusive_prefixes: None,
        }
    }

    pub fn with_inclusive_prefixes(mut self, prefixes: Option<String>) -> Self {
        self.inclusive_prefixes = prefixes;
        self
    }

    /// The `URI` attribute of the reference.
    pub fn reference_uri(&self) -> String {
        if self.external {
            self.id.clone()
        } else {
            format!("#{}", self.id)
        }
    }

    /// Base64 digest value, once finalized.
    pub fn digest_value(&self) -> Option<&str> {
        self.digest_value.as_deref()
    }

    /// Record the digest. A part is finalized exactly once.
    pub fn set_digest_value(&mut self, value: String) -> Result<(), Error> {
        if self.digest_value.is_some() {
            return Err(Error::StreamProtocol(format!(
                "digest of part `{}` is already set",
                self.id
            )));
        }
        self.digest_value = Some(value);
        Ok(())
    }

    /// Recorded prefix tokens, empty when none were recorded.
    pub fn inclusive_prefix_tokens(&self) -> Vec<String> {
        self.inclusive_prefixes
            .as_deref()
            .map(strom_c14n::parse_prefix_list)
            .unwrap_or_default()
    }
}

/// Parse a same-document reference (`#id`). Returns `None` for external
/// and whole-document references.
pub fn same_document_id(uri: &str) -> Option<&str> {
    uri.strip_prefix('#').filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strom_core::algorithm;
    use strom_xml::Attribute;

    #[test]
    fn test_selector_matching() {
        let props = SecurityProperties::default();
        let body = StartElement::new(QName::new("urn:s", "Body", "s"))
            .with_attribute(Attribute::local("Id", "b1"));
        assert!(SecurePart::element(QName::new("urn:s", "Body", "x")).matches(&body, &props));
        assert!(SecurePart::id("b1").matches(&body, &props));
        assert!(!SecurePart::id("b2").matches(&body, &props));
        assert!(!SecurePart::external("file.txt").matches(&body, &props));
    }

    #[test]
    fn test_part_def_defaults() {
        let props = SecurityProperties::default();
        let def = SecurePart::id("x").to_part_def("x", &props);
        assert_eq!(def.digest_algorithm, props.default_digest_algorithm);
        assert_eq!(def.reference_uri(), "#x");
        assert!(!def.exclude_visible_prefixes);

        let ext = SecurePart::external("doc.bin")
            .with_digest_method(algorithm::SHA512)
            .to_part_def("doc.bin", &props);
        assert_eq!(ext.reference_uri(), "doc.bin");
        assert_eq!(ext.digest_algorithm, algorithm::SHA512);
        assert!(ext.exclude_visible_prefixes);
    }

    #[test]
    fn test_digest_set_once() {
        let mut def = SecurePart::id("x").to_part_def("x", &SecurityProperties::default());
        def.set_digest_value("AAAA".into()).unwrap();
        assert!(def.set_digest_value("BBBB".into()).is_err());
        assert_eq!(def.digest_value(), Some("AAAA"));
    }

    #[test]
    fn test_expected_from_reference_uri() {
        let local = SignaturePartDef::expected("#b1", Vec::new(), algorithm::SHA256, "AAAA");
        assert_eq!(local.id, "b1");
        assert!(!local.external);
        assert_eq!(local.reference_uri(), "#b1");
        let ext = SignaturePartDef::expected("doc.bin", Vec::new(), algorithm::SHA256, "AAAA");
        assert!(ext.external);
        assert_eq!(ext.reference_uri(), "doc.bin");
    }

    #[test]
    fn test_same_document_id() {
        assert_eq!(same_document_id("#abc"), Some("abc"));
        assert_eq!(same_document_id("#"), None);
        assert_eq!(same_document_id(""), None);
        assert_eq!(same_document_id("http://x/#y"), None);
    }
}
