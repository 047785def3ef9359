#![forbid(unsafe_code)]

//! XML tokens and security events.
//!
//! An [`XmlToken`] is what a token producer hands to the input chain (or
//! what an application pushes into the output chain). Once a chain accepts
//! a token, start elements move into the [`ElementArena`](crate::ElementArena)
//! and travel as [`SecEvent`]s carrying an [`ElementId`] handle.

use crate::arena::ElementId;
use std::hash::{Hash, Hasher};
use strom_core::ns;

/// A namespace-qualified name.
///
/// Equality and hashing consider the namespace URI and local name only;
/// the prefix is presentation.
#[derive(Debug, Clone, Default, Eq)]
pub struct QName {
    pub namespace_uri: String,
    pub local_name: String,
    pub prefix: String,
}

impl QName {
    pub fn new(namespace_uri: &str, local_name: &str, prefix: &str) -> Self {
        Self {
            namespace_uri: namespace_uri.to_owned(),
            local_name: local_name.to_owned(),
            prefix: prefix.to_owned(),
        }
    }

    /// A name in no namespace.
    pub fn local(local_name: &str) -> Self {
        Self::new("", local_name, "")
    }

    /// A name in the XML-DSig namespace with the `ds` prefix.
    pub fn dsig(local_name: &str) -> Self {
        Self::new(ns::DSIG, local_name, ns::DSIG_PREFIX)
    }

    pub fn has_namespace(&self) -> bool {
        !self.namespace_uri.is_empty()
    }

    /// `prefix:local`, or just `local` when unprefixed.
    pub fn qualified(&self) -> String {
        if self.prefix.is_empty() {
            self.local_name.clone()
        } else {
            format!("{}:{}", self.prefix, self.local_name)
        }
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.namespace_uri == other.namespace_uri && self.local_name == other.local_name
    }
}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace_uri.hash(state);
        self.local_name.hash(state);
    }
}

/// An attribute on a start element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: QName, value: &str) -> Self {
        Self {
            name,
            value: value.to_owned(),
        }
    }

    /// An un-namespaced attribute.
    pub fn local(local_name: &str, value: &str) -> Self {
        Self::new(QName::local(local_name), value)
    }

    pub fn is_xml_attribute(&self) -> bool {
        self.name.namespace_uri == ns::XML
    }
}

/// A namespace declaration made on a start element.
///
/// `prefix` is empty for the default namespace; `uri` is empty for an
/// undeclaration (`xmlns=""`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    pub prefix: String,
    pub uri: String,
}

impl Namespace {
    pub fn new(prefix: &str, uri: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
            uri: uri.to_owned(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.prefix.is_empty()
    }
}

/// Payload of a start-element token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartElement {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    /// Declarations made on this element only (not inherited ones).
    pub namespaces: Vec<Namespace>,
}

impl StartElement {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_namespace(mut self, prefix: &str, uri: &str) -> Self {
        self.namespaces.push(Namespace::new(prefix, uri));
        self
    }

    /// Value of the first attribute with the given local name in no namespace.
    pub fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| !a.name.has_namespace() && a.name.local_name == local_name)
            .map(|a| a.value.as_str())
    }

    /// Value of the first attribute whose local name is any of `names`,
    /// regardless of namespace (covers `wsu:Id` and friends).
    pub fn id_attribute<S: AsRef<str>>(&self, names: &[S]) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| names.iter().any(|n| n.as_ref() == a.name.local_name))
            .map(|a| a.value.as_str())
    }
}

/// A token as produced by a token source, before a chain has placed it in
/// an arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlToken {
    StartDocument,
    StartElement(StartElement),
    EndElement(QName),
    Characters(String),
    CData(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
    EndDocument,
}

/// A security event: a token whose start element lives in an arena.
///
/// `EndElement` carries the handle of the matching start element; the
/// handle stays valid until the chain moves on to the next event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecEvent {
    StartDocument,
    StartElement(ElementId),
    EndElement(ElementId),
    Characters(String),
    CData(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
    EndDocument,
}

impl SecEvent {
    pub fn is_start_element(&self) -> bool {
        matches!(self, SecEvent::StartElement(_))
    }

    pub fn is_end_element(&self) -> bool {
        matches!(self, SecEvent::EndElement(_))
    }

    /// Short name of the event kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SecEvent::StartDocument => "start-document",
            SecEvent::StartElement(_) => "start-element",
            SecEvent::EndElement(_) => "end-element",
            SecEvent::Characters(_) => "characters",
            SecEvent::CData(_) => "cdata",
            SecEvent::Comment(_) => "comment",
            SecEvent::ProcessingInstruction { .. } => "processing-instruction",
            SecEvent::EndDocument => "end-document",
        }
    }
}
