#![forbid(unsafe_code)]

//! Streaming XML canonicalization (C14N) for strom.
//!
//! Implements all six W3C canonicalization variants over security events:
//! - Canonical XML 1.0 (with and without comments)
//! - Canonical XML 1.1 (with and without comments)
//! - Exclusive Canonical XML 1.0 (with and without comments)
//!
//! Besides the [`Canonicalizer`] itself, the crate provides the canonical
//! attribute ordering ([`render`]) and the inclusive-prefix computation
//! used when digesting fragments with exclusive C14N ([`prefixes`]).

pub mod canonicalizer;
pub mod escape;
pub mod prefixes;
pub mod render;

pub use canonicalizer::Canonicalizer;
pub use prefixes::{inclusive_prefixes, parse_prefix_list, render_prefix_list};
pub use render::{attribute_order, compare_attributes};

use strom_core::{algorithm, Error};
use strom_xml::{parse_tokens, ElementArena, EventCursor, SecEvent};

/// The canonicalization mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum C14nMode {
    /// Canonical XML 1.0
    #[default]
    Inclusive,
    /// Canonical XML 1.0 with comments
    InclusiveWithComments,
    /// Canonical XML 1.1
    Inclusive11,
    /// Canonical XML 1.1 with comments
    Inclusive11WithComments,
    /// Exclusive Canonical XML 1.0
    Exclusive,
    /// Exclusive Canonical XML 1.0 with comments
    ExclusiveWithComments,
}

impl C14nMode {
    /// Get the algorithm URI for this mode.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Inclusive => algorithm::C14N,
            Self::InclusiveWithComments => algorithm::C14N_WITH_COMMENTS,
            Self::Inclusive11 => algorithm::C14N11,
            Self::Inclusive11WithComments => algorithm::C14N11_WITH_COMMENTS,
            Self::Exclusive => algorithm::EXC_C14N,
            Self::ExclusiveWithComments => algorithm::EXC_C14N_WITH_COMMENTS,
        }
    }

    /// Parse a C14N mode from an algorithm URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            algorithm::C14N => Some(Self::Inclusive),
            algorithm::C14N_WITH_COMMENTS => Some(Self::InclusiveWithComments),
            algorithm::C14N11 => Some(Self::Inclusive11),
            algorithm::C14N11_WITH_COMMENTS => Some(Self::Inclusive11WithComments),
            algorithm::EXC_C14N => Some(Self::Exclusive),
            algorithm::EXC_C14N_WITH_COMMENTS => Some(Self::ExclusiveWithComments),
            _ => None,
        }
    }

    pub fn with_comments(&self) -> bool {
        matches!(
            self,
            Self::InclusiveWithComments
                | Self::Inclusive11WithComments
                | Self::ExclusiveWithComments
        )
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive | Self::ExclusiveWithComments)
    }

    pub fn is_c14n11(&self) -> bool {
        matches!(self, Self::Inclusive11 | Self::Inclusive11WithComments)
    }
}

/// Canonicalize a whole XML document.
///
/// - `xml`: the raw XML text
/// - `mode`: which C14N variant to use
/// - `inclusive_prefixes`: for exclusive C14N, the InclusiveNamespaces PrefixList
pub fn canonicalize(
    xml: &str,
    mode: C14nMode,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>, Error> {
    run(xml, mode, inclusive_prefixes, None)
}

/// Canonicalize the subtree rooted at the element whose `Id`, `ID` or `id`
/// attribute equals `id`, with its ancestor context applied.
pub fn canonicalize_subtree(
    xml: &str,
    id: &str,
    mode: C14nMode,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>, Error> {
    run(xml, mode, inclusive_prefixes, Some(id))
}

fn run(
    xml: &str,
    mode: C14nMode,
    inclusive_prefixes: &[String],
    select: Option<&str>,
) -> Result<Vec<u8>, Error> {
    let tokens = parse_tokens(xml)?;
    let mut arena = ElementArena::new();
    let mut cursor = EventCursor::new();
    let mut canonicalizer = Canonicalizer::new(mode, inclusive_prefixes);
    let mut out = Vec::with_capacity(xml.len());

    // Depth inside the selected subtree; `None` until it starts.
    let mut region: Option<usize> = if select.is_some() { None } else { Some(0) };
    let mut found = select.is_none();

    for token in tokens {
        let event = cursor.accept(&mut arena, token)?;
        if let (None, Some(wanted), SecEvent::StartElement(id)) = (region, select, &event) {
            let matches = arena
                .get(*id)
                .and_then(|el| el.id_attribute(&["Id", "ID", "id"]))
                == Some(wanted);
            if matches && !found {
                region = Some(0);
                found = true;
            }
        }
        let Some(depth) = region else { continue };
        canonicalizer.process_event(&event, &arena, &mut out)?;
        if select.is_some() {
            match event {
                SecEvent::StartElement(_) => region = Some(depth + 1),
                SecEvent::EndElement(_) if depth == 1 => break,
                SecEvent::EndElement(_) => region = Some(depth - 1),
                _ => {}
            }
        }
    }

    if !found {
        return Err(Error::Canonicalization(format!(
            "no element with Id `{}`",
            select.unwrap_or_default()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_uri_round_trip() {
        for mode in [
            C14nMode::Inclusive,
            C14nMode::InclusiveWithComments,
            C14nMode::Inclusive11,
            C14nMode::Inclusive11WithComments,
            C14nMode::Exclusive,
            C14nMode::ExclusiveWithComments,
        ] {
            assert_eq!(C14nMode::from_uri(mode.uri()), Some(mode));
        }
        assert_eq!(C14nMode::from_uri("urn:unknown"), None);
    }

    #[test]
    fn test_attribute_order_scenario() {
        let xml = r#"<doc xmlns:a="urn:a" a:x="1" b="2" a:w="3"/>"#;
        let out = canonicalize(xml, C14nMode::Inclusive, &[]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<doc xmlns:a="urn:a" b="2" a:w="3" a:x="1"></doc>"#
        );
    }

    #[test]
    fn test_missing_subtree() {
        let err = canonicalize_subtree("<a/>", "nope", C14nMode::Inclusive, &[]).unwrap_err();
        assert!(matches!(err, Error::Canonicalization(_)));
    }

    #[test]
    fn test_whitespace_outside_document_element_dropped() {
        let out = canonicalize("<a>\n  <b/>\n</a>\n", C14nMode::Exclusive, &[]).unwrap();
        assert_eq!(out, b"<a>\n  <b></b>\n</a>");
    }

    #[test]
    fn test_prefixes_sharing_a_uri_are_kept() {
        let out = canonicalize(r#"<r xmlns="urn:d" xmlns:p="urn:d"><x/><p:y/></r>"#, C14nMode::Inclusive, &[]).unwrap();
        assert_eq!(out, br#"<r xmlns="urn:d" xmlns:p="urn:d"><x></x><p:y></p:y></r>"#);

        let out = canonicalize(r#"<r xmlns:a="urn:a" xmlns:b="urn:a" b:k="1" a:j="2"/>"#, C14nMode::Inclusive, &[]).unwrap();
        assert_eq!(out, br#"<r xmlns:a="urn:a" xmlns:b="urn:a" a:j="2" b:k="1"></r>"#);
    }
}
