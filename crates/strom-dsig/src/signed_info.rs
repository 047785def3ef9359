#![forbid(unsafe_code)]

//! `SignedInfo` as a token stream.
//!
//! Signing renders the part descriptors into `SignedInfo` tokens and
//! canonicalizes them; verification reads the same structure back out of
//! a document's token stream. Both canonicalize `SignedInfo` with the
//! ancestor elements it sits under, so the signer and the verifier hash
//! identical bytes whatever the c14n mode.

use std::io::Write;
use strom_c14n::{parse_prefix_list, C14nMode, Canonicalizer};
use strom_core::{ns, Error};
use strom_stream::SignaturePartDef;
use strom_xml::{Attribute, ElementArena, EventCursor, QName, StartElement, TokenWriter, XmlToken};

fn algorithm_attr(uri: &str) -> Vec<Attribute> {
    vec![Attribute::local(ns::attr::ALGORITHM, uri)]
}

fn is_exclusive(uri: &str) -> bool {
    C14nMode::from_uri(uri).is_some_and(|m| m.is_exclusive())
}

/// `<ds:Signature xmlns:ds="...">`
pub fn signature_element() -> StartElement {
    StartElement::new(QName::dsig(ns::node::SIGNATURE)).with_namespace(ns::DSIG_PREFIX, ns::DSIG)
}

/// Render `SignedInfo` for `parts`. Every part must already carry its
/// digest value.
pub fn signed_info_tokens(
    c14n_mode: C14nMode,
    signature_method: &str,
    parts: &[SignaturePartDef],
) -> Result<Vec<XmlToken>, Error> {
    let mut w = TokenWriter::new();
    w.start_element(
        StartElement::new(QName::dsig(ns::node::SIGNED_INFO)).with_namespace(ns::DSIG_PREFIX, ns::DSIG),
    );
    w.empty_element(
        QName::dsig(ns::node::CANONICALIZATION_METHOD),
        algorithm_attr(c14n_mode.uri()),
    );
    w.empty_element(QName::dsig(ns::node::SIGNATURE_METHOD), algorithm_attr(signature_method));

    for part in parts {
        let digest = part.digest_value().ok_or_else(|| {
            Error::SignatureComputation(format!("part `{}` has no digest value", part.id))
        })?;
        let mut reference = StartElement::new(QName::dsig(ns::node::REFERENCE));
        reference
            .attributes
            .push(Attribute::local(ns::attr::URI, &part.reference_uri()));
        w.start_element(reference);

        if !part.transforms.is_empty() {
            w.start_element(StartElement::new(QName::dsig(ns::node::TRANSFORMS)));
            for uri in &part.transforms {
                match part.inclusive_prefixes.as_deref() {
                    Some(list) if is_exclusive(uri) => {
                        let mut transform = StartElement::new(QName::dsig(ns::node::TRANSFORM));
                        transform.attributes = algorithm_attr(uri);
                        w.start_element(transform);
                        w.start_element(
                            StartElement::new(QName::new(
                                ns::EXC_C14N,
                                ns::node::INCLUSIVE_NAMESPACES,
                                ns::EXC_C14N_PREFIX,
                            ))
                            .with_namespace(ns::EXC_C14N_PREFIX, ns::EXC_C14N)
                            .with_attribute(Attribute::local(ns::attr::PREFIX_LIST, list)),
                        );
                        w.end_element()?;
                        w.end_element()?;
                    }
                    _ => {
                        w.empty_element(QName::dsig(ns::node::TRANSFORM), algorithm_attr(uri));
                    }
                }
            }
            w.end_element()?;
        }

        w.empty_element(
            QName::dsig(ns::node::DIGEST_METHOD),
            algorithm_attr(&part.digest_algorithm),
        );
        w.text_element(QName::dsig(ns::node::DIGEST_VALUE), digest);
        w.end_element()?;
    }
    w.end_element()?;
    w.into_tokens()
}

/// Canonicalize `SignedInfo` tokens as a child of `ancestors` (outermost
/// first) and write the canonical bytes to `out`.
pub fn canonicalize_signed_info<W: Write + ?Sized>(
    ancestors: &[StartElement],
    signed_info: &[XmlToken],
    mode: C14nMode,
    inclusive_prefixes: &[String],
    out: &mut W,
) -> Result<(), Error> {
    let mut arena = ElementArena::new();
    let mut cursor = EventCursor::new();
    for ancestor in ancestors {
        cursor.accept(&mut arena, XmlToken::StartElement(ancestor.clone()))?;
    }
    let mut canonicalizer = Canonicalizer::new(mode, inclusive_prefixes);
    for token in signed_info {
        let event = cursor.accept(&mut arena, token.clone())?;
        canonicalizer.process_event(&event, &arena, out)?;
    }
    Ok(())
}

/// A `ds:Signature` read back from a document.
#[derive(Debug, Clone)]
pub struct SignatureDescription {
    pub c14n_mode: C14nMode,
    pub c14n_prefixes: Vec<String>,
    pub signature_method: String,
    /// Expected references with their recorded prefix lists.
    pub references: Vec<SignaturePartDef>,
    /// Base64 text of `SignatureValue`, whitespace removed.
    pub signature_value: String,
    /// Canonical `SignedInfo` bytes.
    pub signed_info: Vec<u8>,
}

#[derive(Default)]
struct ReferenceBuilder {
    uri: String,
    transforms: Vec<String>,
    prefixes: Option<String>,
    digest_method: Option<String>,
    digest_value: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Text {
    Other,
    DigestValue,
    SignatureValue,
}

/// Read the first `ds:Signature` out of a token stream.
pub fn read_signature(tokens: &[XmlToken]) -> Result<SignatureDescription, Error> {
    let mut open: Vec<StartElement> = Vec::new();
    let mut in_signature = false;
    let mut done = false;
    let mut signed_info: Option<(Vec<StartElement>, Vec<XmlToken>)> = None;
    let mut collecting = false;
    let mut c14n_uri = None;
    let mut c14n_prefixes = Vec::new();
    let mut signature_method = None;
    let mut references = Vec::new();
    let mut reference: Option<ReferenceBuilder> = None;
    let mut signature_value = String::new();
    let mut text = Text::Other;

    for token in tokens {
        if done {
            break;
        }
        if collecting {
            if let Some((_, collected)) = signed_info.as_mut() {
                collected.push(token.clone());
            }
        }
        match token {
            XmlToken::StartElement(el) => {
                let is_dsig = el.name.namespace_uri == ns::DSIG;
                let local = el.name.local_name.as_str();
                let parent = open.last().map(|p| p.name.local_name.as_str());
                if !in_signature {
                    if is_dsig && local == ns::node::SIGNATURE {
                        in_signature = true;
                    }
                } else if is_dsig {
                    match local {
                        ns::node::SIGNED_INFO if signed_info.is_none() => {
                            signed_info = Some((open.clone(), vec![token.clone()]));
                            collecting = true;
                        }
                        ns::node::CANONICALIZATION_METHOD => {
                            c14n_uri = el.attribute(ns::attr::ALGORITHM).map(str::to_owned);
                        }
                        ns::node::SIGNATURE_METHOD => {
                            signature_method = el.attribute(ns::attr::ALGORITHM).map(str::to_owned);
                        }
                        ns::node::REFERENCE => {
                            reference = Some(ReferenceBuilder {
                                uri: el.attribute(ns::attr::URI).unwrap_or_default().to_owned(),
                                ..ReferenceBuilder::default()
                            });
                        }
                        ns::node::TRANSFORM => {
                            if let (Some(r), Some(uri)) = (reference.as_mut(), el.attribute(ns::attr::ALGORITHM)) {
                                r.transforms.push(uri.to_owned());
                            }
                        }
                        ns::node::DIGEST_METHOD => {
                            if let Some(r) = reference.as_mut() {
                                r.digest_method = el.attribute(ns::attr::ALGORITHM).map(str::to_owned);
                            }
                        }
                        ns::node::DIGEST_VALUE => text = Text::DigestValue,
                        ns::node::SIGNATURE_VALUE => text = Text::SignatureValue,
                        _ => {}
                    }
                } else if el.name.namespace_uri == ns::EXC_C14N && local == ns::node::INCLUSIVE_NAMESPACES {
                    let list = el.attribute(ns::attr::PREFIX_LIST).unwrap_or_default();
                    match (parent, reference.as_mut()) {
                        (Some(ns::node::TRANSFORM), Some(r)) => r.prefixes = Some(list.to_owned()),
                        (Some(ns::node::CANONICALIZATION_METHOD), _) => {
                            c14n_prefixes = parse_prefix_list(list);
                        }
                        _ => {}
                    }
                }
                open.push(el.clone());
            }
            XmlToken::EndElement(name) => {
                open.pop();
                if !in_signature || name.namespace_uri != ns::DSIG {
                    continue;
                }
                match name.local_name.as_str() {
                    ns::node::SIGNATURE => done = true,
                    ns::node::SIGNED_INFO => collecting = false,
                    ns::node::REFERENCE => {
                        if let Some(r) = reference.take() {
                            references.push(finish_reference(r)?);
                        }
                    }
                    ns::node::DIGEST_VALUE | ns::node::SIGNATURE_VALUE => text = Text::Other,
                    _ => {}
                }
            }
            XmlToken::Characters(data) | XmlToken::CData(data) => match text {
                Text::DigestValue => {
                    if let Some(r) = reference.as_mut() {
                        r.digest_value.push_str(data);
                    }
                }
                Text::SignatureValue => signature_value.push_str(data),
                Text::Other => {}
            },
            _ => {}
        }
    }

    if !in_signature {
        return Err(Error::MissingElement(ns::node::SIGNATURE.into()));
    }
    let (ancestors, signed_info_tokens) =
        signed_info.ok_or_else(|| Error::MissingElement(ns::node::SIGNED_INFO.into()))?;
    let c14n_uri = c14n_uri.ok_or_else(|| {
        Error::MissingAttribute(format!("Algorithm on {}", ns::node::CANONICALIZATION_METHOD))
    })?;
    let c14n_mode = C14nMode::from_uri(&c14n_uri)
        .ok_or_else(|| Error::UnsupportedAlgorithm(format!("C14N: {c14n_uri}")))?;
    let signature_method = signature_method.ok_or_else(|| {
        Error::MissingAttribute(format!("Algorithm on {}", ns::node::SIGNATURE_METHOD))
    })?;

    let mut canonical = Vec::new();
    canonicalize_signed_info(
        &ancestors,
        &signed_info_tokens,
        c14n_mode,
        &c14n_prefixes,
        &mut canonical,
    )?;

    Ok(SignatureDescription {
        c14n_mode,
        c14n_prefixes,
        signature_method,
        references,
        signature_value: signature_value.split_whitespace().collect(),
        signed_info: canonical,
    })
}

fn finish_reference(r: ReferenceBuilder) -> Result<SignaturePartDef, Error> {
    let digest_method = r.digest_method.ok_or_else(|| {
        Error::MissingAttribute(format!("Algorithm on {} of `{}`", ns::node::DIGEST_METHOD, r.uri))
    })?;
    let digest_value: String = r.digest_value.split_whitespace().collect();
    Ok(
        SignaturePartDef::expected(&r.uri, r.transforms, &digest_method, &digest_value)
            .with_inclusive_prefixes(r.prefixes),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use strom_core::{algorithm, SecurityProperties};
    use strom_stream::SecurePart;

    fn digested_part(id: &str, transforms: &[&str], prefixes: Option<&str>) -> SignaturePartDef {
        let mut part = transforms
            .iter()
            .fold(SecurePart::id(id), |p, t| p.with_transform(t))
            .to_part_def(id, &SecurityProperties::default());
        part.inclusive_prefixes = prefixes.map(str::to_owned);
        part.set_digest_value("ZGlnZXN0".into()).unwrap();
        part
    }

    fn canonical(tokens: &[XmlToken], mode: C14nMode) -> String {
        let mut out = Vec::new();
        canonicalize_signed_info(&[], tokens, mode, &[], &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_signed_info_rendering() {
        let parts = vec![digested_part("a", &[algorithm::EXC_C14N], Some("#default u"))];
        let tokens = signed_info_tokens(C14nMode::Exclusive, algorithm::HMAC_SHA256, &parts).unwrap();
        let out = canonical(&tokens, C14nMode::Exclusive);
        assert!(out.starts_with(r#"<ds:SignedInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">"#));
        assert!(out.contains(r##"<ds:Reference URI="#a">"##));
        assert!(out.contains(
            r##"<ec:InclusiveNamespaces xmlns:ec="http://www.w3.org/2001/10/xml-exc-c14n#" PrefixList="#default u"></ec:InclusiveNamespaces>"##
        ));
        assert!(out.contains("<ds:DigestValue>ZGlnZXN0</ds:DigestValue>"));
    }

    #[test]
    fn test_undigested_part_rejected() {
        let part = SecurePart::id("a").to_part_def("a", &SecurityProperties::default());
        let err = signed_info_tokens(C14nMode::Exclusive, algorithm::HMAC_SHA256, &[part]).unwrap_err();
        assert!(matches!(err, Error::SignatureComputation(_)));
    }

    #[test]
    fn test_read_back() {
        let parts = vec![
            digested_part("a", &[algorithm::EXC_C14N], Some("u")),
            digested_part("b", &[], None),
        ];
        let signed_info = signed_info_tokens(C14nMode::Inclusive, algorithm::HMAC_SHA256, &parts).unwrap();
        let mut tokens = vec![
            XmlToken::StartDocument,
            XmlToken::StartElement(StartElement::new(QName::local("root")).with_namespace("u", "urn:u")),
            XmlToken::StartElement(signature_element()),
        ];
        tokens.extend(signed_info.iter().cloned());
        tokens.extend([
            XmlToken::StartElement(StartElement::new(QName::dsig(ns::node::SIGNATURE_VALUE))),
            XmlToken::Characters("c2ln\n bmF0dXJl".into()),
            XmlToken::EndElement(QName::dsig(ns::node::SIGNATURE_VALUE)),
            XmlToken::EndElement(QName::dsig(ns::node::SIGNATURE)),
            XmlToken::EndElement(QName::local("root")),
            XmlToken::EndDocument,
        ]);

        let read = read_signature(&tokens).unwrap();
        assert_eq!(read.c14n_mode, C14nMode::Inclusive);
        assert_eq!(read.signature_method, algorithm::HMAC_SHA256);
        assert_eq!(read.signature_value, "c2lnbmF0dXJl");
        assert_eq!(read.references.len(), 2);
        assert_eq!(read.references[0].id, "a");
        assert_eq!(read.references[0].inclusive_prefixes.as_deref(), Some("u"));
        assert_eq!(read.references[0].digest_value(), Some("ZGlnZXN0"));
        assert_eq!(read.references[1].transforms, Vec::<String>::new());

        // Inclusive c14n of SignedInfo picks up the root's namespace.
        let mut expected = Vec::new();
        let ancestors = [
            StartElement::new(QName::local("root")).with_namespace("u", "urn:u"),
            signature_element(),
        ];
        canonicalize_signed_info(&ancestors, &signed_info, C14nMode::Inclusive, &[], &mut expected).unwrap();
        assert_eq!(read.signed_info, expected);
        assert!(String::from_utf8(expected).unwrap().contains(r#"xmlns:u="urn:u""#));
    }

    #[test]
    fn test_missing_signature() {
        let tokens = vec![
            XmlToken::StartElement(StartElement::new(QName::local("r"))),
            XmlToken::EndElement(QName::local("r")),
        ];
        assert!(matches!(read_signature(&tokens), Err(Error::MissingElement(_))));
    }
}
