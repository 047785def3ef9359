//! End-to-end behaviour of the streaming pipeline.

use base64::Engine;
use proptest::prelude::*;
use std::sync::Arc;
use strom::c14n::{self, C14nMode};
use strom::core::{algorithm, Error, SecurityProperties};
use strom::crypto::{DigestMethod, SigningKey};
use strom::dsig::{self, DsigContext, VerifyResult};
use strom::stream::{
    IdAttributeProcessor, InputProcessorChain, MapResolver, OutputProcessorChain, SecurePart,
    SecurityContext, SignatureOutputProcessor,
};
use strom::xml::{parse_tokens, QName, SecEvent, StartElement, VecTokenSource, XmlToken};

fn b64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn dsig_context() -> DsigContext {
    DsigContext::new(SecurityProperties::default()).with_key(SigningKey::Hmac(b"scenario key".to_vec()))
}

#[test]
fn scenario_1_attribute_order() {
    let xml = r#"<e xmlns:a="urn:a" b="1" a:x="2" a:w="3"/>"#;
    let out = c14n::canonicalize(xml, C14nMode::Inclusive, &[]).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        r#"<e xmlns:a="urn:a" b="1" a:w="3" a:x="2"></e>"#
    );
}

#[test]
fn scenario_2_sha256_of_default_canonical_form() {
    let xml = r#"<doc xmlns="urn:d"><item Id="i1" z="last" a="first">payload</item><other/></doc>"#;
    let mut chain = OutputProcessorChain::new(SecurityContext::new(SecurityProperties::default()));
    chain.add_processor(Box::new(SignatureOutputProcessor::new(vec![SecurePart::id("i1")])));
    chain.process_tokens(parse_tokens(xml).unwrap()).unwrap();
    chain.do_final().unwrap();
    let context = chain.into_context();

    let canonical = c14n::canonicalize_subtree(xml, "i1", C14nMode::Inclusive, &[]).unwrap();
    assert_eq!(
        String::from_utf8(canonical.clone()).unwrap(),
        r#"<item xmlns="urn:d" Id="i1" a="first" z="last">payload</item>"#
    );
    let part = context.part("i1").unwrap();
    assert_eq!(part.digest_algorithm, algorithm::SHA256);
    assert_eq!(part.digest_value(), Some(b64(&DigestMethod::Sha256.digest(&canonical)).as_str()));
}

#[test]
fn scenario_3_tampering_is_invalid() {
    let xml = r#"<doc><body Id="body">transfer 100</body></doc>"#;
    let ctx = dsig_context();
    let signed = dsig::sign_document(&ctx, xml, vec![SecurePart::id("body")]).unwrap();
    assert_eq!(dsig::verify_document(&ctx, &signed.xml).unwrap(), VerifyResult::Valid);

    let tampered = signed.xml.replacen("transfer 100", "transfer 900", 1);
    let result = dsig::verify_document(&ctx, &tampered).unwrap();
    assert!(matches!(result, VerifyResult::Invalid { .. }));
}

#[test]
fn scenario_4_failed_external_keeps_finished_parts() {
    let mut resolver = MapResolver::new();
    resolver.insert("present.bin", vec![1u8, 2, 3]);
    let mut chain = OutputProcessorChain::new(SecurityContext::new(SecurityProperties::default()));
    chain.add_processor(Box::new(
        SignatureOutputProcessor::new(vec![
            SecurePart::id("a"),
            SecurePart::external("present.bin"),
            SecurePart::external("absent.bin"),
        ])
        .with_resolver(Arc::new(resolver)),
    ));
    chain
        .process_tokens(parse_tokens(r#"<r><a Id="a">x</a></r>"#).unwrap())
        .unwrap();

    let err = chain.do_final().unwrap_err();
    assert!(matches!(err, Error::ResolutionFailed { ref uri, .. } if uri == "absent.bin"));

    let context = chain.into_context();
    assert!(context.part("a").unwrap().digest_value().is_some());
    assert_eq!(
        context.part("present.bin").unwrap().digest_value(),
        Some(b64(&DigestMethod::Sha256.digest(&[1, 2, 3])).as_str())
    );
    assert_eq!(context.part("absent.bin").unwrap().digest_value(), None);
}

#[test]
fn second_part_cannot_start_while_one_is_active() {
    let mut chain = OutputProcessorChain::new(SecurityContext::new(SecurityProperties::default()));
    chain.add_processor(Box::new(SignatureOutputProcessor::new(vec![
        SecurePart::id("outer"),
        SecurePart::id("inner"),
    ])));
    let err = chain
        .process_tokens(parse_tokens(r#"<r><a Id="outer"><b Id="inner"/></a></r>"#).unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::OverlappingParts { .. }));
}

#[test]
fn enveloped_signature_over_body() {
    let xml = r#"<env><body Id="b"><p>1</p></body></env>"#;
    let ctx = dsig_context();
    let part = SecurePart::id("b")
        .with_transform(algorithm::ENVELOPED_SIGNATURE)
        .with_transform(algorithm::EXC_C14N);
    let signed = dsig::sign_document(&ctx, xml, vec![part]).unwrap();
    assert!(dsig::verify_document(&ctx, &signed.xml).unwrap().is_valid());
}

fn nested(depth: usize) -> Vec<XmlToken> {
    let mut tokens = vec![XmlToken::StartDocument];
    tokens.extend((0..depth).map(|i| XmlToken::StartElement(StartElement::new(QName::local(&format!("n{i}"))))));
    tokens.extend((0..depth).rev().map(|i| XmlToken::EndElement(QName::local(&format!("n{i}")))));
    tokens.push(XmlToken::EndDocument);
    tokens
}

fn pull_all(depth: usize, max: usize) -> (Result<(), Error>, usize) {
    let props = SecurityProperties::default().with_max_structure_depth(max);
    let mut chain = InputProcessorChain::with_reader(props, VecTokenSource::new(nested(depth)));
    chain.add_processor(Box::new(IdAttributeProcessor::new()));
    let mut starts = 0;
    loop {
        match chain.next_event() {
            Ok(SecEvent::EndDocument) => return (Ok(()), starts),
            Ok(SecEvent::StartElement(_)) => starts += 1,
            Ok(_) => {}
            Err(e) => return (Err(e), starts),
        }
    }
}

proptest! {
    #[test]
    fn depth_limit_is_exact(max in 1usize..40, extra in 0usize..5) {
        let (ok, starts) = pull_all(max, max);
        prop_assert!(ok.is_ok());
        prop_assert_eq!(starts, max);

        let (err, starts) = pull_all(max + 1 + extra, max);
        let too_deep = matches!(err, Err(Error::StructureTooDeep { max: m }) if m == max);
        prop_assert!(too_deep, "expected StructureTooDeep at {}", max);
        // Nothing past the limit was delivered.
        prop_assert_eq!(starts, max);
    }
}
