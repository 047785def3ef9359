#![forbid(unsafe_code)]

//! XML-DSig signature verification.
//!
//! Processing order:
//! 1. Read `ds:Signature` from the token stream and canonicalize `SignedInfo`
//! 2. Stream the document through an input chain that guards depth, rejects
//!    duplicate IDs and recomputes every reference digest
//! 3. Verify `SignatureValue` over the canonical `SignedInfo`

use crate::context::DsigContext;
use crate::signed_info::{read_signature, SignatureDescription};
use base64::Engine;
use std::io::Write;
use strom_core::Error;
use strom_stream::{IdAttributeProcessor, InputProcessorChain, ReferenceVerifyProcessor};
use strom_xml::{parse_tokens, SecEvent, VecTokenSource, XmlToken};
use tracing::{info, warn};

/// Result of signature verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    /// Signature is valid.
    Valid,
    /// Signature is invalid.
    Invalid {
        reason: String,
    },
}

impl VerifyResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResult::Valid)
    }

    fn invalid(reason: String) -> Self {
        warn!(%reason, "signature verification failed");
        VerifyResult::Invalid { reason }
    }
}

/// Verify the first signature of a signed XML document.
pub fn verify_document(ctx: &DsigContext, xml: &str) -> Result<VerifyResult, Error> {
    verify_tokens(ctx, parse_tokens(xml)?)
}

/// Verify the first signature found in a token stream.
pub fn verify_tokens(ctx: &DsigContext, tokens: Vec<XmlToken>) -> Result<VerifyResult, Error> {
    let signature = read_signature(&tokens)?;
    if signature.references.is_empty() {
        return Ok(VerifyResult::invalid("SignedInfo has no references".into()));
    }

    if let Some(invalid) = verify_references(ctx, &signature, tokens)? {
        return Ok(invalid);
    }
    verify_signature_value(ctx, &signature)
}

fn verify_references(
    ctx: &DsigContext,
    signature: &SignatureDescription,
    tokens: Vec<XmlToken>,
) -> Result<Option<VerifyResult>, Error> {
    let mut chain = InputProcessorChain::with_reader(ctx.properties.clone(), VecTokenSource::new(tokens));
    chain.add_processor(Box::new(IdAttributeProcessor::new()));
    let mut verifier = ReferenceVerifyProcessor::new(signature.references.clone());
    if let Some(resolver) = ctx.resolver() {
        verifier = verifier.with_resolver(resolver);
    }
    chain.add_processor(Box::new(verifier));

    while chain.next_event()? != SecEvent::EndDocument {}
    chain.do_final()?;

    let context = chain.into_context();
    for result in &context.reference_results {
        if !result.is_valid() {
            let reason = match &result.calculated {
                Some(_) => format!("Reference digest failed: {}", result.uri),
                None => format!("Reference not found: {}", result.uri),
            };
            return Ok(Some(VerifyResult::invalid(reason)));
        }
    }
    Ok(None)
}

/// Check `SignatureValue` against the canonical `SignedInfo` bytes.
pub fn verify_signature_value(ctx: &DsigContext, signature: &SignatureDescription) -> Result<VerifyResult, Error> {
    let value = base64::engine::general_purpose::STANDARD
        .decode(&signature.signature_value)
        .map_err(|e| Error::Base64(e.to_string()))?;

    let mut sink = ctx.signature_sink(&signature.signature_method)?;
    sink.write_all(&signature.signed_info)
        .map_err(|e| Error::computation("verifying SignedInfo", e))?;
    if !sink.verify(&value)? {
        return Ok(VerifyResult::invalid("SignatureValue mismatch".into()));
    }
    info!(references = signature.references.len(), "signature valid");
    Ok(VerifyResult::Valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::sign_document;
    use std::sync::Arc;
    use strom_c14n::C14nMode;
    use strom_core::{algorithm, SecurityProperties};
    use strom_crypto::SigningKey;
    use strom_stream::{MapResolver, SecurePart};

    fn ctx() -> DsigContext {
        DsigContext::new(SecurityProperties::default()).with_key(SigningKey::Hmac(b"k3y".to_vec()))
    }

    const DOC: &str = r#"<r xmlns:u="urn:u"><u:a Id="a1" b="2">text</u:a><b Id="b1"><c/></b></r>"#;

    #[test]
    fn test_round_trip_all_modes() {
        for mode in [C14nMode::Inclusive, C14nMode::Inclusive11, C14nMode::Exclusive] {
            let ctx = ctx().with_c14n_mode(mode);
            let parts = vec![
                SecurePart::id("a1").with_transform(algorithm::EXC_C14N),
                SecurePart::id("b1").with_transform(mode.uri()),
            ];
            let signed = sign_document(&ctx, DOC, parts).unwrap();
            assert_eq!(verify_document(&ctx, &signed.xml).unwrap(), VerifyResult::Valid, "{mode:?}");
        }
    }

    #[test]
    fn test_tampered_fragment() {
        let signed = sign_document(&ctx(), DOC, vec![SecurePart::id("a1")]).unwrap();
        let tampered = signed.xml.replacen(">text<", ">texT<", 1);
        let result = verify_document(&ctx(), &tampered).unwrap();
        assert!(matches!(result, VerifyResult::Invalid { ref reason } if reason.contains("#a1")));
    }

    #[test]
    fn test_wrong_key() {
        let signed = sign_document(&ctx(), DOC, vec![SecurePart::id("a1")]).unwrap();
        let other = DsigContext::new(SecurityProperties::default()).with_key(SigningKey::Hmac(b"other".to_vec()));
        let result = verify_document(&other, &signed.xml).unwrap();
        assert_eq!(
            result,
            VerifyResult::Invalid {
                reason: "SignatureValue mismatch".into()
            }
        );
    }

    #[test]
    fn test_external_reference() {
        let mut resolver = MapResolver::new();
        resolver.insert("data.txt", "external bytes");
        let ctx = ctx().with_resolver(Arc::new(resolver));
        let signed = sign_document(
            &ctx,
            DOC,
            vec![SecurePart::id("b1"), SecurePart::external("data.txt")],
        )
        .unwrap();
        assert_eq!(verify_document(&ctx, &signed.xml).unwrap(), VerifyResult::Valid);

        let mut changed = MapResolver::new();
        changed.insert("data.txt", "other bytes");
        let ctx = ctx.with_resolver(Arc::new(changed));
        assert!(!verify_document(&ctx, &signed.xml).unwrap().is_valid());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let signed = sign_document(&ctx(), DOC, vec![SecurePart::id("a1")]).unwrap();
        let wrapped = signed.xml.replacen("<b Id=\"b1\">", "<b Id=\"a1\">", 1);
        let err = verify_document(&ctx(), &wrapped).unwrap_err();
        assert!(matches!(err, Error::DuplicateId(id) if id == "a1"));
    }

    #[test]
    fn test_missing_signature() {
        let err = verify_document(&ctx(), "<r/>").unwrap_err();
        assert!(matches!(err, Error::MissingElement(_)));
    }
}
