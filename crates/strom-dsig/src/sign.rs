#![forbid(unsafe_code)]

//! XML-DSig signature creation.
//!
//! The document streams through an output chain that digests the secure
//! parts on the fly. Once the document element's content has been pushed,
//! `SignedInfo` is built from the finished parts, canonicalized, signed and
//! emitted as the last child of the document element.

use crate::context::DsigContext;
use crate::signed_info::{canonicalize_signed_info, signature_element, signed_info_tokens};
use base64::Engine;
use std::io::Write;
use strom_c14n::C14nMode;
use strom_core::{ns, Error};
use strom_stream::{
    OutputProcessorChain, SecurePart, SecurityContext, SharedBuffer, SignatureOutputProcessor,
    SignaturePartDef, XmlEventWriter,
};
use strom_xml::{parse_tokens, QName, StartElement, XmlToken};
use tracing::{debug, info};

/// A computed signature value together with the parts it covers.
#[derive(Debug, Clone)]
pub struct SignatureOutcome {
    pub c14n_mode: C14nMode,
    pub signature_method: String,
    /// Canonical `SignedInfo` bytes that were signed.
    pub signed_info: Vec<u8>,
    /// Base64 signature value.
    pub signature_value: String,
    signed_info_tokens: Vec<XmlToken>,
    parts: Vec<SignaturePartDef>,
}

impl SignatureOutcome {
    pub fn parts(&self) -> &[SignaturePartDef] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<SignaturePartDef> {
        self.parts
    }

    /// The `ds:Signature` element as tokens.
    pub fn signature_tokens(&self) -> Vec<XmlToken> {
        let mut tokens = Vec::with_capacity(self.signed_info_tokens.len() + 6);
        tokens.push(XmlToken::StartElement(signature_element()));
        tokens.extend(self.signed_info_tokens.iter().cloned());
        let value = QName::dsig(ns::node::SIGNATURE_VALUE);
        tokens.push(XmlToken::StartElement(StartElement::new(value.clone())));
        tokens.push(XmlToken::Characters(self.signature_value.clone()));
        tokens.push(XmlToken::EndElement(value));
        tokens.push(XmlToken::EndElement(QName::dsig(ns::node::SIGNATURE)));
        tokens
    }
}

/// Sign finished parts. `SignedInfo` is canonicalized as a standalone
/// element.
pub fn compute_signature(ctx: &DsigContext, parts: Vec<SignaturePartDef>) -> Result<SignatureOutcome, Error> {
    compute_signature_in(ctx, parts, &[])
}

/// Sign finished parts, canonicalizing `SignedInfo` as a child of
/// `ancestors` (outermost first).
pub fn compute_signature_in(
    ctx: &DsigContext,
    parts: Vec<SignaturePartDef>,
    ancestors: &[StartElement],
) -> Result<SignatureOutcome, Error> {
    let tokens = signed_info_tokens(ctx.c14n_mode, &ctx.signature_method, &parts)?;
    let mut canonical = Vec::new();
    canonicalize_signed_info(ancestors, &tokens, ctx.c14n_mode, &[], &mut canonical)?;

    let mut sink = ctx.signature_sink(&ctx.signature_method)?;
    sink.write_all(&canonical)
        .map_err(|e| Error::computation("signing SignedInfo", e))?;
    let value = base64::engine::general_purpose::STANDARD.encode(sink.sign()?);
    debug!(parts = parts.len(), method = %ctx.signature_method, "computed signature value");

    Ok(SignatureOutcome {
        c14n_mode: ctx.c14n_mode,
        signature_method: ctx.signature_method.clone(),
        signed_info: canonical,
        signature_value: value,
        signed_info_tokens: tokens,
        parts,
    })
}

/// A signed document and the signature it carries.
#[derive(Debug, Clone)]
pub struct SignedDocument {
    pub xml: String,
    pub outcome: SignatureOutcome,
}

/// Sign `secure_parts` of `xml` and append a `ds:Signature` to the
/// document element.
///
/// A part that encloses the signature position (the document element
/// itself) cannot be finished before the signature is emitted and is
/// rejected with [`Error::StreamProtocol`].
pub fn sign_document(ctx: &DsigContext, xml: &str, secure_parts: Vec<SecurePart>) -> Result<SignedDocument, Error> {
    let tokens = parse_tokens(xml)?;
    let root = tokens
        .iter()
        .find_map(|t| match t {
            XmlToken::StartElement(el) => Some(el.clone()),
            _ => None,
        })
        .ok_or_else(|| Error::MissingElement("document element".into()))?;
    let root_end = tokens
        .iter()
        .rposition(|t| matches!(t, XmlToken::EndElement(_)))
        .ok_or_else(|| Error::MissingElement("document element".into()))?;

    let buffer = SharedBuffer::new();
    let mut chain = OutputProcessorChain::new(SecurityContext::new(ctx.properties.clone()));
    let mut signer = SignatureOutputProcessor::new(secure_parts);
    if let Some(resolver) = ctx.resolver() {
        signer = signer.with_resolver(resolver);
    }
    chain.add_processor(Box::new(signer));
    chain.add_processor(Box::new(XmlEventWriter::new(buffer.clone())));

    let mut tokens = tokens.into_iter();
    chain.process_tokens(tokens.by_ref().take(root_end))?;
    if let Some(active) = chain.context().active() {
        return Err(Error::StreamProtocol(format!(
            "part `{}` encloses the signature and cannot be finished",
            active.id
        )));
    }
    chain.do_final()?;

    let parts = chain.context_mut().take_parts();
    let outcome = compute_signature_in(ctx, parts, &[root, signature_element()])?;
    chain.process_tokens(outcome.signature_tokens())?;
    chain.process_tokens(tokens)?;

    let xml = String::from_utf8(buffer.take())
        .map_err(|e| Error::computation("serializing signed document", e))?;
    info!(references = outcome.parts().len(), "signed document");
    Ok(SignedDocument { xml, outcome })
}
