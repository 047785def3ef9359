#![forbid(unsafe_code)]

//! Output-side signing processors.
//!
//! [`SignatureOutputProcessor`] watches the outgoing events for the roots of
//! the declared secure parts. At each root it builds the part's transform
//! pipeline and inserts a [`PartDigestProcessor`] ahead of itself; that
//! processor duplicates every event of the fragment into the pipeline and
//! removes itself once the fragment closes. External parts are digested in
//! `do_final`.

use crate::digester::{build_transformer_chain, digest_external, PartDigester, PrefixSource};
use crate::output::{OutputChainCursor, OutputProcessor};
use crate::part::{PartSelector, SecurePart};
use crate::processor::{Phase, ProcessorInfo};
use crate::resolver::ResourceResolver;
use std::sync::Arc;
use strom_core::{ns, Error};
use strom_xml::{Attribute, ElementId, QName, SecEvent};
use tracing::{debug, warn};

/// Finds secure-part roots in the output stream and starts their digests.
pub struct SignatureOutputProcessor {
    info: ProcessorInfo,
    secure_parts: Vec<SecurePart>,
    resolver: Option<Arc<dyn ResourceResolver>>,
    matched: Vec<bool>,
}

impl SignatureOutputProcessor {
    pub const NAME: &'static str = "SignatureOutputProcessor";

    pub fn new(secure_parts: Vec<SecurePart>) -> Self {
        let matched = vec![false; secure_parts.len()];
        Self {
            info: ProcessorInfo::new(Self::NAME, Phase::Processing),
            secure_parts,
            resolver: None,
            matched,
        }
    }

    /// Resolver for external parts.
    pub fn with_resolver(mut self, resolver: Arc<dyn ResourceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    fn matching_part(&self, root: ElementId, chain: &OutputChainCursor<'_>) -> Option<usize> {
        let element = chain.arena().get(root)?;
        let props = chain.context().properties();
        self.secure_parts
            .iter()
            .position(|part| part.matches(element, props))
    }

    /// The root's Id, adding a generated one when it has none.
    fn part_id(root: ElementId, chain: &mut OutputChainCursor<'_>) -> Result<String, Error> {
        let generate = chain.context().properties().signature_generate_ids;
        let (context, arena) = chain.split();
        let element = arena
            .get_mut(root)
            .ok_or_else(|| Error::StreamProtocol("part root handle is stale".into()))?;
        if let Some(id) = element.id_attribute(&context.properties().id_attributes) {
            return Ok(id.to_owned());
        }
        if !generate {
            return Err(Error::MissingAttribute(format!(
                "Id on `{}` (generation disabled)",
                element.name.qualified()
            )));
        }
        let id = format!("G-{}", uuid::Uuid::new_v4());
        element
            .attributes
            .push(Attribute::new(QName::local(ns::attr::ID), &id));
        debug!(element = %element.name.qualified(), %id, "generated Id attribute");
        Ok(id)
    }

    fn start_part(
        &mut self,
        index: usize,
        root: ElementId,
        event: &SecEvent,
        chain: &mut OutputChainCursor<'_>,
    ) -> Result<(), Error> {
        if let Some(active) = chain.context().active() {
            let element = chain
                .arena()
                .get(root)
                .ok_or_else(|| Error::StreamProtocol("part root handle is stale".into()))?;
            let requested = element
                .id_attribute(&chain.context().properties().id_attributes)
                .map_or_else(|| element.name.qualified(), str::to_owned);
            return Err(Error::OverlappingParts {
                active: active.id.clone(),
                requested,
            });
        }
        let id = Self::part_id(root, chain)?;

        let mut part = self.secure_parts[index].to_part_def(&id, chain.context().properties());
        let (context, arena) = chain.split();
        let arena = &*arena;
        let pipeline = build_transformer_chain(
            &mut part,
            context.properties(),
            PrefixSource::Compute { arena, root },
        )?;
        let mut digester = PartDigester::new(pipeline, arena, root)?;
        // The inserted processor only sees events after this one.
        digester.process(event, arena)?;

        let slot = context.add_part(part);
        context.active_part = Some(slot);
        self.matched[index] = true;
        let processor = chain.insert_before_current(Box::new(PartDigestProcessor::new(slot, digester)));
        debug!(part = %id, %processor, "started part digest");
        Ok(())
    }
}

impl OutputProcessor for SignatureOutputProcessor {
    fn info(&self) -> &ProcessorInfo {
        &self.info
    }

    fn process_event(&mut self, event: &SecEvent, chain: &mut OutputChainCursor<'_>) -> Result<(), Error> {
        if let SecEvent::StartElement(root) = event {
            if let Some(index) = self.matching_part(*root, chain) {
                self.start_part(index, *root, event, chain)?;
            }
        }
        chain.forward(event)
    }

    fn do_final(&mut self, chain: &mut OutputChainCursor<'_>) -> Result<(), Error> {
        for (part, matched) in self.secure_parts.iter().zip(&self.matched) {
            if !part.is_external() && !matched {
                warn!(selector = ?part.selector, "secure part not found in document");
            }
        }

        for part in &self.secure_parts {
            let PartSelector::External(uri) = &part.selector else {
                continue;
            };
            let context = chain.context_mut();
            let def = part.to_part_def(uri, context.properties());
            // Registered before digesting: a failure leaves it without a
            // digest next to the parts that already have one.
            let slot = context.add_part(def);
            let resolver = self.resolver.as_deref().ok_or_else(|| Error::ResolutionFailed {
                uri: uri.clone(),
                reason: "no resource resolver configured".into(),
            })?;
            let properties = context.properties().clone();
            let def = &mut context.parts[slot];
            let value = digest_external(def, &properties, resolver, PrefixSource::NoContext)?;
            def.set_digest_value(value)?;
        }
        Ok(())
    }
}

/// Duplicates the events of one fragment into its digest pipeline.
pub struct PartDigestProcessor {
    info: ProcessorInfo,
    part: usize,
    digester: Option<PartDigester>,
}

impl PartDigestProcessor {
    pub const NAME: &'static str = "PartDigestProcessor";

    fn new(part: usize, digester: PartDigester) -> Self {
        Self {
            info: ProcessorInfo::new(Self::NAME, Phase::Processing),
            part,
            digester: Some(digester),
        }
    }
}

impl OutputProcessor for PartDigestProcessor {
    fn info(&self) -> &ProcessorInfo {
        &self.info
    }

    fn process_event(&mut self, event: &SecEvent, chain: &mut OutputChainCursor<'_>) -> Result<(), Error> {
        let Some(digester) = self.digester.as_mut() else {
            return chain.forward(event);
        };
        if digester.process(event, chain.arena())? {
            if let Some(digester) = self.digester.take() {
                let value = digester.finish()?;
                let context = chain.context_mut();
                let part = context.parts.get_mut(self.part).ok_or_else(|| {
                    Error::StreamProtocol("digested part vanished from the context".into())
                })?;
                debug!(part = %part.id, digest = %value, "calculated digest");
                part.set_digest_value(value)?;
                context.active_part = None;
            }
            chain.remove_self();
        }
        chain.forward(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SecurityContext;
    use crate::output::OutputProcessorChain;
    use crate::resolver::MapResolver;
    use base64::Engine;
    use strom_c14n::{canonicalize_subtree, C14nMode};
    use strom_core::{algorithm, SecurityProperties};
    use strom_crypto::DigestMethod;
    use strom_xml::parse_tokens;

    fn sign(xml: &str, parts: Vec<SecurePart>, props: SecurityProperties) -> Result<SecurityContext, Error> {
        let mut chain = OutputProcessorChain::new(SecurityContext::new(props));
        chain.add_processor(Box::new(SignatureOutputProcessor::new(parts)));
        chain.process_tokens(parse_tokens(xml)?)?;
        chain.do_final()?;
        Ok(chain.into_context())
    }

    fn b64_sha256(data: &[u8]) -> String {
        let digest = DigestMethod::Sha256.digest(data);
        base64::engine::general_purpose::STANDARD.encode(digest)
    }

    #[test]
    fn test_digest_equals_canonical_subtree() {
        let xml = r#"<r xmlns:a="urn:a"><a:b Id="b1" z="1" a="2"><c/></a:b><d/></r>"#;
        let ctx = sign(xml, vec![SecurePart::id("b1")], SecurityProperties::default()).unwrap();
        assert_eq!(ctx.parts.len(), 1);
        assert!(ctx.active_part.is_none());
        let expected = canonicalize_subtree(xml, "b1", C14nMode::Inclusive, &[]).unwrap();
        assert_eq!(ctx.parts[0].digest_value(), Some(b64_sha256(&expected).as_str()));
    }

    #[test]
    fn test_digester_removed_after_fragment() {
        let mut chain = OutputProcessorChain::new(SecurityContext::new(SecurityProperties::default()));
        chain.add_processor(Box::new(SignatureOutputProcessor::new(vec![SecurePart::id("x")])));
        let tokens = parse_tokens(r#"<r><p Id="x"><q/></p><s/></r>"#).unwrap();
        let mut seen_digester = false;
        for token in tokens {
            chain.process_token(token).unwrap();
            seen_digester |= chain.processor_names().contains(&PartDigestProcessor::NAME);
        }
        assert!(seen_digester);
        assert_eq!(chain.processor_names(), vec![SignatureOutputProcessor::NAME]);
    }

    #[test]
    fn test_overlapping_parts_rejected() {
        let xml = r#"<r><p Id="outer"><p Id="inner"/></p></r>"#;
        let parts = vec![SecurePart::element(QName::local("p"))];
        let err = sign(xml, parts, SecurityProperties::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::OverlappingParts { ref active, ref requested } if active == "outer" && requested == "inner"
        ));
    }

    #[test]
    fn test_rejected_nested_part_gets_no_id() {
        let xml = r#"<r><p Id="outer"><p/></p></r>"#;
        let parts = vec![SecurePart::element(QName::local("p"))];
        let err = sign(xml, parts, SecurityProperties::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::OverlappingParts { ref requested, .. } if requested == "p"
        ));
    }

    #[test]
    fn test_sibling_parts_each_digested() {
        let xml = r#"<r><p Id="one">1</p><p Id="two">2</p></r>"#;
        let parts = vec![SecurePart::element(QName::local("p"))];
        let ctx = sign(xml, parts, SecurityProperties::default()).unwrap();
        let ids: Vec<_> = ctx.parts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["one", "two"]);
        assert!(ctx.parts.iter().all(|p| p.digest_value().is_some()));
        assert_ne!(ctx.parts[0].digest_value(), ctx.parts[1].digest_value());
    }

    #[test]
    fn test_generated_id() {
        let parts = vec![SecurePart::element(QName::local("p"))];
        let ctx = sign("<r><p>x</p></r>", parts.clone(), SecurityProperties::default()).unwrap();
        assert!(ctx.parts[0].id.starts_with("G-"));

        let props = SecurityProperties::default().with_generated_ids(false);
        let err = sign("<r><p>x</p></r>", parts, props).unwrap_err();
        assert!(matches!(err, Error::MissingAttribute(_)));
    }

    #[test]
    fn test_exclusive_prefixes_recorded() {
        let xml = r#"<r xmlns:u="urn:u" xmlns:v="urn:v"><v:p Id="x"/></r>"#;
        let parts = vec![SecurePart::id("x").with_transform(algorithm::EXC_C14N)];
        let ctx = sign(xml, parts, SecurityProperties::default()).unwrap();
        assert_eq!(ctx.parts[0].inclusive_prefixes.as_deref(), Some("u v"));
    }

    #[test]
    fn test_external_failure_keeps_earlier_digests() {
        let mut resolver = MapResolver::new();
        resolver.insert("good.txt", "payload");
        let mut chain = OutputProcessorChain::new(SecurityContext::new(SecurityProperties::default()));
        chain.add_processor(Box::new(
            SignatureOutputProcessor::new(vec![
                SecurePart::id("x"),
                SecurePart::external("good.txt"),
                SecurePart::external("missing.txt"),
            ])
            .with_resolver(Arc::new(resolver)),
        ));
        chain
            .process_tokens(parse_tokens(r#"<r Id="x"/>"#).unwrap())
            .unwrap();
        let err = chain.do_final().unwrap_err();
        assert!(matches!(err, Error::ResolutionFailed { .. }));

        let ctx = chain.into_context();
        assert_eq!(ctx.parts.len(), 3);
        assert!(ctx.parts[0].digest_value().is_some());
        assert_eq!(ctx.parts[1].digest_value(), Some(b64_sha256(b"payload").as_str()));
        assert_eq!(ctx.parts[2].digest_value(), None);
    }

    #[test]
    fn test_unknown_digest_algorithm() {
        let parts = vec![SecurePart::id("x").with_digest_method("urn:nope")];
        let err = sign(r#"<r Id="x"/>"#, parts, SecurityProperties::default()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedAlgorithm(_)));
    }

    struct ResetReader;

    impl std::io::Read for ResetReader {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
        }
    }

    struct ResetResolver;

    impl ResourceResolver for ResetResolver {
        fn can_resolve(&self, _: &str) -> bool {
            true
        }

        fn resolve(&self, _: &str) -> Result<Box<dyn std::io::Read + Send>, Error> {
            Ok(Box::new(ResetReader))
        }
    }

    #[test]
    fn test_external_read_failure_is_computation_error() {
        let mut chain = OutputProcessorChain::new(SecurityContext::new(SecurityProperties::default()));
        chain.add_processor(Box::new(
            SignatureOutputProcessor::new(vec![SecurePart::id("x"), SecurePart::external("flaky.bin")])
                .with_resolver(Arc::new(ResetResolver)),
        ));
        chain
            .process_tokens(parse_tokens(r#"<r Id="x"/>"#).unwrap())
            .unwrap();
        let err = chain.do_final().unwrap_err();
        assert!(matches!(err, Error::SignatureComputation(_)));

        let ctx = chain.into_context();
        assert!(ctx.parts[0].digest_value().is_some());
        assert_eq!(ctx.parts[1].id, "flaky.bin");
        assert_eq!(ctx.parts[1].digest_value(), None);
    }
}
