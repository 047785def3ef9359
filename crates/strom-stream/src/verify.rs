#![forbid(unsafe_code)]

//! Input-side reference verification.

use crate::context::{ReferenceResult, SecurityContext};
use crate::digester::{build_transformer_chain, digest_external, PartDigester, PrefixSource};
use crate::input::{InputChainCursor, InputProcessor};
use crate::part::SignaturePartDef;
use crate::processor::{Phase, ProcessorInfo};
use crate::resolver::ResourceResolver;
use std::sync::Arc;
use strom_core::Error;
use strom_xml::SecEvent;
use tracing::{debug, warn};

struct ActiveReference {
    reference: usize,
    digester: PartDigester,
}

/// Recomputes the digests of expected references while the document
/// streams past.
///
/// Each in-document reference is digested from its root's start element to
/// its end element with the prefix list recorded on the reference, so the
/// canonical form matches the one the signer digested. References may
/// nest; every one has its own pipeline. External references are fetched
/// in `do_final`. Results land in
/// [`SecurityContext::reference_results`].
pub struct ReferenceVerifyProcessor {
    info: ProcessorInfo,
    references: Vec<SignaturePartDef>,
    started: Vec<bool>,
    active: Vec<ActiveReference>,
    resolver: Option<Arc<dyn ResourceResolver>>,
}

impl ReferenceVerifyProcessor {
    pub const NAME: &'static str = "ReferenceVerifyProcessor";

    pub fn new(references: Vec<SignaturePartDef>) -> Self {
        let started = vec![false; references.len()];
        Self {
            info: ProcessorInfo::new(Self::NAME, Phase::Postprocessing),
            references,
            started,
            active: Vec::new(),
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ResourceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    fn start_matching(&mut self, event: &SecEvent, chain: &mut InputChainCursor<'_>) -> Result<(), Error> {
        let SecEvent::StartElement(root) = event else {
            return Ok(());
        };
        let arena = chain.arena();
        let properties = chain.context().properties();
        let Some(value) = arena
            .get(*root)
            .and_then(|el| el.id_attribute(&properties.id_attributes))
        else {
            return Ok(());
        };
        let Some(index) = self
            .references
            .iter()
            .enumerate()
            .position(|(i, r)| !r.external && !self.started[i] && r.id == value)
        else {
            return Ok(());
        };

        let reference = &mut self.references[index];
        let pipeline = build_transformer_chain(reference, properties, PrefixSource::Recorded)?;
        let digester = PartDigester::new(pipeline, arena, *root)?;
        debug!(reference = %reference.id, "verifying reference");
        self.started[index] = true;
        self.active.push(ActiveReference {
            reference: index,
            digester,
        });
        Ok(())
    }

    fn result_for(&self, index: usize, calculated: Option<String>) -> ReferenceResult {
        let reference = &self.references[index];
        ReferenceResult {
            uri: reference.reference_uri(),
            expected: reference.digest_value().unwrap_or_default().to_owned(),
            calculated,
        }
    }

    fn record(context: &mut SecurityContext, result: ReferenceResult) {
        if result.is_valid() {
            debug!(reference = %result.uri, "reference digest matches");
        } else {
            warn!(
                reference = %result.uri,
                expected = %result.expected,
                calculated = ?result.calculated,
                "reference digest mismatch"
            );
        }
        context.reference_results.push(result);
    }
}

impl InputProcessor for ReferenceVerifyProcessor {
    fn info(&self) -> &ProcessorInfo {
        &self.info
    }

    fn process_next_event(&mut self, chain: &mut InputChainCursor<'_>) -> Result<SecEvent, Error> {
        let event = chain.process_next_event()?;
        self.start_matching(&event, chain)?;

        let mut i = 0;
        while i < self.active.len() {
            if self.active[i].digester.process(&event, chain.arena())? {
                let done = self.active.remove(i);
                let calculated = done.digester.finish()?;
                let result = self.result_for(done.reference, Some(calculated));
                Self::record(chain.context_mut(), result);
            } else {
                i += 1;
            }
        }
        Ok(event)
    }

    fn do_final(&mut self, context: &mut SecurityContext) -> Result<(), Error> {
        let properties = context.properties().clone();
        for index in 0..self.references.len() {
            if self.started[index] {
                continue;
            }
            let calculated = if self.references[index].external {
                let resolver = self.resolver.as_deref().ok_or_else(|| Error::ResolutionFailed {
                    uri: self.references[index].id.clone(),
                    reason: "no resource resolver configured".into(),
                })?;
                Some(digest_external(
                    &mut self.references[index],
                    &properties,
                    resolver,
                    PrefixSource::Recorded,
                )?)
            } else {
                None
            };
            self.started[index] = true;
            let result = self.result_for(index, calculated);
            Self::record(context, result);
        }
        Ok(())
    }
}
