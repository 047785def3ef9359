#![forbid(unsafe_code)]

//! Per-part digesting.
//!
//! [`build_transformer_chain`] turns a part descriptor into a transform
//! pipeline ending in a buffered digest sink. [`PartDigester`] feeds one
//! fragment's events into that pipeline and notices the fragment's end;
//! it is used by both the signing and the verifying chains.

use crate::part::SignaturePartDef;
use crate::resolver::ResourceResolver;
use base64::Engine;
use strom_c14n::{inclusive_prefixes, render_prefix_list};
use strom_core::{Error, SecurityProperties};
use strom_crypto::{BufferedSink, DigestMethod};
use strom_transforms::{resolve_transforms, TransformPipeline};
use strom_xml::{ElementArena, ElementId, QName, SecEvent};
use tracing::debug;

/// Where the inclusive-prefix list of an exclusive c14n step comes from.
pub enum PrefixSource<'a> {
    /// Compute it from the fragment root's ancestor context and record it
    /// on the part.
    Compute {
        arena: &'a ElementArena,
        root: ElementId,
    },
    /// Compute nothing; an external resource has no ancestor context.
    NoContext,
    /// Use the list recorded on the part.
    Recorded,
}

/// Build the transform pipeline for `part`, terminating in a fresh
/// buffered digest sink for the part's digest algorithm.
///
/// Unknown transform or digest URIs fail with
/// [`Error::UnsupportedAlgorithm`] before anything is recorded on the part.
pub fn build_transformer_chain(
    part: &mut SignaturePartDef,
    properties: &SecurityProperties,
    prefixes: PrefixSource<'_>,
) -> Result<TransformPipeline, Error> {
    let algorithms = resolve_transforms(&part.transforms)?;
    let method = DigestMethod::from_uri(&part.digest_algorithm)?;

    let wants_prefixes = algorithms.iter().any(|a| a.is_exclusive_c14n());
    if wants_prefixes && properties.add_exc_c14n_inclusive_prefixes {
        match prefixes {
            PrefixSource::Compute { arena, root } => {
                let set = inclusive_prefixes(arena, root, part.exclude_visible_prefixes);
                part.inclusive_prefixes = Some(render_prefix_list(&set));
            }
            PrefixSource::NoContext => part.inclusive_prefixes = Some(String::new()),
            PrefixSource::Recorded => {}
        }
    }

    let sink = Box::new(BufferedSink::new(Box::new(method.sink())));
    Ok(TransformPipeline::build(
        &algorithms,
        &part.inclusive_prefix_tokens(),
        sink,
    ))
}

/// Digests one in-document fragment, event by event.
pub struct PartDigester {
    pipeline: TransformPipeline,
    root_name: QName,
    depth: usize,
}

impl PartDigester {
    /// Start digesting the fragment rooted at `root`. The root's start
    /// event still has to be passed to [`process`](Self::process).
    pub fn new(pipeline: TransformPipeline, arena: &ElementArena, root: ElementId) -> Result<Self, Error> {
        let root_name = arena
            .get(root)
            .map(|el| el.name.clone())
            .ok_or_else(|| Error::StreamProtocol("part root handle is stale".into()))?;
        Ok(Self {
            pipeline,
            root_name,
            depth: 0,
        })
    }

    /// Feed one event. Returns `true` once the fragment's end element has
    /// been consumed.
    pub fn process(&mut self, event: &SecEvent, arena: &ElementArena) -> Result<bool, Error> {
        self.pipeline.feed_event(event, arena)?;
        match event {
            SecEvent::StartElement(_) => self.depth += 1,
            SecEvent::EndElement(id) => {
                self.depth = self.depth.saturating_sub(1);
                if self.depth == 0 {
                    let name_matches = arena.get(*id).is_some_and(|el| el.name == self.root_name);
                    return Ok(name_matches);
                }
            }
            _ => {}
        }
        Ok(false)
    }

    /// Close the pipeline and return the base64 digest.
    pub fn finish(self) -> Result<String, Error> {
        let digest = self.pipeline.finish()?;
        Ok(base64::engine::general_purpose::STANDARD.encode(digest))
    }
}

/// Digest an external reference: fetch it through `resolver`, run it
/// through the part's pipeline (a plain copy when there are no
/// transforms) and return the base64 digest.
pub fn digest_external(
    part: &mut SignaturePartDef,
    properties: &SecurityProperties,
    resolver: &dyn ResourceResolver,
    prefixes: PrefixSource<'_>,
) -> Result<String, Error> {
    let mut pipeline = build_transformer_chain(part, properties, prefixes)?;
    let mut input = resolver.resolve(&part.id)?;
    pipeline
        .feed_bytes(&mut input)
        .map_err(|e| match e {
            Error::Io(io) => Error::computation(&format!("reading `{}`", part.id), io),
            other => other,
        })?;
    let digest = pipeline.finish()?;
    let value = base64::engine::general_purpose::STANDARD.encode(digest);
    debug!(uri = %part.id, digest = %value, "calculated digest");
    Ok(value)
}
