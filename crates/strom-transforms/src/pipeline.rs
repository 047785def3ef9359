#![forbid(unsafe_code)]

//! Transform trait and pipeline construction.
//!
//! A pipeline is a chain of [`Transformer`] steps ending in an
//! [`OutputSink`]. Each step owns the next one. Steps accept either one
//! security event at a time or a whole byte stream, and advertise which of
//! the two they prefer; feeding the other kind still works but may cost a
//! re-serialization or a re-parse.

use crate::base64_transform::Base64DecodeTransform;
use crate::c14n::C14nTransform;
use crate::enveloped::EnvelopedSignatureTransform;
use crate::identity::IdentityTransform;
use std::io::{self, Read, Write};
use strom_c14n::{C14nMode, Canonicalizer};
use strom_core::{algorithm, Error};
use strom_crypto::OutputSink;
use strom_xml::{parse_token_bytes, ElementArena, EventCursor, SecEvent};
use tracing::trace;

/// The input kind a step handles natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMethod {
    Events,
    Bytes,
}

/// One step of a transform pipeline.
pub trait Transformer: Send {
    /// The algorithm URI for this step.
    fn uri(&self) -> &str;

    fn preferred_method(&self) -> TransformMethod;

    /// Feed one event. The arena resolves the element handles it carries.
    fn transform_event(&mut self, event: &SecEvent, arena: &ElementArena) -> Result<(), Error>;

    /// Feed a whole byte stream.
    fn transform_bytes(&mut self, input: &mut dyn Read) -> Result<(), Error>;

    /// Flush this step into the next one, then finish the rest of the
    /// chain. Returns the value of the terminal sink.
    fn finish(self: Box<Self>) -> Result<Vec<u8>, Error>;
}

/// What a step writes into.
pub enum Next {
    Sink(Box<dyn OutputSink>),
    Step(Box<dyn Transformer>),
}

/// Byte output of a step.
///
/// Bytes go straight into a terminal sink. In front of another step they
/// are collected and handed over as one stream when the step finishes.
pub struct ByteOutput {
    target: ByteTarget,
}

enum ByteTarget {
    Sink(Box<dyn OutputSink>),
    Buffered {
        next: Box<dyn Transformer>,
        buf: Vec<u8>,
    },
}

impl ByteOutput {
    pub fn new(next: Next) -> Self {
        let target = match next {
            Next::Sink(sink) => ByteTarget::Sink(sink),
            Next::Step(next) => ByteTarget::Buffered {
                next,
                buf: Vec::new(),
            },
        };
        Self { target }
    }

    pub fn finish(self) -> Result<Vec<u8>, Error> {
        match self.target {
            ByteTarget::Sink(sink) => sink.close(),
            ByteTarget::Buffered { mut next, buf } => {
                trace!(bytes = buf.len(), next = next.uri(), "handing buffered bytes to next step");
                next.transform_bytes(&mut buf.as_slice())?;
                next.finish()
            }
        }
    }
}

impl Write for ByteOutput {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match &mut self.target {
            ByteTarget::Sink(sink) => sink.write(data),
            ByteTarget::Buffered { buf, .. } => {
                buf.extend_from_slice(data);
                Ok(data.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.target {
            ByteTarget::Sink(sink) => sink.flush(),
            ByteTarget::Buffered { .. } => Ok(()),
        }
    }
}

/// Event output of a step.
///
/// Events are passed on to the next step, or serialized with the default
/// canonicalization when the next hop is a byte sink.
pub enum EventOutput {
    Step(Box<dyn Transformer>),
    Serialize {
        canonicalizer: Canonicalizer,
        sink: Box<dyn OutputSink>,
    },
}

impl EventOutput {
    pub fn new(next: Next) -> Self {
        match next {
            Next::Step(step) => EventOutput::Step(step),
            Next::Sink(sink) => EventOutput::Serialize {
                canonicalizer: Canonicalizer::new(C14nMode::default(), &[]),
                sink,
            },
        }
    }

    pub fn emit(&mut self, event: &SecEvent, arena: &ElementArena) -> Result<(), Error> {
        match self {
            EventOutput::Step(step) => step.transform_event(event, arena),
            EventOutput::Serialize {
                canonicalizer,
                sink,
            } => canonicalizer.process_event(event, arena, sink),
        }
    }

    pub fn finish(self) -> Result<Vec<u8>, Error> {
        match self {
            EventOutput::Step(step) => step.finish(),
            EventOutput::Serialize { sink, .. } => sink.close(),
        }
    }
}

/// Parse a byte stream and replay it as events.
///
/// Used by event-preferring steps when they receive bytes.
pub fn replay_bytes<F>(input: &mut dyn Read, mut on_event: F) -> Result<(), Error>
where
    F: FnMut(&SecEvent, &ElementArena) -> Result<(), Error>,
{
    let mut data = Vec::new();
    input.read_to_end(&mut data)?;
    let tokens = parse_token_bytes(&data)?;
    let mut arena = ElementArena::new();
    let mut cursor = EventCursor::new();
    for token in tokens {
        let event = cursor.accept(&mut arena, token)?;
        on_event(&event, &arena)?;
    }
    Ok(())
}

/// The closed set of supported transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformAlgorithm {
    Canonicalize(C14nMode),
    Base64Decode,
    EnvelopedSignature,
}

impl TransformAlgorithm {
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Canonicalize(mode) => mode.uri(),
            Self::Base64Decode => algorithm::BASE64,
            Self::EnvelopedSignature => algorithm::ENVELOPED_SIGNATURE,
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self, Error> {
        if let Some(mode) = C14nMode::from_uri(uri) {
            return Ok(Self::Canonicalize(mode));
        }
        match uri {
            algorithm::BASE64 => Ok(Self::Base64Decode),
            algorithm::ENVELOPED_SIGNATURE => Ok(Self::EnvelopedSignature),
            _ => Err(Error::UnsupportedAlgorithm(format!("transform: {uri}"))),
        }
    }

    pub fn is_exclusive_c14n(&self) -> bool {
        matches!(self, Self::Canonicalize(mode) if mode.is_exclusive())
    }

    /// Instantiate this step in front of `next`.
    pub fn instantiate(&self, next: Next, inclusive_prefixes: &[String]) -> Box<dyn Transformer> {
        match self {
            Self::Canonicalize(mode) => {
                let prefixes: &[String] = if mode.is_exclusive() {
                    inclusive_prefixes
                } else {
                    &[]
                };
                Box::new(C14nTransform::new(*mode, prefixes, next))
            }
            Self::Base64Decode => Box::new(Base64DecodeTransform::new(next)),
            Self::EnvelopedSignature => Box::new(EnvelopedSignatureTransform::new(next)),
        }
    }
}

/// Resolve a list of transform URIs. The first unknown URI fails the
/// whole list.
pub fn resolve_transforms<S: AsRef<str>>(uris: &[S]) -> Result<Vec<TransformAlgorithm>, Error> {
    uris.iter()
        .map(|uri| TransformAlgorithm::from_uri(uri.as_ref()))
        .collect()
}

/// A built chain of transform steps ending in a sink.
pub struct TransformPipeline {
    head: Box<dyn Transformer>,
}

impl TransformPipeline {
    /// Build the chain backward from `sink`: the last algorithm is wired to
    /// the sink first, and each earlier one wraps the step built before it.
    /// An empty list yields the identity step.
    ///
    /// `inclusive_prefixes` is the recorded `PrefixList` used by exclusive
    /// canonicalization steps.
    pub fn build(
        algorithms: &[TransformAlgorithm],
        inclusive_prefixes: &[String],
        sink: Box<dyn OutputSink>,
    ) -> Self {
        let mut next = Next::Sink(sink);
        for alg in algorithms.iter().rev() {
            next = Next::Step(alg.instantiate(next, inclusive_prefixes));
        }
        let head = match next {
            Next::Step(step) => step,
            Next::Sink(sink) => Box::new(IdentityTransform::new(Next::Sink(sink))),
        };
        Self { head }
    }

    pub fn preferred_method(&self) -> TransformMethod {
        self.head.preferred_method()
    }

    /// URI of the first step.
    pub fn head_uri(&self) -> &str {
        self.head.uri()
    }

    pub fn feed_event(&mut self, event: &SecEvent, arena: &ElementArena) -> Result<(), Error> {
        self.head.transform_event(event, arena)
    }

    pub fn feed_bytes(&mut self, input: &mut dyn Read) -> Result<(), Error> {
        self.head.transform_bytes(input)
    }

    /// Finish every step and close the sink, returning its value.
    pub fn finish(self) -> Result<Vec<u8>, Error> {
        self.head.finish()
    }
}
