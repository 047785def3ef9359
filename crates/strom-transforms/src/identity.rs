#![forbid(unsafe_code)]

//! Identity step, used when a part declares no transforms.

use crate::pipeline::{ByteOutput, Next, TransformMethod, Transformer};
use std::io::{self, Read};
use strom_c14n::{C14nMode, Canonicalizer};
use strom_core::Error;
use strom_xml::{ElementArena, SecEvent};

/// Pseudo-URI reported by the identity step. It never appears in a
/// `Transforms` element.
pub const IDENTITY_URI: &str = "urn:strom:transform:identity";

/// Copies bytes unchanged; events are serialized with the default
/// canonicalization (C14N 1.0, no comments).
pub struct IdentityTransform {
    serializer: Canonicalizer,
    out: ByteOutput,
}

impl IdentityTransform {
    pub fn new(next: Next) -> Self {
        Self {
            serializer: Canonicalizer::new(C14nMode::default(), &[]),
            out: ByteOutput::new(next),
        }
    }
}

impl Transformer for IdentityTransform {
    fn uri(&self) -> &str {
        IDENTITY_URI
    }

    fn preferred_method(&self) -> TransformMethod {
        TransformMethod::Bytes
    }

    fn transform_event(&mut self, event: &SecEvent, arena: &ElementArena) -> Result<(), Error> {
        self.serializer.process_event(event, arena, &mut self.out)
    }

    fn transform_bytes(&mut self, input: &mut dyn Read) -> Result<(), Error> {
        io::copy(input, &mut self.out)?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, Error> {
        self.out.finish()
    }
}
