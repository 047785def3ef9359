#![forbid(unsafe_code)]

//! Canonicalization transform.

use crate::pipeline::{replay_bytes, ByteOutput, Next, TransformMethod, Transformer};
use std::io::Read;
use strom_c14n::{C14nMode, Canonicalizer};
use strom_core::Error;
use strom_xml::{ElementArena, SecEvent};

/// Canonicalizes events into bytes for the next step.
pub struct C14nTransform {
    canonicalizer: Canonicalizer,
    out: ByteOutput,
}

impl C14nTransform {
    pub fn new(mode: C14nMode, inclusive_prefixes: &[String], next: Next) -> Self {
        Self {
            canonicalizer: Canonicalizer::new(mode, inclusive_prefixes),
            out: ByteOutput::new(next),
        }
    }
}

impl Transformer for C14nTransform {
    fn uri(&self) -> &str {
        self.canonicalizer.mode().uri()
    }

    fn preferred_method(&self) -> TransformMethod {
        TransformMethod::Events
    }

    fn transform_event(&mut self, event: &SecEvent, arena: &ElementArena) -> Result<(), Error> {
        self.canonicalizer.process_event(event, arena, &mut self.out)
    }

    fn transform_bytes(&mut self, input: &mut dyn Read) -> Result<(), Error> {
        let Self { canonicalizer, out } = self;
        replay_bytes(input, |event, arena| canonicalizer.process_event(event, arena, out))
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, Error> {
        self.out.finish()
    }
}
