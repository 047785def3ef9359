#![forbid(unsafe_code)]

//! Enveloped signature transform.
//!
//! Drops every `ds:Signature` subtree from the event stream.

use crate::pipeline::{replay_bytes, EventOutput, Next, TransformMethod, Transformer};
use std::io::Read;
use strom_core::{algorithm, ns, Error};
use strom_xml::{ElementArena, SecEvent};

pub struct EnvelopedSignatureTransform {
    next: EventOutput,
    /// Depth inside a skipped `Signature` element.
    skipping: usize,
}

impl EnvelopedSignatureTransform {
    pub fn new(next: Next) -> Self {
        Self {
            next: EventOutput::new(next),
            skipping: 0,
        }
    }

    fn handle(&mut self, event: &SecEvent, arena: &ElementArena) -> Result<(), Error> {
        match event {
            SecEvent::StartElement(id) => {
                if self.skipping > 0 {
                    self.skipping += 1;
                    return Ok(());
                }
                let is_signature = arena.get(*id).is_some_and(|el| {
                    el.name.namespace_uri == ns::DSIG && el.name.local_name == ns::node::SIGNATURE
                });
                if is_signature {
                    self.skipping = 1;
                    return Ok(());
                }
            }
            SecEvent::EndElement(_) if self.skipping > 0 => {
                self.skipping -= 1;
                return Ok(());
            }
            _ if self.skipping > 0 => return Ok(()),
            _ => {}
        }
        self.next.emit(event, arena)
    }
}

impl Transformer for EnvelopedSignatureTransform {
    fn uri(&self) -> &str {
        algorithm::ENVELOPED_SIGNATURE
    }

    fn preferred_method(&self) -> TransformMethod {
        TransformMethod::Events
    }

    fn transform_event(&mut self, event: &SecEvent, arena: &ElementArena) -> Result<(), Error> {
        self.handle(event, arena)
    }

    fn transform_bytes(&mut self, input: &mut dyn Read) -> Result<(), Error> {
        replay_bytes(input, |event, arena| self.handle(event, arena))
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, Error> {
        if self.skipping > 0 {
            return Err(Error::Transform(
                "input ended inside a ds:Signature element".into(),
            ));
        }
        self.next.finish()
    }
}
