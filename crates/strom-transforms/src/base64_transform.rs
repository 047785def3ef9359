#![forbid(unsafe_code)]

//! Base64 decode transform.
//!
//! Decodes incrementally: whitespace is dropped and complete 4-character
//! quanta are decoded as soon as they arrive, so only up to three pending
//! characters are held between writes.

use crate::pipeline::{ByteOutput, Next, TransformMethod, Transformer};
use base64::Engine;
use std::io::{Read, Write};
use strom_core::{algorithm, Error};
use strom_xml::{ElementArena, SecEvent};

const CHUNK: usize = 4096;

/// Decodes base64 input, a quad at a time.
pub struct Base64DecodeTransform {
    pending: Vec<u8>,
    out: ByteOutput,
}

impl Base64DecodeTransform {
    pub fn new(next: Next) -> Self {
        Self {
            pending: Vec::with_capacity(CHUNK),
            out: ByteOutput::new(next),
        }
    }

    fn push(&mut self, data: &[u8]) -> Result<(), Error> {
        self.pending
            .extend(data.iter().copied().filter(|b| !b.is_ascii_whitespace()));
        let complete = self.pending.len() - self.pending.len() % 4;
        if complete > 0 {
            self.decode(complete)?;
        }
        Ok(())
    }

    fn decode(&mut self, len: usize) -> Result<(), Error> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&self.pending[..len])
            .map_err(|e| Error::Base64(format!("decode error: {e}")))?;
        self.out.write_all(&decoded)?;
        self.pending.drain(..len);
        Ok(())
    }
}

impl Transformer for Base64DecodeTransform {
    fn uri(&self) -> &str {
        algorithm::BASE64
    }

    fn preferred_method(&self) -> TransformMethod {
        TransformMethod::Bytes
    }

    /// Decodes the text content of the events; markup is ignored.
    fn transform_event(&mut self, event: &SecEvent, _arena: &ElementArena) -> Result<(), Error> {
        match event {
            SecEvent::Characters(text) | SecEvent::CData(text) => self.push(text.as_bytes()),
            _ => Ok(()),
        }
    }

    fn transform_bytes(&mut self, input: &mut dyn Read) -> Result<(), Error> {
        let mut chunk = [0u8; CHUNK];
        loop {
            let n = input.read(&mut chunk)?;
            if n == 0 {
                return Ok(());
            }
            self.push(&chunk[..n])?;
        }
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, Error> {
        if !self.pending.is_empty() {
            return Err(Error::Base64(format!(
                "truncated input: {} trailing characters",
                self.pending.len()
            )));
        }
        self.out.finish()
    }
}
