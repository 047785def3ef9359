#![forbid(unsafe_code)]

//! Serialization of the output event stream.

use crate::output::{OutputChainCursor, OutputProcessor};
use crate::processor::{Phase, ProcessorInfo};
use std::sync::{Arc, Mutex};
use strom_c14n::escape::{push_attr, push_pi, push_text};
use strom_core::Error;
use strom_xml::SecEvent;

/// Byte buffer shared between an [`XmlEventWriter`] inside a chain and the
/// application that owns the chain.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, bytes: &[u8]) -> Result<(), Error> {
        let mut buffer = self
            .0
            .lock()
            .map_err(|_| Error::StreamProtocol("output buffer lock poisoned".into()))?;
        buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Take the bytes written so far.
    pub fn take(&self) -> Vec<u8> {
        match self.0.lock() {
            Ok(mut buffer) => std::mem::take(&mut *buffer),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

/// Writes every event it receives as XML text and forwards it unchanged.
///
/// Attributes and namespace declarations keep the order in which they were
/// produced; empty elements are written as start/end pairs.
pub struct XmlEventWriter {
    info: ProcessorInfo,
    buffer: SharedBuffer,
    scratch: Vec<u8>,
}

impl XmlEventWriter {
    pub const NAME: &'static str = "XmlEventWriter";

    pub fn new(buffer: SharedBuffer) -> Self {
        Self {
            info: ProcessorInfo::new(Self::NAME, Phase::Postprocessing),
            buffer,
            scratch: Vec::with_capacity(256),
        }
    }

    fn render(&mut self, event: &SecEvent, chain: &OutputChainCursor<'_>) -> Result<(), Error> {
        let out = &mut self.scratch;
        match event {
            SecEvent::StartDocument | SecEvent::EndDocument => {}
            SecEvent::StartElement(id) => {
                let element = chain
                    .arena()
                    .get(*id)
                    .ok_or_else(|| Error::StreamProtocol("start element handle is stale".into()))?;
                out.push(b'<');
                out.extend_from_slice(element.name.qualified().as_bytes());
                for decl in &element.namespaces {
                    out.extend_from_slice(b" xmlns");
                    if !decl.prefix.is_empty() {
                        out.push(b':');
                        out.extend_from_slice(decl.prefix.as_bytes());
                    }
                    out.extend_from_slice(b"=\"");
                    push_attr(out, &decl.uri);
                    out.push(b'"');
                }
                for attr in &element.attributes {
                    out.push(b' ');
                    out.extend_from_slice(attr.name.qualified().as_bytes());
                    out.extend_from_slice(b"=\"");
                    push_attr(out, &attr.value);
                    out.push(b'"');
                }
                out.push(b'>');
            }
            SecEvent::EndElement(id) => {
                let element = chain
                    .arena()
                    .get(*id)
                    .ok_or_else(|| Error::StreamProtocol("end element handle is stale".into()))?;
                out.extend_from_slice(b"</");
                out.extend_from_slice(element.name.qualified().as_bytes());
                out.push(b'>');
            }
            SecEvent::Characters(text) | SecEvent::CData(text) => push_text(out, text),
            SecEvent::Comment(text) => {
                out.extend_from_slice(b"<!--");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"-->");
            }
            SecEvent::ProcessingInstruction { target, data } => {
                out.extend_from_slice(b"<?");
                out.extend_from_slice(target.as_bytes());
                if !data.is_empty() {
                    out.push(b' ');
                    push_pi(out, data);
                }
                out.extend_from_slice(b"?>");
            }
        }
        if !self.scratch.is_empty() {
            self.buffer.append(&self.scratch)?;
            self.scratch.clear();
        }
        Ok(())
    }
}

impl OutputProcessor for XmlEventWriter {
    fn info(&self) -> &ProcessorInfo {
        &self.info
    }

    fn process_event(&mut self, event: &SecEvent, chain: &mut OutputChainCursor<'_>) -> Result<(), Error> {
        self.render(event, chain)?;
        chain.forward(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SecurityContext;
    use crate::output::OutputProcessorChain;
    use crate::part::SecurePart;
    use crate::signature::SignatureOutputProcessor;
    use strom_core::SecurityProperties;
    use strom_xml::parse_tokens;

    fn write(xml: &str, parts: Vec<SecurePart>) -> String {
        let buffer = SharedBuffer::new();
        let mut chain = OutputProcessorChain::new(SecurityContext::new(SecurityProperties::default()));
        chain.add_processor(Box::new(XmlEventWriter::new(buffer.clone())));
        chain.add_processor(Box::new(SignatureOutputProcessor::new(parts)));
        assert_eq!(
            chain.processor_names(),
            vec![SignatureOutputProcessor::NAME, XmlEventWriter::NAME]
        );
        chain.process_tokens(parse_tokens(xml).unwrap()).unwrap();
        chain.do_final().unwrap();
        String::from_utf8(buffer.take()).unwrap()
    }

    #[test]
    fn test_passthrough() {
        let xml = r#"<a xmlns:p="urn:p" z="1" p:y="&lt;"><!--c--><?pi data?>t&amp;<b/></a>"#;
        assert_eq!(
            write(xml, Vec::new()),
            r#"<a xmlns:p="urn:p" z="1" p:y="&lt;"><!--c--><?pi data?>t&amp;<b></b></a>"#
        );
    }

    #[test]
    fn test_generated_id_is_written() {
        let out = write("<r><p>x</p></r>", vec![SecurePart::element(strom_xml::QName::local("p"))]);
        assert!(out.starts_with(r#"<r><p Id="G-"#), "{out}");
    }

    #[test]
    fn test_written_prefixes_are_preserved() {
        let xml = r#"<r xmlns="urn:d" xmlns:p="urn:d"><x/><p:y p:k="1"/></r>"#;
        assert_eq!(
            write(xml, Vec::new()),
            r#"<r xmlns="urn:d" xmlns:p="urn:d"><x></x><p:y p:k="1"></p:y></r>"#
        );
    }
}
