#![forbid(unsafe_code)]

//! Programmatic token building.

use crate::event::{Attribute, QName, StartElement, XmlToken};
use strom_core::Error;

/// Builds a well-formed token sequence, tracking open elements so end
/// tags always match their start tags.
#[derive(Debug, Default)]
pub struct TokenWriter {
    tokens: Vec<XmlToken>,
    open: Vec<QName>,
}

impl TokenWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a start-document token.
    pub fn start_document(&mut self) -> &mut Self {
        self.tokens.push(XmlToken::StartDocument);
        self
    }

    /// Start an element.
    pub fn start_element(&mut self, element: StartElement) -> &mut Self {
        self.open.push(element.name.clone());
        self.tokens.push(XmlToken::StartElement(element));
        self
    }

    /// Write a start/end pair with the given attributes and no content.
    pub fn empty_element(&mut self, name: QName, attributes: Vec<Attribute>) -> &mut Self {
        let mut element = StartElement::new(name.clone());
        element.attributes = attributes;
        self.tokens.push(XmlToken::StartElement(element));
        self.tokens.push(XmlToken::EndElement(name));
        self
    }

    /// Write an element holding only text.
    pub fn text_element(&mut self, name: QName, text: &str) -> &mut Self {
        self.tokens
            .push(XmlToken::StartElement(StartElement::new(name.clone())));
        self.tokens.push(XmlToken::Characters(text.to_owned()));
        self.tokens.push(XmlToken::EndElement(name));
        self
    }

    /// End the innermost open element.
    pub fn end_element(&mut self) -> Result<&mut Self, Error> {
        let name = self
            .open
            .pop()
            .ok_or_else(|| Error::StreamProtocol("end_element without open element".into()))?;
        self.tokens.push(XmlToken::EndElement(name));
        Ok(self)
    }

    pub fn text(&mut self, text: &str) -> &mut Self {
        self.tokens.push(XmlToken::Characters(text.to_owned()));
        self
    }

    pub fn comment(&mut self, text: &str) -> &mut Self {
        self.tokens.push(XmlToken::Comment(text.to_owned()));
        self
    }

    /// Close every open element, emit end-document, and return the tokens.
    pub fn finish_document(mut self) -> Vec<XmlToken> {
        while let Some(name) = self.open.pop() {
            self.tokens.push(XmlToken::EndElement(name));
        }
        self.tokens.push(XmlToken::EndDocument);
        self.tokens
    }

    /// Return the tokens written so far. Fails if elements are still open.
    pub fn into_tokens(self) -> Result<Vec<XmlToken>, Error> {
        if let Some(name) = self.open.last() {
            return Err(Error::StreamProtocol(format!(
                "element `{}` left open",
                name.qualified()
            )));
        }
        Ok(self.tokens)
    }
}
