#![forbid(unsafe_code)]

//! Token-to-event conversion.

use crate::arena::{ElementArena, ElementId};
use crate::event::{SecEvent, XmlToken};
use strom_core::Error;

/// Converts [`XmlToken`]s into [`SecEvent`]s, placing start elements in an
/// arena and tracking the open-element path.
///
/// The start element behind an end event is released when the next token
/// is accepted, so consumers of the end event can still look it up.
#[derive(Debug, Default)]
pub struct EventCursor {
    open: Vec<ElementId>,
    pending_release: Option<ElementId>,
}

impl EventCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently open elements.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// The innermost open element.
    pub fn current(&self) -> Option<ElementId> {
        self.open.last().copied()
    }

    /// Accept one token. End tags must match the innermost open element.
    pub fn accept(&mut self, arena: &mut ElementArena, token: XmlToken) -> Result<SecEvent, Error> {
        if let Some(done) = self.pending_release.take() {
            arena.release(done);
        }
        let event = match token {
            XmlToken::StartDocument => SecEvent::StartDocument,
            XmlToken::StartElement(element) => {
                let id = arena.alloc(element, self.current());
                self.open.push(id);
                SecEvent::StartElement(id)
            }
            XmlToken::EndElement(name) => {
                let id = self.open.pop().ok_or_else(|| {
                    Error::StreamProtocol(format!(
                        "end element `{}` without matching start element",
                        name.qualified()
                    ))
                })?;
                let open_name = arena
                    .get(id)
                    .map(|el| el.name.clone())
                    .ok_or_else(|| Error::StreamProtocol("stale element handle".into()))?;
                if open_name != name {
                    return Err(Error::StreamProtocol(format!(
                        "end element `{}` does not match start element `{}`",
                        name.qualified(),
                        open_name.qualified()
                    )));
                }
                self.pending_release = Some(id);
                SecEvent::EndElement(id)
            }
            XmlToken::Characters(text) => SecEvent::Characters(text),
            XmlToken::CData(text) => SecEvent::CData(text),
            XmlToken::Comment(text) => SecEvent::Comment(text),
            XmlToken::ProcessingInstruction { target, data } => {
                SecEvent::ProcessingInstruction { target, data }
            }
            XmlToken::EndDocument => {
                if let Some(id) = self.current() {
                    let name = arena.get(id).map(|el| el.name.qualified()).unwrap_or_default();
                    return Err(Error::StreamProtocol(format!(
                        "end of document with element `{name}` still open"
                    )));
                }
                SecEvent::EndDocument
            }
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{QName, StartElement};

    #[test]
    fn test_release_is_deferred() {
        let mut arena = ElementArena::new();
        let mut cursor = EventCursor::new();
        let start = cursor
            .accept(&mut arena, XmlToken::StartElement(StartElement::new(QName::local("a"))))
            .unwrap();
        let SecEvent::StartElement(id) = start else { panic!() };
        let end = cursor
            .accept(&mut arena, XmlToken::EndElement(QName::local("a")))
            .unwrap();
        assert_eq!(end, SecEvent::EndElement(id));
        assert!(arena.get(id).is_some());
        cursor.accept(&mut arena, XmlToken::EndDocument).unwrap();
        assert!(arena.get(id).is_none());
        assert!(arena.is_empty());
    }

    #[test]
    fn test_mismatched_end() {
        let mut arena = ElementArena::new();
        let mut cursor = EventCursor::new();
        cursor
            .accept(&mut arena, XmlToken::StartElement(StartElement::new(QName::local("a"))))
            .unwrap();
        let err = cursor
            .accept(&mut arena, XmlToken::EndElement(QName::local("b")))
            .unwrap_err();
        assert!(matches!(err, Error::StreamProtocol(_)));
    }

    #[test]
    fn test_end_document_with_open_element() {
        let mut arena = ElementArena::new();
        let mut cursor = EventCursor::new();
        cursor
            .accept(&mut arena, XmlToken::StartElement(StartElement::new(QName::local("a"))))
            .unwrap();
        assert!(cursor.accept(&mut arena, XmlToken::EndDocument).is_err());
    }
}
