#![forbid(unsafe_code)]

//! XML token model for the strom streaming pipeline.
//!
//! Provides the token and security-event types, the element arena that
//! gives events their parent back-references, token sources for streamed
//! and pre-parsed input, and a token builder for programmatic documents.

pub mod arena;
pub mod cursor;
pub mod event;
pub mod source;
pub mod writer;

pub use arena::{ElementArena, ElementId};
pub use cursor::EventCursor;
pub use event::{Attribute, Namespace, QName, SecEvent, StartElement, XmlToken};
pub use source::{
    parse_token_bytes, parse_tokens, parsing_options, DocumentTokenSource, IterTokenSource,
    TokenSource, VecTokenSource,
};
pub use writer::TokenWriter;
