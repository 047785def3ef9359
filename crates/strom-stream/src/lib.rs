#![forbid(unsafe_code)]

//! Streaming processor chains for strom.
//!
//! The input chain pulls tokens from a [`strom_xml::TokenSource`], guards
//! nesting depth, records element IDs and verifies expected references.
//! The output chain takes tokens pushed by the application, digests the
//! declared secure parts on the fly and serializes the result.

pub mod context;
pub mod digester;
pub mod input;
pub mod output;
pub mod part;
pub mod processor;
pub mod resolver;
pub mod signature;
pub mod verify;
pub mod writer;

pub use context::{ReferenceResult, SecurityContext};
pub use digester::{build_transformer_chain, digest_external, PartDigester, PrefixSource};
pub use input::{
    IdAttributeProcessor, InputChainCursor, InputProcessor, InputProcessorChain,
    TokenReaderProcessor,
};
pub use output::{OutputChainCursor, OutputProcessor, OutputProcessorChain};
pub use part::{same_document_id, PartSelector, SecurePart, SignaturePartDef};
pub use processor::{Phase, ProcessorId, ProcessorInfo};
pub use resolver::{ChainResolver, FileResolver, MapResolver, ResourceResolver};
pub use signature::{PartDigestProcessor, SignatureOutputProcessor};
pub use verify::ReferenceVerifyProcessor;
pub use writer::{SharedBuffer, XmlEventWriter};
