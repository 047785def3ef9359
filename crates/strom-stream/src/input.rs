#![forbid(unsafe_code)]

//! Pull-based input processor chain.
//!
//! The application pulls security events from the chain. A pull starts at
//! the last processor, and each processor pulls from the one before it
//! until the reader at the front produces the event from the token
//! source. Processors are ordered by [`Phase`], so the reader
//! ([`Phase::Preprocessing`]) always sits at the front.

use crate::context::SecurityContext;
use crate::processor::{insertion_index, Phase, ProcessorId, ProcessorInfo};
use strom_core::{Error, SecurityProperties};
use strom_xml::{ElementArena, EventCursor, SecEvent, TokenSource, XmlToken};
use tracing::{debug, warn};

/// A processor in the input chain.
pub trait InputProcessor: Send {
    fn info(&self) -> &ProcessorInfo;

    /// Produce the next event, usually by pulling from `chain` and
    /// inspecting the result.
    fn process_next_event(&mut self, chain: &mut InputChainCursor<'_>) -> Result<SecEvent, Error>;

    /// Called once after the document has been consumed.
    fn do_final(&mut self, _context: &mut SecurityContext) -> Result<(), Error> {
        Ok(())
    }
}

/// View of the chain below the processor currently pulling.
pub struct InputChainCursor<'a> {
    upstream: &'a mut [Slot],
    context: &'a mut SecurityContext,
    arena: &'a mut ElementArena,
}

impl InputChainCursor<'_> {
    /// Pull the next event from the processor in front of the caller.
    pub fn process_next_event(&mut self) -> Result<SecEvent, Error> {
        let (slot, rest) = self
            .upstream
            .split_last_mut()
            .ok_or_else(|| Error::StreamProtocol("input chain has no event producer".into()))?;
        let mut cursor = InputChainCursor {
            upstream: rest,
            context: &mut *self.context,
            arena: &mut *self.arena,
        };
        slot.processor.process_next_event(&mut cursor)
    }

    pub fn context(&self) -> &SecurityContext {
        &*self.context
    }

    pub fn context_mut(&mut self) -> &mut SecurityContext {
        &mut *self.context
    }

    pub fn arena(&self) -> &ElementArena {
        &*self.arena
    }

    pub fn arena_mut(&mut self) -> &mut ElementArena {
        &mut *self.arena
    }
}

struct Slot {
    id: ProcessorId,
    processor: Box<dyn InputProcessor>,
}

/// The input processor chain of one document.
pub struct InputProcessorChain {
    slots: Vec<Slot>,
    context: SecurityContext,
    arena: ElementArena,
    next_id: u64,
}

impl InputProcessorChain {
    pub fn new(context: SecurityContext) -> Self {
        Self {
            slots: Vec::new(),
            context,
            arena: ElementArena::new(),
            next_id: 0,
        }
    }

    /// A chain that reads `source`, enforcing the configured depth limit.
    pub fn with_reader<S>(properties: SecurityProperties, source: S) -> Self
    where
        S: TokenSource + Send + 'static,
    {
        let reader = TokenReaderProcessor::new(source, properties.max_structure_depth);
        let mut chain = Self::new(SecurityContext::new(properties));
        chain.add_processor(Box::new(reader));
        chain
    }

    pub fn add_processor(&mut self, processor: Box<dyn InputProcessor>) -> ProcessorId {
        let id = ProcessorId(self.next_id);
        self.next_id += 1;
        let at = insertion_index(self.slots.iter().map(|s| s.processor.info()), processor.info());
        debug!(processor = %processor.info().name, %id, position = at, "adding input processor");
        self.slots.insert(at, Slot { id, processor });
        id
    }

    pub fn remove_processor(&mut self, id: ProcessorId) -> Option<Box<dyn InputProcessor>> {
        let index = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(index).processor)
    }

    /// Processor names in chain order, reader first.
    pub fn processor_names(&self) -> Vec<&str> {
        self.slots
            .iter()
            .map(|s| s.processor.info().name.as_str())
            .collect()
    }

    /// Pull the next event. Element handles in the event resolve through
    /// [`arena`](Self::arena) until the following pull.
    pub fn next_event(&mut self) -> Result<SecEvent, Error> {
        let mut cursor = InputChainCursor {
            upstream: &mut self.slots,
            context: &mut self.context,
            arena: &mut self.arena,
        };
        cursor.process_next_event()
    }

    pub fn arena(&self) -> &ElementArena {
        &self.arena
    }

    pub fn context(&self) -> &SecurityContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SecurityContext {
        &mut self.context
    }

    /// Let every processor finish, consumer side first.
    pub fn do_final(&mut self) -> Result<(), Error> {
        for slot in self.slots.iter_mut().rev() {
            slot.processor.do_final(&mut self.context)?;
        }
        Ok(())
    }

    pub fn into_context(self) -> SecurityContext {
        self.context
    }
}

/// Reads tokens from a [`TokenSource`] and turns them into events.
///
/// Enforces the nesting limit before an offending start element enters the
/// arena, so nothing past the limit reaches any consumer. End of document
/// is delivered once; pulling again fails with [`Error::NoMoreElements`].
pub struct TokenReaderProcessor<S> {
    info: ProcessorInfo,
    source: S,
    cursor: EventCursor,
    max_depth: usize,
    eof: bool,
}

impl<S: TokenSource> TokenReaderProcessor<S> {
    pub const NAME: &'static str = "TokenReaderProcessor";

    pub fn new(source: S, max_depth: usize) -> Self {
        Self {
            info: ProcessorInfo::new(Self::NAME, Phase::Preprocessing),
            source,
            cursor: EventCursor::new(),
            max_depth,
            eof: false,
        }
    }
}

impl<S: TokenSource + Send> InputProcessor for TokenReaderProcessor<S> {
    fn info(&self) -> &ProcessorInfo {
        &self.info
    }

    fn process_next_event(&mut self, chain: &mut InputChainCursor<'_>) -> Result<SecEvent, Error> {
        if self.eof {
            return Err(Error::NoMoreElements);
        }
        let token = match self.source.next_token()? {
            Some(token) => token,
            // A producer that stops without an end-document token still
            // gets exactly one.
            None => XmlToken::EndDocument,
        };
        match &token {
            XmlToken::StartElement(element) if self.cursor.depth() + 1 > self.max_depth => {
                warn!(
                    element = %element.name.qualified(),
                    max = self.max_depth,
                    "maximum XML structure depth exceeded"
                );
                return Err(Error::StructureTooDeep {
                    max: self.max_depth,
                });
            }
            _ => {}
        }
        let end = matches!(token, XmlToken::EndDocument);
        let event = self.cursor.accept(chain.arena_mut(), token).map_err(|e| {
            if e.is_protocol_violation() {
                warn!(error = %e, "malformed token stream");
            }
            e
        })?;
        self.eof = end;
        Ok(event)
    }
}

/// Records every ID attribute value in the security context and rejects
/// documents in which two elements share one.
pub struct IdAttributeProcessor {
    info: ProcessorInfo,
}

impl IdAttributeProcessor {
    pub const NAME: &'static str = "IdAttributeProcessor";

    pub fn new() -> Self {
        Self {
            info: ProcessorInfo::new(Self::NAME, Phase::Processing),
        }
    }
}

impl Default for IdAttributeProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl InputProcessor for IdAttributeProcessor {
    fn info(&self) -> &ProcessorInfo {
        &self.info
    }

    fn process_next_event(&mut self, chain: &mut InputChainCursor<'_>) -> Result<SecEvent, Error> {
        let event = chain.process_next_event()?;
        if let SecEvent::StartElement(id) = &event {
            let value = chain
                .arena()
                .get(*id)
                .and_then(|el| el.id_attribute(&chain.context().properties().id_attributes))
                .map(str::to_owned);
            if let Some(value) = value {
                chain.context_mut().register_id(&value)?;
            }
        }
        Ok(event)
    }
}
