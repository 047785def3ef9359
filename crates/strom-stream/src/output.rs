#![forbid(unsafe_code)]

//! Push-based output processor chain.
//!
//! The application pushes tokens; the chain turns them into security
//! events and hands each one to its processors in order. A processor
//! passes an event on by calling [`OutputChainCursor::forward`].
//!
//! Processors may ask for processors to be inserted or removed while an
//! event is travelling down the chain. Those requests are queued and
//! applied once the event has left the chain, so the list is never
//! changed while it is being walked.

use crate::context::SecurityContext;
use crate::processor::{insertion_index, ProcessorId, ProcessorInfo};
use strom_core::Error;
use strom_xml::{ElementArena, EventCursor, SecEvent, XmlToken};
use tracing::debug;

/// A processor in the output chain.
pub trait OutputProcessor: Send {
    fn info(&self) -> &ProcessorInfo;

    /// Handle one event. Call `chain.forward(event)` to pass it on.
    fn process_event(&mut self, event: &SecEvent, chain: &mut OutputChainCursor<'_>) -> Result<(), Error>;

    /// Called once after the last event.
    fn do_final(&mut self, _chain: &mut OutputChainCursor<'_>) -> Result<(), Error> {
        Ok(())
    }
}

enum Mutation {
    InsertBefore {
        anchor: ProcessorId,
        id: ProcessorId,
        processor: Box<dyn OutputProcessor>,
    },
    Remove(ProcessorId),
}

struct ChainState {
    context: SecurityContext,
    arena: ElementArena,
    pending: Vec<Mutation>,
    next_id: u64,
}

impl ChainState {
    fn allocate_id(&mut self) -> ProcessorId {
        let id = ProcessorId(self.next_id);
        self.next_id += 1;
        id
    }
}

struct Slot {
    id: ProcessorId,
    processor: Box<dyn OutputProcessor>,
}

/// View of the chain behind the processor currently handling an event.
pub struct OutputChainCursor<'a> {
    downstream: &'a mut [Slot],
    current: ProcessorId,
    state: &'a mut ChainState,
}

impl OutputChainCursor<'_> {
    /// Hand `event` to the next processor. Past the last processor the
    /// event is dropped.
    pub fn forward(&mut self, event: &SecEvent) -> Result<(), Error> {
        let Some((slot, rest)) = self.downstream.split_first_mut() else {
            return Ok(());
        };
        let mut cursor = OutputChainCursor {
            downstream: rest,
            current: slot.id,
            state: &mut *self.state,
        };
        slot.processor.process_event(event, &mut cursor)
    }

    /// Handle of the processor holding this cursor.
    pub fn current(&self) -> ProcessorId {
        self.current
    }

    /// Queue `processor` for insertion directly ahead of the current
    /// processor. It sees events from the next one on.
    pub fn insert_before_current(&mut self, processor: Box<dyn OutputProcessor>) -> ProcessorId {
        let id = self.state.allocate_id();
        self.state.pending.push(Mutation::InsertBefore {
            anchor: self.current,
            id,
            processor,
        });
        id
    }

    /// Queue removal of a processor.
    pub fn remove_processor(&mut self, id: ProcessorId) {
        self.state.pending.push(Mutation::Remove(id));
    }

    /// Queue removal of the current processor.
    pub fn remove_self(&mut self) {
        let id = self.current;
        self.remove_processor(id);
    }

    pub fn context(&self) -> &SecurityContext {
        &self.state.context
    }

    pub fn context_mut(&mut self) -> &mut SecurityContext {
        &mut self.state.context
    }

    pub fn arena(&self) -> &ElementArena {
        &self.state.arena
    }

    pub fn arena_mut(&mut self) -> &mut ElementArena {
        &mut self.state.arena
    }

    /// Context and arena together, for code that reads the arena while
    /// updating the context.
    pub fn split(&mut self) -> (&mut SecurityContext, &mut ElementArena) {
        (&mut self.state.context, &mut self.state.arena)
    }
}

/// The output processor chain of one document.
pub struct OutputProcessorChain {
    slots: Vec<Slot>,
    state: ChainState,
    cursor: EventCursor,
}

impl OutputProcessorChain {
    pub fn new(context: SecurityContext) -> Self {
        Self {
            slots: Vec::new(),
            state: ChainState {
                context,
                arena: ElementArena::new(),
                pending: Vec::new(),
                next_id: 0,
            },
            cursor: EventCursor::new(),
        }
    }

    /// Add a processor at the position its phase and constraints call for.
    pub fn add_processor(&mut self, processor: Box<dyn OutputProcessor>) -> ProcessorId {
        let id = self.state.allocate_id();
        self.place(id, processor);
        id
    }

    fn place(&mut self, id: ProcessorId, processor: Box<dyn OutputProcessor>) {
        let at = insertion_index(self.slots.iter().map(|s| s.processor.info()), processor.info());
        debug!(processor = %processor.info().name, %id, position = at, "adding output processor");
        self.slots.insert(at, Slot { id, processor });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Processor names in chain order.
    pub fn processor_names(&self) -> Vec<&str> {
        self.slots
            .iter()
            .map(|s| s.processor.info().name.as_str())
            .collect()
    }

    pub fn contains(&self, id: ProcessorId) -> bool {
        self.slots.iter().any(|s| s.id == id)
    }

    /// Push one token through the chain.
    pub fn process_token(&mut self, token: XmlToken) -> Result<(), Error> {
        let event = self.cursor.accept(&mut self.state.arena, token)?;
        self.process_event(&event)
    }

    /// Push a sequence of tokens.
    pub fn process_tokens<I>(&mut self, tokens: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = XmlToken>,
    {
        tokens.into_iter().try_for_each(|t| self.process_token(t))
    }

    fn process_event(&mut self, event: &SecEvent) -> Result<(), Error> {
        let result = match self.slots.split_first_mut() {
            Some((slot, rest)) => {
                let mut cursor = OutputChainCursor {
                    downstream: rest,
                    current: slot.id,
                    state: &mut self.state,
                };
                slot.processor.process_event(event, &mut cursor)
            }
            None => Ok(()),
        };
        self.apply_pending();
        result
    }

    fn apply_pending(&mut self) {
        for mutation in std::mem::take(&mut self.state.pending) {
            match mutation {
                Mutation::InsertBefore {
                    anchor,
                    id,
                    processor,
                } => match self.slots.iter().position(|s| s.id == anchor) {
                    Some(at) => {
                        debug!(processor = %processor.info().name, %id, before = %anchor, "inserting output processor");
                        self.slots.insert(at, Slot { id, processor });
                    }
                    None => self.place(id, processor),
                },
                Mutation::Remove(id) => {
                    if let Some(at) = self.slots.iter().position(|s| s.id == id) {
                        let slot = self.slots.remove(at);
                        debug!(processor = %slot.processor.info().name, %id, "removed output processor");
                    }
                }
            }
        }
    }

    /// Run every processor's `do_final` in chain order.
    pub fn do_final(&mut self) -> Result<(), Error> {
        let mut result = Ok(());
        for i in 0..self.slots.len() {
            let (head, tail) = self.slots.split_at_mut(i + 1);
            let slot = &mut head[i];
            let mut cursor = OutputChainCursor {
                downstream: tail,
                current: slot.id,
                state: &mut self.state,
            };
            result = slot.processor.do_final(&mut cursor);
            if result.is_err() {
                break;
            }
        }
        self.apply_pending();
        result
    }

    pub fn arena(&self) -> &ElementArena {
        &self.state.arena
    }

    pub fn context(&self) -> &SecurityContext {
        &self.state.context
    }

    pub fn context_mut(&mut self) -> &mut SecurityContext {
        &mut self.state.context
    }

    pub fn into_context(self) -> SecurityContext {
        self.state.context
    }
}
