#![forbid(unsafe_code)]

//! Element arena.
//!
//! Start elements are stored in a slab and addressed by a generational
//! [`ElementId`]. Each entry records its parent handle, which gives every
//! event a path to the document root without reference cycles. A chain
//! releases an element once its end event has been processed, so the arena
//! only ever holds the currently open elements.

use crate::event::StartElement;
use std::collections::BTreeMap;
use strom_core::ns;

/// Handle to a start element in an [`ElementArena`].
///
/// A released slot bumps its generation, so stale handles resolve to
/// `None` instead of aliasing a newer element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId {
    index: u32,
    generation: u32,
}

impl ElementId {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

#[derive(Debug)]
struct Entry {
    element: StartElement,
    parent: Option<ElementId>,
    depth: usize,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Slab of open start elements.
#[derive(Debug, Default)]
pub struct ElementArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl ElementArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `element` as a child of `parent` and return its handle.
    pub fn alloc(&mut self, element: StartElement, parent: Option<ElementId>) -> ElementId {
        let depth = parent.and_then(|p| self.depth(p)).unwrap_or(0) + 1;
        let entry = Entry {
            element,
            parent,
            depth,
        };
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            ElementId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            ElementId {
                index,
                generation: 0,
            }
        }
    }

    /// Drop the element behind `id`. Releasing a stale handle is a no-op.
    pub fn release(&mut self, id: ElementId) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            if slot.generation == id.generation && slot.entry.is_some() {
                slot.entry = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
                self.live -= 1;
            }
        }
    }

    fn entry(&self, id: ElementId) -> Option<&Entry> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    pub fn get(&self, id: ElementId) -> Option<&StartElement> {
        self.entry(id).map(|e| &e.element)
    }

    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut StartElement> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
            .map(|e| &mut e.element)
    }

    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.entry(id).and_then(|e| e.parent)
    }

    /// Nesting depth, 1 for the document element.
    pub fn depth(&self, id: ElementId) -> Option<usize> {
        self.entry(id).map(|e| e.depth)
    }

    /// Number of live elements.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Strict ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: ElementId) -> Ancestors<'_> {
        Ancestors {
            arena: self,
            next: self.parent(id),
        }
    }

    /// `id` followed by its ancestors, nearest first.
    pub fn ancestors_or_self(&self, id: ElementId) -> Ancestors<'_> {
        Ancestors {
            arena: self,
            next: self.get(id).map(|_| id),
        }
    }

    /// Namespace bindings in scope at `id`, including its own declarations.
    ///
    /// Undeclarations (`xmlns=""`) remove the default binding. The `xml`
    /// prefix is never part of the result.
    pub fn in_scope_namespaces(&self, id: ElementId) -> BTreeMap<String, String> {
        let chain: Vec<ElementId> = self.ancestors_or_self(id).collect();
        let mut result = BTreeMap::new();
        for el in chain.into_iter().rev() {
            let Some(element) = self.get(el) else { continue };
            for decl in &element.namespaces {
                if decl.prefix == "xml" {
                    continue;
                }
                if decl.uri.is_empty() {
                    result.remove(&decl.prefix);
                } else {
                    result.insert(decl.prefix.clone(), decl.uri.clone());
                }
            }
        }
        result
    }

    /// `xml:*` attributes inherited from the strict ancestors of `id`,
    /// keyed by local name. The nearest ancestor wins.
    pub fn inherited_xml_attributes(&self, id: ElementId) -> BTreeMap<String, String> {
        let mut result = BTreeMap::new();
        for ancestor in self.ancestors(id) {
            let Some(element) = self.get(ancestor) else { continue };
            for attr in &element.attributes {
                if attr.name.namespace_uri == ns::XML {
                    result
                        .entry(attr.name.local_name.clone())
                        .or_insert_with(|| attr.value.clone());
                }
            }
        }
        result
    }
}

/// Iterator over an element's ancestor handles.
pub struct Ancestors<'a> {
    arena: &'a ElementArena,
    next: Option<ElementId>,
}

impl Iterator for Ancestors<'_> {
    type Item = ElementId;

    fn next(&mut self) -> Option<ElementId> {
        let current = self.next?;
        self.next = self.arena.parent(current);
        Some(current)
    }
}
