#![forbid(unsafe_code)]

//! Processor descriptors and chain ordering.
//!
//! Every processor declares a [`Phase`] and may ask to run before or after
//! other processors (by name) within that phase. Chains keep their
//! processors sorted by phase; a new processor is placed inside its phase
//! at the first slot that satisfies its constraints and those of the
//! processors already present.

use std::fmt;

/// Ordering bucket of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Preprocessing,
    Processing,
    Postprocessing,
}

/// Stable handle of a processor within one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessorId(pub(crate) u64);

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Name, phase and local ordering constraints of a processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorInfo {
    pub name: String,
    pub phase: Phase,
    /// Names of processors this one must run before.
    pub before: Vec<String>,
    /// Names of processors this one must run after.
    pub after: Vec<String>,
}

impl ProcessorInfo {
    pub fn new(name: &str, phase: Phase) -> Self {
        Self {
            name: name.to_owned(),
            phase,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    pub fn before(mut self, name: &str) -> Self {
        self.before.push(name.to_owned());
        self
    }

    pub fn after(mut self, name: &str) -> Self {
        self.after.push(name.to_owned());
        self
    }

    fn must_precede(&self, other: &ProcessorInfo) -> bool {
        self.before.contains(&other.name) || other.after.contains(&self.name)
    }
}

/// Index at which `new` is inserted into `existing`, which is already in
/// chain order.
pub fn insertion_index<'a, I>(existing: I, new: &ProcessorInfo) -> usize
where
    I: IntoIterator<Item = &'a ProcessorInfo>,
{
    let existing: Vec<&ProcessorInfo> = existing.into_iter().collect();
    let phase_start = existing
        .iter()
        .position(|p| p.phase >= new.phase)
        .unwrap_or(existing.len());
    let phase_end = existing
        .iter()
        .position(|p| p.phase > new.phase)
        .unwrap_or(existing.len());

    // Must come after every processor that has to precede it.
    let lower = existing[phase_start..phase_end]
        .iter()
        .rposition(|p| p.must_precede(new))
        .map(|i| phase_start + i + 1)
        .unwrap_or(phase_start);
    // And before the first processor it has to precede.
    let upper = existing[phase_start..phase_end]
        .iter()
        .position(|p| new.must_precede(p))
        .map(|i| phase_start + i)
        .unwrap_or(phase_end);

    if upper < phase_end {
        upper.max(lower)
    } else {
        phase_end.max(lower)
    }
}
