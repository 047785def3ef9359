#![forbid(unsafe_code)]

//! Shared building blocks for the strom streaming XML security pipeline:
//! the error taxonomy, algorithm and namespace identifiers, and the
//! security properties consumed by the processor chains.

pub mod algorithm;
pub mod config;
pub mod error;
pub mod ns;

pub use config::SecurityProperties;
pub use error::{Error, Result};
