#![forbid(unsafe_code)]

//! Streaming transform steps for strom.
//!
//! Each reference carries a sequence of transforms that are applied in
//! order before digesting. Here they are chained steps that consume events
//! or bytes and push their output into the next step, ending in a sink.

pub mod base64_transform;
pub mod c14n;
pub mod enveloped;
pub mod identity;
pub mod pipeline;

pub use pipeline::{
    resolve_transforms, Next, TransformAlgorithm, TransformMethod, TransformPipeline, Transformer,
};
