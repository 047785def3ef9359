#![forbid(unsafe_code)]

//! Cryptographic primitives for strom.
//!
//! Provides digest methods, HMAC signature methods and the streaming sinks
//! that terminate transform pipelines.

pub mod digest;
pub mod registry;
pub mod sign;
pub mod sink;

pub use digest::{DigestAlgorithm, DigestMethod, DigestSink};
pub use registry::AlgorithmRegistry;
pub use sign::{SignatureAlgorithm, SignatureMethod, SignatureSink, SigningKey};
pub use sink::{BufferedSink, OutputSink, VecSink};
