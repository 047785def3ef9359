#![forbid(unsafe_code)]

//! XML Digital Signature (XML-DSig) on top of the strom processor chains.
//!
//! Signing streams a document through an output chain that digests the
//! secure parts, then signs the canonical `SignedInfo` built from them.
//! Verification reads the signature, recomputes every reference while the
//! document streams through an input chain and checks the signature value.

pub mod context;
pub mod sign;
pub mod signed_info;
pub mod verify;

pub use context::DsigContext;
pub use sign::{compute_signature, sign_document, SignatureOutcome, SignedDocument};
pub use signed_info::{read_signature, signed_info_tokens, SignatureDescription};
pub use verify::{verify_document, verify_tokens, VerifyResult};
