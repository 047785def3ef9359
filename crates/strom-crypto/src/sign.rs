#![forbid(unsafe_code)]

//! Signature algorithms.
//!
//! HMAC methods are built in and stream through a [`SignatureSink`].
//! Other primitives can be plugged in through [`SignatureAlgorithm`];
//! their sink buffers the signed bytes and hands them over on close.

use crate::sink::OutputSink;
use hmac::{Hmac, Mac};
use std::io::{self, Write};
use strom_core::{algorithm, Error};

/// Key material for signature operations.
#[derive(Clone)]
pub enum SigningKey {
    Hmac(Vec<u8>),
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningKey::Hmac(key) => write!(f, "SigningKey::Hmac({} bytes)", key.len()),
        }
    }
}

/// Trait for signature algorithms.
pub trait SignatureAlgorithm: Send {
    fn uri(&self) -> &'static str;
    fn sign(&self, key: &SigningKey, data: &[u8]) -> Result<Vec<u8>, Error>;
    fn verify(&self, key: &SigningKey, data: &[u8], signature: &[u8]) -> Result<bool, Error>;
}

/// The closed set of built-in signature methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureMethod {
    HmacSha1,
    HmacSha224,
    HmacSha256,
    HmacSha384,
    HmacSha512,
}

impl SignatureMethod {
    pub fn uri(&self) -> &'static str {
        match self {
            Self::HmacSha1 => algorithm::HMAC_SHA1,
            Self::HmacSha224 => algorithm::HMAC_SHA224,
            Self::HmacSha256 => algorithm::HMAC_SHA256,
            Self::HmacSha384 => algorithm::HMAC_SHA384,
            Self::HmacSha512 => algorithm::HMAC_SHA512,
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self, Error> {
        Ok(match uri {
            algorithm::HMAC_SHA1 => Self::HmacSha1,
            algorithm::HMAC_SHA224 => Self::HmacSha224,
            algorithm::HMAC_SHA256 => Self::HmacSha256,
            algorithm::HMAC_SHA384 => Self::HmacSha384,
            algorithm::HMAC_SHA512 => Self::HmacSha512,
            _ => {
                return Err(Error::UnsupportedAlgorithm(format!(
                    "signature algorithm: {uri}"
                )))
            }
        })
    }

    /// A streaming sink that signs (or verifies) everything written to it.
    pub fn sink(&self, key: &SigningKey) -> Result<SignatureSink, Error> {
        let SigningKey::Hmac(key) = key;
        let state = match self {
            Self::HmacSha1 => MacState::Sha1(new_mac(key)?),
            Self::HmacSha224 => MacState::Sha224(new_mac(key)?),
            Self::HmacSha256 => MacState::Sha256(new_mac(key)?),
            Self::HmacSha384 => MacState::Sha384(new_mac(key)?),
            Self::HmacSha512 => MacState::Sha512(new_mac(key)?),
        };
        Ok(SignatureSink {
            inner: SinkInner::Hmac(state),
            uri: self.uri(),
        })
    }

    pub fn algorithm(&self) -> Box<dyn SignatureAlgorithm> {
        Box::new(HmacSign { method: *self })
    }
}

/// Create a signature algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn SignatureAlgorithm>, Error> {
    SignatureMethod::from_uri(uri).map(|m| m.algorithm())
}

fn new_mac<M: Mac + hmac::digest::KeyInit>(key: &[u8]) -> Result<M, Error> {
    <M as Mac>::new_from_slice(key).map_err(|e| Error::Key(format!("invalid HMAC key: {e}")))
}

enum MacState {
    Sha1(Hmac<sha1::Sha1>),
    Sha224(Hmac<sha2::Sha224>),
    Sha256(Hmac<sha2::Sha256>),
    Sha384(Hmac<sha2::Sha384>),
    Sha512(Hmac<sha2::Sha512>),
}

macro_rules! with_mac {
    ($state:expr, $mac:ident => $body:expr) => {
        match $state {
            MacState::Sha1($mac) => $body,
            MacState::Sha224($mac) => $body,
            MacState::Sha256($mac) => $body,
            MacState::Sha384($mac) => $body,
            MacState::Sha512($mac) => $body,
        }
    };
}

enum SinkInner {
    Hmac(MacState),
    External {
        algorithm: Box<dyn SignatureAlgorithm>,
        key: SigningKey,
        data: Vec<u8>,
    },
}

/// Streaming signer over canonical `SignedInfo` bytes.
pub struct SignatureSink {
    inner: SinkInner,
    uri: &'static str,
}

impl SignatureSink {
    /// Sink for an externally provided algorithm. Input is buffered since
    /// the trait signs whole messages.
    pub fn external(algorithm: Box<dyn SignatureAlgorithm>, key: SigningKey) -> Self {
        let uri = algorithm.uri();
        Self {
            inner: SinkInner::External {
                algorithm,
                key,
                data: Vec::new(),
            },
            uri,
        }
    }

    pub fn uri(&self) -> &'static str {
        self.uri
    }

    /// Produce the signature value.
    pub fn sign(self) -> Result<Vec<u8>, Error> {
        match self.inner {
            SinkInner::Hmac(state) => Ok(with_mac!(state, mac => mac.finalize().into_bytes().to_vec())),
            SinkInner::External {
                algorithm,
                key,
                data,
            } => algorithm.sign(&key, &data),
        }
    }

    /// Check `signature` against the bytes written, in constant time for
    /// the built-in methods.
    pub fn verify(self, signature: &[u8]) -> Result<bool, Error> {
        match self.inner {
            SinkInner::Hmac(state) => Ok(with_mac!(state, mac => mac.verify_slice(signature).is_ok())),
            SinkInner::External {
                algorithm,
                key,
                data,
            } => algorithm.verify(&key, &data, signature),
        }
    }
}

impl Write for SignatureSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match &mut self.inner {
            SinkInner::Hmac(state) => with_mac!(state, mac => mac.update(data)),
            SinkInner::External { data: buf, .. } => buf.extend_from_slice(data),
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl OutputSink for SignatureSink {
    fn close(self: Box<Self>) -> Result<Vec<u8>, Error> {
        (*self).sign()
    }
}

struct HmacSign {
    method: SignatureMethod,
}

impl SignatureAlgorithm for HmacSign {
    fn uri(&self) -> &'static str {
        self.method.uri()
    }

    fn sign(&self, key: &SigningKey, data: &[u8]) -> Result<Vec<u8>, Error> {
        let mut sink = self.method.sink(key)?;
        sink.write_all(data)?;
        sink.sign()
    }

    fn verify(&self, key: &SigningKey, data: &[u8], signature: &[u8]) -> Result<bool, Error> {
        let mut sink = self.method.sink(key)?;
        sink.write_all(data)?;
        sink.verify(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_hmac_sha256_known_value() {
        // RFC 4231 test case 2.
        let key = SigningKey::Hmac(b"Jefe".to_vec());
        let mut sink = SignatureMethod::HmacSha256.sink(&key).unwrap();
        sink.write_all(b"what do ya want ").unwrap();
        sink.write_all(b"for nothing?").unwrap();
        assert_eq!(
            hex(&sink.sign().unwrap()),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_rejects_tampered() {
        let key = SigningKey::Hmac(b"secret".to_vec());
        let alg = from_uri(algorithm::HMAC_SHA1).unwrap();
        let sig = alg.sign(&key, b"payload").unwrap();
        assert!(alg.verify(&key, b"payload", &sig).unwrap());
        assert!(!alg.verify(&key, b"payloaD", &sig).unwrap());
        assert!(!alg.verify(&key, b"payload", &sig[..10]).unwrap());
    }

    #[test]
    fn test_external_algorithm() {
        struct Reverse;
        impl SignatureAlgorithm for Reverse {
            fn uri(&self) -> &'static str {
                "urn:test:reverse"
            }
            fn sign(&self, _: &SigningKey, data: &[u8]) -> Result<Vec<u8>, Error> {
                Ok(data.iter().rev().copied().collect())
            }
            fn verify(&self, k: &SigningKey, data: &[u8], sig: &[u8]) -> Result<bool, Error> {
                Ok(self.sign(k, data)? == sig)
            }
        }
        let mut sink = SignatureSink::external(Box::new(Reverse), SigningKey::Hmac(Vec::new()));
        sink.write_all(b"abc").unwrap();
        assert_eq!(sink.uri(), "urn:test:reverse");
        assert_eq!(sink.sign().unwrap(), b"cba");
    }

    #[test]
    fn test_unknown_signature_uri() {
        assert!(matches!(
            SignatureMethod::from_uri("urn:rsa"),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }
}
