#![forbid(unsafe_code)]

//! Digest (hash) algorithms and the streaming digest sink.

use crate::sink::OutputSink;
use digest::Digest;
use std::io::{self, Write};
use strom_core::{algorithm, Error};

/// Trait for digest algorithms.
pub trait DigestAlgorithm: Send {
    /// Feed data into the hash.
    fn update(&mut self, data: &[u8]);
    /// Finalize and return the hash value.
    fn finalize(self: Box<Self>) -> Vec<u8>;
    /// Algorithm URI.
    fn uri(&self) -> &'static str;
}

/// The closed set of supported digest methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestMethod {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
    #[cfg(feature = "legacy-algorithms")]
    Md5,
    #[cfg(feature = "legacy-algorithms")]
    Ripemd160,
}

impl DigestMethod {
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Sha1 => algorithm::SHA1,
            Self::Sha224 => algorithm::SHA224,
            Self::Sha256 => algorithm::SHA256,
            Self::Sha384 => algorithm::SHA384,
            Self::Sha512 => algorithm::SHA512,
            Self::Sha3_224 => algorithm::SHA3_224,
            Self::Sha3_256 => algorithm::SHA3_256,
            Self::Sha3_384 => algorithm::SHA3_384,
            Self::Sha3_512 => algorithm::SHA3_512,
            #[cfg(feature = "legacy-algorithms")]
            Self::Md5 => algorithm::MD5,
            #[cfg(feature = "legacy-algorithms")]
            Self::Ripemd160 => algorithm::RIPEMD160,
        }
    }

    /// Resolve a digest method URI.
    pub fn from_uri(uri: &str) -> Result<Self, Error> {
        Ok(match uri {
            algorithm::SHA1 => Self::Sha1,
            algorithm::SHA224 => Self::Sha224,
            algorithm::SHA256 => Self::Sha256,
            algorithm::SHA384 => Self::Sha384,
            algorithm::SHA512 => Self::Sha512,
            algorithm::SHA3_224 => Self::Sha3_224,
            algorithm::SHA3_256 => Self::Sha3_256,
            algorithm::SHA3_384 => Self::Sha3_384,
            algorithm::SHA3_512 => Self::Sha3_512,
            #[cfg(feature = "legacy-algorithms")]
            algorithm::MD5 => Self::Md5,
            #[cfg(feature = "legacy-algorithms")]
            algorithm::RIPEMD160 => Self::Ripemd160,
            _ => {
                return Err(Error::UnsupportedAlgorithm(format!(
                    "digest algorithm: {uri}"
                )))
            }
        })
    }

    /// A fresh hasher for this method.
    pub fn hasher(&self) -> Box<dyn DigestAlgorithm> {
        match self {
            Self::Sha1 => Box::new(Sha1Digest::new()),
            Self::Sha224 => Box::new(Sha224Digest::new()),
            Self::Sha256 => Box::new(Sha256Digest::new()),
            Self::Sha384 => Box::new(Sha384Digest::new()),
            Self::Sha512 => Box::new(Sha512Digest::new()),
            Self::Sha3_224 => Box::new(Sha3_224Digest::new()),
            Self::Sha3_256 => Box::new(Sha3_256Digest::new()),
            Self::Sha3_384 => Box::new(Sha3_384Digest::new()),
            Self::Sha3_512 => Box::new(Sha3_512Digest::new()),
            #[cfg(feature = "legacy-algorithms")]
            Self::Md5 => Box::new(Md5Digest::new()),
            #[cfg(feature = "legacy-algorithms")]
            Self::Ripemd160 => Box::new(Ripemd160Digest::new()),
        }
    }

    /// A digest sink for this method.
    pub fn sink(&self) -> DigestSink {
        DigestSink::new(self.hasher())
    }

    /// Compute a digest in one shot.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }
}

/// Create a digest algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn DigestAlgorithm>, Error> {
    DigestMethod::from_uri(uri).map(|m| m.hasher())
}

/// Compute a digest in one shot.
pub fn digest(uri: &str, data: &[u8]) -> Result<Vec<u8>, Error> {
    Ok(DigestMethod::from_uri(uri)?.digest(data))
}

/// Streaming accumulator over a digest algorithm.
///
/// Bytes written update the hash; [`OutputSink::close`] finalizes it.
pub struct DigestSink {
    hasher: Box<dyn DigestAlgorithm>,
    written: u64,
}

impl DigestSink {
    pub fn new(hasher: Box<dyn DigestAlgorithm>) -> Self {
        Self { hasher, written: 0 }
    }

    pub fn uri(&self) -> &'static str {
        self.hasher.uri()
    }

    /// Number of bytes fed into the hash so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl Write for DigestSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.hasher.update(data);
        self.written += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl OutputSink for DigestSink {
    fn close(self: Box<Self>) -> Result<Vec<u8>, Error> {
        Ok(self.hasher.finalize())
    }
}

// ── Concrete implementations ─────────────────────────────────────────

macro_rules! impl_digest {
    ($name:ident, $hasher:ty, $uri:expr) => {
        struct $name {
            inner: $hasher,
        }

        impl $name {
            fn new() -> Self {
                Self {
                    inner: <$hasher>::new(),
                }
            }
        }

        impl DigestAlgorithm for $name {
            fn update(&mut self, data: &[u8]) {
                Digest::update(&mut self.inner, data);
            }

            fn finalize(self: Box<Self>) -> Vec<u8> {
                Digest::finalize(self.inner).to_vec()
            }

            fn uri(&self) -> &'static str {
                $uri
            }
        }
    };
}

impl_digest!(Sha1Digest, sha1::Sha1, algorithm::SHA1);
impl_digest!(Sha224Digest, sha2::Sha224, algorithm::SHA224);
impl_digest!(Sha256Digest, sha2::Sha256, algorithm::SHA256);
impl_digest!(Sha384Digest, sha2::Sha384, algorithm::SHA384);
impl_digest!(Sha512Digest, sha2::Sha512, algorithm::SHA512);
impl_digest!(Sha3_224Digest, sha3::Sha3_224, algorithm::SHA3_224);
impl_digest!(Sha3_256Digest, sha3::Sha3_256, algorithm::SHA3_256);
impl_digest!(Sha3_384Digest, sha3::Sha3_384, algorithm::SHA3_384);
impl_digest!(Sha3_512Digest, sha3::Sha3_512, algorithm::SHA3_512);

#[cfg(feature = "legacy-algorithms")]
impl_digest!(Md5Digest, md5::Md5, algorithm::MD5);

#[cfg(feature = "legacy-algorithms")]
impl_digest!(Ripemd160Digest, ripemd::Ripemd160, algorithm::RIPEMD160);
