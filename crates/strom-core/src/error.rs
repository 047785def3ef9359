#![forbid(unsafe_code)]

/// Errors produced by the strom streaming XML security pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("maximum allowed XML structure depth ({max}) exceeded")]
    StructureTooDeep { max: usize },

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("signature computation failed: {0}")]
    SignatureComputation(String),

    #[error("resolution of `{uri}` failed: {reason}")]
    ResolutionFailed { uri: String, reason: String },

    #[error("no more elements: the event stream already ended")]
    NoMoreElements,

    #[error("stream protocol violation: {0}")]
    StreamProtocol(String),

    #[error("signature part `{requested}` overlaps active part `{active}`")]
    OverlappingParts { active: String, requested: String },

    #[error("duplicate ID attribute value: {0}")]
    DuplicateId(String),

    #[error("missing element: {0}")]
    MissingElement(String),

    #[error("missing attribute: {0}")]
    MissingAttribute(String),

    #[error("canonicalization error: {0}")]
    Canonicalization(String),

    #[error("transform error: {0}")]
    Transform(String),

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors caused by the caller or the token producer misusing the stream.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::NoMoreElements | Error::StreamProtocol(_) | Error::OverlappingParts { .. }
        )
    }

    /// Wrap an I/O failure raised while digesting into the
    /// signature-computation kind.
    pub fn computation(context: &str, err: impl std::fmt::Display) -> Self {
        Error::SignatureComputation(format!("{context}: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::OverlappingParts {
            active: "a".into(),
            requested: "b".into()
        }
        .is_protocol_violation());
        assert!(!Error::StructureTooDeep { max: 3 }.is_protocol_violation());
        assert!(Error::NoMoreElements.is_protocol_violation());
        assert!(!Error::Base64("bad".into()).is_protocol_violation());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("eof"));
    }
}
