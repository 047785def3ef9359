#![forbid(unsafe_code)]

//! Terminal byte sinks.
//!
//! An [`OutputSink`] is the end of a transform pipeline: a writer that is
//! closed exactly once and then yields its value (a digest, a signature,
//! or the collected bytes). Closing consumes the sink, so a closed sink
//! cannot be written to or closed again.

use std::io::{self, BufWriter, Write};
use strom_core::Error;

/// A writer that produces a value when closed.
pub trait OutputSink: Write + Send {
    /// Flush pending bytes and return the sink's value.
    fn close(self: Box<Self>) -> Result<Vec<u8>, Error>;
}

/// Collects every byte written.
#[derive(Debug, Default)]
pub struct VecSink {
    buf: Vec<u8>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Write for VecSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl OutputSink for VecSink {
    fn close(self: Box<Self>) -> Result<Vec<u8>, Error> {
        Ok(self.buf)
    }
}

/// Buffers small writes in front of another sink.
pub struct BufferedSink {
    inner: BufWriter<Box<dyn OutputSink>>,
}

impl BufferedSink {
    pub fn new(inner: Box<dyn OutputSink>) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }
}

impl Write for BufferedSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.inner.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl OutputSink for BufferedSink {
    fn close(self: Box<Self>) -> Result<Vec<u8>, Error> {
        let inner = self
            .inner
            .into_inner()
            .map_err(|e| Error::computation("flushing buffered sink", e.error()))?;
        inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl OutputSink for FailingSink {
        fn close(self: Box<Self>) -> Result<Vec<u8>, Error> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_buffered_passes_through() {
        let mut sink = Box::new(BufferedSink::new(Box::new(VecSink::new())));
        sink.write_all(b"hello ").unwrap();
        sink.write_all(b"world").unwrap();
        assert_eq!(sink.close().unwrap(), b"hello world");
    }

    #[test]
    fn test_flush_failure_on_close() {
        let mut sink = Box::new(BufferedSink::new(Box::new(FailingSink)));
        // Buffered, so the write itself succeeds.
        sink.write_all(b"data").unwrap();
        let err = sink.close().unwrap_err();
        assert!(matches!(err, Error::SignatureComputation(_)));
    }
}
