//! Output streams the pipeline writes to.
//!
//! A [`SharedWriter`] is a cloneable handle to one byte-oriented writer.
//! [`OutputStream`] is what callers hand to the configurator: either a byte
//! stream or a text stream, which may or may not expose a byte buffer.

use crate::error::ConfigurationError;
use std::fmt;
use std::io::{self, LineWriter, Write};
use std::sync::{Arc, Mutex, MutexGuard};

/// Cloneable, thread-safe handle to a byte writer.
#[derive(Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<dyn Write + Send>>,
}

impl SharedWriter {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Identity of the underlying writer; clones share it.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    /// Write a complete frame and flush it.
    pub fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut guard = self.lock()?;
        guard.write_all(frame)?;
        guard.flush()
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, dyn Write + Send + 'static>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

impl fmt::Debug for SharedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedWriter").field("id", &self.id()).finish()
    }
}

/// A text-oriented stream.
///
/// `buffer` exposes the byte channel underneath, when there is one; the
/// structured (JSON) mode needs it.
pub trait TextStream: Send {
    fn write_str(&mut self, s: &str) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    fn buffer(&self) -> Option<SharedWriter> {
        None
    }
}

/// Text view over a byte writer, like a process's standard streams.
pub struct BufferedText {
    buffer: SharedWriter,
}

impl BufferedText {
    pub fn new(buffer: SharedWriter) -> Self {
        Self { buffer }
    }

    pub fn stdout() -> Self {
        Self::new(SharedWriter::stdout())
    }
}

impl TextStream for BufferedText {
    fn write_str(&mut self, s: &str) -> io::Result<()> {
        self.buffer.write_all(s.as_bytes())
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(&mut self.buffer)
    }

    fn buffer(&self) -> Option<SharedWriter> {
        Some(self.buffer.clone())
    }
}

#[derive(Clone)]
pub struct SharedText {
    inner: Arc<Mutex<dyn TextStream>>,
}

impl SharedText {
    pub fn new<T: TextStream + 'static>(stream: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(stream)),
        }
    }

    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, dyn TextStream + 'static>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("text stream lock poisoned"))
    }

    pub fn buffer(&self) -> Option<SharedWriter> {
        self.lock().ok().and_then(|stream| stream.buffer())
    }
}

/// Adapts a text stream to `io::Write`; bytes are decoded lossily.
struct TextWriter(SharedText);

impl Write for TextWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock()?.write_str(&String::from_utf8_lossy(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock()?.flush()
    }
}

/// Destination handed to the configurator.
#[derive(Clone)]
pub enum OutputStream {
    Text(SharedText),
    Binary(SharedWriter),
}

impl OutputStream {
    pub fn text<T: TextStream + 'static>(stream: T) -> Self {
        OutputStream::Text(SharedText::new(stream))
    }

    pub fn binary<W: Write + Send + 'static>(writer: W) -> Self {
        OutputStream::Binary(SharedWriter::new(writer))
    }

    /// Identity used when memoizing configurations.
    pub fn id(&self) -> usize {
        match self {
            OutputStream::Text(text) => text.id(),
            OutputStream::Binary(writer) => writer.id(),
        }
    }

    /// Writer for pretty output. Byte streams get a line-buffered wrapper.
    pub fn into_text_writer(self) -> SharedWriter {
        match self {
            OutputStream::Text(text) => SharedWriter::new(TextWriter(text)),
            OutputStream::Binary(writer) => SharedWriter::new(LineWriter::new(writer)),
        }
    }

    /// Writer for structured output: the stream itself or a text stream's buffer.
    pub fn into_binary_writer(self) -> Result<SharedWriter, ConfigurationError> {
        match self {
            OutputStream::Binary(writer) => Ok(writer),
            OutputStream::Text(text) => text.buffer().ok_or(ConfigurationError::OutputNotBinary),
        }
    }
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Text(text) => f.debug_tuple("Text").field(&text.id()).finish(),
            OutputStream::Binary(writer) => f.debug_tuple("Binary").field(&writer.id()).finish(),
        }
    }
}

/// In-memory byte buffer, handy for capturing output.
#[derive(Clone, Default)]
pub struct MemoryWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn contents_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf
            .lock()
            .map_err(|_| io::Error::other("memory writer lock poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PlainText(Arc<Mutex<String>>);

    impl TextStream for PlainText {
        fn write_str(&mut self, s: &str) -> io::Result<()> {
            self.0.lock().unwrap().push_str(s);
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn text_stream_without_buffer_cannot_be_binary() {
        let out = OutputStream::text(PlainText(Arc::default()));
        assert!(matches!(out.into_binary_writer(), Err(ConfigurationError::OutputNotBinary)));
    }

    #[test]
    fn text_stream_with_buffer_yields_its_buffer() {
        let mem = MemoryWriter::new();
        let buffer = SharedWriter::new(mem.clone());
        let out = OutputStream::text(BufferedText::new(buffer.clone()));
        let writer = out.into_binary_writer().unwrap();
        assert_eq!(writer.id(), buffer.id());
        writer.write_frame(b"{}\n").unwrap();
        assert_eq!(mem.contents(), b"{}\n");
    }

    #[test]
    fn binary_stream_is_line_buffered_for_text() {
        let mem = MemoryWriter::new();
        let mut writer = OutputStream::binary(mem.clone()).into_text_writer();
        writer.write_all(b"partial").unwrap();
        assert!(mem.contents().is_empty());
        writer.write_all(b" line\n").unwrap();
        assert_eq!(mem.contents_lossy(), "partial line\n");
    }

    #[test]
    fn text_writer_forwards_to_text_stream() {
        let text = Arc::new(Mutex::new(String::new()));
        let writer = OutputStream::text(PlainText(text.clone())).into_text_writer();
        writer.write_frame("héllo\n".as_bytes()).unwrap();
        assert_eq!(*text.lock().unwrap(), "héllo\n");
    }

    #[test]
    fn clones_share_identity() {
        let writer = SharedWriter::new(MemoryWriter::new());
        assert_eq!(writer.id(), writer.clone().id());
        assert_ne!(writer.id(), SharedWriter::new(MemoryWriter::new()).id());
    }
}
