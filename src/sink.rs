use crate::output::SharedWriter;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

/// Destination of records produced by a [`TaskLogger`](crate::logger::TaskLogger).
///
/// The variant tells the upload handoff whether there is a local file to
/// ship: only [`LogSink::File`] has one.
#[derive(Clone, Debug)]
pub enum LogSink {
    File(FileSink),
    Stream(StreamSink),
    /// Drops every record.
    Null,
}

impl LogSink {
    /// Open (or create) `path` for appending.
    pub fn open_file(path: impl Into<PathBuf>) -> io::Result<Self> {
        FileSink::open(path).map(LogSink::File)
    }

    pub fn stdout() -> Self {
        LogSink::Stream(StreamSink::stdout())
    }

    /// Path of the underlying local file, if this sink writes to one.
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            LogSink::File(file) => Some(file.path()),
            LogSink::Stream(_) | LogSink::Null => None,
        }
    }

    /// File descriptor number for standard streams.
    pub fn fd(&self) -> Option<i32> {
        match self {
            LogSink::Stream(stream) => stream.fd(),
            LogSink::File(_) | LogSink::Null => None,
        }
    }

    /// Write one complete, newline-terminated frame.
    ///
    /// **Returns**
    /// - `Ok(())` once the frame is written and flushed, or immediately
    ///   for [`LogSink::Null`].
    /// - `Err(..)` if the underlying writer failed.
    pub fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        match self {
            LogSink::File(file) => file.writer.write_frame(frame),
            LogSink::Stream(stream) => stream.writer.write_frame(frame),
            LogSink::Null => Ok(()),
        }
    }
}

/// Local log file opened for appending.
#[derive(Clone, Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: SharedWriter,
}

impl FileSink {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: SharedWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A stream that is not a named file: a standard stream or any writer.
#[derive(Clone, Debug)]
pub struct StreamSink {
    fd: Option<i32>,
    writer: SharedWriter,
}

impl StreamSink {
    pub fn new(writer: SharedWriter) -> Self {
        Self { fd: None, writer }
    }

    pub fn stdout() -> Self {
        Self {
            fd: Some(1),
            writer: SharedWriter::stdout(),
        }
    }

    pub fn stderr() -> Self {
        Self {
            fd: Some(2),
            writer: SharedWriter::stderr(),
        }
    }

    pub fn fd(&self) -> Option<i32> {
        self.fd
    }

    pub fn writer(&self) -> &SharedWriter {
        &self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::MemoryWriter;

    #[test]
    fn only_file_sinks_expose_a_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.log");
        let file = LogSink::open_file(&path).unwrap();
        assert_eq!(file.file_path(), Some(path.as_path()));

        assert_eq!(LogSink::stdout().file_path(), None);
        assert_eq!(LogSink::stdout().fd(), Some(1));
        assert_eq!(LogSink::Null.file_path(), None);
    }

    #[test]
    fn file_sink_appends_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.log");
        let sink = LogSink::open_file(&path).unwrap();
        sink.write_frame(b"one\n").unwrap();
        sink.write_frame(b"two\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn stream_sink_writes_to_its_writer() {
        let mem = MemoryWriter::new();
        let sink = LogSink::Stream(StreamSink::new(SharedWriter::new(mem.clone())));
        sink.write_frame(b"frame\n").unwrap();
        assert_eq!(mem.contents(), b"frame\n");
        assert_eq!(sink.fd(), None);
        LogSink::Null.write_frame(b"dropped\n").unwrap();
    }
}
