//! # Byte Sources
//!
//! The dispatcher reads each transport through [`ByteSource`]. A source is an
//! ordered byte stream with a bounded-wait read, so the worker polling it can
//! notice its stop flag.
//!
//! Two sources ship with the library:
//!
//! - [`FileSource`]: replays a raw capture file in fixed-size chunks
//! - [`ChannelSource`]: receives chunks pushed from elsewhere in the process

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

/// Outcome of one bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received
{
    Data(Vec<u8>),
    /// Nothing arrived within the timeout
    Timeout,
    /// The stream ended; the worker stops
    Eof,
}

/// An opaque, ordered byte stream.
pub trait ByteSource: Send
{
    /// Transport name; becomes the alias of every record it produces.
    fn name(&self) -> &str;

    /// Wait at most `timeout` for the next chunk.
    fn receive(&mut self, timeout: Duration) -> io::Result<Received>;

    fn close(&mut self) -> io::Result<()>;
}

const DEFAULT_CHUNK: usize = 4096;

/// Raw capture file read front to back.
pub struct FileSource
{
    name: String,
    file: Option<File>,
    chunk: usize,
}

impl FileSource
{
    pub fn open(path: &Path) -> io::Result<Self>
    {
        let file = File::open(path)?;
        Ok(Self {
            name: path.display().to_string(),
            file: Some(file),
            chunk: DEFAULT_CHUNK,
        })
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self
    {
        self.name = name.into();
        self
    }

    /// Read at most `chunk` bytes per call (minimum 1).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk: usize) -> Self
    {
        self.chunk = chunk.max(1);
        self
    }
}

impl ByteSource for FileSource
{
    fn name(&self) -> &str
    {
        &self.name
    }

    fn receive(&mut self, _timeout: Duration) -> io::Result<Received>
    {
        let Some(file) = self.file.as_mut() else {
            return Ok(Received::Eof);
        };
        let mut buf = vec![0; self.chunk];
        let read = file.read(&mut buf)?;
        if read == 0 {
            return Ok(Received::Eof);
        }
        buf.truncate(read);
        Ok(Received::Data(buf))
    }

    fn close(&mut self) -> io::Result<()>
    {
        self.file = None;
        Ok(())
    }
}

/// Chunks handed over through an in-process channel.
///
/// The stream ends once every sender has been dropped.
pub struct ChannelSource
{
    name: String,
    receiver: Option<mpsc::Receiver<Vec<u8>>>,
}

impl ChannelSource
{
    /// Create a source and the sender feeding it.
    #[must_use]
    pub fn pair(name: impl Into<String>) -> (mpsc::Sender<Vec<u8>>, Self)
    {
        let (sender, receiver) = mpsc::channel();
        (
            sender,
            Self {
                name: name.into(),
                receiver: Some(receiver),
            },
        )
    }
}

impl ByteSource for ChannelSource
{
    fn name(&self) -> &str
    {
        &self.name
    }

    fn receive(&mut self, timeout: Duration) -> io::Result<Received>
    {
        let Some(receiver) = self.receiver.as_ref() else {
            return Ok(Received::Eof);
        };
        match receiver.recv_timeout(timeout) {
            Ok(chunk) => Ok(Received::Data(chunk)),
            Err(RecvTimeoutError::Timeout) => Ok(Received::Timeout),
            Err(RecvTimeoutError::Disconnected) => Ok(Received::Eof),
        }
    }

    fn close(&mut self) -> io::Result<()>
    {
        self.receiver = None;
        Ok(())
    }
}
