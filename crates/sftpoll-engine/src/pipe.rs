//! In-process byte pipe connecting a download to the message processor.
//!
//! The writer blocks once `depth` chunks are buffered. Dropping the reader
//! makes further writes fail with [`io::ErrorKind::BrokenPipe`], which stops
//! the download. A writer that hits an error calls [`PipeWriter::abort`] so
//! the reader sees an error instead of a silently truncated body.

use std::io::{self, Read, Write};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};

/// Default number of in-flight chunks.
pub const DEFAULT_PIPE_DEPTH: usize = 16;

enum Chunk {
    Data(Vec<u8>),
    Failed(String),
}

/// Create a connected pipe holding at most `depth` chunks.
#[must_use]
pub fn pipe(depth: usize) -> (PipeWriter, PipeReader) {
    let (sender, receiver) = sync_channel(depth.max(1));
    (
        PipeWriter { sender },
        PipeReader {
            receiver,
            current: Vec::new(),
            offset: 0,
            failed: None,
        },
    )
}

/// Sending half; dropping it signals end of stream.
pub struct PipeWriter {
    sender: SyncSender<Chunk>,
}

impl PipeWriter {
    /// End the stream with an error visible to the reader.
    pub fn abort(self, message: impl Into<String>) {
        let _ = self.sender.send(Chunk::Failed(message.into()));
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.sender
            .send(Chunk::Data(buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Receiving half handed to the processor as the request body.
pub struct PipeReader {
    receiver: Receiver<Chunk>,
    current: Vec<u8>,
    offset: usize,
    failed: Option<String>,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset >= self.current.len() {
            if let Some(message) = &self.failed {
                return Err(io::Error::other(message.clone()));
            }
            match self.receiver.recv() {
                Ok(Chunk::Data(chunk)) => {
                    self.current = chunk;
                    self.offset = 0;
                }
                Ok(Chunk::Failed(message)) => self.failed = Some(message),
                Err(_) => return Ok(0),
            }
        }
        let available = &self.current[self.offset..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.offset += count;
        Ok(count)
    }
}
