//! Frame assembly over a byte stream.
//!
//! Every frame is an 8 byte header holding the body length as zero-padded
//! ASCII decimal, followed by the body. Each call to [`Framer::read_frame`]
//! performs at most one read, so a non-blocking stream can be polled.

use crate::error::{Error, Result};
use std::io::{ErrorKind, Read};
use std::ops::Deref;

pub const HEADER_LEN: usize = 8;

/// Largest body an 8 digit header can describe.
pub const MAX_FRAME_LEN: usize = 99_999_999;

const READ_CHUNK: usize = 8 * 1024;

/// Where the framer is in the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    AwaitingHeader,
    AwaitingBody,
    Disconnected,
}

/// One complete frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

pub struct Framer<R> {
    reader: R,
    buffer: Vec<u8>,
    cursor: Cursor,
    frame_len: usize,
}

impl<R: Read> Framer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(READ_CHUNK),
            cursor: Cursor::AwaitingHeader,
            frame_len: HEADER_LEN,
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Bytes received but not yet returned in a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete frame, `None` while it is still incomplete.
    ///
    /// Returns `Disconnected` once the peer has closed the stream and
    /// `MalformedFrame` for a header that is not a decimal length. Both are
    /// terminal.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.take_frame()? {
            return Ok(Some(frame));
        }
        if !self.fill()? {
            return Ok(None);
        }
        self.take_frame()
    }

    fn take_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.cursor {
                Cursor::Disconnected => return Err(Error::Disconnected),
                Cursor::AwaitingHeader => {
                    if self.buffer.len() < HEADER_LEN {
                        return Ok(None);
                    }
                    self.frame_len = self.parse_frame_len()?;
                    self.buffer.drain(..HEADER_LEN);
                    self.cursor = Cursor::AwaitingBody;
                }
                Cursor::AwaitingBody => {
                    if self.buffer.len() < self.frame_len {
                        return Ok(None);
                    }
                    let body: Vec<u8> = self.buffer.drain(..self.frame_len).collect();
                    self.cursor = Cursor::AwaitingHeader;
                    self.frame_len = HEADER_LEN;
                    return Ok(Some(Frame(body)));
                }
            }
        }
    }

    fn parse_frame_len(&mut self) -> Result<usize> {
        let header = &self.buffer[..HEADER_LEN];
        let parsed = std::str::from_utf8(header)
            .ok()
            .filter(|text| text.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|text| text.parse::<usize>().ok());

        match parsed {
            Some(len) => Ok(len),
            None => {
                let header = String::from_utf8_lossy(header).into_owned();
                self.cursor = Cursor::Disconnected;
                Err(Error::MalformedFrame { header })
            }
        }
    }

    /// One read from the stream. False if nothing was available.
    fn fill(&mut self) -> Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => {
                    self.cursor = Cursor::Disconnected;
                    return Err(Error::Disconnected);
                }
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    return Ok(true);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(err) => {
                    self.cursor = Cursor::Disconnected;
                    return Err(err.into());
                }
            }
        }
    }
}

/// Header plus body, ready to write to a stream.
pub fn encode_frame(body: &[u8]) -> Result<Vec<u8>> {
    if body.len() > MAX_FRAME_LEN {
        return Err(Error::InvalidArgument(format!(
            "frame body of {} bytes exceeds {} bytes",
            body.len(),
            MAX_FRAME_LEN
        )));
    }
    let mut frame = format!("{:0width$}", body.len(), width = HEADER_LEN).into_bytes();
    frame.extend_from_slice(body);
    Ok(frame)
}
