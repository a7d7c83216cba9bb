//! Small helpers for line oriented serial traffic.

use std::io::{ErrorKind, Read};

/// Reads whatever is available on the port into `buf`.
///
/// A read timeout is not an error on a serial port, it just means nothing
/// arrived, so it is reported as zero bytes.
pub fn read_available<R: Read + ?Sized>(port: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    match port.read(buf) {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => Ok(0),
        Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
        Err(e) => Err(e),
    }
}

/// Accumulates bytes and hands them back one delimited line at a time.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    buf: Vec<u8>,
    delimiter: u8,
}

impl LineBuffer {
    pub fn new(delimiter: u8) -> Self {
        LineBuffer {
            buf: Vec::new(),
            delimiter,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete line with the delimiter and any stray `\r` or
    /// `\n` stripped. Empty lines are skipped.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let end = self.buf.iter().position(|b| *b == self.delimiter)?;
            let line: Vec<u8> = self.buf.drain(..=end).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_matches(|c| c == '\r' || c == '\n');
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }

    /// Bytes received after the last delimiter.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
