//! Test messages for link checks between two radios: reading them from a
//! file, generating random ones, and tallying what was received.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use rand::Rng;
use tracing::{debug, info};

/// The default number of messages in a message file
pub const DEFAULT_MESSAGE_COUNT: usize = 50;
/// The default shortest generated message
pub const DEFAULT_MIN_LEN: usize = 60;
/// The default longest generated message
pub const DEFAULT_MAX_LEN: usize = 90;

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ ";

/// Reads up to `max_count` messages, one per line.
///
/// A line longer than `max_payload` characters becomes several messages of
/// at most `max_payload` characters each, so every message fits one frame.
pub fn read_messages<R: BufRead>(
    reader: R,
    max_count: usize,
    max_payload: usize,
) -> std::io::Result<Vec<String>> {
    let mut messages = Vec::new();
    let max_payload = max_payload.max(1);

    for line in reader.lines() {
        let line = line?;
        let chars: Vec<char> = line.trim_end_matches('\r').chars().collect();

        for piece in chars.chunks(max_payload) {
            if messages.len() == max_count {
                return Ok(messages);
            }
            messages.push(piece.iter().collect());
        }
    }

    Ok(messages)
}

/// Opens `path` and reads its messages with `read_messages`.
pub fn load_messages(
    path: impl AsRef<Path>,
    max_count: usize,
    max_payload: usize,
) -> std::io::Result<Vec<String>> {
    let path = path.as_ref();
    debug!("Reading messages from {}", path.display());
    let file = File::open(path)?;
    read_messages(BufReader::new(file), max_count, max_payload)
}

/// Generates `count` lines of random letters and spaces, each between
/// `min_len` and `max_len` characters long.
pub fn generate_messages<R: Rng>(
    rng: &mut R,
    count: usize,
    min_len: usize,
    max_len: usize,
) -> Vec<String> {
    let max_len = max_len.max(min_len);

    (0..count)
        .map(|_| {
            let len = rng.random_range(min_len..=max_len);
            (0..len)
                .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
                .collect()
        })
        .collect()
}

/// Writes one message per line to `path`.
pub fn save_messages(path: impl AsRef<Path>, messages: &[String]) -> std::io::Result<()> {
    let path = path.as_ref();
    info!("Writing {} messages to {}", messages.len(), path.display());

    let mut out = BufWriter::new(File::create(path)?);
    for message in messages {
        writeln!(out, "{message}")?;
    }
    out.flush()
}

/// How a received message relates to the expected ones.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Received {
    /// It was expected and had not been seen yet
    Matched,
    /// It was expected but every copy has already been seen
    Duplicate,
    /// It was not expected at all
    Unexpected,
}

/// Counts received messages against the expected ones.
#[derive(Clone, Debug, Default)]
pub struct MessageTally {
    expected: Vec<String>,
    /// How many more copies of each message are still to come
    remaining: HashMap<String, usize>,
    matched: usize,
    duplicates: usize,
    unexpected: Vec<String>,
}

impl MessageTally {
    pub fn new(expected: Vec<String>) -> Self {
        let mut remaining = HashMap::new();
        for message in &expected {
            *remaining.entry(message.clone()).or_insert(0) += 1;
        }

        MessageTally {
            expected,
            remaining,
            ..Default::default()
        }
    }

    /// Records one received message.
    pub fn record(&mut self, message: &str) -> Received {
        match self.remaining.get_mut(message) {
            Some(left) if *left > 0 => {
                *left -= 1;
                self.matched += 1;
                Received::Matched
            }
            Some(_) => {
                self.duplicates += 1;
                Received::Duplicate
            }
            None => {
                self.unexpected.push(message.to_string());
                Received::Unexpected
            }
        }
    }

    pub fn expected(&self) -> usize {
        self.expected.len()
    }

    pub fn matched(&self) -> usize {
        self.matched
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn unexpected(&self) -> &[String] {
        &self.unexpected
    }

    /// Returns true once every expected message has been received.
    pub fn is_complete(&self) -> bool {
        self.matched == self.expected.len()
    }

    /// The expected messages that have not arrived, in file order.
    pub fn missing(&self) -> Vec<&str> {
        // Count how many copies of each message arrived
        let mut arrived: HashMap<&str, usize> = HashMap::new();
        for message in &self.expected {
            *arrived.entry(message.as_str()).or_insert(0) += 1;
        }
        for (message, left) in &self.remaining {
            if let Some(n) = arrived.get_mut(message.as_str()) {
                *n -= left;
            }
        }

        // Earlier copies of a message count as received first
        self.expected
            .iter()
            .map(String::as_str)
            .filter(|message| match arrived.get_mut(message) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    false
                }
                _ => true,
            })
            .collect()
    }
}

impl fmt::Display for MessageTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received {} of {} expected messages ({} duplicates, {} unexpected)",
            self.matched,
            self.expected.len(),
            self.duplicates,
            self.unexpected.len()
        )
    }
}
