//! Sending and receiving test messages over a radio in transparent mode,
//! where every line written to the port goes out as a broadcast.

use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::devices::Transport;
use crate::driver::ProtocolDriver;
use crate::errors::LinkError;
use crate::io::{read_available, LineBuffer};
use crate::messages::{MessageTally, Received};
use crate::sequencer::{CancelToken, Sequencer};
use crate::settings::{AtCommand, SettingValue};

/// The default pause between two transmitted messages in milliseconds
pub const DEFAULT_TX_INTERVAL_MS: u64 = 100;

/// The default time to wait for all expected messages in seconds
pub const DEFAULT_RX_TIMEOUT_SECS: u64 = 60;

/// Checks that the radio on the sequencer's port passes raw text through,
/// which it only does with API mode off (`AP=0`).
///
/// The radio is taken out of command mode again before returning.
pub fn check_transparent<T, D>(
    sequencer: &mut Sequencer<T, D>,
    cancel: &CancelToken,
) -> Result<(), LinkError>
where
    T: Transport,
    D: ProtocolDriver<T::Port>,
{
    let settings = sequencer.read_settings(&[AtCommand::AP], cancel)?;
    sequencer.execute(AtCommand::CN, cancel)?;

    let mode = settings
        .into_iter()
        .next()
        .map(|s| s.value().clone())
        .unwrap_or(SettingValue::Int(0));
    if !mode.matches(&SettingValue::Int(0)) {
        return Err(LinkError::ApiMode(mode));
    }

    debug!("Radio is in transparent mode");
    Ok(())
}

/// Writes every message as one line, pausing `interval` after each.
///
/// Returns the number of messages sent.
pub fn transmit<W: Write + ?Sized>(
    port: &mut W,
    messages: &[String],
    interval: Duration,
    cancel: &CancelToken,
) -> Result<usize, LinkError> {
    let mut sent = 0;

    for message in messages {
        if cancel.is_cancelled() {
            info!("Cancelled while transmitting");
            return Err(LinkError::Cancelled { count: sent });
        }

        // Send the next message
        info!("Sending message number: {}", sent + 1);
        port.write_all(message.as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()?;
        sent += 1;

        thread::sleep(interval);
    }

    info!("Sent {sent} messages!");
    Ok(sent)
}

#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// How long to wait for the expected messages overall
    pub timeout: Duration,
    /// Pause when nothing was received
    pub poll_interval: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        ReceiveOptions {
            timeout: Duration::from_secs(DEFAULT_RX_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// How a receive run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Every expected message arrived
    Complete,
    /// The timeout passed first
    TimedOut,
}

/// Reads lines from the port into `tally` until every expected message
/// arrived or the timeout passes.
pub fn receive<R: Read + ?Sized>(
    port: &mut R,
    tally: &mut MessageTally,
    options: &ReceiveOptions,
    cancel: &CancelToken,
) -> Result<ReceiveOutcome, LinkError> {
    let started = Instant::now();
    let mut lines = LineBuffer::new(b'\n');
    let mut buf = [0u8; 256];

    while !tally.is_complete() {
        if cancel.is_cancelled() {
            info!("Cancelled while receiving");
            return Err(LinkError::Cancelled {
                count: tally.matched(),
            });
        }
        if started.elapsed() >= options.timeout {
            return Ok(ReceiveOutcome::TimedOut);
        }

        let n = read_available(port, &mut buf)?;
        if n == 0 {
            thread::sleep(options.poll_interval);
            continue;
        }

        lines.feed(&buf[..n]);
        while let Some(line) = lines.next_line() {
            match tally.record(&line) {
                Received::Matched => debug!("Received expected message {}", tally.matched()),
                Received::Duplicate => info!("Received a duplicate of '{line}'"),
                Received::Unexpected => info!("Received unexpected message '{line}'"),
            }
        }
    }

    Ok(ReceiveOutcome::Complete)
}
