use std::time::Duration;

use thiserror::Error;

use crate::sequencer::Stage;
use crate::settings::{AtCommand, SettingValue};

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("IO Error")]
    IoError(#[from] std::io::Error),
    #[error("Serialport Error")]
    SerialportError(#[from] serialport::Error),
    #[error("Device path is empty")]
    EmptyPath,
    #[error("Device path is {len} bytes long, at most {max} are allowed")]
    PathTooLong { len: usize, max: usize },
    #[error("Baud rate {0} is not supported")]
    UnsupportedBaud(u32),
    #[error("A port is already open on {0}")]
    AlreadyOpen(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingError {
    #[error("'{0}' is not a two character AT command")]
    InvalidCode(String),
    #[error("'{0}' is not a valid setting value")]
    InvalidValue(String),
    #[error("'{0}' is not of the form CODE=VALUE")]
    InvalidEntry(String),
    #[error("{0} appears more than once in the plan")]
    Duplicate(AtCommand),
}

#[derive(Error, Debug)]
pub enum DriverError {
    /// The request is still in flight. Tick the driver and ask again.
    #[error("Driver is busy")]
    Busy,
    #[error("IO Error")]
    IoError(#[from] std::io::Error),
    #[error("AT command layer is not ready")]
    NotReady,
    #[error("Radio did not enter command mode (replied '{0}')")]
    EnterCommandMode(String),
    #[error("{command} rejected: {reason}")]
    Rejected { command: AtCommand, reason: String },
    #[error("Batch {0} is not known to the driver")]
    UnknownBatch(u16),
    #[error("Too many outstanding batches")]
    BatchLimit,
}

/// The ways a bring-up attempt can fail. Each variant is distinct so a caller
/// can decide whether to retry, prompt the operator or give up.
#[derive(Error, Debug)]
pub enum BringUpError {
    #[error("Could not open {path}")]
    Open {
        path: String,
        #[source]
        source: DeviceError,
    },
    #[error("AT layer initialization failed")]
    Init(#[source] DriverError),
    #[error("Setting {command} was rejected")]
    InvalidSetting {
        command: AtCommand,
        #[source]
        source: DriverError,
    },
    #[error("{command} reads back {actual}, expected {expected}")]
    VerificationMismatch {
        command: AtCommand,
        expected: SettingValue,
        actual: SettingValue,
    },
    #[error("Query of {command} failed")]
    Query {
        command: AtCommand,
        #[source]
        source: DriverError,
    },
    #[error("{command} failed")]
    Command {
        command: AtCommand,
        #[source]
        source: DriverError,
    },
    #[error("No port is open")]
    NotOpen,
    #[error("Bring-up cancelled during {stage}")]
    Cancelled { stage: Stage },
    #[error("{stage} did not complete after {polls} polls ({elapsed:?})")]
    Timeout {
        stage: Stage,
        polls: u32,
        elapsed: Duration,
    },
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("IO Error")]
    IoError(#[from] std::io::Error),
    #[error("Cancelled after {count} messages")]
    Cancelled { count: usize },
    #[error("Radio is in API mode (AP={0}), set AP=0 to pass raw text")]
    ApiMode(SettingValue),
    #[error("Could not check the radio's mode")]
    ModeCheck(#[from] BringUpError),
}
