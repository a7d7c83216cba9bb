#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::time::Duration;

use xbee_bringup::{
    AtCommand, BatchToken, CancelToken, DeviceError, DriverError, InitStatus, ProtocolDriver,
    SequencerConfig, SerialConfig, SettingCommand, SettingValue, Transport,
};

/// A port that never produces any bytes and swallows everything written.
#[derive(Debug, Default)]
pub struct FakePort {
    pub path: String,
    pub written: Vec<u8>,
}

impl Read for FakePort {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for FakePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hands out `FakePort`s and counts opens and closes.
#[derive(Debug, Default)]
pub struct FakeTransport {
    /// Paths that fail to open
    pub missing: Vec<String>,
    pub opened: Vec<SerialConfig>,
    pub closed: usize,
}

impl Transport for FakeTransport {
    type Port = FakePort;

    fn open(&mut self, config: &SerialConfig) -> Result<FakePort, DeviceError> {
        if self.missing.iter().any(|p| p == config.device_path()) {
            return Err(DeviceError::IoError(io::Error::new(
                io::ErrorKind::NotFound,
                "no such device",
            )));
        }
        self.opened.push(config.clone());
        Ok(FakePort {
            path: config.device_path().to_string(),
            written: Vec::new(),
        })
    }

    fn close(&mut self, _port: FakePort) {
        self.closed += 1;
    }
}

/// A scripted driver. The public fields before the blank line script its
/// behaviour, the ones after record how it was used.
#[derive(Debug, Default)]
pub struct FakeDriver {
    /// `init` reports `Busy` this many times before `Ready`
    pub busy_polls: u32,
    pub never_ready: bool,
    pub init_error: bool,
    /// `append_setting` rejects this command
    pub reject: Option<AtCommand>,
    pub fail_create: bool,
    pub fail_commit: bool,
    /// Values the radio reports regardless of what was written
    pub values: HashMap<AtCommand, SettingValue>,
    /// `query` reports `Busy` this many times per command
    pub query_busy_polls: u32,
    /// Cancels the token on the given `init` call
    pub cancel_on_init_poll: Option<(u32, CancelToken)>,
    /// Cancels the token when a setting is queued
    pub cancel_on_append: Option<CancelToken>,
    /// Cancels the token on the given `query` call
    pub cancel_on_query: Option<(u32, CancelToken)>,
    /// `query` of this command fails outright
    pub query_error: Option<AtCommand>,
    /// The radio answers the commit, but refuses it
    pub refuse_commit: bool,
    /// `outcome` reports `Busy` this many times
    pub outcome_busy_polls: u32,

    pub init_calls: u32,
    pub ticks: u32,
    pub acquired: u32,
    pub released: u32,
    pub executed: Vec<AtCommand>,
    pub queued: Vec<SettingCommand>,
    pub queried: Vec<AtCommand>,
    pub query_calls: u32,
    pub outcome_calls: u32,

    pub next_id: u16,
    pub batches: HashMap<u16, Vec<SettingCommand>>,
    pub stored: HashMap<AtCommand, SettingValue>,
    pub query_waits: HashMap<AtCommand, u32>,
}

impl FakeDriver {
    pub fn new() -> Self {
        FakeDriver::default()
    }

    pub fn outstanding_batches(&self) -> usize {
        self.batches.len()
    }

    fn rejected(command: AtCommand) -> DriverError {
        DriverError::Rejected {
            command,
            reason: "ERROR".to_string(),
        }
    }
}

impl ProtocolDriver<FakePort> for FakeDriver {
    fn init(&mut self, _port: &mut FakePort) -> Result<InitStatus, DriverError> {
        self.init_calls += 1;

        if let Some((poll, cancel)) = &self.cancel_on_init_poll {
            if *poll == self.init_calls {
                cancel.cancel();
            }
        }
        if self.init_error {
            return Err(DriverError::EnterCommandMode("ERROR".to_string()));
        }
        if self.never_ready || self.init_calls <= self.busy_polls {
            return Ok(InitStatus::Busy);
        }
        Ok(InitStatus::Ready)
    }

    fn tick(&mut self, _port: &mut FakePort) -> Result<usize, DriverError> {
        self.ticks += 1;
        Ok(0)
    }

    fn create_batch(&mut self, _port: &mut FakePort, command: AtCommand) -> Result<BatchToken, DriverError> {
        if self.fail_create {
            return Err(DriverError::BatchLimit);
        }
        self.next_id += 1;
        self.acquired += 1;
        self.batches.insert(self.next_id, Vec::new());
        Ok(BatchToken::new(self.next_id, command))
    }

    fn append_setting(&mut self, token: &BatchToken, setting: &SettingCommand) -> Result<(), DriverError> {
        let batch = self
            .batches
            .get_mut(&token.id())
            .unwrap_or_else(|| panic!("batch {} used after release", token.id()));
        if self.reject == Some(setting.command()) {
            return Err(FakeDriver::rejected(setting.command()));
        }
        batch.push(setting.clone());
        self.queued.push(setting.clone());
        if let Some(cancel) = &self.cancel_on_append {
            cancel.cancel();
        }
        Ok(())
    }

    fn execute(
        &mut self,
        _port: &mut FakePort,
        command: AtCommand,
        batch: Option<&BatchToken>,
    ) -> Result<(), DriverError> {
        self.executed.push(command);
        if self.fail_commit {
            return Err(FakeDriver::rejected(command));
        }
        if let Some(token) = batch {
            let settings = self
                .batches
                .get(&token.id())
                .unwrap_or_else(|| panic!("batch {} used after release", token.id()));
            for setting in settings {
                self.stored.insert(setting.command(), setting.value().clone());
            }
        }
        Ok(())
    }

    fn outcome(&mut self, _port: &mut FakePort, command: AtCommand) -> Result<(), DriverError> {
        self.outcome_calls += 1;
        if self.outcome_calls <= self.outcome_busy_polls {
            return Err(DriverError::Busy);
        }
        if self.refuse_commit {
            return Err(FakeDriver::rejected(command));
        }
        Ok(())
    }

    fn release(&mut self, token: BatchToken) {
        if self.batches.remove(&token.id()).is_none() {
            panic!("batch {} released twice", token.id());
        }
        self.released += 1;
    }

    fn query(&mut self, _port: &mut FakePort, command: AtCommand) -> Result<SettingValue, DriverError> {
        self.query_calls += 1;
        if let Some((call, cancel)) = &self.cancel_on_query {
            if *call == self.query_calls {
                cancel.cancel();
            }
        }
        if self.query_error == Some(command) {
            return Err(DriverError::IoError(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "port went away",
            )));
        }

        let waited = self.query_waits.entry(command).or_insert(0);
        if *waited < self.query_busy_polls {
            *waited += 1;
            return Err(DriverError::Busy);
        }

        self.queried.push(command);
        self.values
            .get(&command)
            .or_else(|| self.stored.get(&command))
            .cloned()
            .ok_or_else(|| FakeDriver::rejected(command))
    }
}

/// A sequencer config that does not sleep between polls.
pub fn fast_config() -> SequencerConfig {
    SequencerConfig {
        max_polls: 100,
        timeout: Duration::from_secs(5),
        poll_interval: Duration::ZERO,
        ..Default::default()
    }
}

pub fn serial() -> SerialConfig {
    SerialConfig::new("/dev/ttyS0", 115200).unwrap()
}

pub fn setting(text: &str) -> SettingCommand {
    text.parse().unwrap()
}

/// A port with a simulated radio behind it. It answers `+++` and every
/// `AT` line the way an XBee in command mode does.
#[derive(Debug, Default)]
pub struct RadioPort {
    /// Register values as the radio prints them
    pub registers: HashMap<String, String>,
    /// Registers the radio refuses to change
    pub read_only: Vec<String>,
    /// Commands the radio answers with ERROR
    pub refused: Vec<String>,
    pub lines: Vec<String>,
    pending: Vec<u8>,
    rx: VecDeque<u8>,
}

impl RadioPort {
    fn reply(&mut self, text: &str) {
        self.rx.extend(text.as_bytes());
        self.rx.push_back(b'\r');
    }

    fn handle(&mut self, line: &str) {
        self.lines.push(line.to_string());
        let Some(body) = line.strip_prefix("AT") else {
            return self.reply("ERROR");
        };

        for part in body.split(',') {
            let (code, value) = part.split_at(part.len().min(2));
            if self.refused.iter().any(|r| r == code) {
                self.reply("ERROR");
            } else if ["WR", "AC", "CN", "RE", "FR"].contains(&code) {
                self.reply("OK");
            } else if value.is_empty() {
                let answer = self
                    .registers
                    .get(code)
                    .cloned()
                    .unwrap_or_else(|| "ERROR".to_string());
                self.reply(&answer);
            } else if self.read_only.iter().any(|r| r == code) {
                self.reply("ERROR");
            } else {
                self.registers.insert(code.to_string(), value.to_string());
                self.reply("OK");
            }
        }
    }
}

impl Read for RadioPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
        }
        let n = buf.len().min(self.rx.len());
        for (slot, b) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = b;
        }
        Ok(n)
    }
}

impl Write for RadioPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);

        if self.pending == b"+++" {
            self.pending.clear();
            self.lines.push("+++".to_string());
            self.reply("OK");
        }
        while let Some(end) = self.pending.iter().position(|&b| b == b'\r') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line[..end]).into_owned();
            self.handle(&line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Opens `RadioPort`s that all start from the same registers.
#[derive(Debug, Default)]
pub struct RadioTransport {
    pub registers: HashMap<String, String>,
    pub read_only: Vec<String>,
    pub refused: Vec<String>,
}

impl Transport for RadioTransport {
    type Port = RadioPort;

    fn open(&mut self, _config: &SerialConfig) -> Result<RadioPort, DeviceError> {
        Ok(RadioPort {
            registers: self.registers.clone(),
            read_only: self.read_only.clone(),
            refused: self.refused.clone(),
            ..Default::default()
        })
    }

    fn close(&mut self, _port: RadioPort) {}
}
