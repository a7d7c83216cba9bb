//! A protocol driver that configures an XBee through its transparent
//! command mode: `+++` to enter, `ATxx<value>\r` per command, one reply line
//! per command.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use super::{params, BatchToken, InitStatus, ProtocolDriver};
use crate::errors::DriverError;
use crate::io::{read_available, LineBuffer};
use crate::settings::{AtCommand, SettingCommand, SettingValue};

/// Silence required on both sides of `+++`. The radio's default guard
/// time (GT) is one second.
pub const DEFAULT_GUARD_TIME_MS: u64 = 1100;

/// How many batches may be outstanding at once.
pub const DEFAULT_MAX_BATCHES: usize = 4;

const SEQUENCE: &[u8] = b"+++";

#[derive(Debug, Clone)]
pub struct CommandModeConfig {
    pub guard_time: Duration,
    pub max_batches: usize,
}

impl Default for CommandModeConfig {
    fn default() -> Self {
        CommandModeConfig {
            guard_time: Duration::from_millis(DEFAULT_GUARD_TIME_MS),
            max_batches: DEFAULT_MAX_BATCHES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    /// Transparent mode. `quiet_since` is when the line last went silent.
    Idle { quiet_since: Option<Instant> },
    /// `+++` was sent and the reply has not arrived.
    Entering,
    Ready,
    Failed(String),
}

/// A reply the radio still owes us, in the order the requests were sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Enter,
    Ack(AtCommand),
    Query(AtCommand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Answer {
    Value(String),
    Error,
}

pub struct CommandModeDriver {
    config: CommandModeConfig,
    mode: Mode,
    lines: LineBuffer,
    awaiting: VecDeque<Expect>,
    answers: HashMap<AtCommand, Answer>,
    failures: Vec<AtCommand>,
    batches: BTreeMap<u16, Vec<SettingCommand>>,
    next_batch: u16,
}

impl CommandModeDriver {
    pub fn new(config: CommandModeConfig) -> Self {
        CommandModeDriver {
            config,
            mode: Mode::Idle { quiet_since: None },
            lines: LineBuffer::new(b'\r'),
            awaiting: VecDeque::new(),
            answers: HashMap::new(),
            failures: Vec::new(),
            batches: BTreeMap::new(),
            next_batch: 0,
        }
    }

    /// Returns true once the radio has acknowledged `+++`.
    pub fn is_ready(&self) -> bool {
        self.mode == Mode::Ready
    }

    /// The number of replies the radio still owes.
    pub fn outstanding(&self) -> usize {
        self.awaiting.len()
    }

    /// Commands the radio answered with something other than `OK` since the
    /// last call, less those already reported by `outcome`.
    pub fn take_failures(&mut self) -> Vec<AtCommand> {
        std::mem::take(&mut self.failures)
    }

    fn ensure_ready(&self) -> Result<(), DriverError> {
        if self.mode == Mode::Ready {
            Ok(())
        } else {
            Err(DriverError::NotReady)
        }
    }

    fn send<P: Write>(&mut self, port: &mut P, line: &[u8]) -> Result<(), DriverError> {
        trace!("-> {:?}", String::from_utf8_lossy(line));

        // Write the line and push it out
        port.write_all(line)?;
        port.flush()?;
        Ok(())
    }

    fn handle_line(&mut self, line: String) {
        trace!("<- {line:?}");

        // Replies come back in the order the commands were sent
        match self.awaiting.pop_front() {
            Some(Expect::Enter) => {
                if line == "OK" {
                    info!("Radio entered command mode");
                    self.mode = Mode::Ready;
                } else {
                    warn!("Radio answered '{line}' to the command sequence");
                    self.mode = Mode::Failed(line);
                }
            }
            Some(Expect::Ack(command)) => {
                if line != "OK" {
                    warn!("{command} refused: {line}");
                    self.failures.push(command);
                } else if command == AtCommand::CN {
                    // CN leaves command mode
                    debug!("Radio left command mode");
                    self.mode = Mode::Idle { quiet_since: None };
                } else {
                    debug!("{command} acknowledged");
                }
            }
            Some(Expect::Query(command)) => {
                let answer = if line == "ERROR" {
                    Answer::Error
                } else {
                    Answer::Value(line)
                };
                self.answers.insert(command, answer);
            }
            None => debug!("Ignoring unsolicited line '{line}'"),
        }
    }
}

impl Default for CommandModeDriver {
    fn default() -> Self {
        CommandModeDriver::new(CommandModeConfig::default())
    }
}

/// Encodes one setting the way command mode expects it: numbers in hex,
/// text as is.
fn encode_setting(setting: &SettingCommand) -> String {
    match setting.value() {
        SettingValue::Int(v) => format!("{}{:X}", setting.command(), v),
        SettingValue::Bytes(b) if params::is_numeric(setting.command()) => {
            let hex: String = b.iter().map(|c| format!("{c:02X}")).collect();
            format!("{}{}", setting.command(), hex)
        }
        SettingValue::Bytes(b) => format!("{}{}", setting.command(), String::from_utf8_lossy(b)),
    }
}

/// Decodes a query reply according to the parameter's kind.
fn decode_answer(command: AtCommand, text: &str) -> Result<SettingValue, DriverError> {
    if !params::is_numeric(command) {
        return Ok(SettingValue::Bytes(text.as_bytes().to_vec()));
    }

    u64::from_str_radix(text, 16)
        .map(SettingValue::Int)
        .map_err(|_| DriverError::Rejected {
            command,
            reason: format!("unreadable reply '{text}'"),
        })
}

impl<P: Read + Write> ProtocolDriver<P> for CommandModeDriver {
    fn init(&mut self, port: &mut P) -> Result<InitStatus, DriverError> {
        let since = match &mut self.mode {
            Mode::Ready => return Ok(InitStatus::Ready),
            Mode::Failed(reply) => return Err(DriverError::EnterCommandMode(reply.clone())),
            Mode::Entering => return Ok(InitStatus::Busy),
            Mode::Idle { quiet_since } => *quiet_since.get_or_insert_with(Instant::now),
        };

        // The radio only treats +++ as a command after a quiet guard time
        if since.elapsed() < self.config.guard_time {
            return Ok(InitStatus::Busy);
        }

        // Anything received so far belongs to transparent mode
        self.lines.clear();
        self.send(port, SEQUENCE)?;
        self.awaiting.push_back(Expect::Enter);
        self.mode = Mode::Entering;

        Ok(InitStatus::Busy)
    }

    fn tick(&mut self, port: &mut P) -> Result<usize, DriverError> {
        let mut buf = [0u8; 256];

        // Drain whatever the port has for us
        loop {
            let n = read_available(port, &mut buf)?;
            if n == 0 {
                break;
            }

            if let Mode::Idle { quiet_since } = &mut self.mode {
                // Transparent traffic restarts the guard time
                trace!("Discarding {n} bytes of transparent data");
                *quiet_since = Some(Instant::now());
            } else {
                self.lines.feed(&buf[..n]);
            }

            if n < buf.len() {
                break;
            }
        }

        // Handle every complete reply line
        let mut handled = 0;
        while let Some(line) = self.lines.next_line() {
            self.handle_line(line);
            handled += 1;
        }

        Ok(handled)
    }

    fn create_batch(&mut self, _port: &mut P, command: AtCommand) -> Result<BatchToken, DriverError> {
        if self.batches.len() >= self.config.max_batches {
            return Err(DriverError::BatchLimit);
        }

        // Find a free batch id
        let mut id = self.next_batch;
        while self.batches.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        self.next_batch = id.wrapping_add(1);

        self.batches.insert(id, Vec::new());
        debug!("Created batch {id} for {command}");

        Ok(BatchToken::new(id, command))
    }

    fn append_setting(&mut self, token: &BatchToken, setting: &SettingCommand) -> Result<(), DriverError> {
        let batch = self
            .batches
            .get_mut(&token.id())
            .ok_or(DriverError::UnknownBatch(token.id()))?;

        params::check_write(setting.command(), setting.value()).map_err(|reason| {
            DriverError::Rejected {
                command: setting.command(),
                reason,
            }
        })?;

        batch.push(setting.clone());
        Ok(())
    }

    fn execute(
        &mut self,
        port: &mut P,
        command: AtCommand,
        batch: Option<&BatchToken>,
    ) -> Result<(), DriverError> {
        self.ensure_ready()?;

        // Get the settings that ride along with the command
        let settings = match batch {
            Some(token) => self
                .batches
                .get(&token.id())
                .ok_or(DriverError::UnknownBatch(token.id()))?
                .clone(),
            None => Vec::new(),
        };

        // Pack everything into one line; the radio acks each part separately
        let mut parts: Vec<String> = settings.iter().map(encode_setting).collect();
        parts.push(command.to_string());
        let line = format!("AT{}\r", parts.join(","));
        self.send(port, line.as_bytes())?;

        for setting in &settings {
            self.awaiting.push_back(Expect::Ack(setting.command()));
        }
        self.awaiting.push_back(Expect::Ack(command));

        Ok(())
    }

    fn outcome(&mut self, _port: &mut P, command: AtCommand) -> Result<(), DriverError> {
        if self.awaiting.contains(&Expect::Ack(command)) {
            return Err(DriverError::Busy);
        }

        // A refusal is reported here once and no longer by take_failures
        match self.failures.iter().position(|c| *c == command) {
            Some(i) => {
                self.failures.remove(i);
                Err(DriverError::Rejected {
                    command,
                    reason: "radio replied ERROR".to_string(),
                })
            }
            None => Ok(()),
        }
    }

    fn release(&mut self, token: BatchToken) {
        match self.batches.remove(&token.id()) {
            Some(_) => debug!("Released batch {}", token.id()),
            None => warn!("Released unknown batch {}", token.id()),
        }
    }

    fn query(&mut self, port: &mut P, command: AtCommand) -> Result<SettingValue, DriverError> {
        self.ensure_ready()?;

        // A reply is waiting
        if let Some(answer) = self.answers.remove(&command) {
            return match answer {
                Answer::Value(text) => decode_answer(command, &text),
                Answer::Error => Err(DriverError::Rejected {
                    command,
                    reason: "radio replied ERROR".to_string(),
                }),
            };
        }

        // Already asked, still waiting
        if self.awaiting.contains(&Expect::Query(command)) {
            return Err(DriverError::Busy);
        }

        let line = format!("AT{command}\r");
        self.send(port, line.as_bytes())?;
        self.awaiting.push_back(Expect::Query(command));

        Err(DriverError::Busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An in-memory serial port.
    #[derive(Default)]
    struct MockPort {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
    }

    impl MockPort {
        fn reply(&mut self, text: &str) {
            self.rx.extend(text.as_bytes());
        }

        fn sent(&mut self) -> String {
            String::from_utf8(std::mem::take(&mut self.tx)).unwrap()
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.rx.len());
            for (slot, b) in buf.iter_mut().zip(self.rx.drain(..n)) {
                *slot = b;
            }
            Ok(n)
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn cmd(code: &str) -> AtCommand {
        AtCommand::new(code).unwrap()
    }

    fn no_guard() -> CommandModeDriver {
        CommandModeDriver::new(CommandModeConfig {
            guard_time: Duration::ZERO,
            max_batches: DEFAULT_MAX_BATCHES,
        })
    }

    // These take no port, so the port type has to be named
    fn append(driver: &mut CommandModeDriver, token: &BatchToken, setting: SettingCommand) -> Result<(), DriverError> {
        ProtocolDriver::<MockPort>::append_setting(driver, token, &setting)
    }

    fn release(driver: &mut CommandModeDriver, token: BatchToken) {
        ProtocolDriver::<MockPort>::release(driver, token)
    }

    fn ready_driver(port: &mut MockPort) -> CommandModeDriver {
        let mut driver = no_guard();
        driver.init(port).unwrap();
        port.reply("OK\r");
        driver.tick(port).unwrap();
        assert_eq!(driver.init(port).unwrap(), InitStatus::Ready);
        port.sent();
        driver
    }

    #[test]
    fn enters_command_mode() {
        let mut port = MockPort::default();
        let mut driver = no_guard();

        assert_eq!(driver.init(&mut port).unwrap(), InitStatus::Busy);
        assert_eq!(port.sent(), "+++");

        // Asking again does not resend the sequence
        assert_eq!(driver.init(&mut port).unwrap(), InitStatus::Busy);
        assert_eq!(port.sent(), "");

        port.reply("OK\r");
        assert_eq!(driver.tick(&mut port).unwrap(), 1);
        assert_eq!(driver.init(&mut port).unwrap(), InitStatus::Ready);
        assert!(driver.is_ready());
    }

    #[test]
    fn guard_time_delays_the_sequence() {
        let mut port = MockPort::default();
        let mut driver = CommandModeDriver::new(CommandModeConfig {
            guard_time: Duration::from_secs(3600),
            max_batches: 1,
        });

        assert_eq!(driver.init(&mut port).unwrap(), InitStatus::Busy);
        port.reply("stray transparent data");
        assert_eq!(driver.tick(&mut port).unwrap(), 0);
        assert_eq!(driver.init(&mut port).unwrap(), InitStatus::Busy);
        assert_eq!(port.sent(), "");
    }

    #[test]
    fn refused_sequence_is_an_error() {
        let mut port = MockPort::default();
        let mut driver = no_guard();

        driver.init(&mut port).unwrap();
        port.reply("ERROR\r");
        driver.tick(&mut port).unwrap();
        assert!(matches!(
            driver.init(&mut port),
            Err(DriverError::EnterCommandMode(reply)) if reply == "ERROR"
        ));
    }

    #[test]
    fn batch_is_committed_in_one_line() {
        let mut port = MockPort::default();
        let mut driver = ready_driver(&mut port);

        let token = driver.create_batch(&mut port, cmd("WR")).unwrap();
        append(&mut driver, &token, SettingCommand::new(cmd("ID"), 2015)).unwrap();
        append(&mut driver, &token, SettingCommand::new(cmd("BR"), 1)).unwrap();
        driver.execute(&mut port, cmd("WR"), Some(&token)).unwrap();
        release(&mut driver, token);

        assert_eq!(port.sent(), "ATID7DF,BR1,WR\r");
        assert_eq!(driver.outstanding(), 3);
        assert!(matches!(driver.outcome(&mut port, cmd("WR")), Err(DriverError::Busy)));

        port.reply("OK\rOK\rOK\r");
        assert_eq!(driver.tick(&mut port).unwrap(), 3);
        assert_eq!(driver.outstanding(), 0);
        assert!(driver.outcome(&mut port, cmd("WR")).is_ok());
        assert!(driver.take_failures().is_empty());
    }

    #[test]
    fn refused_write_is_reported_once() {
        let mut port = MockPort::default();
        let mut driver = ready_driver(&mut port);

        let token = driver.create_batch(&mut port, cmd("WR")).unwrap();
        append(&mut driver, &token, SettingCommand::new(cmd("HP"), 3)).unwrap();
        driver.execute(&mut port, cmd("WR"), Some(&token)).unwrap();
        release(&mut driver, token);

        port.reply("OK\rERROR\r");
        driver.tick(&mut port).unwrap();
        assert!(matches!(
            driver.outcome(&mut port, cmd("WR")),
            Err(DriverError::Rejected { command, .. }) if command == cmd("WR")
        ));
        assert!(driver.outcome(&mut port, cmd("WR")).is_ok());
        assert!(driver.take_failures().is_empty());
    }

    #[test]
    fn query_waits_for_its_reply() {
        let mut port = MockPort::default();
        let mut driver = ready_driver(&mut port);

        assert!(matches!(driver.query(&mut port, cmd("ID")), Err(DriverError::Busy)));
        assert_eq!(port.sent(), "ATID\r");

        // Still pending, nothing is resent
        assert!(matches!(driver.query(&mut port, cmd("ID")), Err(DriverError::Busy)));
        assert_eq!(port.sent(), "");

        port.reply("7DF\r");
        driver.tick(&mut port).unwrap();
        assert_eq!(driver.query(&mut port, cmd("ID")).unwrap(), SettingValue::Int(2015));
    }

    #[test]
    fn text_parameters_are_not_decoded_as_hex() {
        let mut port = MockPort::default();
        let mut driver = ready_driver(&mut port);

        let _ = driver.query(&mut port, cmd("NI"));
        port.reply("BEEF\r");
        driver.tick(&mut port).unwrap();
        assert_eq!(
            driver.query(&mut port, cmd("NI")).unwrap(),
            SettingValue::from("BEEF")
        );
    }

    #[test]
    fn quoted_numbers_are_sent_as_text() {
        let mut port = MockPort::default();
        let mut driver = ready_driver(&mut port);

        let token = driver.create_batch(&mut port, cmd("WR")).unwrap();
        append(&mut driver, &token, "NI=\"1234\"".parse().unwrap()).unwrap();
        driver.execute(&mut port, cmd("WR"), Some(&token)).unwrap();
        release(&mut driver, token);
        assert_eq!(port.sent(), "ATNI1234,WR\r");

        port.reply("OK\rOK\r");
        driver.tick(&mut port).unwrap();
        let _ = driver.query(&mut port, cmd("NI"));
        port.reply("1234\r");
        driver.tick(&mut port).unwrap();
        assert_eq!(
            driver.query(&mut port, cmd("NI")).unwrap(),
            SettingValue::from("1234")
        );
    }

    #[test]
    fn invalid_settings_and_batches_are_rejected() {
        let mut port = MockPort::default();
        let mut driver = ready_driver(&mut port);

        let token = driver.create_batch(&mut port, cmd("WR")).unwrap();
        assert!(matches!(
            append(&mut driver, &token, SettingCommand::new(cmd("NP"), 100)),
            Err(DriverError::Rejected { command, .. }) if command == cmd("NP")
        ));
        // A bare number for a text parameter would be sent as hex
        assert!(matches!(
            append(&mut driver, &token, SettingCommand::new(cmd("NI"), 1234)),
            Err(DriverError::Rejected { command, .. }) if command == cmd("NI")
        ));
        release(&mut driver, token);

        let stale = BatchToken::new(999, cmd("WR"));
        assert!(matches!(
            append(&mut driver, &stale, SettingCommand::new(cmd("ID"), 1)),
            Err(DriverError::UnknownBatch(_))
        ));
    }

    #[test]
    fn batch_limit_is_enforced() {
        let mut port = MockPort::default();
        let mut driver = ready_driver(&mut port);

        let tokens: Vec<_> = (0..DEFAULT_MAX_BATCHES)
            .map(|_| driver.create_batch(&mut port, cmd("WR")).unwrap())
            .collect();
        assert!(matches!(
            driver.create_batch(&mut port, cmd("WR")),
            Err(DriverError::BatchLimit)
        ));
        for token in tokens {
            release(&mut driver, token);
        }
        assert!(driver.create_batch(&mut port, cmd("WR")).is_ok());
    }

    #[test]
    fn commands_need_command_mode() {
        let mut port = MockPort::default();
        let mut driver = no_guard();
        assert!(matches!(
            driver.query(&mut port, cmd("ID")),
            Err(DriverError::NotReady)
        ));
        assert!(matches!(
            driver.execute(&mut port, cmd("WR"), None),
            Err(DriverError::NotReady)
        ));
    }

    #[test]
    fn cn_returns_to_transparent_mode() {
        let mut port = MockPort::default();
        let mut driver = ready_driver(&mut port);

        driver.execute(&mut port, cmd("CN"), None).unwrap();
        assert_eq!(port.sent(), "ATCN\r");
        port.reply("OK\r");
        driver.tick(&mut port).unwrap();
        assert!(!driver.is_ready());
    }
}
