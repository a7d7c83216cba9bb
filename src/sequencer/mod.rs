//! Drives a radio from a freshly opened port to a confirmed configuration.
//!
//! Bring-up runs through five stages:
//!
//! * `Open` - open the serial port
//! * `Init` - poll the driver until its AT command layer is ready
//! * `Queue` - queue every setting of the plan in one batch
//! * `Commit` - execute the persistent write with the batch
//! * `Verify` - read every setting back and compare it
//!
//! Each polling stage is bounded by `SequencerConfig` and can be cancelled
//! through a `CancelToken`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::devices::{SerialConfig, Transport};
use crate::driver::{InitStatus, ProtocolDriver};
use crate::errors::{BringUpError, DeviceError, DriverError};
use crate::settings::{
    AtCommand, DeviceInfo, SettingCommand, SettingPlan, SettingValue, DEVICE_INFO,
};

mod pending;
pub use pending::PendingRequest;

/// The default number of polls a stage may take
pub const DEFAULT_MAX_POLLS: u32 = 1000;

/// The default wall clock budget of a stage in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// The default pause between two polls in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// The stages of a bring-up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Open,
    Init,
    Queue,
    Commit,
    Verify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Open => "OPEN",
            Stage::Init => "INIT",
            Stage::Queue => "QUEUE",
            Stage::Commit => "COMMIT",
            Stage::Verify => "VERIFY",
        })
    }
}

/// A flag shared between the bring-up and whoever may want to stop it.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct SequencerConfig {
    /// Polls a stage may take before it times out
    pub max_polls: u32,
    /// Wall clock budget of a stage
    pub timeout: Duration,
    /// Pause between two polls
    pub poll_interval: Duration,
    /// Read every setting back after the commit
    pub verify: bool,
    /// The command that persists the batch
    pub commit_command: AtCommand,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        SequencerConfig {
            max_polls: DEFAULT_MAX_POLLS,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            verify: true,
            commit_command: AtCommand::WR,
        }
    }
}

/// What a successful bring-up did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BringUpReport {
    /// How many times the driver was asked whether it was ready
    pub init_polls: u32,
    /// Settings queued in the batch
    pub queued: usize,
    /// Settings read back and confirmed
    pub verified: usize,
    /// Set when the radio refused the persistent write or it could not be
    /// sent
    pub commit_error: Option<String>,
}

/// The bring-up sequencer. It owns the port it opens until the caller
/// closes it or takes it.
pub struct Sequencer<T: Transport, D: ProtocolDriver<T::Port>> {
    transport: T,
    driver: D,
    config: SequencerConfig,
    port: Option<T::Port>,
    path: Option<String>,
}

impl<T: Transport, D: ProtocolDriver<T::Port>> Sequencer<T, D> {
    pub fn new(transport: T, driver: D, config: SequencerConfig) -> Self {
        Sequencer {
            transport,
            driver,
            config,
            port: None,
            path: None,
        }
    }

    /// Opens the port behind `serial` and holds it.
    pub fn open(&mut self, serial: &SerialConfig) -> Result<(), BringUpError> {
        // One port per sequencer at a time
        if let Some(held) = &self.path {
            return Err(BringUpError::Open {
                path: serial.device_path().to_string(),
                source: DeviceError::AlreadyOpen(held.clone()),
            });
        }

        debug!("Entering {}", Stage::Open);
        let opened = self
            .transport
            .open(serial)
            .map_err(|source| BringUpError::Open {
                path: serial.device_path().to_string(),
                source,
            })?;
        self.port = Some(opened);
        self.path = Some(serial.device_path().to_string());
        info!("Opened {} at {} baud", serial.device_path(), serial.baud_rate());
        Ok(())
    }

    /// Brings the radio behind `serial` up and applies `plan` to it.
    ///
    /// On failure after the port was opened the port stays open and held by
    /// the sequencer. Call `close` before trying again.
    pub fn bring_up(
        &mut self,
        serial: &SerialConfig,
        plan: &SettingPlan,
        cancel: &CancelToken,
    ) -> Result<BringUpReport, BringUpError> {
        self.open(serial)?;

        let Sequencer {
            driver,
            config,
            port,
            ..
        } = self;
        let port = port.as_mut().ok_or(BringUpError::NotOpen)?;
        let mut report = BringUpReport::default();

        report.init_polls = init(driver, port, config, cancel)?;

        // An empty plan changes nothing, there is nothing to queue or commit
        if !plan.is_empty() {
            // QUEUE: the batch is released however this block is left
            debug!("Entering {}", Stage::Queue);
            let commit_command = config.commit_command;
            let mut pending = PendingRequest::acquire(driver, port, commit_command).map_err(|source| {
                BringUpError::InvalidSetting {
                    command: commit_command,
                    source,
                }
            })?;

            for setting in plan {
                debug!("Queueing {setting}");
                pending
                    .append(setting)
                    .map_err(|source| BringUpError::InvalidSetting {
                        command: setting.command(),
                        source,
                    })?;
                report.queued += 1;
            }

            if cancel.is_cancelled() {
                return Err(BringUpError::Cancelled { stage: Stage::Queue });
            }

            // COMMIT: a refused write is reported, VERIFY judges the values
            debug!("Entering {}", Stage::Commit);
            let outcome = match pending.commit(port, commit_command) {
                Ok(()) => await_outcome(driver, port, config, cancel, Stage::Commit, commit_command)?,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                warn!("{commit_command} failed: {e}");
                report.commit_error = Some(e.to_string());
            }
        }

        // VERIFY
        if config.verify {
            debug!("Entering {}", Stage::Verify);
            for setting in plan {
                let command = setting.command();
                let actual = query(driver, port, config, cancel, command)?;

                if !setting.value().matches(&actual) {
                    return Err(BringUpError::VerificationMismatch {
                        command,
                        expected: setting.value().clone(),
                        actual,
                    });
                }
                debug!("{command} confirmed as {actual}");
                report.verified += 1;
            }
        }

        info!(
            "Bring-up of {} complete ({} queued, {} verified)",
            serial.device_path(),
            report.queued,
            report.verified
        );
        Ok(report)
    }

    /// Reads `commands` from the radio on the held port, initializing the AT
    /// layer first if it is not ready.
    pub fn read_settings(
        &mut self,
        commands: &[AtCommand],
        cancel: &CancelToken,
    ) -> Result<Vec<SettingCommand>, BringUpError> {
        let Sequencer {
            driver,
            config,
            port,
            ..
        } = self;
        let port = port.as_mut().ok_or(BringUpError::NotOpen)?;

        init(driver, port, config, cancel)?;

        let mut settings = Vec::with_capacity(commands.len());
        for &command in commands {
            let value = query(driver, port, config, cancel, command)?;
            debug!("{command} is {value}");
            settings.push(SettingCommand::new(command, value));
        }
        Ok(settings)
    }

    /// Reads the serial number and versions of the radio on the held port.
    pub fn device_info(&mut self, cancel: &CancelToken) -> Result<DeviceInfo, BringUpError> {
        let settings = self.read_settings(&DEVICE_INFO, cancel)?;
        let device = DeviceInfo::from_settings(&settings);
        info!("Radio {device}");
        Ok(device)
    }

    /// Sends `command` on the held port and waits for the radio's answer.
    pub fn execute(&mut self, command: AtCommand, cancel: &CancelToken) -> Result<(), BringUpError> {
        let Sequencer {
            driver,
            config,
            port,
            ..
        } = self;
        let port = port.as_mut().ok_or(BringUpError::NotOpen)?;

        driver
            .execute(port, command, None)
            .map_err(|source| BringUpError::Command { command, source })?;
        await_outcome(driver, port, config, cancel, Stage::Commit, command)?
            .map_err(|source| BringUpError::Command { command, source })
    }

    /// Returns true while the sequencer holds an open port.
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub fn port_mut(&mut self) -> Option<&mut T::Port> {
        self.port.as_mut()
    }

    /// Hands the open port over to the caller.
    pub fn take_port(&mut self) -> Option<T::Port> {
        self.path = None;
        self.port.take()
    }

    /// Closes the held port, if any.
    pub fn close(&mut self) {
        if let Some(port) = self.take_port() {
            self.transport.close(port);
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Splits the sequencer into the driver and the held port, so both can
    /// be used together once bring-up is done.
    pub fn parts_mut(&mut self) -> (&mut D, Option<&mut T::Port>) {
        (&mut self.driver, self.port.as_mut())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }
}

/// INIT: polls the driver until its AT layer is ready, returning the polls
/// it took.
fn init<P, D: ProtocolDriver<P>>(
    driver: &mut D,
    port: &mut P,
    config: &SequencerConfig,
    cancel: &CancelToken,
) -> Result<u32, BringUpError> {
    debug!("Entering {}", Stage::Init);
    let ((), polls) = wait_for(
        driver,
        port,
        config,
        cancel,
        Stage::Init,
        |driver, port| match driver.init(port) {
            Ok(InitStatus::Ready) => Ok(Some(())),
            Ok(InitStatus::Busy) => Ok(None),
            Err(e) => Err(BringUpError::Init(e)),
        },
        BringUpError::Init,
    )?;
    info!("AT layer ready after {polls} polls");
    Ok(polls)
}

/// Reads one parameter back, polling while the reply is outstanding.
fn query<P, D: ProtocolDriver<P>>(
    driver: &mut D,
    port: &mut P,
    config: &SequencerConfig,
    cancel: &CancelToken,
    command: AtCommand,
) -> Result<SettingValue, BringUpError> {
    let (value, _) = wait_for(
        driver,
        port,
        config,
        cancel,
        Stage::Verify,
        |driver, port| match driver.query(port, command) {
            Ok(value) => Ok(Some(value)),
            Err(DriverError::Busy) => Ok(None),
            Err(source) => Err(BringUpError::Query { command, source }),
        },
        |source| BringUpError::Query { command, source },
    )?;
    Ok(value)
}

/// Waits for the radio to answer an executed command. The outer error ends
/// the stage, the inner one is the radio's verdict.
fn await_outcome<P, D: ProtocolDriver<P>>(
    driver: &mut D,
    port: &mut P,
    config: &SequencerConfig,
    cancel: &CancelToken,
    stage: Stage,
    command: AtCommand,
) -> Result<Result<(), DriverError>, BringUpError> {
    let (outcome, _) = wait_for(
        driver,
        port,
        config,
        cancel,
        stage,
        |driver, port| match driver.outcome(port, command) {
            Err(DriverError::Busy) => Ok(None),
            done => Ok(Some(done)),
        },
        |source| BringUpError::Command { command, source },
    )?;
    Ok(outcome)
}

/// Polls `step` until it yields a value, ticking the driver in between.
///
/// Returns the value and the number of polls it took. The cancellation flag
/// is checked once per poll, and the stage times out after
/// `config.max_polls` polls or `config.timeout`, whichever comes first.
fn wait_for<P, D, R>(
    driver: &mut D,
    port: &mut P,
    config: &SequencerConfig,
    cancel: &CancelToken,
    stage: Stage,
    mut step: impl FnMut(&mut D, &mut P) -> Result<Option<R>, BringUpError>,
    tick_error: impl Fn(DriverError) -> BringUpError,
) -> Result<(R, u32), BringUpError>
where
    D: ProtocolDriver<P>,
{
    let started = Instant::now();
    let mut polls: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            info!("{stage} cancelled after {polls} polls");
            return Err(BringUpError::Cancelled { stage });
        }

        polls += 1;
        if let Some(value) = step(driver, port)? {
            return Ok((value, polls));
        }

        // Not there yet; give up if the budget is spent
        let elapsed = started.elapsed();
        if polls >= config.max_polls || elapsed >= config.timeout {
            warn!("{stage} timed out after {polls} polls ({elapsed:?})");
            return Err(BringUpError::Timeout {
                stage,
                polls,
                elapsed,
            });
        }

        driver.tick(port).map_err(&tick_error)?;
        thread::sleep(config.poll_interval);
    }
}
