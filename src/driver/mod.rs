//! The seam between the bring-up sequencer and whatever speaks to the radio.

use crate::errors::DriverError;
use crate::settings::{AtCommand, SettingCommand, SettingValue};

pub mod command_mode;
pub mod params;

pub use command_mode::{CommandModeConfig, CommandModeDriver};

/// The state of the driver's AT command layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InitStatus {
    Ready,
    /// Not ready yet. Tick the driver and ask again.
    Busy,
}

/// Names a batch of queued settings inside a driver.
///
/// A token is not `Clone` and `ProtocolDriver::release` consumes it, so a
/// batch cannot be released twice or used once released.
#[derive(Debug, PartialEq, Eq)]
pub struct BatchToken {
    id: u16,
    command: AtCommand,
}

impl BatchToken {
    pub fn new(id: u16, command: AtCommand) -> Self {
        BatchToken { id, command }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    /// The command the batch was created for.
    pub fn command(&self) -> AtCommand {
        self.command
    }
}

/// The AT command primitives of a radio protocol driver.
///
/// Drivers make progress only when `tick` is called. Nothing happens in the
/// background between calls.
pub trait ProtocolDriver<P> {
    /// Starts, or reports on, initialization of the AT command layer.
    fn init(&mut self, port: &mut P) -> Result<InitStatus, DriverError>;

    /// Processes pending traffic, returning how many replies were handled.
    fn tick(&mut self, port: &mut P) -> Result<usize, DriverError>;

    /// Creates an empty batch that `execute` will later commit as a whole.
    fn create_batch(&mut self, port: &mut P, command: AtCommand) -> Result<BatchToken, DriverError>;

    /// Queues a setting in a batch.
    fn append_setting(&mut self, token: &BatchToken, setting: &SettingCommand) -> Result<(), DriverError>;

    /// Sends a command, committing a batch's settings with it if one is given.
    fn execute(
        &mut self,
        port: &mut P,
        command: AtCommand,
        batch: Option<&BatchToken>,
    ) -> Result<(), DriverError>;

    /// Reports how the last `execute` of `command` ended.
    ///
    /// Returns `DriverError::Busy` while the radio has not answered yet.
    fn outcome(&mut self, port: &mut P, command: AtCommand) -> Result<(), DriverError>;

    /// Frees a batch.
    fn release(&mut self, token: BatchToken);

    /// Reads a parameter back from the radio.
    ///
    /// Returns `DriverError::Busy` while the reply has not arrived yet.
    fn query(&mut self, port: &mut P, command: AtCommand) -> Result<SettingValue, DriverError>;
}
