use std::marker::PhantomData;

use tracing::debug;

use crate::driver::{BatchToken, ProtocolDriver};
use crate::errors::DriverError;
use crate::settings::{AtCommand, SettingCommand};

/// A batch of queued settings that is released when it goes out of scope.
///
/// However bring-up leaves the QUEUE stage, be it a rejected setting, a
/// cancellation or a successful commit, the driver sees exactly one
/// `release` for the batch.
pub struct PendingRequest<'d, P, D: ProtocolDriver<P>> {
    driver: &'d mut D,
    token: Option<BatchToken>,
    _port: PhantomData<fn(&mut P)>,
}

impl<'d, P, D: ProtocolDriver<P>> PendingRequest<'d, P, D> {
    /// Asks the driver for a new batch named after `command`.
    pub fn acquire(driver: &'d mut D, port: &mut P, command: AtCommand) -> Result<Self, DriverError> {
        let token = driver.create_batch(port, command)?;
        debug!("Acquired batch {} for {command}", token.id());

        Ok(PendingRequest {
            driver,
            token: Some(token),
            _port: PhantomData,
        })
    }

    /// Queues one setting in the batch.
    pub fn append(&mut self, setting: &SettingCommand) -> Result<(), DriverError> {
        match &self.token {
            Some(token) => self.driver.append_setting(token, setting),
            None => Err(DriverError::NotReady),
        }
    }

    /// Executes `command` with the queued batch and releases the batch,
    /// whatever the outcome of the command.
    pub fn commit(mut self, port: &mut P, command: AtCommand) -> Result<(), DriverError> {
        let token = match self.token.take() {
            Some(token) => token,
            None => return Err(DriverError::NotReady),
        };

        let result = self.driver.execute(port, command, Some(&token));
        self.driver.release(token);
        result
    }
}

impl<'d, P, D: ProtocolDriver<P>> Drop for PendingRequest<'d, P, D> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            debug!("Releasing uncommitted batch {}", token.id());
            self.driver.release(token);
        }
    }
}
