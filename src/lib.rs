pub mod config;
pub mod devices;
pub mod driver;
pub mod errors;
pub mod io;
pub mod link;
pub mod messages;
pub mod sequencer;
pub mod settings;

pub use devices::{SerialConfig, SerialTransport, Transport};
pub use driver::{BatchToken, CommandModeDriver, InitStatus, ProtocolDriver};
pub use errors::{BringUpError, DeviceError, DriverError, LinkError, SettingError};
pub use sequencer::{BringUpReport, CancelToken, Sequencer, SequencerConfig, Stage};
pub use settings::{AtCommand, DeviceInfo, SettingCommand, SettingPlan, SettingValue};
