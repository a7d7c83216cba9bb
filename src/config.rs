use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, Level};

use crate::devices::SerialConfig;
use crate::driver::command_mode::{CommandModeConfig, DEFAULT_GUARD_TIME_MS, DEFAULT_MAX_BATCHES};
use crate::errors::{DeviceError, SettingError};
use crate::link::{DEFAULT_RX_TIMEOUT_SECS, DEFAULT_TX_INTERVAL_MS};
use crate::messages::{DEFAULT_MAX_LEN, DEFAULT_MESSAGE_COUNT, DEFAULT_MIN_LEN};
use crate::sequencer::{
    SequencerConfig, DEFAULT_MAX_POLLS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_TIMEOUT_MS,
};
use crate::settings::{AtCommand, SettingCommand, SettingPlan, SettingValue};

pub const DEFAULT_DEVICE_PATH: &str = "/dev/ttyS0";
pub const DEFAULT_BAUD_RATE: u32 = 115200;

#[derive(Clone, Debug, Parser)]
#[command(version, about = "Bring up and exercise XBee radios")]
pub struct CliOpts {
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[arg(short, long, global = true)]
    pub debug: bool,
    #[arg(short, long, global = true)]
    pub trace: bool,

    #[arg(
        short,
        long,
        global = true,
        default_value = "$HOME/.config/xbee_bringup/config.json"
    )]
    pub config_file: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Apply and verify radio settings
    Configure(ConfigureArgs),
    /// Broadcast the lines of a message file
    Transmit(TransmitArgs),
    /// Receive broadcasts and check them against a message file
    Receive(ReceiveArgs),
    /// Write a file of random test messages
    GenMessages(GenMessagesArgs),
    /// List serial ports that look like XBee adapters
    Ports,
}

/// Overrides for the serial port named in the config file.
#[derive(Clone, Debug, Default, Args)]
pub struct PortArgs {
    #[arg(long)]
    pub device: Option<String>,
    #[arg(long)]
    pub baud: Option<u32>,
}

#[derive(Clone, Debug, Args)]
pub struct ConfigureArgs {
    #[command(flatten)]
    pub port: PortArgs,
    /// Extra settings, e.g. --set ID=2015
    #[arg(long = "set", value_name = "CODE=VALUE")]
    pub settings: Vec<SettingCommand>,
    /// Start from the Baja standard settings instead of the config file's
    #[arg(long)]
    pub baja: bool,
    /// Skip reading the settings back
    #[arg(long)]
    pub no_verify: bool,
}

#[derive(Clone, Debug, Args)]
pub struct TransmitArgs {
    #[command(flatten)]
    pub port: PortArgs,
    /// Do not check that the radio is in transparent mode (AP=0) first
    #[arg(long)]
    pub no_mode_check: bool,
    #[arg(short, long)]
    pub messages: PathBuf,
    #[arg(long, default_value_t = DEFAULT_TX_INTERVAL_MS)]
    pub interval_ms: u64,
}

#[derive(Clone, Debug, Args)]
pub struct ReceiveArgs {
    #[command(flatten)]
    pub port: PortArgs,
    /// Do not check that the radio is in transparent mode (AP=0) first
    #[arg(long)]
    pub no_mode_check: bool,
    #[arg(short, long)]
    pub messages: PathBuf,
    #[arg(long, default_value_t = DEFAULT_MESSAGE_COUNT)]
    pub expected: usize,
    #[arg(long, default_value_t = DEFAULT_RX_TIMEOUT_SECS)]
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct GenMessagesArgs {
    #[arg(short, long, default_value = "random_text.txt")]
    pub out: PathBuf,
    #[arg(long, default_value_t = DEFAULT_MESSAGE_COUNT)]
    pub count: usize,
    #[arg(long, default_value_t = DEFAULT_MIN_LEN)]
    pub min_len: usize,
    #[arg(long, default_value_t = DEFAULT_MAX_LEN)]
    pub max_len: usize,
}

impl CliOpts {
    pub fn finalize(&mut self) -> anyhow::Result<()> {
        self.config_file = shellexpand::full(&self.config_file)?.into_owned();
        Ok(())
    }

    pub fn get_loglevel(&self) -> Level {
        if self.trace {
            Level::TRACE
        } else if self.debug {
            Level::DEBUG
        } else if self.verbose {
            Level::INFO
        } else {
            Level::ERROR
        }
    }

    pub fn start_pgm(&mut self, name: &str) -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_max_level(self.get_loglevel())
            .with_target(false)
            .init();

        self.finalize()?;
        info!("Starting up {name} v{}...", env!("CARGO_PKG_VERSION"));
        Ok(())
    }
}

/// A setting as written in the config file. Numbers and strings are both
/// accepted as values.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SettingEntry {
    pub command: String,
    pub value: EntryValue,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EntryValue {
    Int(u64),
    Text(String),
}

impl SettingEntry {
    pub fn to_setting(&self) -> Result<SettingCommand, SettingError> {
        let command = AtCommand::new(&self.command)?;
        let value = match &self.value {
            EntryValue::Int(v) => SettingValue::Int(*v),
            // Strings go through the same parser as --set, so "0x7DF" works
            EntryValue::Text(s) => s.parse()?,
        };
        Ok(SettingCommand::new(command, value))
    }
}

impl From<&SettingCommand> for SettingEntry {
    fn from(setting: &SettingCommand) -> Self {
        let value = match setting.value() {
            SettingValue::Int(v) => EntryValue::Int(*v),
            SettingValue::Bytes(b) => EntryValue::Text(format!("\"{}\"", String::from_utf8_lossy(b))),
        };
        SettingEntry {
            command: setting.command().to_string(),
            value,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BringUpConfig {
    pub device_path: String,
    pub baud_rate: u32,
    pub verify: bool,
    pub max_polls: u32,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub guard_time_ms: u64,
    pub settings: Vec<SettingEntry>,
}

impl Default for BringUpConfig {
    fn default() -> Self {
        Self {
            device_path: DEFAULT_DEVICE_PATH.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            verify: true,
            max_polls: DEFAULT_MAX_POLLS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            guard_time_ms: DEFAULT_GUARD_TIME_MS,
            settings: SettingPlan::baja_standard()
                .iter()
                .map(SettingEntry::from)
                .collect(),
        }
    }
}

impl BringUpConfig {
    /// Reads the config file, writing a default one if there is none yet.
    pub fn new(opts: &CliOpts) -> anyhow::Result<Self> {
        Self::load_or_create(&opts.config_file)
    }

    pub fn load_or_create(file: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = file.as_ref();
        info!("Attempt reading config file {}", file.display());
        let config: BringUpConfig = match File::open(file) {
            // if the file does exist, the contents must be valid
            Ok(bfile) => serde_json::from_reader(BufReader::new(bfile))?,
            Err(e) => {
                info!(
                    "Error reading config file {}: {e} -- Using default config",
                    file.display()
                );
                let c = BringUpConfig::default();
                if let Some(dir) = file.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                info!("Writing new config to {}", file.display());
                BufWriter::new(File::create(file)?)
                    .write_all(serde_json::to_string_pretty(&c)?.as_bytes())?;
                info!("New config file saved.");
                c
            }
        };

        Ok(config)
    }

    /// The serial port to use, with command line overrides applied.
    pub fn serial_config(&self, port: &PortArgs) -> Result<SerialConfig, DeviceError> {
        SerialConfig::new(
            port.device.clone().unwrap_or_else(|| self.device_path.clone()),
            port.baud.unwrap_or(self.baud_rate),
        )
    }

    pub fn sequencer_config(&self) -> SequencerConfig {
        SequencerConfig {
            max_polls: self.max_polls,
            timeout: Duration::from_millis(self.timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            verify: self.verify,
            ..Default::default()
        }
    }

    pub fn command_mode_config(&self) -> CommandModeConfig {
        CommandModeConfig {
            guard_time: Duration::from_millis(self.guard_time_ms),
            max_batches: DEFAULT_MAX_BATCHES,
        }
    }

    pub fn plan(&self) -> Result<SettingPlan, SettingError> {
        let settings = self
            .settings
            .iter()
            .map(SettingEntry::to_setting)
            .collect::<Result<Vec<_>, _>>()?;
        SettingPlan::new(settings)
    }
}
