//! Radio settings: AT command codes, their values, and ordered plans of them.

use std::fmt;
use std::str::FromStr;

use crate::errors::SettingError;

/// Baja channel mask (CM)
pub const BAJA_CM: u64 = 0x3FFFFFFFFFFFF;
/// Baja interface data rate (BD)
pub const BAJA_BD: u64 = 921600;
/// Baja transmit power (TX)
pub const BAJA_TX: u64 = 2;
/// Baja RF data rate (BR)
pub const BAJA_BR: u64 = 1;
/// Baja API mode without escapes (AP)
pub const BAJA_AP: u64 = 1;
/// Baja network id (ID)
pub const BAJA_ID: u64 = 2015;
/// Baja transmissions per broadcast (MT)
pub const BAJA_MT: u64 = 0;
/// Maximum payload the Baja radios report through the read-only NP parameter.
pub const BAJA_MAX_PAYLOAD: usize = 100;

/// A two character AT command code such as `ID` or `HP`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtCommand([u8; 2]);

impl AtCommand {
    /// Write settings to non-volatile memory
    pub const WR: AtCommand = AtCommand(*b"WR");
    /// Apply queued changes
    pub const AC: AtCommand = AtCommand(*b"AC");
    /// Exit command mode
    pub const CN: AtCommand = AtCommand(*b"CN");
    /// API mode, 0 for transparent
    pub const AP: AtCommand = AtCommand(*b"AP");
    /// Serial number, high word
    pub const SH: AtCommand = AtCommand(*b"SH");
    /// Serial number, low word
    pub const SL: AtCommand = AtCommand(*b"SL");
    /// Firmware version
    pub const VR: AtCommand = AtCommand(*b"VR");
    /// Hardware version
    pub const HV: AtCommand = AtCommand(*b"HV");

    /// Creates a command code, normalising letters to uppercase.
    pub fn new(code: &str) -> Result<AtCommand, SettingError> {
        let bytes = code.as_bytes();

        // Codes are exactly two ascii letters or digits
        if bytes.len() != 2 || !bytes.iter().all(|b| b.is_ascii_alphanumeric()) {
            return Err(SettingError::InvalidCode(code.to_string()));
        }

        Ok(AtCommand([
            bytes[0].to_ascii_uppercase(),
            bytes[1].to_ascii_uppercase(),
        ]))
    }

    pub fn as_str(&self) -> &str {
        // Both bytes were checked to be ascii on construction
        std::str::from_utf8(&self.0).unwrap_or("??")
    }

    pub fn as_bytes(&self) -> &[u8; 2] {
        &self.0
    }
}

impl FromStr for AtCommand {
    type Err = SettingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AtCommand::new(s)
    }
}

impl fmt::Display for AtCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for AtCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtCommand({})", self.as_str())
    }
}

/// The value of a radio parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettingValue {
    Int(u64),
    Bytes(Vec<u8>),
}

impl SettingValue {
    /// Returns true if a value read back from the radio satisfies this one.
    ///
    /// Integers and byte strings compare across kinds by reading up to eight
    /// bytes as a big-endian integer.
    pub fn matches(&self, actual: &SettingValue) -> bool {
        match (self, actual) {
            (SettingValue::Int(a), SettingValue::Int(b)) => a == b,
            (SettingValue::Bytes(a), SettingValue::Bytes(b)) => a == b,
            (SettingValue::Int(n), SettingValue::Bytes(b))
            | (SettingValue::Bytes(b), SettingValue::Int(n)) => bytes_as_int(b) == Some(*n),
        }
    }
}

impl SettingValue {
    /// The value as an integer, reading up to eight bytes big-endian.
    pub fn as_int(&self) -> Option<u64> {
        match self {
            SettingValue::Int(n) => Some(*n),
            SettingValue::Bytes(b) => bytes_as_int(b),
        }
    }
}

fn bytes_as_int(bytes: &[u8]) -> Option<u64> {
    if bytes.len() > 8 {
        return None;
    }
    Some(bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

impl From<u64> for SettingValue {
    fn from(v: u64) -> Self {
        SettingValue::Int(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Bytes(v.as_bytes().to_vec())
    }
}

impl FromStr for SettingValue {
    type Err = SettingError;

    /// Parses `2015`, `0x7DF` or text. Text may be wrapped in double quotes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SettingError::InvalidValue(s.to_string()));
        }

        // Explicit hex
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return u64::from_str_radix(hex, 16)
                .map(SettingValue::Int)
                .map_err(|_| SettingError::InvalidValue(s.to_string()));
        }

        // Quoted text is always bytes, even if it looks like a number
        if let Some(text) = s.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
            return Ok(SettingValue::Bytes(text.as_bytes().to_vec()));
        }

        if s.bytes().all(|b| b.is_ascii_digit()) {
            return s
                .parse::<u64>()
                .map(SettingValue::Int)
                .map_err(|_| SettingError::InvalidValue(s.to_string()));
        }

        Ok(SettingValue::Bytes(s.as_bytes().to_vec()))
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Int(v) => write!(f, "{v}"),
            SettingValue::Bytes(b) if b.iter().all(|c| c.is_ascii_graphic() || *c == b' ') => {
                write!(f, "\"{}\"", String::from_utf8_lossy(b))
            }
            SettingValue::Bytes(b) => {
                f.write_str("0x")?;
                for c in b {
                    write!(f, "{c:02X}")?;
                }
                Ok(())
            }
        }
    }
}

/// One desired radio parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettingCommand {
    command: AtCommand,
    value: SettingValue,
}

impl SettingCommand {
    pub fn new(command: AtCommand, value: impl Into<SettingValue>) -> Self {
        SettingCommand {
            command,
            value: value.into(),
        }
    }

    pub fn command(&self) -> AtCommand {
        self.command
    }

    pub fn value(&self) -> &SettingValue {
        &self.value
    }
}

impl FromStr for SettingCommand {
    type Err = SettingError;

    /// Parses `CODE=VALUE`, for example `ID=2015`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (code, value) = s
            .split_once('=')
            .ok_or_else(|| SettingError::InvalidEntry(s.to_string()))?;

        Ok(SettingCommand {
            command: code.trim().parse()?,
            value: value.parse()?,
        })
    }
}

impl fmt::Display for SettingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.command, self.value)
    }
}

/// An ordered list of settings to apply. Later settings may rely on earlier
/// ones, so the order is never changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SettingPlan {
    commands: Vec<SettingCommand>,
}

impl SettingPlan {
    /// Creates a plan, rejecting any command code that appears twice.
    pub fn new(commands: Vec<SettingCommand>) -> Result<SettingPlan, SettingError> {
        let mut plan = SettingPlan::default();
        for command in commands {
            plan.push(command)?;
        }
        Ok(plan)
    }

    /// A plan that changes nothing and only verifies the radio comes up.
    pub fn empty() -> SettingPlan {
        SettingPlan::default()
    }

    /// The firmware settings every Baja radio is expected to carry.
    pub fn baja_standard() -> SettingPlan {
        let entries = [
            ("CM", BAJA_CM),
            ("BD", BAJA_BD),
            ("TX", BAJA_TX),
            ("BR", BAJA_BR),
            ("AP", BAJA_AP),
            ("ID", BAJA_ID),
            ("MT", BAJA_MT),
        ];

        let commands = entries
            .iter()
            .filter_map(|(code, value)| {
                AtCommand::new(code)
                    .ok()
                    .map(|c| SettingCommand::new(c, *value))
            })
            .collect();

        SettingPlan { commands }
    }

    /// Appends a setting to the end of the plan.
    pub fn push(&mut self, command: SettingCommand) -> Result<(), SettingError> {
        if self.commands.iter().any(|c| c.command == command.command) {
            return Err(SettingError::Duplicate(command.command));
        }
        self.commands.push(command);
        Ok(())
    }

    /// Replaces the value of an existing setting or appends a new one.
    pub fn set(&mut self, command: SettingCommand) {
        match self.commands.iter_mut().find(|c| c.command == command.command) {
            Some(existing) => *existing = command,
            None => self.commands.push(command),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SettingCommand> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl<'a> IntoIterator for &'a SettingPlan {
    type Item = &'a SettingCommand;
    type IntoIter = std::slice::Iter<'a, SettingCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

/// The read-only parameters that identify a radio.
pub const DEVICE_INFO: [AtCommand; 4] = [AtCommand::SH, AtCommand::SL, AtCommand::VR, AtCommand::HV];

/// Serial number and versions of a radio.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial_number: u64,
    pub firmware: u64,
    pub hardware: u64,
}

impl DeviceInfo {
    /// Picks the `DEVICE_INFO` parameters out of `settings`. Missing ones
    /// are left at zero.
    pub fn from_settings(settings: &[SettingCommand]) -> DeviceInfo {
        let mut info = DeviceInfo::default();
        for setting in settings {
            let value = setting.value().as_int().unwrap_or(0);
            match setting.command() {
                AtCommand::SH => info.serial_number |= (value & 0xFFFF_FFFF) << 32,
                AtCommand::SL => info.serial_number |= value & 0xFFFF_FFFF,
                AtCommand::VR => info.firmware = value,
                AtCommand::HV => info.hardware = value,
                _ => (),
            }
        }
        info
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "serial number {:016X}, firmware {:X}, hardware {:X}",
            self.serial_number, self.firmware, self.hardware
        )
    }
}
