//! What the command mode driver knows about individual XBee parameters.
use bitflags::bitflags;

use crate::settings::{AtCommand, SettingValue};

bitflags! {
    /// These flags determine what can be done with a parameter.
    pub struct ParamAccess: u8 {
        const READ = 0b00000001;
        const WRITE = 0b00000010;
        const EXECUTE = 0b00000100;
        const READ_WRITE = Self::READ.bits | Self::WRITE.bits;
    }
}

/// The shape of a parameter's value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// A number sent and received as hex, at most `max`.
    Numeric { max: u64 },
    /// Printable text of at most `max_len` characters.
    Text { max_len: usize },
    /// A command that takes no value.
    Action,
}

#[derive(Copy, Clone, Debug)]
pub struct ParamSpec {
    pub code: &'static str,
    pub access: ParamAccess,
    pub kind: ParamKind,
}

const fn numeric(code: &'static str, access: ParamAccess, max: u64) -> ParamSpec {
    ParamSpec {
        code,
        access,
        kind: ParamKind::Numeric { max },
    }
}

const fn action(code: &'static str) -> ParamSpec {
    ParamSpec {
        code,
        access: ParamAccess::EXECUTE,
        kind: ParamKind::Action,
    }
}

/// Parameters of the 900HP / DigiMesh firmware the Baja radios run.
/// Codes missing from this table are passed through unchecked.
pub const PARAMS: &[ParamSpec] = &[
    numeric("ID", ParamAccess::READ_WRITE, 0x7FFF),
    numeric("HP", ParamAccess::READ_WRITE, 0x07),
    numeric("CM", ParamAccess::READ_WRITE, u64::MAX),
    numeric("BD", ParamAccess::READ_WRITE, 0x0E1000),
    numeric("BR", ParamAccess::READ_WRITE, 0x01),
    numeric("TX", ParamAccess::READ_WRITE, 0x04),
    numeric("PL", ParamAccess::READ_WRITE, 0x04),
    numeric("AP", ParamAccess::READ_WRITE, 0x02),
    numeric("MT", ParamAccess::READ_WRITE, 0x0F),
    numeric("RR", ParamAccess::READ_WRITE, 0x0F),
    numeric("DH", ParamAccess::READ_WRITE, 0xFFFF_FFFF),
    numeric("DL", ParamAccess::READ_WRITE, 0xFFFF_FFFF),
    numeric("CT", ParamAccess::READ_WRITE, 0x1770),
    numeric("GT", ParamAccess::READ_WRITE, 0x0CE4),
    numeric("NP", ParamAccess::READ, u64::MAX),
    numeric("SH", ParamAccess::READ, 0xFFFF_FFFF),
    numeric("SL", ParamAccess::READ, 0xFFFF_FFFF),
    numeric("VR", ParamAccess::READ, 0xFFFF),
    numeric("HV", ParamAccess::READ, 0xFFFF),
    ParamSpec {
        code: "NI",
        access: ParamAccess::READ_WRITE,
        kind: ParamKind::Text { max_len: 20 },
    },
    action("WR"),
    action("AC"),
    action("CN"),
    action("RE"),
    action("FR"),
];

/// Looks a parameter up by command code.
pub fn lookup(command: AtCommand) -> Option<&'static ParamSpec> {
    PARAMS.iter().find(|p| p.code == command.as_str())
}

/// Checks that `value` may be written to `command`, returning why not.
pub fn check_write(command: AtCommand, value: &SettingValue) -> Result<(), String> {
    // Unknown parameters are left to the radio to judge
    let spec = match lookup(command) {
        Some(spec) => spec,
        None => return Ok(()),
    };

    if !spec.access.contains(ParamAccess::WRITE) {
        return Err(if spec.access.contains(ParamAccess::EXECUTE) {
            "is a command, not a setting".to_string()
        } else {
            "is read-only".to_string()
        });
    }

    match (spec.kind, value) {
        (ParamKind::Numeric { max }, SettingValue::Int(v)) if *v > max => {
            Err(format!("{v:#X} is above the maximum {max:#X}"))
        }
        (ParamKind::Numeric { .. }, SettingValue::Int(_)) => Ok(()),
        (ParamKind::Numeric { .. }, SettingValue::Bytes(_)) => Err("expects a number".to_string()),
        (ParamKind::Text { max_len }, SettingValue::Bytes(b)) if b.len() > max_len => {
            Err(format!("{} characters is longer than {max_len}", b.len()))
        }
        (ParamKind::Text { .. }, SettingValue::Bytes(b)) if !b.iter().all(|c| (0x20..0x7F).contains(c) && *c != b',') => {
            Err("text must be printable ascii without commas".to_string())
        }
        (ParamKind::Text { .. }, SettingValue::Bytes(_)) => Ok(()),
        (ParamKind::Text { .. }, SettingValue::Int(_)) => {
            Err("expects text, quote the value".to_string())
        }
        (ParamKind::Action, _) => Err("takes no value".to_string()),
    }
}

/// Returns true if replies to `command` should be decoded as hex numbers.
pub fn is_numeric(command: AtCommand) -> bool {
    matches!(
        lookup(command).map(|p| p.kind),
        Some(ParamKind::Numeric { .. }) | None
    )
}
