mod common;

use std::time::Duration;

use common::{fast_config, serial, RadioTransport};
use xbee_bringup::driver::command_mode::DEFAULT_MAX_BATCHES;
use xbee_bringup::driver::CommandModeConfig;
use xbee_bringup::link::check_transparent;
use xbee_bringup::{BringUpError, CancelToken, CommandModeDriver, LinkError, Sequencer, SettingValue};

fn radio_with_mode(mode: &str) -> Sequencer<RadioTransport, CommandModeDriver> {
    let mut transport = RadioTransport::default();
    transport.registers.insert("AP".to_string(), mode.to_string());
    let driver = CommandModeDriver::new(CommandModeConfig {
        guard_time: Duration::ZERO,
        max_batches: DEFAULT_MAX_BATCHES,
    });
    let mut seq = Sequencer::new(transport, driver, fast_config());
    seq.open(&serial()).unwrap();
    seq
}

#[test]
fn transparent_radio_passes() {
    let mut seq = radio_with_mode("0");
    check_transparent(&mut seq, &CancelToken::new()).unwrap();

    let lines = &seq.port_mut().unwrap().lines;
    assert_eq!(lines, &["+++", "ATAP", "ATCN"]);
    assert!(!seq.driver().is_ready());
}

#[test]
fn api_mode_radio_is_refused() {
    let mut seq = radio_with_mode("1");
    let err = check_transparent(&mut seq, &CancelToken::new()).unwrap_err();

    assert!(matches!(err, LinkError::ApiMode(SettingValue::Int(1))));
    // Command mode is left even when the link cannot run
    let lines = &seq.port_mut().unwrap().lines;
    assert_eq!(lines.last().map(String::as_str), Some("ATCN"));
}

#[test]
fn mode_check_needs_an_open_port() {
    let driver = CommandModeDriver::new(CommandModeConfig::default());
    let mut seq = Sequencer::new(RadioTransport::default(), driver, fast_config());
    let err = check_transparent(&mut seq, &CancelToken::new()).unwrap_err();

    assert!(matches!(err, LinkError::ModeCheck(BringUpError::NotOpen)));
}
