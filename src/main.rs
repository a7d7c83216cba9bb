use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use xbee_bringup::config::{
    BringUpConfig, CliOpts, Command, ConfigureArgs, GenMessagesArgs, ReceiveArgs, TransmitArgs,
};
use xbee_bringup::devices::ports::discover_xbee_ports;
use xbee_bringup::link::{self, ReceiveOptions, ReceiveOutcome};
use xbee_bringup::messages::{self, MessageTally};
use xbee_bringup::settings::BAJA_MAX_PAYLOAD;
use xbee_bringup::{
    AtCommand, CancelToken, CommandModeDriver, LinkError, Sequencer, SerialConfig,
    SerialTransport, SettingPlan, Transport,
};

fn main() -> anyhow::Result<()> {
    let mut opts = CliOpts::parse();
    opts.start_pgm(env!("CARGO_BIN_NAME"))?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move { run(opts).await })?;

    Ok(())
}

async fn run(opts: CliOpts) -> anyhow::Result<()> {
    // Ctrl-C and SIGTERM stop whatever is running at its next poll
    let cancel = CancelToken::new();
    tokio::spawn(watch_signals(cancel.clone()));

    match opts.command.clone() {
        Command::Ports => list_ports(),
        Command::GenMessages(args) => gen_messages(&args),
        Command::Configure(args) => {
            let config = BringUpConfig::new(&opts)?;
            tokio::task::spawn_blocking(move || configure(&config, &args, &cancel)).await?
        }
        Command::Transmit(args) => {
            let config = BringUpConfig::new(&opts)?;
            tokio::task::spawn_blocking(move || transmit(&config, &args, &cancel)).await?
        }
        Command::Receive(args) => {
            let config = BringUpConfig::new(&opts)?;
            tokio::task::spawn_blocking(move || receive(&config, &args, &cancel)).await?
        }
    }
}

async fn watch_signals(cancel: CancelToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                error!("Error setting signal handler: {e}");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => (),
            _ = term.recv() => (),
        }
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            error!("Error setting signal handler");
            return;
        }
    }

    warn!("Received termination signal, stopping");
    cancel.cancel();
}

fn configure(config: &BringUpConfig, args: &ConfigureArgs, cancel: &CancelToken) -> anyhow::Result<()> {
    let serial = config.serial_config(&args.port)?;

    // Settings from the config file (or the Baja standard), then --set
    let mut plan = if args.baja {
        SettingPlan::baja_standard()
    } else {
        config.plan()?
    };
    for setting in &args.settings {
        plan.set(setting.clone());
    }

    let mut sequencer_config = config.sequencer_config();
    if args.no_verify {
        sequencer_config.verify = false;
    }

    let driver = CommandModeDriver::new(config.command_mode_config());
    let mut sequencer = Sequencer::new(SerialTransport::new(), driver, sequencer_config);

    println!("Configuring {} with {} settings...", serial.device_path(), plan.len());
    let report = match sequencer.bring_up(&serial, &plan, cancel) {
        Ok(report) => report,
        Err(e) => {
            error!("Bring-up failed: {e}");
            sequencer.close();
            return Err(e.into());
        }
    };

    match sequencer.device_info(cancel) {
        Ok(device) => println!("Radio {device}"),
        Err(e) => warn!("Could not read the radio's identity: {e}"),
    }

    // Leave command mode so the radio goes back to passing data
    if let Err(e) = sequencer.execute(AtCommand::CN, cancel) {
        warn!("Could not leave command mode: {e}");
    }
    sequencer.close();

    println!(
        "Initialized XBee AT layer after {} polls, queued {} settings, verified {}.",
        report.init_polls, report.queued, report.verified
    );
    // The values took, but they are lost on the next power cycle
    if let Some(e) = report.commit_error {
        anyhow::bail!("Settings were not written: {e}");
    }
    Ok(())
}

/// Makes sure the radio passes raw text before a link test starts.
fn check_mode(config: &BringUpConfig, serial: &SerialConfig, cancel: &CancelToken) -> anyhow::Result<()> {
    let driver = CommandModeDriver::new(config.command_mode_config());
    let mut sequencer = Sequencer::new(SerialTransport::new(), driver, config.sequencer_config());

    sequencer.open(serial)?;
    let result = link::check_transparent(&mut sequencer, cancel);
    sequencer.close();
    result?;
    Ok(())
}

fn transmit(config: &BringUpConfig, args: &TransmitArgs, cancel: &CancelToken) -> anyhow::Result<()> {
    let serial = config.serial_config(&args.port)?;
    if !args.no_mode_check {
        check_mode(config, &serial, cancel)?;
    }
    let messages = messages::load_messages(&args.messages, usize::MAX, BAJA_MAX_PAYLOAD)
        .with_context(|| format!("Error opening {}", args.messages.display()))?;

    let mut transport = SerialTransport::new();
    let mut port = transport.open(&serial)?;
    info!("Transmitting {} messages on {}", messages.len(), serial.device_path());

    let result = link::transmit(
        &mut port,
        &messages,
        Duration::from_millis(args.interval_ms),
        cancel,
    );
    transport.close(port);

    let sent = result?;
    println!("Sent {sent} messages!");
    Ok(())
}

fn receive(config: &BringUpConfig, args: &ReceiveArgs, cancel: &CancelToken) -> anyhow::Result<()> {
    let serial = config.serial_config(&args.port)?;
    let expected = messages::load_messages(&args.messages, args.expected, BAJA_MAX_PAYLOAD)
        .with_context(|| format!("Error opening {}", args.messages.display()))?;
    if expected.len() != args.expected {
        anyhow::bail!(
            "Could not read all expected messages from {} ({} of {})",
            args.messages.display(),
            expected.len(),
            args.expected
        );
    }
    if !args.no_mode_check {
        check_mode(config, &serial, cancel)?;
    }

    let mut transport = SerialTransport::new();
    let mut port = transport.open(&serial)?;
    let mut tally = MessageTally::new(expected);
    let options = ReceiveOptions {
        timeout: Duration::from_secs(args.timeout_secs),
        ..Default::default()
    };

    let result = link::receive(&mut port, &mut tally, &options, cancel);
    transport.close(port);

    // The summary is printed however the run ended
    println!("{tally}");
    for message in tally.missing() {
        println!("Missing: {message}");
    }

    match result {
        Ok(ReceiveOutcome::Complete) => Ok(()),
        Ok(ReceiveOutcome::TimedOut) => anyhow::bail!("Timed out waiting for messages"),
        Err(LinkError::Cancelled { count }) => {
            warn!("Stopped after {count} expected messages");
            Err(LinkError::Cancelled { count }.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn gen_messages(args: &GenMessagesArgs) -> anyhow::Result<()> {
    let mut rng = rand::rng();
    let generated = messages::generate_messages(&mut rng, args.count, args.min_len, args.max_len);
    messages::save_messages(&args.out, &generated)?;
    println!("Wrote {} messages to {}", generated.len(), args.out.display());
    Ok(())
}

fn list_ports() -> anyhow::Result<()> {
    let ports = discover_xbee_ports()?;
    if ports.is_empty() {
        println!("No XBee adapters found");
    }
    for port in ports {
        println!(
            "{} {} {}",
            port.port_name(),
            port.product.as_deref().unwrap_or("-"),
            port.serial_number.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
