//! PLCBus CLI
//!
//! A command-line interface (CLI) application that sends one command to a
//! PLCBus device through a serial PLCBus interface and waits for the
//! device's acknowledgement.
//!
//! The exit code is 0 when the device acknowledged the command, 2 when no
//! valid acknowledgement arrived within the configured attempts, and 1 on
//! any other error.
//!
//! The CLI leverages the `plcbus_lib` crate for protocol definitions and client operations.

use anyhow::{Context, Result, bail};
use clap::Parser;
use dialoguer::Confirm;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use plcbus_lib::{
    client::{ExchangeConfig, Outcome, PlcBus},
    protocol as proto,
    transport::SerialTransport,
};
use std::panic;
use std::process::ExitCode;

mod commandline;
mod config;

/// Exit code reported when every attempt went unanswered.
const EXIT_EXHAUSTED: u8 = 2;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

fn print_command_table() {
    println!("{:<24} {:>6} {:>6}  data", "command", "opcode", "ack");
    for command in proto::Command::ALL {
        let data = match (command.needs_data1(), command.needs_data2()) {
            (true, true) => "data1, data2",
            (true, false) => "data1",
            _ => "-",
        };
        println!(
            "{:<24} {:>#6x} {:>6}  {}",
            command.name(),
            command.opcode(),
            if command.needs_ack() { "yes" } else { "no" },
            data
        );
    }
}

/// Asks before sending commands that erase scene programming.
fn confirm_destructive(request: &proto::Request) -> Result<bool> {
    println!(
        "WARNING: {} erases scene addresses programmed into device {}.",
        request.command, request.device
    );
    Confirm::new()
        .with_prompt("Do you want to send this command?")
        .default(false)
        .show_default(true)
        .interact()
        .context("Failed to get user confirmation.")
}

/// Merges the config file with the command-line overrides.
fn exchange_settings(
    args: &commandline::CliArgs,
    config: &config::Config,
) -> (String, u32, ExchangeConfig) {
    let mut exchange = config.exchange_config();
    if let Some(user_code) = args.user_code {
        exchange.user_code = user_code;
    }
    if let Some(timeout) = args.timeout {
        exchange.timeout = timeout;
    }
    if let Some(delay) = args.delay {
        exchange.delay = delay;
    }
    if let Some(attempts) = args.attempts {
        exchange.attempts = attempts;
    }
    let port = args
        .port
        .clone()
        .unwrap_or_else(|| config.serial.port.clone());
    (port, config.serial.baud_rate, exchange)
}

fn build_request(args: &commandline::CliArgs) -> Result<proto::Request> {
    let (Some(device), Some(command)) = (args.device, args.command) else {
        bail!("Error: Device and Command are required options");
    };
    if !command.needs_data1() && args.data1.is_some() {
        warn!("{command} ignores data1");
    }
    if !command.needs_data2() && args.data2.is_some() {
        warn!("{command} ignores data2");
    }
    Ok(proto::Request::new(device, command, args.data1, args.data2)?)
}

fn main() -> Result<ExitCode> {
    let args = commandline::CliArgs::parse();

    // 1. Initialize logging as early as possible
    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "PLCBus CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    if args.list_commands {
        print_command_table();
        return Ok(ExitCode::SUCCESS);
    }

    // 2. Resolve the request before touching the serial port
    let request = build_request(&args)?;
    let config = config::get_config(args.config.as_deref()).context("Cannot load config file")?;
    let (port, baud_rate, exchange) = exchange_settings(&args, &config);

    if request.command.is_destructive() && !args.yes && !confirm_destructive(&request)? {
        info!("{} aborted by user.", request.command);
        return Ok(ExitCode::SUCCESS);
    }

    // 3. Open the interface and run the exchange
    info!("Opening PLCBus interface on {port} at {baud_rate} baud");
    let transport = SerialTransport::open(&port, baud_rate, exchange.timeout)
        .with_context(|| format!("Cannot open serial port {port}"))?;
    let mut bus = PlcBus::new(transport, exchange);

    let outcome = bus
        .send_with(&request, |attempt, response| match response {
            proto::Response::Invalid(err) => {
                println!("A packet was received, but it was not a valid response");
                debug!("Attempt {attempt}: {err}");
            }
            proto::Response::Empty => println!("No response received"),
            proto::Response::Status(_) => {}
        })
        .with_context(|| format!("Cannot send {} to {}", request.command, request.device))?;

    // 4. Report the terminal outcome
    match outcome {
        Outcome::Success(status) => {
            println!(
                "Device {} received command and reported {}",
                request.device, status
            );
        }
        Outcome::Exhausted { attempts } => {
            error!(
                "Device {} did not acknowledge {} after {} attempts",
                request.device, request.command, attempts
            );
        }
    }
    Ok(ExitCode::from(exit_status(&outcome)))
}

/// Maps the terminal outcome of an exchange to the process exit code.
fn exit_status(outcome: &Outcome) -> u8 {
    match outcome {
        Outcome::Success(_) => 0,
        Outcome::Exhausted { .. } => EXIT_EXHAUSTED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn args(argv: &[&str]) -> commandline::CliArgs {
        commandline::CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn request_from_args() {
        let request = build_request(&args(&["plcbus", "-d", "A1", "-c", "ON"])).unwrap();
        let packet = proto::OutboundPacket::from_request(&request, proto::UserCode::default());
        assert_eq!(
            packet.as_bytes(),
            &[0x02, 0x05, 0xA9, 0x00, 0x22, 0x00, 0x00, 0x03]
        );
    }

    #[test]
    fn request_missing_data_is_fatal() {
        let err = build_request(&args(&["plcbus", "-d", "A1", "-c", "BRIGHT"])).unwrap_err();
        assert_eq!(
            err.downcast_ref::<proto::Error>(),
            Some(&proto::Error::MissingData1(proto::Command::BRIGHT))
        );
        let err = build_request(&args(&[
            "plcbus", "-d", "A1", "-c", "STATUS_ON", "--data1", "1",
        ]))
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<proto::Error>(),
            Some(&proto::Error::MissingData2(proto::Command::STATUS_ON))
        );
    }

    #[test]
    fn exit_status_distinguishes_exhausted() {
        let success = Outcome::Success(proto::DecodedStatus {
            command: proto::Command::ON,
            data1: 0,
            data2: 0,
        });
        assert_eq!(exit_status(&success), 0);
        assert_eq!(exit_status(&Outcome::Exhausted { attempts: 3 }), EXIT_EXHAUSTED);
        assert_ne!(EXIT_EXHAUSTED, 0);
        assert_ne!(EXIT_EXHAUSTED, 1);
    }

    #[test]
    fn cli_overrides_config() {
        let config = config::Config::default();
        let (port, baud_rate, exchange) = exchange_settings(
            &args(&["plcbus", "-d", "A1", "-c", "ON", "-p", "COM4", "--attempts", "1"]),
            &config,
        );
        assert_eq!(port, "COM4");
        assert_eq!(baud_rate, 9600);
        assert_eq!(exchange.attempts, 1);
        assert_eq!(exchange.timeout, Duration::from_millis(900));
        assert_eq!(exchange.delay, Duration::from_millis(125));

        let (port, _, exchange) =
            exchange_settings(&args(&["plcbus", "-d", "A1", "-c", "ON"]), &config);
        assert_eq!(port, config::default_port());
        assert_eq!(exchange, ExchangeConfig::default());
    }
}
