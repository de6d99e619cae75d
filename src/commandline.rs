use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use plcbus_lib::{client::ExchangeConfig, protocol as proto};
use std::path::PathBuf;
use std::time::Duration;

fn parse_device(s: &str) -> Result<proto::DeviceAddress, String> {
    s.parse::<proto::DeviceAddress>().map_err(|e| e.to_string())
}

fn parse_command(s: &str) -> Result<proto::Command, String> {
    s.parse::<proto::Command>().map_err(|e| e.to_string())
}

fn parse_data(s: &str) -> Result<u8, String> {
    clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid data byte format: {e}"))
}

fn parse_user_code(s: &str) -> Result<proto::UserCode, String> {
    let code = clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid user code format: {e}"))?;
    Ok(proto::UserCode::from(code))
}

fn parse_bounded_duration(s: &str) -> Result<Duration, String> {
    let duration = humantime::parse_duration(s).map_err(|e| format!("Invalid duration: {e}"))?;
    if duration > ExchangeConfig::MAX_DURATION {
        return Err(format!(
            "Duration must not exceed {}",
            humantime::format_duration(ExchangeConfig::MAX_DURATION)
        ));
    }
    Ok(duration)
}

fn parse_attempts(s: &str) -> Result<u8, String> {
    clap_num::number_range(s, 1, u8::MAX)
}

const fn about_text() -> &'static str {
    "PLCBus CLI - Send a single command to a PLCBus device and wait for its acknowledgement."
}

#[derive(Parser, Debug)]
#[command(name="plcbus", author, version, about=about_text(), long_about = None)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warnings only.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// The device to send the command to.
    /// House code A-P followed by unit 1-16, e.g. "A1" or "P16".
    #[arg(short, long, value_parser = parse_device, required_unless_present = "list_commands", verbatim_doc_comment)]
    pub device: Option<proto::DeviceAddress>,

    /// The command to send to the device, e.g. "ON", "OFF", "PRESET_DIM".
    /// Use --list-commands to show all commands.
    #[arg(short, long, value_parser = parse_command, required_unless_present = "list_commands", verbatim_doc_comment)]
    pub command: Option<proto::Command>,

    /// The data1 parameter (decimal or hexadecimal, e.g. "100" or "0x64").
    /// Required by DIM, BRIGHT, BLINK and the commands that take data2.
    #[arg(long, value_parser = parse_data, verbatim_doc_comment)]
    pub data1: Option<u8>,

    /// The data2 parameter (decimal or hexadecimal).
    #[arg(long, value_parser = parse_data)]
    pub data2: Option<u8>,

    /// Serial port of the PLCBus interface.
    /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
    /// Defaults to the config file value, or /dev/ttyUSB0.
    #[arg(short, long, verbatim_doc_comment)]
    pub port: Option<String>,

    /// User code identifying this controller (decimal or hexadecimal).
    #[arg(long, value_parser = parse_user_code)]
    pub user_code: Option<proto::UserCode>,

    /// How long to wait for an acknowledgement on each attempt.
    /// Examples: "900ms", "2s".
    #[arg(long, value_parser = parse_bounded_duration, verbatim_doc_comment)]
    pub timeout: Option<Duration>,

    /// Pause between a failed attempt and the next one.
    /// Examples: "125ms", "1s".
    #[arg(long, value_parser = parse_bounded_duration, verbatim_doc_comment)]
    pub delay: Option<Duration>,

    /// Number of attempts before giving up.
    #[arg(long, value_parser = parse_attempts)]
    pub attempts: Option<u8>,

    /// YAML configuration file.
    /// Without it, ./plcbus.yml and the user config directory are searched.
    #[arg(long, verbatim_doc_comment)]
    pub config: Option<PathBuf>,

    /// Do not ask for confirmation before scene erase commands.
    #[arg(short, long)]
    pub yes: bool,

    /// Print all known commands with their opcodes and exit.
    #[arg(long)]
    pub list_commands: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parses_request() {
        let args = CliArgs::try_parse_from([
            "plcbus", "-d", "B2", "-c", "PRESET_DIM", "--data1", "0x32", "--data2", "4",
        ])
        .unwrap();
        assert_eq!(args.device, Some("B2".parse().unwrap()));
        assert_eq!(args.command, Some(proto::Command::PRESET_DIM));
        assert_eq!(args.data1, Some(0x32));
        assert_eq!(args.data2, Some(4));
        assert!(!args.yes);
    }

    #[test]
    fn parses_overrides() {
        let args = CliArgs::try_parse_from([
            "plcbus",
            "--device",
            "A1",
            "--command",
            "ON",
            "--port",
            "/dev/ttyS0",
            "--user-code",
            "0x42",
            "--timeout",
            "2s",
            "--delay",
            "50ms",
            "--attempts",
            "5",
        ])
        .unwrap();
        assert_eq!(args.port.as_deref(), Some("/dev/ttyS0"));
        assert_eq!(args.user_code, Some(proto::UserCode::new(0x42)));
        assert_eq!(args.timeout, Some(Duration::from_secs(2)));
        assert_eq!(args.delay, Some(Duration::from_millis(50)));
        assert_eq!(args.attempts, Some(5));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(CliArgs::try_parse_from(["plcbus", "-c", "ON"]).is_err());
        assert!(CliArgs::try_parse_from(["plcbus", "-d", "A1"]).is_err());
        assert!(CliArgs::try_parse_from(["plcbus", "-d", "Z1", "-c", "ON"]).is_err());
        assert!(CliArgs::try_parse_from(["plcbus", "-d", "A1", "-c", "TOGGLE"]).is_err());
        assert!(CliArgs::try_parse_from(["plcbus", "-d", "A1", "-c", "DIM", "--data1", "256"]).is_err());
        assert!(CliArgs::try_parse_from(["plcbus", "-d", "A1", "-c", "ON", "--attempts", "0"]).is_err());
        assert!(
            CliArgs::try_parse_from([
                "plcbus", "-d", "A1", "-c", "ON", "--timeout", "100000000000years"
            ])
            .is_err()
        );
        assert!(CliArgs::try_parse_from(["plcbus", "-d", "A1", "-c", "ON", "--delay", "2m"]).is_err());
        assert!(CliArgs::try_parse_from(["plcbus", "-d", "A1", "-c", "ON", "--timeout", "1m"]).is_ok());
    }

    #[test]
    fn list_commands_needs_no_request() {
        let args = CliArgs::try_parse_from(["plcbus", "--list-commands"]).unwrap();
        assert!(args.list_commands);
        assert_eq!(args.device, None);
    }
}
