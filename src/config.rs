use directories_next::ProjectDirs;
use plcbus_lib::client::ExchangeConfig;
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SerialConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Read timeout per attempt
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            timeout: default_timeout(),
        }
    }
}

pub fn default_port() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

fn default_baud_rate() -> u32 {
    plcbus_lib::transport::BAUD_RATE
}

fn default_timeout() -> Duration {
    ExchangeConfig::DEFAULT_TIMEOUT
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExchangeSection {
    #[serde(default = "default_user_code")]
    pub user_code: u8,
    #[serde(default = "default_attempts")]
    pub attempts: u8,
    /// Pause between attempts
    #[serde(default = "default_delay", with = "humantime_serde")]
    pub delay: Duration,
}

impl Default for ExchangeSection {
    fn default() -> Self {
        Self {
            user_code: default_user_code(),
            attempts: default_attempts(),
            delay: default_delay(),
        }
    }
}

fn default_user_code() -> u8 {
    *plcbus_lib::protocol::UserCode::DEFAULT
}

fn default_attempts() -> u8 {
    ExchangeConfig::DEFAULT_ATTEMPTS
}

fn default_delay() -> Duration {
    ExchangeConfig::DEFAULT_DELAY
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub exchange: ExchangeSection,
}

impl Config {
    pub const DEFAULT_CONFIG_FILE: &'static str = "plcbus.yml";

    /// Rejects values the exchange cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("serial.timeout", self.serial.timeout),
            ("exchange.delay", self.exchange.delay),
        ] {
            if value > ExchangeConfig::MAX_DURATION {
                anyhow::bail!(
                    "{name} of {} exceeds {}",
                    humantime::format_duration(value),
                    humantime::format_duration(ExchangeConfig::MAX_DURATION)
                );
            }
        }
        if self.exchange.attempts == 0 {
            anyhow::bail!("exchange.attempts must be at least 1");
        }
        Ok(())
    }

    pub fn exchange_config(&self) -> ExchangeConfig {
        ExchangeConfig {
            user_code: self.exchange.user_code.into(),
            attempts: self.exchange.attempts,
            timeout: self.serial.timeout,
            delay: self.exchange.delay,
        }
    }
}

/// Loads the configuration. An explicit path must exist, otherwise the
/// working directory and the user config directory are searched and the
/// built-in defaults are used when neither has a file.
pub fn get_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    match get_config_file_path(explicit) {
        Some(path) => {
            log::debug!("Loading config file from {:?}", &path);
            let config_file = File::open(&path)?;
            let config: Config = serde_yaml::from_reader(&config_file)?;
            config.validate()?;
            Ok(config)
        }
        None => {
            log::debug!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

fn get_config_file_path(explicit: Option<&Path>) -> Option<PathBuf> {
    let default_file = Path::new(Config::DEFAULT_CONFIG_FILE);
    let user_dir_file = get_user_dir_path();

    match (explicit, default_file, user_dir_file) {
        (Some(config), _, _) => Some(config.to_path_buf()),
        (None, config, _) if config.exists() => Some(config.to_path_buf()),
        (None, _, Some(config)) if config.exists() => Some(config),
        _ => None,
    }
}

fn get_user_dir_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "plcbus", "plcbus")
        .map(|project_dirs| project_dirs.config_dir().join("config.yml"))
}
