//! Defines the configuration for the clock and how it is loaded.
//!
//! Settings come from an optional TOML file, overridden by `DNSFAIL_*`
//! environment variables. Every key has a default, and a bad value for one key
//! only costs that key: it falls back to its default with a warning instead of
//! aborting startup.

use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Where the daemon looks for its file when none is given.
pub const DEFAULT_CONFIG_PATH: &str = "/usr/local/share/dnsfail/config.toml";
/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "DNSFAIL_CONFIG";
const ENV_PREFIX: &str = "DNSFAIL";

/// The complete, validated configuration. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct DnsfailConfig {
    /// GPIO character device the button line lives on.
    pub gpio_chip: String,
    /// Line offset of the reset button.
    pub gpio_pin: u32,
    /// Display brightness in percent, 1..=100.
    pub brightness: u8,
    /// WAV file played on every reset.
    pub audio_file: PathBuf,
    /// ALSA device for `aplay -D`; empty for the default device.
    pub audio_device: String,
    /// The persisted origin.
    pub persistence_file: PathBuf,
    /// Whether to start the HTTP control surface.
    pub web_enabled: bool,
    pub web_host: String,
    pub web_port: u16,
    /// A `tracing` filter directive, e.g. `info` or `dnsfail=debug`.
    pub log_level: String,
    /// Zone used when reporting the origin in local time.
    pub timezone: Tz,
}

impl Default for DnsfailConfig {
    fn default() -> Self {
        Self {
            gpio_chip: "/dev/gpiochip0".to_string(),
            gpio_pin: 19,
            brightness: 80,
            audio_file: PathBuf::from("/usr/local/share/dnsfail/media/fail.wav"),
            audio_device: String::new(),
            persistence_file: PathBuf::from("/usr/local/share/dnsfail/last_reset.json"),
            web_enabled: true,
            web_host: "0.0.0.0".to_string(),
            web_port: 5000,
            log_level: "info".to_string(),
            timezone: Tz::UTC,
        }
    }
}

impl DnsfailConfig {
    /// Picks the config file: an explicit path, else `DNSFAIL_CONFIG`, else the default.
    pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Loads the file at `path` (if it exists) plus environment overrides.
    pub fn load(path: &Path) -> Self {
        let raw = Config::builder()
            .add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build();

        match raw {
            Ok(raw) => Self::from_config(&raw),
            Err(e) => {
                warn!(
                    "Could not load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Parses TOML text directly, without consulting the environment.
    pub fn from_toml_str(text: &str) -> Self {
        match Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()
        {
            Ok(raw) => Self::from_config(&raw),
            Err(e) => {
                warn!("Could not parse config: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    fn from_config(raw: &Config) -> Self {
        let defaults = Self::default();

        let brightness = ranged_key(raw, "brightness", defaults.brightness, |v| {
            u8::try_from(v).ok().filter(|b| (1..=100).contains(b))
        });
        let gpio_pin = ranged_key(raw, "gpio_pin", defaults.gpio_pin, |v| u32::try_from(v).ok());
        let web_port = ranged_key(raw, "web_port", defaults.web_port, |v| {
            u16::try_from(v).ok().filter(|p| *p != 0)
        });

        let timezone_name: String = key_or_default(raw, "timezone", defaults.timezone.name().to_string());
        let timezone = timezone_name.parse::<Tz>().unwrap_or_else(|_| {
            warn!(
                "Config key 'timezone' is not a known zone ('{}'); using default {}.",
                timezone_name,
                defaults.timezone.name()
            );
            defaults.timezone
        });

        let log_level = key_or_default(raw, "log_level", defaults.log_level.clone()).to_lowercase();
        let log_level = if tracing_subscriber::EnvFilter::try_new(&log_level).is_ok() {
            log_level
        } else {
            warn!(
                "Config key 'log_level' is not a valid filter ('{}'); using default {}.",
                log_level, defaults.log_level
            );
            defaults.log_level.clone()
        };

        Self {
            gpio_chip: key_or_default(raw, "gpio_chip", defaults.gpio_chip),
            gpio_pin,
            brightness,
            audio_file: key_or_default(raw, "audio_file", defaults.audio_file),
            audio_device: key_or_default(raw, "audio_device", defaults.audio_device),
            persistence_file: key_or_default(raw, "persistence_file", defaults.persistence_file),
            web_enabled: key_or_default(raw, "web_enabled", defaults.web_enabled),
            web_host: key_or_default(raw, "web_host", defaults.web_host),
            web_port,
            log_level,
            timezone,
        }
    }

    /// `host:port` for the control surface.
    pub fn web_addr(&self) -> String {
        format!("{}:{}", self.web_host, self.web_port)
    }
}

/// Reads one key, falling back to `default` when it is absent or malformed.
fn key_or_default<T>(raw: &Config, key: &str, default: T) -> T
where
    T: DeserializeOwned + Debug,
{
    match raw.get::<T>(key) {
        Ok(value) => value,
        Err(ConfigError::NotFound(_)) => default,
        Err(e) => {
            warn!(
                "Config key '{}' is malformed ({}); using default {:?}.",
                key, e, default
            );
            default
        }
    }
}

/// Reads an integer key and narrows it with `convert`, which rejects values
/// outside the key's range.
fn ranged_key<T>(raw: &Config, key: &str, default: T, convert: impl Fn(i64) -> Option<T>) -> T
where
    T: Debug + Copy,
{
    let value = match raw.get_int(key) {
        Ok(value) => value,
        Err(ConfigError::NotFound(_)) => return default,
        Err(e) => {
            warn!(
                "Config key '{}' is malformed ({}); using default {:?}.",
                key, e, default
            );
            return default;
        }
    };
    convert(value).unwrap_or_else(|| {
        warn!(
            "Config key '{}' out of range ({}); using default {:?}.",
            key, value, default
        );
        default
    })
}
