//! Configuration loaded from TOML.
//!
//! ```toml
//! [command_link]
//! kind = "tcp"
//! host = "127.0.0.1"
//! port = 4533
//!
//! [mount_link]
//! kind = "serial"
//! port = "/dev/ttyUSB1"
//! baud = 9600
//!
//! [limits]
//! negative_turns = 2
//! positive_turns = 2
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calibration::TurnLimit;
use crate::constants::{DEFAULT_ADDRESS, DEFAULT_SPEED, MAX_SPEED};
use crate::gs232::SpeedDefaults;
use crate::wrap_guard::{ElevationRange, JogRates};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How to reach one end of the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConnectionConfig {
    Serial {
        port: String,
        baud: u32,
    },
    Tcp {
        host: String,
        port: u16,
    },
    Udp {
        local_port: u16,
        remote_host: String,
        remote_port: u16,
    },
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionConfig::Serial { port, baud } => write!(f, "serial {} @ {} baud", port, baud),
            ConnectionConfig::Tcp { host, port } => write!(f, "tcp {}:{}", host, port),
            ConnectionConfig::Udp {
                local_port,
                remote_host,
                remote_port,
            } => write!(f, "udp :{} -> {}:{}", local_port, remote_host, remote_port),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MountProtocol {
    #[default]
    PelcoD,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub protocol: MountProtocol,
    pub address: u8,
    /// Answer C2 with the position read back from the mount rather than the
    /// tracked position.
    pub query_position: bool,
    pub response_timeout_ms: u64,
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            protocol: MountProtocol::PelcoD,
            address: DEFAULT_ADDRESS,
            query_position: false,
            response_timeout_ms: 500,
        }
    }
}

/// Offsets between the mount's own zero and true bearing/elevation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AngleCorrection {
    pub azimuth_offset: f64,
    pub initial_azimuth: f64,
    pub elevation_offset: f64,
    pub min_elevation: f64,
    pub max_elevation: f64,
}

impl Default for AngleCorrection {
    fn default() -> Self {
        AngleCorrection {
            azimuth_offset: 0.0,
            initial_azimuth: 0.0,
            elevation_offset: 0.0,
            min_elevation: 0.0,
            max_elevation: 90.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedConfig {
    pub pan: u8,
    pub tilt: u8,
    /// Degrees per second per speed unit, used to track jogs.
    pub pan_deg_per_sec: f64,
    pub tilt_deg_per_sec: f64,
}

impl Default for SpeedConfig {
    fn default() -> Self {
        SpeedConfig {
            pan: DEFAULT_SPEED,
            tilt: DEFAULT_SPEED,
            pan_deg_per_sec: 0.6,
            tilt_deg_per_sec: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub receive_timeout_ms: u64,
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            receive_timeout_ms: 1000,
            queue_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub command_link: ConnectionConfig,
    pub mount_link: ConnectionConfig,
    #[serde(default)]
    pub mount: MountConfig,
    #[serde(default)]
    pub angles: AngleCorrection,
    #[serde(default)]
    pub limits: TurnLimit,
    #[serde(default)]
    pub speeds: SpeedConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            command_link: ConnectionConfig::Serial {
                port: "/dev/ttyUSB0".to_string(),
                baud: 9600,
            },
            mount_link: ConnectionConfig::Serial {
                port: "/dev/ttyUSB1".to_string(),
                baud: 9600,
            },
            mount: MountConfig::default(),
            angles: AngleCorrection::default(),
            limits: TurnLimit::default(),
            speeds: SpeedConfig::default(),
            runtime: RuntimeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        fs::write(path, self.to_toml()?).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(message.to_string()))
        };

        if !self.limits.is_valid() {
            return invalid("limit offsets must be within 0..360 degrees");
        }
        let angles = &self.angles;
        if !(angles.azimuth_offset.is_finite()
            && angles.initial_azimuth.is_finite()
            && angles.elevation_offset.is_finite())
        {
            return invalid("angle offsets must be finite");
        }
        if !(angles.min_elevation.is_finite() && angles.max_elevation.is_finite())
            || angles.min_elevation >= angles.max_elevation
        {
            return invalid("min_elevation must be below max_elevation");
        }
        if self.speeds.pan > MAX_SPEED || self.speeds.tilt > MAX_SPEED {
            return invalid("default speeds must not exceed 0x3F");
        }
        if !(self.speeds.pan_deg_per_sec > 0.0 && self.speeds.pan_deg_per_sec.is_finite())
            || !(self.speeds.tilt_deg_per_sec > 0.0 && self.speeds.tilt_deg_per_sec.is_finite())
        {
            return invalid("degrees per second must be positive");
        }
        if self.mount.address == 0 {
            return invalid("Pelco-D address 0 is not addressable");
        }
        if self.mount.response_timeout_ms == 0 || self.runtime.receive_timeout_ms == 0 {
            return invalid("timeouts must be non-zero");
        }
        if self.runtime.queue_capacity == 0 {
            return invalid("queue_capacity must be non-zero");
        }
        Ok(())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.receive_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.mount.response_timeout_ms)
    }

    pub fn speed_defaults(&self) -> SpeedDefaults {
        SpeedDefaults {
            pan: self.speeds.pan,
            tilt: self.speeds.tilt,
        }
    }

    pub fn jog_rates(&self) -> JogRates {
        JogRates {
            pan_deg_per_sec: self.speeds.pan_deg_per_sec,
            tilt_deg_per_sec: self.speeds.tilt_deg_per_sec,
        }
    }

    pub fn elevation_range(&self) -> ElevationRange {
        ElevationRange {
            min: self.angles.min_elevation,
            max: self.angles.max_elevation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn minimal_file_fills_in_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [command_link]
            kind = "udp"
            local_port = 4533
            remote_host = "192.168.1.20"
            remote_port = 4534

            [mount_link]
            kind = "tcp"
            host = "192.168.1.50"
            port = 4001

            [limits]
            negative_turns = 2
            positive_turns = 2
            positive_offset_deg = 90
            "#,
        )
        .expect("valid config");

        assert_eq!(
            config.command_link,
            ConnectionConfig::Udp {
                local_port: 4533,
                remote_host: "192.168.1.20".to_string(),
                remote_port: 4534
            }
        );
        assert_eq!(config.limits.positive_offset_deg, 90.0);
        assert_eq!(config.limits.negative_offset_deg, 0.0);
        assert_eq!(config.mount, MountConfig::default());
        assert_eq!(config.receive_timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn rejects_inverted_elevation_range() {
        let mut config = AppConfig::default();
        config.angles.min_elevation = 90.0;
        config.angles.max_elevation = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_non_finite_angle_offsets() {
        let corruptions: [fn(&mut AngleCorrection); 3] = [
            |angles| angles.azimuth_offset = f64::NAN,
            |angles| angles.initial_azimuth = f64::INFINITY,
            |angles| angles.elevation_offset = f64::NEG_INFINITY,
        ];
        for corrupt in corruptions {
            let mut config = AppConfig::default();
            corrupt(&mut config.angles);
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn rejects_fast_default_speed_and_zero_address() {
        let mut config = AppConfig::default();
        config.speeds.pan = 0x40;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.mount.address = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ptz.toml");

        let mut config = AppConfig::default();
        config.mount_link = ConnectionConfig::Tcp {
            host: "10.0.0.2".to_string(),
            port: 4001,
        };
        config.limits = TurnLimit::from_degrees(450.0, 720.0);
        config.save(&path).expect("save");

        assert_eq!(AppConfig::load(&path).expect("load"), config);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = AppConfig::load("/nonexistent/ptz.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ptz.toml"));
    }
}
