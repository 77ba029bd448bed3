use clap::ArgMatches;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::data::DataStore;
use crate::modbus::protocol::{DEFAULT_RETRIES, DEFAULT_TCP_PORT, DEFAULT_WAIT_TO_RETRY_MS};
use crate::utils::error::{ModbusError, ModbusResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub transport: TransportKind,
    pub serial: SerialConfig,
    pub network: NetworkConfig,
    pub master: MasterConfig,
    pub slave: SlaveConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Rtu,
    Ascii,
    Tcp,
    Udp,
}

impl TransportKind {
    pub fn parse(value: &str) -> ModbusResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "rtu" => Ok(TransportKind::Rtu),
            "ascii" => Ok(TransportKind::Ascii),
            "tcp" => Ok(TransportKind::Tcp),
            "udp" => Ok(TransportKind::Udp),
            other => Err(ModbusError::ConfigError(format!("Unknown transport: {}", other))),
        }
    }

    pub fn is_serial(&self) -> bool {
        matches!(self, TransportKind::Rtu | TransportKind::Ascii)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Rtu => "RTU",
            TransportKind::Ascii => "ASCII",
            TransportKind::Tcp => "TCP",
            TransportKind::Udp => "UDP",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub parity: ParityConfig,
    pub data_bits: u8,
    pub stop_bits: u8,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ParityConfig {
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MasterConfig {
    pub retries: u32,
    pub wait_to_retry_ms: u64,
    pub read_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SlaveConfig {
    pub unit_id: u8,
    pub data_store: DataStorePreset,
}

/// Initial contents of a slave's data store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataStorePreset {
    /// 65535 zeroed points per table.
    Default,
    /// Points 0..3000 hold a pattern derived from their address.
    Test,
    Empty,
}

impl DataStorePreset {
    pub fn build(&self) -> DataStore {
        match self {
            DataStorePreset::Default => DataStore::create_default(),
            DataStorePreset::Test => DataStore::create_test_pattern(),
            DataStorePreset::Empty => DataStore::create_empty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub default_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportKind::Rtu,
            serial: SerialConfig::default(),
            network: NetworkConfig::default(),
            master: MasterConfig::default(),
            slave: SlaveConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyS0".to_string(),
            baud_rate: 9600,
            parity: ParityConfig::None,
            data_bits: 8,
            stop_bits: 1,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_TCP_PORT,
        }
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            wait_to_retry_ms: DEFAULT_WAIT_TO_RETRY_MS,
            read_timeout_ms: Some(1000),
            write_timeout_ms: Some(1000),
        }
    }
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            unit_id: 1,
            data_store: DataStorePreset::Default,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_format: "console".to_string(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!("📄 Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ModbusResult<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overrides settings with the global command line options that were given.
    pub fn apply_matches(&mut self, matches: &ArgMatches) -> ModbusResult<()> {
        if let Some(transport) = matches.get_one::<String>("transport") {
            self.transport = TransportKind::parse(transport)?;
        }
        if let Some(port) = matches.get_one::<String>("port") {
            self.serial.port = port.clone();
        }
        if let Some(baud) = matches.get_one::<String>("baud") {
            self.serial.baud_rate = baud
                .parse()
                .map_err(|_| ModbusError::ConfigError(format!("Invalid baud rate: {}", baud)))?;
        }
        if let Some(host) = matches.get_one::<String>("host") {
            self.network.host = host.clone();
        }
        if let Some(port) = matches.get_one::<String>("tcp-port") {
            self.network.port = port
                .parse()
                .map_err(|_| ModbusError::ConfigError(format!("Invalid network port: {}", port)))?;
        }
        if let Some(format) = matches.get_one::<String>("format") {
            self.output.default_format = format.clone();
        }

        debug!("Effective configuration: {:?}", self);
        self.validate()
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.transport.is_serial() {
            if self.serial.port.is_empty() {
                return Err(ModbusError::ConfigError("Serial port must be set".to_string()));
            }
            if self.serial.baud_rate == 0 {
                return Err(ModbusError::ConfigError("Baud rate must be positive".to_string()));
            }
            if !(5..=8).contains(&self.serial.data_bits) {
                return Err(ModbusError::ConfigError(format!(
                    "Data bits must be 5 to 8, got {}",
                    self.serial.data_bits
                )));
            }
            if !(1..=2).contains(&self.serial.stop_bits) {
                return Err(ModbusError::ConfigError(format!(
                    "Stop bits must be 1 or 2, got {}",
                    self.serial.stop_bits
                )));
            }
        } else if self.network.host.is_empty() {
            return Err(ModbusError::ConfigError("Network host must be set".to_string()));
        }

        if !matches!(self.output.default_format.as_str(), "console" | "json" | "hex") {
            return Err(ModbusError::ConfigError(format!(
                "Unknown output format: {}",
                self.output.default_format
            )));
        }
        Ok(())
    }
}
