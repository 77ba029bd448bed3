//! Modbus master and slave library
//!
//! Messages for the common function codes, RTU/ASCII/IP framing over any
//! [`io::StreamResource`], a retrying master and slaves serving a shared
//! [`data::DataStore`] over serial lines, TCP and UDP.

pub mod cli;
pub mod config;
pub mod data;
pub mod device;
pub mod io;
pub mod message;
pub mod modbus;
pub mod output;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use data::{DataStore, DiscreteCollection, ModbusDataType, RegisterCollection};
pub use device::{CustomFunction, ModbusMaster, ModbusSerialSlave, ModbusSlave, ModbusTcpSlave, ModbusUdpSlave};
pub use message::{ModbusMessage, ModbusMessageFrame};
pub use modbus::protocol::SlaveExceptionCode;
pub use output::{ConsoleFormatter, DataFormatter, HexFormatter, JsonFormatter};
pub use utils::error::{ModbusError, ModbusResult};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
