use std::io;
use thiserror::Error;

use crate::modbus::protocol::SlaveExceptionCode;

pub type ModbusResult<T> = Result<T, ModbusError>;

#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("Message frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Checksum mismatch: expected 0x{expected:04X}, received 0x{actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("Slave exception response for function {function_code}: {exception}")]
    SlaveException {
        function_code: u8,
        exception: SlaveExceptionCode,
    },

    #[error("Argument out of range: {0}")]
    ArgumentOutOfRange(String),

    #[error("Function code {0} not supported")]
    UnsupportedFunctionCode(u8),

    #[error("Response does not match request: {0}")]
    ResponseMismatch(String),

    #[error("Custom function {0} is already registered")]
    DuplicateFunction(u8),

    #[error("No custom function registered for function code {0}")]
    FunctionNotFound(u8),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("Lock acquisition failed")]
    LockError,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ModbusError {
    /// Errors after which the master may resend the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            ModbusError::FrameTooShort { .. }
            | ModbusError::InvalidData(_)
            | ModbusError::ChecksumMismatch { .. }
            | ModbusError::ResponseMismatch(_)
            | ModbusError::UnsupportedFunctionCode(_)
            | ModbusError::Timeout
            | ModbusError::CommunicationError(_) => true,
            ModbusError::SlaveException { exception, .. } => exception.is_retryable(),
            _ => false,
        }
    }

    pub fn is_connection_closed(&self) -> bool {
        matches!(self, ModbusError::ConnectionClosed)
    }

    pub fn slave_exception_code(&self) -> Option<SlaveExceptionCode> {
        match self {
            ModbusError::SlaveException { exception, .. } => Some(*exception),
            _ => None,
        }
    }
}

impl From<io::Error> for ModbusError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ModbusError::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ModbusError::ConnectionClosed,
            _ => ModbusError::CommunicationError(format!("IO error: {}", err)),
        }
    }
}

impl From<serialport::Error> for ModbusError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::Io(kind) => io::Error::new(kind, err.description).into(),
            _ => ModbusError::CommunicationError(format!("Serial port error: {}", err)),
        }
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        ModbusError::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for ModbusError {
    fn from(err: toml::de::Error) -> Self {
        ModbusError::ConfigError(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for ModbusError {
    fn from(err: toml::ser::Error) -> Self {
        ModbusError::SerializationError(format!("TOML error: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ModbusError::Timeout
    }
}

impl<T> From<std::sync::PoisonError<T>> for ModbusError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        ModbusError::LockError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let timeout: ModbusError = io::Error::new(io::ErrorKind::TimedOut, "slow").into();
        assert!(matches!(timeout, ModbusError::Timeout));

        let reset: ModbusError = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert!(reset.is_connection_closed());

        let other: ModbusError = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(matches!(other, ModbusError::CommunicationError(_)));
    }

    #[test]
    fn test_retryable_slave_exceptions() {
        let busy = ModbusError::SlaveException {
            function_code: 3,
            exception: SlaveExceptionCode::SlaveDeviceBusy,
        };
        let illegal = ModbusError::SlaveException {
            function_code: 3,
            exception: SlaveExceptionCode::IllegalDataAddress,
        };
        assert!(busy.is_retryable());
        assert!(!illegal.is_retryable());
        assert!(!ModbusError::ArgumentOutOfRange("x".into()).is_retryable());
        assert_eq!(busy.slave_exception_code(), Some(SlaveExceptionCode::SlaveDeviceBusy));
    }
}
