//! Protocol constants shared by messages, transports and devices.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const READ_COILS: u8 = 1;
pub const READ_INPUTS: u8 = 2;
pub const READ_HOLDING_REGISTERS: u8 = 3;
pub const READ_INPUT_REGISTERS: u8 = 4;
pub const WRITE_SINGLE_COIL: u8 = 5;
pub const WRITE_SINGLE_REGISTER: u8 = 6;
pub const DIAGNOSTICS: u8 = 8;
pub const WRITE_MULTIPLE_COILS: u8 = 15;
pub const WRITE_MULTIPLE_REGISTERS: u8 = 16;
pub const READ_FILE_RECORD: u8 = 0x14;
pub const READ_WRITE_MULTIPLE_REGISTERS: u8 = 23;

pub const DIAGNOSTICS_RETURN_QUERY_DATA: u16 = 0;

/// Added to the function code of a response to flag a slave exception.
pub const EXCEPTION_OFFSET: u8 = 128;

pub const MAX_DISCRETE_REQUEST_RESPONSE_SIZE: usize = 2040;
pub const MAX_READ_REGISTERS: usize = 125;
pub const MAX_WRITE_REGISTERS: usize = 123;
pub const MAX_READ_WRITE_WRITE_REGISTERS: usize = 121;
/// Byte count ceiling of a read file record response.
pub const MAX_FILE_RECORD_RESPONSE_LENGTH: usize = 0xF5;

pub const COIL_ON: u16 = 0xFF00;
pub const COIL_OFF: u16 = 0x0000;

pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_WAIT_TO_RETRY_MS: u64 = 250;

pub const BROADCAST_ADDRESS: u8 = 0;

/// Smallest frame the factory accepts: address, function code, one payload byte.
pub const MIN_REQUEST_FRAME_LENGTH: usize = 3;

pub const ASCII_FRAME_START: u8 = b':';
pub const ASCII_NEW_LINE: &[u8] = b"\r\n";

pub const MBAP_HEADER_LENGTH: usize = 6;
pub const DEFAULT_TCP_PORT: u16 = 502;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlaveExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    SlaveDeviceFailure,
    Acknowledge,
    SlaveDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetDeviceFailedToRespond,
    Unknown(u8),
}

impl SlaveExceptionCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            1 => Self::IllegalFunction,
            2 => Self::IllegalDataAddress,
            3 => Self::IllegalDataValue,
            4 => Self::SlaveDeviceFailure,
            5 => Self::Acknowledge,
            6 => Self::SlaveDeviceBusy,
            8 => Self::MemoryParityError,
            10 => Self::GatewayPathUnavailable,
            11 => Self::GatewayTargetDeviceFailedToRespond,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::IllegalFunction => 1,
            Self::IllegalDataAddress => 2,
            Self::IllegalDataValue => 3,
            Self::SlaveDeviceFailure => 4,
            Self::Acknowledge => 5,
            Self::SlaveDeviceBusy => 6,
            Self::MemoryParityError => 8,
            Self::GatewayPathUnavailable => 10,
            Self::GatewayTargetDeviceFailedToRespond => 11,
            Self::Unknown(code) => code,
        }
    }

    /// Acknowledge and busy mean "try again later" rather than failure.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Acknowledge | Self::SlaveDeviceBusy)
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::IllegalFunction => "Function code received in the query is not an allowable action for the server (or slave).",
            Self::IllegalDataAddress => "The data address received in the query is not an allowable address for the server (or slave).",
            Self::IllegalDataValue => "A value contained in the query data field is not an allowable value for server (or slave).",
            Self::SlaveDeviceFailure => "An unrecoverable error occurred while the server (or slave) was attempting to perform the requested action.",
            Self::Acknowledge => "Specialized use in conjunction with programming commands. The server (or slave) has accepted the request and is processing it.",
            Self::SlaveDeviceBusy => "Specialized use in conjunction with programming commands. The server (or slave) is engaged in processing a long-duration program command.",
            Self::MemoryParityError => "Specialized use in conjunction with function codes 20 and 21 and reference type 6, to indicate that the extended file area failed to pass a consistency check.",
            Self::GatewayPathUnavailable => "Specialized use in conjunction with gateways, indicates that the gateway was unable to allocate an internal communication path.",
            Self::GatewayTargetDeviceFailedToRespond => "Specialized use in conjunction with gateways, indicates that no response was obtained from the target device.",
            Self::Unknown(_) => "Unknown slave exception code.",
        }
    }
}

impl fmt::Display for SlaveExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exception code {} - {}", self.to_u8(), self.description())
    }
}

pub fn function_name(function_code: u8) -> &'static str {
    match function_code {
        READ_COILS => "ReadCoils",
        READ_INPUTS => "ReadInputs",
        READ_HOLDING_REGISTERS => "ReadHoldingRegisters",
        READ_INPUT_REGISTERS => "ReadInputRegisters",
        WRITE_SINGLE_COIL => "WriteSingleCoil",
        WRITE_SINGLE_REGISTER => "WriteSingleRegister",
        DIAGNOSTICS => "Diagnostics",
        WRITE_MULTIPLE_COILS => "WriteMultipleCoils",
        WRITE_MULTIPLE_REGISTERS => "WriteMultipleRegisters",
        READ_FILE_RECORD => "ReadFileRecord",
        READ_WRITE_MULTIPLE_REGISTERS => "ReadWriteMultipleRegisters",
        code if code > EXCEPTION_OFFSET => "SlaveException",
        _ => "Custom",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_code_round_trip() {
        for code in 0u8..=12 {
            assert_eq!(SlaveExceptionCode::from_u8(code).to_u8(), code);
        }
        assert_eq!(SlaveExceptionCode::from_u8(7), SlaveExceptionCode::Unknown(7));
        assert!(SlaveExceptionCode::Acknowledge.is_retryable());
        assert!(!SlaveExceptionCode::SlaveDeviceFailure.is_retryable());
    }
}
