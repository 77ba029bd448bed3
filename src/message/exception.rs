use std::fmt;

use crate::message::{DecodeMessage, MessageHeader, ModbusMessage, ModbusMessageFrame};
use crate::modbus::protocol::{SlaveExceptionCode, EXCEPTION_OFFSET};
use crate::utils::error::{ModbusError, ModbusResult};

/// Error reply of a slave: the request function code plus 128 and one
/// exception code byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveExceptionResponse {
    header: MessageHeader,
    pub slave_exception_code: u8,
}

impl SlaveExceptionResponse {
    pub fn new(slave_address: u8, function_code: u8, slave_exception_code: u8) -> Self {
        Self {
            header: MessageHeader::new(slave_address, function_code),
            slave_exception_code,
        }
    }

    /// Exception reply for a request with `request_function_code`.
    pub fn for_request(slave_address: u8, request_function_code: u8, exception: SlaveExceptionCode) -> Self {
        Self::new(
            slave_address,
            request_function_code.wrapping_add(EXCEPTION_OFFSET),
            exception.to_u8(),
        )
    }

    pub fn exception(&self) -> SlaveExceptionCode {
        SlaveExceptionCode::from_u8(self.slave_exception_code)
    }

    /// Function code of the request that failed.
    pub fn request_function_code(&self) -> u8 {
        self.function_code().wrapping_sub(EXCEPTION_OFFSET)
    }

    pub fn to_error(&self) -> ModbusError {
        ModbusError::SlaveException {
            function_code: self.request_function_code(),
            exception: self.exception(),
        }
    }
}

impl ModbusMessageFrame for SlaveExceptionResponse {
    impl_header!();

    fn protocol_data_unit(&self) -> Vec<u8> {
        vec![self.function_code(), self.slave_exception_code]
    }
}

impl DecodeMessage for SlaveExceptionResponse {
    const MINIMUM_FRAME_SIZE: usize = 3;

    fn decode_unique(header: MessageHeader, frame: &[u8]) -> ModbusResult<Self> {
        if header.function_code <= EXCEPTION_OFFSET {
            return Err(ModbusError::InvalidData(format!(
                "Function code {} is not an exception response, it must be greater than {}",
                header.function_code, EXCEPTION_OFFSET
            )));
        }

        Ok(Self {
            header,
            slave_exception_code: frame[2],
        })
    }

    fn into_message(self) -> ModbusMessage {
        ModbusMessage::SlaveException(self)
    }
}

impl fmt::Display for SlaveExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Function code: {}\nException code: {}",
            self.function_code(),
            self.exception()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::protocol::READ_COILS;

    #[test]
    fn test_decode_exception() {
        let response = SlaveExceptionResponse::decode(&[11, 129, 2]).unwrap();
        assert_eq!(response.function_code(), READ_COILS + EXCEPTION_OFFSET);
        assert_eq!(response.request_function_code(), READ_COILS);
        assert_eq!(response.exception(), SlaveExceptionCode::IllegalDataAddress);
        assert_eq!(response.message_frame(), vec![11, 129, 2]);
    }

    #[test]
    fn test_rejects_regular_function_code() {
        assert!(matches!(
            SlaveExceptionResponse::decode(&[11, 128, 2]),
            Err(ModbusError::InvalidData(_))
        ));
        assert!(matches!(
            SlaveExceptionResponse::decode(&[11, 129]),
            Err(ModbusError::FrameTooShort { .. })
        ));
    }

    #[test]
    fn test_to_error() {
        let response = SlaveExceptionResponse::for_request(1, 3, SlaveExceptionCode::SlaveDeviceBusy);
        match response.to_error() {
            ModbusError::SlaveException { function_code, exception } => {
                assert_eq!(function_code, 3);
                assert_eq!(exception, SlaveExceptionCode::SlaveDeviceBusy);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
