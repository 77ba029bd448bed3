//! Request and response messages for the supported function codes.
//!
//! Every message carries a [`MessageHeader`] plus its own payload. The byte
//! views (`protocol_data_unit`, `message_frame`) are computed on demand;
//! checksums and MBAP headers are added by the transport.

/// Header accessors for a message struct with a `header` field.
macro_rules! impl_header {
    () => {
        fn header(&self) -> &$crate::message::MessageHeader {
            &self.header
        }

        fn header_mut(&mut self) -> &mut $crate::message::MessageHeader {
            &mut self.header
        }
    };
}

pub mod diagnostics;
pub mod exception;
pub mod factory;
pub mod read;
pub mod read_file;
pub mod read_write;
pub mod write;

use std::any::Any;
use std::fmt;

use crate::modbus::protocol::EXCEPTION_OFFSET;
use crate::utils::error::{ModbusError, ModbusResult};

pub use diagnostics::DiagnosticsRequestResponse;
pub use exception::SlaveExceptionResponse;
pub use factory::{create_request, create_response, ResponseDecoder};
pub use read::{
    ReadCoilsInputsRequest, ReadCoilsInputsResponse, ReadHoldingInputRegistersRequest,
    ReadHoldingInputRegistersResponse,
};
pub use read_file::{ReadFileRecordRequest, ReadFileRecordResponse};
pub use read_write::ReadWriteMultipleRegistersRequest;
pub use write::{
    WriteMultipleCoilsRequest, WriteMultipleCoilsResponse, WriteMultipleRegistersRequest,
    WriteMultipleRegistersResponse, WriteSingleCoilRequestResponse,
    WriteSingleRegisterRequestResponse,
};

/// Fields shared by every message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageHeader {
    pub slave_address: u8,
    pub function_code: u8,
    /// Only meaningful on IP transports.
    pub transaction_id: u16,
}

impl MessageHeader {
    pub fn new(slave_address: u8, function_code: u8) -> Self {
        Self {
            slave_address,
            function_code,
            transaction_id: 0,
        }
    }

    fn from_frame(frame: &[u8]) -> Self {
        Self::new(frame[0], frame[1])
    }
}

/// Byte views of a message.
pub trait ModbusMessageFrame {
    fn header(&self) -> &MessageHeader;
    fn header_mut(&mut self) -> &mut MessageHeader;

    /// Function code followed by the function specific payload.
    fn protocol_data_unit(&self) -> Vec<u8>;

    fn slave_address(&self) -> u8 {
        self.header().slave_address
    }

    fn function_code(&self) -> u8 {
        self.header().function_code
    }

    fn transaction_id(&self) -> u16 {
        self.header().transaction_id
    }

    fn set_transaction_id(&mut self, transaction_id: u16) {
        self.header_mut().transaction_id = transaction_id;
    }

    /// Slave address followed by the protocol data unit.
    fn message_frame(&self) -> Vec<u8> {
        let pdu = self.protocol_data_unit();
        let mut frame = Vec::with_capacity(pdu.len() + 1);
        frame.push(self.slave_address());
        frame.extend_from_slice(&pdu);
        frame
    }
}

/// Construction of a message from a frame that starts with the slave address.
pub trait DecodeMessage: ModbusMessageFrame + Sized {
    const MINIMUM_FRAME_SIZE: usize;

    /// Reads the payload. `frame` holds at least `MINIMUM_FRAME_SIZE` bytes.
    fn decode_unique(header: MessageHeader, frame: &[u8]) -> ModbusResult<Self>;

    fn into_message(self) -> ModbusMessage;

    fn decode(frame: &[u8]) -> ModbusResult<Self> {
        if frame.len() < Self::MINIMUM_FRAME_SIZE {
            return Err(ModbusError::FrameTooShort {
                expected: Self::MINIMUM_FRAME_SIZE,
                actual: frame.len(),
            });
        }
        Self::decode_unique(MessageHeader::from_frame(frame), frame)
    }

    /// Bytes left to read on an RTU link after the frame start.
    /// `None` falls back to the built-in function code table.
    fn rtu_bytes_remaining(_frame_start: &[u8]) -> Option<usize> {
        None
    }
}

/// User defined message carried by [`ModbusMessage::Custom`].
pub trait CustomMessage: ModbusMessageFrame + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn clone_box(&self) -> Box<dyn CustomMessage>;

    /// Checks a response against this request. Defaults to the function code echo.
    fn validate_response(&self, response: &ModbusMessage) -> ModbusResult<()> {
        check_function_code(self.function_code(), response)
    }
}

impl Clone for Box<dyn CustomMessage> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[derive(Debug, Clone)]
pub enum ModbusMessage {
    ReadCoilsInputsRequest(ReadCoilsInputsRequest),
    ReadCoilsInputsResponse(ReadCoilsInputsResponse),
    ReadHoldingInputRegistersRequest(ReadHoldingInputRegistersRequest),
    ReadHoldingInputRegistersResponse(ReadHoldingInputRegistersResponse),
    WriteSingleCoil(WriteSingleCoilRequestResponse),
    WriteSingleRegister(WriteSingleRegisterRequestResponse),
    WriteMultipleCoilsRequest(WriteMultipleCoilsRequest),
    WriteMultipleCoilsResponse(WriteMultipleCoilsResponse),
    WriteMultipleRegistersRequest(WriteMultipleRegistersRequest),
    WriteMultipleRegistersResponse(WriteMultipleRegistersResponse),
    ReadWriteMultipleRegistersRequest(ReadWriteMultipleRegistersRequest),
    Diagnostics(DiagnosticsRequestResponse),
    SlaveException(SlaveExceptionResponse),
    Custom(Box<dyn CustomMessage>),
}

macro_rules! with_frame {
    ($message:expr, $inner:ident => $body:expr) => {
        match $message {
            ModbusMessage::ReadCoilsInputsRequest($inner) => $body,
            ModbusMessage::ReadCoilsInputsResponse($inner) => $body,
            ModbusMessage::ReadHoldingInputRegistersRequest($inner) => $body,
            ModbusMessage::ReadHoldingInputRegistersResponse($inner) => $body,
            ModbusMessage::WriteSingleCoil($inner) => $body,
            ModbusMessage::WriteSingleRegister($inner) => $body,
            ModbusMessage::WriteMultipleCoilsRequest($inner) => $body,
            ModbusMessage::WriteMultipleCoilsResponse($inner) => $body,
            ModbusMessage::WriteMultipleRegistersRequest($inner) => $body,
            ModbusMessage::WriteMultipleRegistersResponse($inner) => $body,
            ModbusMessage::ReadWriteMultipleRegistersRequest($inner) => $body,
            ModbusMessage::Diagnostics($inner) => $body,
            ModbusMessage::SlaveException($inner) => $body,
            ModbusMessage::Custom($inner) => $body,
        }
    };
}

impl ModbusMessageFrame for ModbusMessage {
    fn header(&self) -> &MessageHeader {
        with_frame!(self, m => m.header())
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        with_frame!(self, m => m.header_mut())
    }

    fn protocol_data_unit(&self) -> Vec<u8> {
        with_frame!(self, m => m.protocol_data_unit())
    }
}

impl ModbusMessage {
    pub fn is_exception(&self) -> bool {
        matches!(self, ModbusMessage::SlaveException(_))
    }

    /// Downcasts a custom message to its concrete type.
    pub fn as_custom<T: CustomMessage + 'static>(&self) -> Option<&T> {
        match self {
            ModbusMessage::Custom(custom) => custom.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Checks that `response` answers this request: function code echo,
    /// byte counts of reads and echoed fields of writes.
    pub fn validate_response(&self, response: &ModbusMessage) -> ModbusResult<()> {
        if let ModbusMessage::SlaveException(exception) = response {
            // a genuine exception names our function code
            let expected = self.function_code().wrapping_add(EXCEPTION_OFFSET);
            if exception.function_code() != expected {
                return Err(ModbusError::ResponseMismatch(format!(
                    "Received exception for function code {}, expected {}",
                    exception.function_code(),
                    expected
                )));
            }
            return Ok(());
        }

        match self {
            ModbusMessage::ReadCoilsInputsRequest(request) => request.validate_response(response),
            ModbusMessage::ReadHoldingInputRegistersRequest(request) => request.validate_response(response),
            ModbusMessage::WriteSingleCoil(request) => request.validate_response(response),
            ModbusMessage::WriteSingleRegister(request) => request.validate_response(response),
            ModbusMessage::WriteMultipleCoilsRequest(request) => request.validate_response(response),
            ModbusMessage::WriteMultipleRegistersRequest(request) => request.validate_response(response),
            ModbusMessage::ReadWriteMultipleRegistersRequest(request) => request.validate_response(response),
            ModbusMessage::Diagnostics(request) => request.validate_response(response),
            ModbusMessage::Custom(request) => request.validate_response(response),
            _ => check_function_code(self.function_code(), response),
        }
    }
}

impl PartialEq for ModbusMessage {
    fn eq(&self, other: &Self) -> bool {
        self.transaction_id() == other.transaction_id() && self.message_frame() == other.message_frame()
    }
}

impl fmt::Display for ModbusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (slave {}, function {})",
            crate::modbus::protocol::function_name(self.function_code()),
            self.slave_address(),
            self.function_code()
        )
    }
}

pub(crate) fn check_function_code(expected: u8, response: &ModbusMessage) -> ModbusResult<()> {
    if response.function_code() != expected {
        return Err(ModbusError::ResponseMismatch(format!(
            "Received response with unexpected function code. Expected {}, received {}.",
            expected,
            response.function_code()
        )));
    }
    Ok(())
}

pub(crate) fn read_u16(frame: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([frame[offset], frame[offset + 1]])
}

/// Ensures a byte count declared at `frame[count_offset]` is backed by data.
pub(crate) fn checked_payload(frame: &[u8], count_offset: usize) -> ModbusResult<&[u8]> {
    let byte_count = frame[count_offset] as usize;
    let start = count_offset + 1;
    if frame.len() < start + byte_count {
        return Err(ModbusError::InvalidData(format!(
            "Byte count {} exceeds the {} byte(s) remaining in the frame",
            byte_count,
            frame.len().saturating_sub(start)
        )));
    }
    Ok(&frame[start..start + byte_count])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_uses_transaction_id_and_frame() {
        let mut a = ReadCoilsInputsRequest::new(1, 1, 10, 5).into_message();
        let b = ReadCoilsInputsRequest::new(1, 1, 10, 5).into_message();
        assert_eq!(a, b);

        a.set_transaction_id(7);
        assert_ne!(a, b);
    }

    #[test]
    fn test_exception_response_validates_against_request() {
        let request = ReadHoldingInputRegistersRequest::new(3, 1, 0, 2).into_message();
        let good = SlaveExceptionResponse::new(1, 3 + EXCEPTION_OFFSET, 2).into_message();
        let other = SlaveExceptionResponse::new(1, 4 + EXCEPTION_OFFSET, 2).into_message();

        assert!(request.validate_response(&good).is_ok());
        assert!(matches!(
            request.validate_response(&other),
            Err(ModbusError::ResponseMismatch(_))
        ));
    }

    #[test]
    fn test_checked_payload() {
        assert!(checked_payload(&[1, 3, 2, 0, 1], 2).is_ok());
        assert!(matches!(
            checked_payload(&[1, 3, 4, 0, 1], 2),
            Err(ModbusError::InvalidData(_))
        ));
    }
}
