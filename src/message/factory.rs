use log::warn;

use crate::device::slave::ModbusSlave;
use crate::message::{
    DecodeMessage, DiagnosticsRequestResponse, ModbusMessage, ReadCoilsInputsRequest,
    ReadHoldingInputRegistersRequest, ReadWriteMultipleRegistersRequest, SlaveExceptionResponse,
    WriteMultipleCoilsRequest, WriteMultipleRegistersRequest, WriteSingleCoilRequestResponse,
    WriteSingleRegisterRequestResponse,
};
use crate::modbus::protocol::*;
use crate::utils::error::{ModbusError, ModbusResult};

pub type FrameDecoder = fn(&[u8]) -> ModbusResult<ModbusMessage>;

pub fn decode_message<T: DecodeMessage>(frame: &[u8]) -> ModbusResult<ModbusMessage> {
    Ok(T::decode(frame)?.into_message())
}

/// Builds the request held in `frame`, preferring a custom function
/// registered with `slave` over the built-in table.
pub fn create_request(slave: &ModbusSlave, frame: &[u8]) -> ModbusResult<ModbusMessage> {
    if frame.len() < MIN_REQUEST_FRAME_LENGTH {
        return Err(ModbusError::FrameTooShort {
            expected: MIN_REQUEST_FRAME_LENGTH,
            actual: frame.len(),
        });
    }

    let function_code = frame[1];
    if let Some(decoder) = slave.custom_request_decoder(function_code)? {
        return decoder(frame);
    }

    match function_code {
        READ_COILS | READ_INPUTS => decode_message::<ReadCoilsInputsRequest>(frame),
        READ_HOLDING_REGISTERS | READ_INPUT_REGISTERS => {
            decode_message::<ReadHoldingInputRegistersRequest>(frame)
        }
        WRITE_SINGLE_COIL => decode_message::<WriteSingleCoilRequestResponse>(frame),
        WRITE_SINGLE_REGISTER => decode_message::<WriteSingleRegisterRequestResponse>(frame),
        DIAGNOSTICS => decode_message::<DiagnosticsRequestResponse>(frame),
        WRITE_MULTIPLE_COILS => decode_message::<WriteMultipleCoilsRequest>(frame),
        WRITE_MULTIPLE_REGISTERS => decode_message::<WriteMultipleRegistersRequest>(frame),
        READ_WRITE_MULTIPLE_REGISTERS => decode_message::<ReadWriteMultipleRegistersRequest>(frame),
        other => {
            warn!("Unsupported function code {} in request", other);
            Err(ModbusError::UnsupportedFunctionCode(other))
        }
    }
}

/// Builds exactly `T`, unless the function code flags a slave exception.
pub fn create_response<T: DecodeMessage>(frame: &[u8]) -> ModbusResult<ModbusMessage> {
    if frame.len() >= 2 && frame[1] > EXCEPTION_OFFSET {
        return decode_message::<SlaveExceptionResponse>(frame);
    }
    decode_message::<T>(frame)
}

/// Expected response type of a request, kept as plain function pointers
/// so transports can stay object safe.
#[derive(Clone, Copy)]
pub struct ResponseDecoder {
    decode: FrameDecoder,
    rtu_bytes_remaining: fn(&[u8]) -> Option<usize>,
}

impl ResponseDecoder {
    pub fn of<T: DecodeMessage>() -> Self {
        Self {
            decode: create_response::<T>,
            rtu_bytes_remaining: T::rtu_bytes_remaining,
        }
    }

    pub fn decode(&self, frame: &[u8]) -> ModbusResult<ModbusMessage> {
        (self.decode)(frame)
    }

    pub fn rtu_bytes_remaining(&self, frame_start: &[u8]) -> Option<usize> {
        (self.rtu_bytes_remaining)(frame_start)
    }
}

impl std::fmt::Debug for ResponseDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseDecoder").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataStore;
    use crate::message::{ModbusMessageFrame, ReadCoilsInputsResponse, ReadFileRecordRequest};
    use std::sync::Arc;

    fn slave() -> ModbusSlave {
        ModbusSlave::new(1, Arc::new(DataStore::create_empty()))
    }

    #[test]
    fn test_create_read_coils_request() {
        let request = create_request(&slave(), &[11, 1, 0, 19, 0, 37]).unwrap();
        match request {
            ModbusMessage::ReadCoilsInputsRequest(typed) => {
                assert_eq!(typed.start_address, 19);
                assert_eq!(typed.number_of_points, 37);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_create_request_too_short() {
        assert!(matches!(
            create_request(&slave(), &[11, 1]),
            Err(ModbusError::FrameTooShort { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_create_request_unsupported() {
        assert!(matches!(
            create_request(&slave(), &[11, 0x2B, 0, 0, 0, 0]),
            Err(ModbusError::UnsupportedFunctionCode(0x2B))
        ));
        // read file record is only known once registered
        assert!(matches!(
            create_request(&slave(), &[1, 0x14, 7, 6, 0, 4, 0, 1, 0, 2]),
            Err(ModbusError::UnsupportedFunctionCode(0x14))
        ));
    }

    #[test]
    fn test_create_request_prefers_custom_function() {
        let slave = slave();
        slave.register_file_record_function(|_| Ok(vec![1])).unwrap();

        let request = create_request(&slave, &[1, 0x14, 7, 6, 0, 4, 0, 1, 0, 2]).unwrap();
        let typed = request.as_custom::<ReadFileRecordRequest>().unwrap();
        assert_eq!(typed.records.len(), 1);
    }

    #[test]
    fn test_create_response_redirects_exceptions() {
        let response = create_response::<ReadCoilsInputsResponse>(&[11, 129, 2]).unwrap();
        assert!(response.is_exception());
        assert_eq!(response.function_code(), 129);

        let response = create_response::<ReadCoilsInputsResponse>(&[11, 1, 1, 5]).unwrap();
        assert!(matches!(response, ModbusMessage::ReadCoilsInputsResponse(_)));
    }

    #[test]
    fn test_response_decoder_rtu_length() {
        let builtin = ResponseDecoder::of::<ReadCoilsInputsResponse>();
        assert_eq!(builtin.rtu_bytes_remaining(&[11, 1, 5, 0]), None);

        let file = ResponseDecoder::of::<crate::message::ReadFileRecordResponse>();
        assert_eq!(file.rtu_bytes_remaining(&[11, 0x14, 12, 5]), Some(13));
    }
}
