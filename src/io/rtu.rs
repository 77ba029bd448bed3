use log::{debug, error};

use crate::device::slave::ModbusSlave;
use crate::io::stream_resource::StreamResource;
use crate::io::transport::{
    hex_dump, read_exact, validate_serial_response, ModbusTransport, TransportSettings,
};
use crate::message::{ModbusMessage, ModbusMessageFrame, ResponseDecoder};
use crate::modbus::crc::{crc16_bytes, crc16_modbus};
use crate::modbus::protocol::*;
use crate::utils::error::{ModbusError, ModbusResult};

pub const REQUEST_FRAME_START_LENGTH: usize = 7;
pub const RESPONSE_FRAME_START_LENGTH: usize = 4;

/// Read/write multiple requests carry their byte count at offset 10, past
/// the frame start, so they are read in two stages.
const READ_WRITE_BYTE_COUNT_OFFSET: usize = 10;

/// Bytes left in a built-in request after the 7 byte frame start. For
/// read/write multiple registers this only covers the rest of the fixed header.
pub fn request_bytes_to_read(frame_start: &[u8]) -> ModbusResult<usize> {
    let function_code = frame_start[1];
    let count = match function_code {
        READ_COILS | READ_INPUTS | READ_HOLDING_REGISTERS | READ_INPUT_REGISTERS
        | WRITE_SINGLE_COIL | WRITE_SINGLE_REGISTER | DIAGNOSTICS => 1,
        WRITE_MULTIPLE_COILS | WRITE_MULTIPLE_REGISTERS => frame_start[6] as usize + 2,
        READ_WRITE_MULTIPLE_REGISTERS => READ_WRITE_BYTE_COUNT_OFFSET + 1 - REQUEST_FRAME_START_LENGTH,
        READ_FILE_RECORD => (frame_start[2] as usize).saturating_sub(2),
        other => {
            error!("Function code {} not supported.", other);
            return Err(ModbusError::UnsupportedFunctionCode(other));
        }
    };
    Ok(count)
}

/// Bytes left in a response after the 4 byte frame start.
pub fn response_bytes_to_read(frame_start: &[u8], decoder: &ResponseDecoder) -> ModbusResult<usize> {
    let function_code = frame_start[1];

    // exception payload is already read, only the CRC low byte remains
    if function_code > EXCEPTION_OFFSET {
        return Ok(1);
    }

    if let Some(count) = decoder.rtu_bytes_remaining(frame_start) {
        return Ok(count);
    }

    let count = match function_code {
        READ_COILS | READ_INPUTS | READ_HOLDING_REGISTERS | READ_INPUT_REGISTERS
        | READ_WRITE_MULTIPLE_REGISTERS | READ_FILE_RECORD => frame_start[2] as usize + 1,
        WRITE_SINGLE_COIL | WRITE_SINGLE_REGISTER | WRITE_MULTIPLE_COILS
        | WRITE_MULTIPLE_REGISTERS | DIAGNOSTICS => 4,
        other => {
            error!("Function code {} not supported.", other);
            return Err(ModbusError::UnsupportedFunctionCode(other));
        }
    };
    Ok(count)
}

/// Checks the trailing little endian CRC of a raw RTU frame.
pub fn verify_crc(frame: &[u8]) -> ModbusResult<()> {
    if frame.len() < 4 {
        return Err(ModbusError::FrameTooShort {
            expected: 4,
            actual: frame.len(),
        });
    }

    let (body, crc) = frame.split_at(frame.len() - 2);
    let expected = crc16_modbus(body);
    let actual = u16::from_le_bytes([crc[0], crc[1]]);
    if expected != actual {
        return Err(ModbusError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// Binary framing with a trailing CRC16.
pub struct ModbusRtuTransport {
    stream: Box<dyn StreamResource>,
    settings: TransportSettings,
}

impl ModbusRtuTransport {
    pub fn new(stream: Box<dyn StreamResource>) -> Self {
        Self {
            stream,
            settings: TransportSettings::default(),
        }
    }

    fn read(&mut self, count: usize) -> ModbusResult<Vec<u8>> {
        read_exact(self.stream.as_mut(), count)
    }
}

impl ModbusTransport for ModbusRtuTransport {
    fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut TransportSettings {
        &mut self.settings
    }

    fn stream_mut(&mut self) -> &mut dyn StreamResource {
        self.stream.as_mut()
    }

    fn build_message_frame(&self, message: &ModbusMessage) -> Vec<u8> {
        let mut frame = message.message_frame();
        let crc = crc16_bytes(&frame);
        frame.extend_from_slice(&crc);
        frame
    }

    fn write(&mut self, message: &ModbusMessage) -> ModbusResult<()> {
        self.stream.discard_in_buffer()?;
        let frame = self.build_message_frame(message);
        debug!("TX: {}", hex_dump(&frame));
        self.stream.write(&frame)
    }

    fn read_request(&mut self, slave: &ModbusSlave) -> ModbusResult<Vec<u8>> {
        let mut frame = self.read(REQUEST_FRAME_START_LENGTH)?;

        if let Some(remaining) = slave.custom_rtu_request_bytes(frame[1], &frame)? {
            frame.extend(self.read(remaining)?);
        } else {
            let remaining = request_bytes_to_read(&frame)?;
            frame.extend(self.read(remaining)?);

            if frame[1] == READ_WRITE_MULTIPLE_REGISTERS {
                let remaining = frame[READ_WRITE_BYTE_COUNT_OFFSET] as usize + 2;
                frame.extend(self.read(remaining)?);
            }
        }

        debug!("RX: {}", hex_dump(&frame));
        Ok(frame)
    }

    fn read_response(&mut self, decoder: &ResponseDecoder) -> ModbusResult<ModbusMessage> {
        let mut frame = self.read(RESPONSE_FRAME_START_LENGTH)?;
        let remaining = response_bytes_to_read(&frame, decoder)?;
        frame.extend(self.read(remaining)?);
        debug!("RX: {}", hex_dump(&frame));

        // before any exception interpretation, a corrupted function code
        // must not pass for a slave exception
        verify_crc(&frame)?;
        decoder.decode(&frame[..frame.len() - 2])
    }

    fn checksums_match(&self, message: &ModbusMessage, frame: &[u8]) -> bool {
        if frame.len() < 2 {
            return false;
        }
        frame[frame.len() - 2..] == crc16_bytes(&message.message_frame())
    }

    fn frame_checksum_valid(&self, frame: &[u8]) -> bool {
        verify_crc(frame).is_ok()
    }

    fn validate_response(&self, request: &ModbusMessage, response: &ModbusMessage) -> ModbusResult<()> {
        validate_serial_response(request, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataStore, RegisterCollection};
    use crate::io::stream_resource::testing::ScriptedStream;
    use crate::message::{
        DecodeMessage, ReadCoilsInputsResponse, ReadHoldingInputRegistersRequest,
        ReadHoldingInputRegistersResponse, ReadWriteMultipleRegistersRequest,
        WriteMultipleRegistersResponse,
    };
    use std::sync::Arc;

    fn slave() -> ModbusSlave {
        ModbusSlave::new(1, Arc::new(DataStore::create_empty()))
    }

    fn with_crc(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        frame.extend_from_slice(&crc16_bytes(body));
        frame
    }

    #[test]
    fn test_build_message_frame() {
        let (stream, _) = ScriptedStream::new(&[]);
        let transport = ModbusRtuTransport::new(Box::new(stream));
        let request = crate::message::ReadCoilsInputsRequest::new(READ_COILS, 17, 19, 37).into_message();
        assert_eq!(
            transport.build_message_frame(&request),
            vec![17, 1, 0, 19, 0, 37, 14, 132]
        );
    }

    #[test]
    fn test_response_bytes_to_read() {
        let decoder = ResponseDecoder::of::<ReadCoilsInputsResponse>();
        let frame = [0x11, 0x01, 0x05, 0xCD, 0x6B, 0xB2, 0x0E, 0x1B];
        assert_eq!(response_bytes_to_read(&frame, &decoder).unwrap(), 6);
        assert_eq!(response_bytes_to_read(&[0x11, 0x01, 0x00, 0x00], &decoder).unwrap(), 1);
        assert_eq!(response_bytes_to_read(&[0x11, 0x81, 0x02, 0x00], &decoder).unwrap(), 1);
        assert_eq!(response_bytes_to_read(&[0x11, 0x10, 0x00, 0x01], &decoder).unwrap(), 4);
        assert!(matches!(
            response_bytes_to_read(&[0x11, 0x2B, 0x00, 0x00], &decoder),
            Err(ModbusError::UnsupportedFunctionCode(0x2B))
        ));
    }

    #[test]
    fn test_request_bytes_to_read() {
        assert_eq!(request_bytes_to_read(&[0x11, 0x03, 0, 0, 0, 1, 0]).unwrap(), 1);
        assert_eq!(request_bytes_to_read(&[0x11, 0x10, 0, 1, 0, 2, 4]).unwrap(), 6);
        assert_eq!(request_bytes_to_read(&[0x11, 0x14, 14, 6, 0, 4, 0]).unwrap(), 12);
        assert!(matches!(
            request_bytes_to_read(&[0x11, 0x2B, 0, 0, 0, 0, 0]),
            Err(ModbusError::UnsupportedFunctionCode(0x2B))
        ));
    }

    #[test]
    fn test_read_request_read_write_multiple() {
        let request = ReadWriteMultipleRegistersRequest::new(1, 3, 6, 14, RegisterCollection::new(vec![1, 2, 3]))
            .into_message();
        let frame = with_crc(&request.message_frame());
        let (stream, _) = ScriptedStream::new(&frame);
        let mut transport = ModbusRtuTransport::new(Box::new(stream));

        assert_eq!(transport.read_request(&slave()).unwrap(), frame);
    }

    #[test]
    fn test_read_request_uses_registered_length_rule() {
        let slave = slave();
        slave
            .register_custom_function(
                0x41,
                crate::device::CustomFunction::new::<ReadHoldingInputRegistersRequest, _>(|request, _| {
                    Ok(request.clone())
                })
                .with_rtu_request_bytes(|frame_start| frame_start[2] as usize),
            )
            .unwrap();

        let frame = [1, 0x41, 3, 0, 0, 0, 0, 9, 9, 9, 0xAA, 0xBB];
        let (stream, _) = ScriptedStream::new(&frame);
        let mut transport = ModbusRtuTransport::new(Box::new(stream));

        assert_eq!(transport.read_request(&slave).unwrap(), frame[..10].to_vec());
    }

    #[test]
    fn test_read_response() {
        let frame = with_crc(&[1, 3, 4, 0, 10, 1, 2]);
        let (stream, _) = ScriptedStream::new(&frame);
        let mut transport = ModbusRtuTransport::new(Box::new(stream));

        let response = transport
            .read_response(&ResponseDecoder::of::<ReadHoldingInputRegistersResponse>())
            .unwrap();
        match response {
            ModbusMessage::ReadHoldingInputRegistersResponse(typed) => {
                assert_eq!(typed.data.as_slice(), &[10, 258]);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_checksum_checked_before_exception() {
        let mut frame = with_crc(&[1, 0x83, 2]);
        frame[4] ^= 0xFF;
        let (stream, _) = ScriptedStream::new(&frame);
        let mut transport = ModbusRtuTransport::new(Box::new(stream));

        let result = transport.read_response(&ResponseDecoder::of::<ReadHoldingInputRegistersResponse>());
        assert!(matches!(result, Err(ModbusError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_write_discards_and_frames() {
        let (stream, written) = ScriptedStream::new(&[]);
        let mut transport = ModbusRtuTransport::new(Box::new(stream));
        let request = ReadHoldingInputRegistersRequest::new(READ_HOLDING_REGISTERS, 1, 104, 2).into_message();
        transport.write(&request).unwrap();
        assert_eq!(*written.lock().unwrap(), with_crc(&[1, 3, 0, 104, 0, 2]));
    }

    #[test]
    fn test_checksums_match_and_slave_address() {
        let (stream, _) = ScriptedStream::new(&[]);
        let transport = ModbusRtuTransport::new(Box::new(stream));
        let response = WriteMultipleRegistersResponse::new(1, 0, 2).into_message();
        let frame = transport.build_message_frame(&response);
        assert!(transport.checksums_match(&response, &frame));
        assert!(!transport.checksums_match(&response, &frame[..frame.len() - 1]));

        let request = crate::message::WriteMultipleRegistersRequest::new(2, 0, RegisterCollection::new(vec![1, 2]))
            .into_message();
        assert!(matches!(
            transport.validate_response(&request, &response),
            Err(ModbusError::ResponseMismatch(_))
        ));
    }
}
