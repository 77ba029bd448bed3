use log::debug;

use crate::device::slave::ModbusSlave;
use crate::io::stream_resource::StreamResource;
use crate::io::transport::{read_exact, validate_serial_response, ModbusTransport, TransportSettings};
use crate::message::{ModbusMessage, ModbusMessageFrame, ResponseDecoder};
use crate::modbus::crc::lrc;
use crate::modbus::protocol::{ASCII_FRAME_START, ASCII_NEW_LINE};
use crate::utils::error::{ModbusError, ModbusResult};

/// Longest line accepted, a full ASCII frame is 513 characters.
const MAX_LINE_LENGTH: usize = 1024;

/// Address, function code and LRC.
const MIN_DECODED_FRAME_LENGTH: usize = 3;

/// `:` + uppercase hex of address, PDU and LRC + CRLF.
pub fn encode_ascii_frame(message_frame: &[u8]) -> Vec<u8> {
    let mut body = message_frame.to_vec();
    body.push(lrc(message_frame));

    let mut frame = Vec::with_capacity(body.len() * 2 + 3);
    frame.push(ASCII_FRAME_START);
    frame.extend_from_slice(hex::encode_upper(&body).as_bytes());
    frame.extend_from_slice(ASCII_NEW_LINE);
    frame
}

/// Strips the delimiters of one line and hex decodes the body. The
/// returned bytes still end with the LRC.
pub fn decode_ascii_frame(line: &[u8]) -> ModbusResult<Vec<u8>> {
    if line.first() != Some(&ASCII_FRAME_START) {
        return Err(ModbusError::InvalidData("ASCII frame must start with ':'".to_string()));
    }
    if !line.ends_with(ASCII_NEW_LINE) {
        return Err(ModbusError::InvalidData("ASCII frame must end with CR LF".to_string()));
    }

    let hex_body = &line[1..line.len() - ASCII_NEW_LINE.len()];
    let bytes = hex::decode(hex_body)
        .map_err(|e| ModbusError::InvalidData(format!("Invalid ASCII frame body: {}", e)))?;

    if bytes.len() < MIN_DECODED_FRAME_LENGTH {
        return Err(ModbusError::FrameTooShort {
            expected: MIN_DECODED_FRAME_LENGTH,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

fn verify_lrc(frame: &[u8]) -> ModbusResult<()> {
    let (body, check) = frame.split_at(frame.len() - 1);
    let expected = lrc(body);
    if expected != check[0] {
        return Err(ModbusError::ChecksumMismatch {
            expected: expected as u16,
            actual: check[0] as u16,
        });
    }
    Ok(())
}

/// Hex text framing with an LRC, delimited by `:` and CR LF.
pub struct ModbusAsciiTransport {
    stream: Box<dyn StreamResource>,
    settings: TransportSettings,
}

impl ModbusAsciiTransport {
    pub fn new(stream: Box<dyn StreamResource>) -> Self {
        Self {
            stream,
            settings: TransportSettings::default(),
        }
    }

    fn read_line(&mut self) -> ModbusResult<Vec<u8>> {
        let mut line = Vec::new();
        while !line.ends_with(ASCII_NEW_LINE) {
            if line.len() >= MAX_LINE_LENGTH {
                return Err(ModbusError::InvalidData(format!(
                    "No line terminator within {} characters",
                    MAX_LINE_LENGTH
                )));
            }
            line.extend(read_exact(self.stream.as_mut(), 1)?);
        }
        debug!("RX: {}", String::from_utf8_lossy(&line).trim_end());
        Ok(line)
    }
}

impl ModbusTransport for ModbusAsciiTransport {
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
        encode_ascii_frame(&message.message_frame())
    }

    fn write(&mut self, message: &ModbusMessage) -> ModbusResult<()> {
        self.stream.discard_in_buffer()?;
        let frame = self.build_message_frame(message);
        debug!("TX: {}", String::from_utf8_lossy(&frame).trim_end());
        self.stream.write(&frame)
    }

    fn read_request(&mut self, _slave: &ModbusSlave) -> ModbusResult<Vec<u8>> {
        let line = self.read_line()?;
        decode_ascii_frame(&line)
    }

    fn read_response(&mut self, decoder: &ResponseDecoder) -> ModbusResult<ModbusMessage> {
        let line = self.read_line()?;
        let frame = decode_ascii_frame(&line)?;
        verify_lrc(&frame)?;
        decoder.decode(&frame[..frame.len() - 1])
    }

    fn checksums_match(&self, message: &ModbusMessage, frame: &[u8]) -> bool {
        frame.last() == Some(&lrc(&message.message_frame()))
    }

    fn frame_checksum_valid(&self, frame: &[u8]) -> bool {
        frame.len() >= 2 && verify_lrc(frame).is_ok()
    }

    fn validate_response(&self, request: &ModbusMessage, response: &ModbusMessage) -> ModbusResult<()> {
        validate_serial_response(request, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataStore;
    use crate::io::stream_resource::testing::ScriptedStream;
    use crate::message::{DecodeMessage, ReadCoilsInputsRequest, ReadCoilsInputsResponse};
    use crate::modbus::protocol::READ_COILS;
    use std::sync::Arc;

    #[test]
    fn test_encode_frame() {
        let request = ReadCoilsInputsRequest::new(READ_COILS, 2, 0, 1).into_message();
        let (stream, _) = ScriptedStream::new(&[]);
        let transport = ModbusAsciiTransport::new(Box::new(stream));
        assert_eq!(transport.build_message_frame(&request), b":020100000001FC\r\n".to_vec());
    }

    #[test]
    fn test_decode_frame_errors() {
        assert!(matches!(
            decode_ascii_frame(b"020100000001FC\r\n"),
            Err(ModbusError::InvalidData(_))
        ));
        assert!(matches!(
            decode_ascii_frame(b":020100000001FC"),
            Err(ModbusError::InvalidData(_))
        ));
        assert!(matches!(
            decode_ascii_frame(b":020101010FB\r\n"),
            Err(ModbusError::InvalidData(_))
        ));
        assert!(matches!(
            decode_ascii_frame(b":0201ZZ\r\n"),
            Err(ModbusError::InvalidData(_))
        ));
        assert!(matches!(
            decode_ascii_frame(b":0201\r\n"),
            Err(ModbusError::FrameTooShort { .. })
        ));
    }

    #[test]
    fn test_read_response() {
        // LRC of {02 01 01 01} is 0xFB
        let (stream, _) = ScriptedStream::new(b":02010101FB\r\n");
        let mut transport = ModbusAsciiTransport::new(Box::new(stream));
        let response = transport
            .read_response(&ResponseDecoder::of::<ReadCoilsInputsResponse>())
            .unwrap();
        match response {
            ModbusMessage::ReadCoilsInputsResponse(typed) => assert!(typed.data[0]),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_read_response_bad_lrc() {
        let (stream, _) = ScriptedStream::new(b":02010101FA\r\n");
        let mut transport = ModbusAsciiTransport::new(Box::new(stream));
        let result = transport.read_response(&ResponseDecoder::of::<ReadCoilsInputsResponse>());
        assert!(matches!(result, Err(ModbusError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_read_request_keeps_lrc() {
        let (stream, _) = ScriptedStream::new(b":020100000001FC\r\n");
        let mut transport = ModbusAsciiTransport::new(Box::new(stream));
        let slave = ModbusSlave::new(2, Arc::new(DataStore::create_empty()));

        let frame = transport.read_request(&slave).unwrap();
        assert_eq!(frame, vec![2, 1, 0, 0, 0, 1, 0xFC]);

        let request = ReadCoilsInputsRequest::decode(&frame).unwrap().into_message();
        assert!(transport.checksums_match(&request, &frame));
    }
}
