use log::{debug, warn};

use crate::device::slave::{exception_response_for, ModbusSlave};
use crate::io::stream_resource::StreamResource;
use crate::io::transport::{hex_dump, read_exact, ModbusTransport, TransportSettings};
use crate::message::{create_request, ModbusMessage, ModbusMessageFrame, ResponseDecoder};
use crate::modbus::protocol::MBAP_HEADER_LENGTH;
use crate::utils::error::{ModbusError, ModbusResult};

/// Unit id plus the longest PDU.
const MAX_MBAP_LENGTH: u16 = 254;

/// Leading six bytes of an MBAP header. The unit id travels as the first
/// byte of the message frame that follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Unit id plus PDU length.
    pub length: u16,
}

impl MbapHeader {
    pub fn parse(header: &[u8]) -> ModbusResult<Self> {
        if header.len() < MBAP_HEADER_LENGTH {
            return Err(ModbusError::FrameTooShort {
                expected: MBAP_HEADER_LENGTH,
                actual: header.len(),
            });
        }

        let parsed = Self {
            transaction_id: u16::from_be_bytes([header[0], header[1]]),
            protocol_id: u16::from_be_bytes([header[2], header[3]]),
            length: u16::from_be_bytes([header[4], header[5]]),
        };

        if parsed.protocol_id != 0 {
            // tolerated, some peers fill this in
            debug!("Non-zero MBAP protocol id {}", parsed.protocol_id);
        }
        if parsed.length < 2 || parsed.length > MAX_MBAP_LENGTH {
            return Err(ModbusError::InvalidData(format!(
                "MBAP length {} outside 2..={}",
                parsed.length, MAX_MBAP_LENGTH
            )));
        }
        Ok(parsed)
    }
}

/// MBAP header followed by the message frame. No checksum.
pub fn build_ip_frame(message: &ModbusMessage) -> Vec<u8> {
    let message_frame = message.message_frame();
    let mut frame = Vec::with_capacity(MBAP_HEADER_LENGTH + message_frame.len());
    frame.extend_from_slice(&message.transaction_id().to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&(message_frame.len() as u16).to_be_bytes());
    frame.extend_from_slice(&message_frame);
    frame
}

/// Decodes a request from a complete IP frame, keeping its transaction id.
pub fn create_ip_request(slave: &ModbusSlave, frame: &[u8]) -> ModbusResult<ModbusMessage> {
    let header = MbapHeader::parse(frame)?;
    let body = &frame[MBAP_HEADER_LENGTH..];
    if body.len() < header.length as usize {
        return Err(ModbusError::FrameTooShort {
            expected: MBAP_HEADER_LENGTH + header.length as usize,
            actual: frame.len(),
        });
    }

    let mut request = create_request(slave, &body[..header.length as usize])?;
    request.set_transaction_id(header.transaction_id);
    Ok(request)
}

/// Exception reply to a frame [`create_ip_request`] rejected. `None` when the
/// frame is too damaged to name a unit id and function code.
pub fn ip_exception_response(frame: &[u8], error: &ModbusError) -> Option<ModbusMessage> {
    let header = MbapHeader::parse(frame).ok()?;
    let unit_id = *frame.get(MBAP_HEADER_LENGTH)?;
    let function_code = *frame.get(MBAP_HEADER_LENGTH + 1)?;

    let mut response = exception_response_for(unit_id, function_code, error);
    response.set_transaction_id(header.transaction_id);
    Some(response)
}

/// MBAP framing over TCP or UDP.
pub struct ModbusIpTransport {
    stream: Box<dyn StreamResource>,
    settings: TransportSettings,
    transaction_id: u16,
}

impl ModbusIpTransport {
    pub fn new(stream: Box<dyn StreamResource>) -> Self {
        Self {
            stream,
            settings: TransportSettings::default(),
            transaction_id: 0,
        }
    }

    /// Next id in 1..=65535, wrapping back to 1.
    pub fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = if self.transaction_id == u16::MAX {
            1
        } else {
            self.transaction_id + 1
        };
        self.transaction_id
    }

    /// Returns the MBAP header and the unit id plus PDU that follows it.
    fn read_frame(&mut self) -> ModbusResult<(MbapHeader, Vec<u8>)> {
        let raw_header = read_exact(self.stream.as_mut(), MBAP_HEADER_LENGTH)?;
        let header = MbapHeader::parse(&raw_header)?;
        let body = read_exact(self.stream.as_mut(), header.length as usize)?;
        debug!("RX: {} {}", hex_dump(&raw_header), hex_dump(&body));
        Ok((header, body))
    }
}

impl ModbusTransport for ModbusIpTransport {
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
        build_ip_frame(message)
    }

    fn write(&mut self, message: &ModbusMessage) -> ModbusResult<()> {
        let frame = self.build_message_frame(message);
        debug!("TX: {}", hex_dump(&frame));
        self.stream.write(&frame)
    }

    fn read_request(&mut self, _slave: &ModbusSlave) -> ModbusResult<Vec<u8>> {
        let (header, body) = self.read_frame()?;
        let mut frame = Vec::with_capacity(MBAP_HEADER_LENGTH + body.len());
        frame.extend_from_slice(&header.transaction_id.to_be_bytes());
        frame.extend_from_slice(&header.protocol_id.to_be_bytes());
        frame.extend_from_slice(&header.length.to_be_bytes());
        frame.extend(body);
        Ok(frame)
    }

    fn read_response(&mut self, decoder: &ResponseDecoder) -> ModbusResult<ModbusMessage> {
        let (header, body) = self.read_frame()?;
        let mut response = decoder.decode(&body)?;
        response.set_transaction_id(header.transaction_id);
        Ok(response)
    }

    fn checksums_match(&self, _message: &ModbusMessage, _frame: &[u8]) -> bool {
        true
    }

    fn frame_checksum_valid(&self, _frame: &[u8]) -> bool {
        true
    }

    fn prepare_request(&mut self, request: &mut ModbusMessage) {
        let transaction_id = self.next_transaction_id();
        request.set_transaction_id(transaction_id);
    }

    fn validate_response(&self, request: &ModbusMessage, response: &ModbusMessage) -> ModbusResult<()> {
        if request.transaction_id() != response.transaction_id() {
            warn!(
                "Response transaction id {} does not match request {}",
                response.transaction_id(),
                request.transaction_id()
            );
            return Err(ModbusError::ResponseMismatch(format!(
                "Response was not of expected transaction ID. Expected {}, received {}.",
                request.transaction_id(),
                response.transaction_id()
            )));
        }
        request.validate_response(response)
    }
}
