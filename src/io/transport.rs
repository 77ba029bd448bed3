use std::time::Duration;

use crate::device::slave::ModbusSlave;
use crate::io::stream_resource::StreamResource;
use crate::message::{ModbusMessage, ModbusMessageFrame, ResponseDecoder};
use crate::modbus::protocol::{DEFAULT_RETRIES, DEFAULT_WAIT_TO_RETRY_MS};
use crate::utils::error::{ModbusError, ModbusResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// Extra attempts after the first one fails.
    pub retries: u32,
    /// Pause before resending after an acknowledge or busy exception.
    pub wait_to_retry: Duration,
    /// `None` blocks indefinitely.
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            wait_to_retry: Duration::from_millis(DEFAULT_WAIT_TO_RETRY_MS),
            read_timeout: None,
            write_timeout: None,
        }
    }
}

/// Framing and checksum discipline of one wire format.
pub trait ModbusTransport: Send {
    fn settings(&self) -> &TransportSettings;
    fn settings_mut(&mut self) -> &mut TransportSettings;
    fn stream_mut(&mut self) -> &mut dyn StreamResource;

    /// Wire bytes of `message`, header and checksum included.
    fn build_message_frame(&self, message: &ModbusMessage) -> Vec<u8>;

    fn write(&mut self, message: &ModbusMessage) -> ModbusResult<()>;

    /// Blocks until one complete request frame has been read.
    fn read_request(&mut self, slave: &ModbusSlave) -> ModbusResult<Vec<u8>>;

    /// Reads one checksum validated response and decodes it.
    fn read_response(&mut self, decoder: &ResponseDecoder) -> ModbusResult<ModbusMessage>;

    /// Whether the checksum carried by `frame` matches `message`.
    fn checksums_match(&self, message: &ModbusMessage, frame: &[u8]) -> bool;

    /// Whether a raw inbound frame carries a valid checksum, for frames that
    /// could not be decoded into a message.
    fn frame_checksum_valid(&self, frame: &[u8]) -> bool;

    /// Called before every attempt to send `request`.
    fn prepare_request(&mut self, _request: &mut ModbusMessage) {}

    /// Transport level correlation followed by the message's own checks.
    fn validate_response(&self, request: &ModbusMessage, response: &ModbusMessage) -> ModbusResult<()>;

    fn discard_in_buffer(&mut self) -> ModbusResult<()> {
        self.stream_mut().discard_in_buffer()
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> ModbusResult<()> {
        self.stream_mut().set_read_timeout(timeout)?;
        self.settings_mut().read_timeout = timeout;
        Ok(())
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> ModbusResult<()> {
        self.stream_mut().set_write_timeout(timeout)?;
        self.settings_mut().write_timeout = timeout;
        Ok(())
    }
}

/// Fills `count` bytes, looping over partial reads.
pub fn read_exact(stream: &mut dyn StreamResource, count: usize) -> ModbusResult<Vec<u8>> {
    let mut frame = vec![0u8; count];
    let mut filled = 0;

    while filled < count {
        let read = stream.read(&mut frame[filled..])?;
        if read == 0 {
            return Err(ModbusError::ConnectionClosed);
        }
        filled += read;
    }
    Ok(frame)
}

/// Serial responses must come from the addressed slave.
pub(crate) fn validate_serial_response(request: &ModbusMessage, response: &ModbusMessage) -> ModbusResult<()> {
    if request.slave_address() != response.slave_address() {
        return Err(ModbusError::ResponseMismatch(format!(
            "Response slave address does not match request. Expected {}, received {}.",
            request.slave_address(),
            response.slave_address()
        )));
    }
    request.validate_response(response)
}

pub(crate) fn hex_dump(frame: &[u8]) -> String {
    frame
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::stream_resource::testing::ScriptedStream;

    #[test]
    fn test_read_exact_loops_over_partial_reads() {
        let (mut stream, _) = ScriptedStream::new(&[1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(read_exact(&mut stream, 7).unwrap(), vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x01, 0xAB]), "01 AB");
    }
}
