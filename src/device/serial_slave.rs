use log::{debug, info, warn};

use crate::device::slave::{exception_response_for, ModbusSlave, SlaveShutdown};
use crate::io::{ModbusAsciiTransport, ModbusRtuTransport, ModbusTransport, StreamResource};
use crate::message::{create_request, ModbusMessageFrame};
use crate::modbus::protocol::BROADCAST_ADDRESS;
use crate::utils::error::{ModbusError, ModbusResult};

/// Slave answering requests on an RTU or ASCII line.
pub struct ModbusSerialSlave {
    slave: ModbusSlave,
    transport: Box<dyn ModbusTransport>,
    shutdown: SlaveShutdown,
}

impl ModbusSerialSlave {
    pub fn new(slave: ModbusSlave, transport: Box<dyn ModbusTransport>) -> Self {
        Self {
            slave,
            transport,
            shutdown: SlaveShutdown::new(),
        }
    }

    pub fn create_rtu(slave: ModbusSlave, stream: Box<dyn StreamResource>) -> Self {
        Self::new(slave, Box::new(ModbusRtuTransport::new(stream)))
    }

    pub fn create_ascii(slave: ModbusSlave, stream: Box<dyn StreamResource>) -> Self {
        Self::new(slave, Box::new(ModbusAsciiTransport::new(stream)))
    }

    pub fn slave(&self) -> &ModbusSlave {
        &self.slave
    }

    /// Handle that stops [`listen`](Self::listen) at its next read timeout.
    pub fn shutdown_handle(&self) -> SlaveShutdown {
        self.shutdown.clone()
    }

    /// Serves requests until the line closes or a stop is requested.
    pub fn listen(&mut self) -> ModbusResult<()> {
        info!("🚀 Serial slave {} listening", self.slave.unit_id());

        while !self.shutdown.is_stop_requested() {
            let frame = match self.transport.read_request(&self.slave) {
                Ok(frame) => frame,
                Err(ModbusError::Timeout) => {
                    // a frame cut short by the timeout must not prefix the next one
                    self.transport.discard_in_buffer()?;
                    continue;
                }
                Err(ModbusError::ConnectionClosed) => {
                    info!("🔌 Serial line closed");
                    break;
                }
                Err(e) => {
                    warn!("⚠️  Failed to read request: {}", e);
                    self.transport.discard_in_buffer()?;
                    continue;
                }
            };

            if let Err(e) = self.handle_frame(&frame) {
                warn!("⚠️  Dropping request frame: {}", e);
            }
        }

        info!("🛑 Serial slave {} stopped", self.slave.unit_id());
        Ok(())
    }

    /// `frame` still ends with its checksum.
    fn handle_frame(&mut self, frame: &[u8]) -> ModbusResult<()> {
        let request = match create_request(&self.slave, frame) {
            Ok(request) => request,
            Err(e) => return self.reject_frame(frame, &e),
        };

        if !self.transport.checksums_match(&request, frame) {
            warn!("⚠️  Checksum mismatch, request from {} dropped", request.slave_address());
            return Ok(());
        }

        let address = request.slave_address();
        if !self.is_addressed(address) {
            debug!("Ignoring request for slave {}", address);
            return Ok(());
        }

        let response = self.slave.process_request(&request);
        if address == BROADCAST_ADDRESS {
            return Ok(());
        }
        self.transport.write(&response)
    }

    fn is_addressed(&self, address: u8) -> bool {
        address == self.slave.unit_id() || address == BROADCAST_ADDRESS
    }

    /// Answers an undecodable frame with an exception, provided it arrived
    /// intact and was addressed to this unit alone.
    fn reject_frame(&mut self, frame: &[u8], error: &ModbusError) -> ModbusResult<()> {
        if frame.len() < 2 || !self.transport.frame_checksum_valid(frame) {
            warn!("⚠️  Dropping request frame: {}", error);
            return Ok(());
        }

        let address = frame[0];
        if address != self.slave.unit_id() {
            debug!("Ignoring undecodable request for slave {}", address);
            return Ok(());
        }

        warn!("⚠️  Rejecting request from master: {}", error);
        self.transport
            .write(&exception_response_for(address, frame[1], error))
    }
}
