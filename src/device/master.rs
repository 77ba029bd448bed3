use log::{debug, info, warn};
use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use crate::config::{Config, TransportKind};
use crate::data::{DiscreteCollection, FileRecord, RegisterCollection};
use crate::io::{
    ModbusAsciiTransport, ModbusIpTransport, ModbusRtuTransport, ModbusTransport, SerialPortAdapter,
    StreamResource, TcpStreamAdapter, TransportSettings, UdpClientAdapter,
};
use crate::message::{
    CustomMessage, DecodeMessage, DiagnosticsRequestResponse, ModbusMessage, ModbusMessageFrame,
    ReadCoilsInputsRequest, ReadCoilsInputsResponse, ReadFileRecordRequest, ReadFileRecordResponse,
    ReadHoldingInputRegistersRequest, ReadHoldingInputRegistersResponse,
    ReadWriteMultipleRegistersRequest, ResponseDecoder, WriteMultipleCoilsRequest,
    WriteMultipleCoilsResponse, WriteMultipleRegistersRequest, WriteMultipleRegistersResponse,
    WriteSingleCoilRequestResponse, WriteSingleRegisterRequestResponse,
};
use crate::modbus::protocol::*;
use crate::utils::error::{ModbusError, ModbusResult};

/// Most records one read file record request can name.
const MAX_FILE_RECORDS: usize = 35;

/// Timeout applied while opening a connection when none is configured.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Issues requests over one transport and waits for each response.
pub struct ModbusMaster {
    transport: Box<dyn ModbusTransport>,
}

impl ModbusMaster {
    pub fn new(transport: Box<dyn ModbusTransport>) -> Self {
        Self { transport }
    }

    pub fn create_rtu(stream: Box<dyn StreamResource>) -> Self {
        Self::new(Box::new(ModbusRtuTransport::new(stream)))
    }

    pub fn create_ascii(stream: Box<dyn StreamResource>) -> Self {
        Self::new(Box::new(ModbusAsciiTransport::new(stream)))
    }

    pub fn create_ip(stream: Box<dyn StreamResource>) -> Self {
        Self::new(Box::new(ModbusIpTransport::new(stream)))
    }

    /// Opens the link described by `config` and applies its master settings.
    pub fn from_config(config: &Config) -> ModbusResult<Self> {
        let connect_timeout = config
            .master
            .read_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);

        let mut master = match config.transport {
            TransportKind::Rtu => {
                Self::create_rtu(Box::new(SerialPortAdapter::open(&config.serial, connect_timeout)?))
            }
            TransportKind::Ascii => {
                Self::create_ascii(Box::new(SerialPortAdapter::open(&config.serial, connect_timeout)?))
            }
            TransportKind::Tcp => {
                let address = resolve(&config.network.host, config.network.port)?;
                Self::create_ip(Box::new(TcpStreamAdapter::connect(address, connect_timeout)?))
            }
            TransportKind::Udp => {
                let address = resolve(&config.network.host, config.network.port)?;
                Self::create_ip(Box::new(UdpClientAdapter::connect(address)?))
            }
        };

        {
            let settings = master.settings_mut();
            settings.retries = config.master.retries;
            settings.wait_to_retry = Duration::from_millis(config.master.wait_to_retry_ms);
        }
        master.set_read_timeout(config.master.read_timeout_ms.map(Duration::from_millis))?;
        master.set_write_timeout(config.master.write_timeout_ms.map(Duration::from_millis))?;

        info!("✅ Modbus {} master ready", config.transport);
        Ok(master)
    }

    pub fn settings(&self) -> &TransportSettings {
        self.transport.settings()
    }

    pub fn settings_mut(&mut self) -> &mut TransportSettings {
        self.transport.settings_mut()
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> ModbusResult<()> {
        self.transport.set_read_timeout(timeout)
    }

    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> ModbusResult<()> {
        self.transport.set_write_timeout(timeout)
    }

    pub fn read_coils(&mut self, slave_address: u8, start_address: u16, number_of_points: u16) -> ModbusResult<Vec<bool>> {
        self.read_discretes(READ_COILS, slave_address, start_address, number_of_points)
    }

    pub fn read_inputs(&mut self, slave_address: u8, start_address: u16, number_of_points: u16) -> ModbusResult<Vec<bool>> {
        self.read_discretes(READ_INPUTS, slave_address, start_address, number_of_points)
    }

    pub fn read_holding_registers(
        &mut self,
        slave_address: u8,
        start_address: u16,
        number_of_points: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.read_registers(READ_HOLDING_REGISTERS, slave_address, start_address, number_of_points)
    }

    pub fn read_input_registers(
        &mut self,
        slave_address: u8,
        start_address: u16,
        number_of_points: u16,
    ) -> ModbusResult<Vec<u16>> {
        self.read_registers(READ_INPUT_REGISTERS, slave_address, start_address, number_of_points)
    }

    pub fn write_single_coil(&mut self, slave_address: u8, coil_address: u16, value: bool) -> ModbusResult<()> {
        let request = WriteSingleCoilRequestResponse::new(slave_address, coil_address, value).into_message();
        self.unicast_message(request, ResponseDecoder::of::<WriteSingleCoilRequestResponse>())?;
        Ok(())
    }

    pub fn write_single_register(&mut self, slave_address: u8, register_address: u16, value: u16) -> ModbusResult<()> {
        let request = WriteSingleRegisterRequestResponse::new(slave_address, register_address, value).into_message();
        self.unicast_message(request, ResponseDecoder::of::<WriteSingleRegisterRequestResponse>())?;
        Ok(())
    }

    pub fn write_multiple_coils(&mut self, slave_address: u8, start_address: u16, values: &[bool]) -> ModbusResult<()> {
        validate_count("values", values.len(), MAX_DISCRETE_REQUEST_RESPONSE_SIZE)?;
        let request =
            WriteMultipleCoilsRequest::new(slave_address, start_address, DiscreteCollection::from(values.to_vec()))
                .into_message();
        self.unicast_message(request, ResponseDecoder::of::<WriteMultipleCoilsResponse>())?;
        Ok(())
    }

    pub fn write_multiple_registers(&mut self, slave_address: u8, start_address: u16, values: &[u16]) -> ModbusResult<()> {
        validate_count("values", values.len(), MAX_WRITE_REGISTERS)?;
        let request =
            WriteMultipleRegistersRequest::new(slave_address, start_address, RegisterCollection::from(values.to_vec()))
                .into_message();
        self.unicast_message(request, ResponseDecoder::of::<WriteMultipleRegistersResponse>())?;
        Ok(())
    }

    /// Writes `write_data` then reads back, in one transaction.
    pub fn read_write_multiple_registers(
        &mut self,
        slave_address: u8,
        read_start_address: u16,
        number_of_points_to_read: u16,
        write_start_address: u16,
        write_data: &[u16],
    ) -> ModbusResult<Vec<u16>> {
        validate_count("number_of_points_to_read", number_of_points_to_read as usize, MAX_READ_REGISTERS)?;
        validate_count("write_data", write_data.len(), MAX_READ_WRITE_WRITE_REGISTERS)?;

        let request = ReadWriteMultipleRegistersRequest::new(
            slave_address,
            read_start_address,
            number_of_points_to_read,
            write_start_address,
            RegisterCollection::from(write_data.to_vec()),
        )
        .into_message();
        let response = self.unicast_message(request, ResponseDecoder::of::<ReadHoldingInputRegistersResponse>())?;
        registers_of(response)
    }

    /// Diagnostics echo test. True when `data` came back unchanged.
    pub fn return_query_data(&mut self, slave_address: u8, data: u16) -> ModbusResult<bool> {
        let request = DiagnosticsRequestResponse::return_query_data(slave_address, data);
        let expected = request.data.clone();
        match self.unicast_message(request.into_message(), ResponseDecoder::of::<DiagnosticsRequestResponse>())? {
            ModbusMessage::Diagnostics(response) => Ok(response.data == expected),
            other => Err(unexpected_response(&other)),
        }
    }

    /// Reads each record and returns its registers in request order.
    pub fn read_file_record(&mut self, slave_address: u8, records: Vec<FileRecord>) -> ModbusResult<Vec<RegisterCollection>> {
        validate_count("records", records.len(), MAX_FILE_RECORDS)?;
        let request = ReadFileRecordRequest::new(slave_address, records).into_message();
        let response = self.unicast_message(request, ResponseDecoder::of::<ReadFileRecordResponse>())?;

        response
            .as_custom::<ReadFileRecordResponse>()
            .ok_or_else(|| unexpected_response(&response))?
            .records_as_registers()
    }

    /// Sends a caller defined request and returns its response as `T`.
    pub fn execute_custom_message<T>(&mut self, request: Box<dyn CustomMessage>) -> ModbusResult<T>
    where
        T: DecodeMessage + CustomMessage + Clone + 'static,
    {
        let response = self.unicast_message(ModbusMessage::Custom(request), ResponseDecoder::of::<T>())?;
        response
            .as_custom::<T>()
            .cloned()
            .ok_or_else(|| unexpected_response(&response))
    }

    /// Sends `request` until a valid response arrives or retries run out.
    /// Slave exceptions other than acknowledge and busy end the exchange.
    pub fn unicast_message(&mut self, mut request: ModbusMessage, decoder: ResponseDecoder) -> ModbusResult<ModbusMessage> {
        let retries = self.transport.settings().retries;
        let wait_to_retry = self.transport.settings().wait_to_retry;
        let mut attempt: u32 = 1;

        loop {
            match self.attempt(&mut request, &decoder) {
                Ok(ModbusMessage::SlaveException(exception)) => {
                    let code = exception.exception();
                    if code.is_retryable() && attempt <= retries {
                        warn!(
                            "⚠️  Slave {} answered {}, retrying in {:?} (attempt {}/{})",
                            request.slave_address(),
                            code,
                            wait_to_retry,
                            attempt,
                            retries
                        );
                        thread::sleep(wait_to_retry);
                        attempt += 1;
                        continue;
                    }
                    return Err(exception.to_error());
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt <= retries => {
                    warn!("⚠️  {} failed: {} (attempt {}/{})", request, e, attempt, retries);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn attempt(&mut self, request: &mut ModbusMessage, decoder: &ResponseDecoder) -> ModbusResult<ModbusMessage> {
        self.transport.prepare_request(request);
        debug!("Sending {}", request);
        self.transport.write(request)?;
        let response = self.transport.read_response(decoder)?;
        self.transport.validate_response(request, &response)?;
        Ok(response)
    }

    fn read_discretes(
        &mut self,
        function_code: u8,
        slave_address: u8,
        start_address: u16,
        number_of_points: u16,
    ) -> ModbusResult<Vec<bool>> {
        validate_count("number_of_points", number_of_points as usize, MAX_DISCRETE_REQUEST_RESPONSE_SIZE)?;
        let request =
            ReadCoilsInputsRequest::new(function_code, slave_address, start_address, number_of_points).into_message();

        match self.unicast_message(request, ResponseDecoder::of::<ReadCoilsInputsResponse>())? {
            ModbusMessage::ReadCoilsInputsResponse(response) => {
                // the last byte is padded up to a multiple of 8
                let mut data = response.data;
                data.truncate_to(number_of_points as usize);
                Ok(data.into_vec())
            }
            other => Err(unexpected_response(&other)),
        }
    }

    fn read_registers(
        &mut self,
        function_code: u8,
        slave_address: u8,
        start_address: u16,
        number_of_points: u16,
    ) -> ModbusResult<Vec<u16>> {
        validate_count("number_of_points", number_of_points as usize, MAX_READ_REGISTERS)?;
        let request = ReadHoldingInputRegistersRequest::new(function_code, slave_address, start_address, number_of_points)
            .into_message();
        let response = self.unicast_message(request, ResponseDecoder::of::<ReadHoldingInputRegistersResponse>())?;
        registers_of(response)
    }
}

fn registers_of(response: ModbusMessage) -> ModbusResult<Vec<u16>> {
    match response {
        ModbusMessage::ReadHoldingInputRegistersResponse(typed) => Ok(typed.data.into_vec()),
        other => Err(unexpected_response(&other)),
    }
}

fn unexpected_response(response: &ModbusMessage) -> ModbusError {
    ModbusError::ResponseMismatch(format!("Unexpected response {}", response))
}

fn validate_count(name: &str, count: usize, max: usize) -> ModbusResult<()> {
    if count == 0 || count > max {
        return Err(ModbusError::ArgumentOutOfRange(format!(
            "{} must be between 1 and {} inclusive, got {}",
            name, max, count
        )));
    }
    Ok(())
}

fn resolve(host: &str, port: u16) -> ModbusResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| ModbusError::ConfigError(format!("Could not resolve {}:{}", host, port)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::stream_resource::testing::ScriptedStream;
    use crate::modbus::crc16_bytes;
    use std::sync::{Arc, Mutex};

    fn rtu_frame(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        frame.extend_from_slice(&crc16_bytes(body));
        frame
    }

    fn rtu_master(script: &[u8]) -> (ModbusMaster, Arc<Mutex<Vec<u8>>>) {
        let (stream, written) = ScriptedStream::new(script);
        let mut master = ModbusMaster::create_rtu(Box::new(stream));
        master.settings_mut().wait_to_retry = Duration::from_millis(1);
        (master, written)
    }

    #[test]
    fn test_read_holding_registers() {
        let (mut master, written) = rtu_master(&rtu_frame(&[1, 3, 4, 0, 1, 0, 2]));
        assert_eq!(master.read_holding_registers(1, 104, 2).unwrap(), vec![1, 2]);
        assert_eq!(*written.lock().unwrap(), rtu_frame(&[1, 3, 0, 104, 0, 2]));
    }

    #[test]
    fn test_read_coils_truncates_padding() {
        let (mut master, _) = rtu_master(&rtu_frame(&[1, 1, 1, 0xFF]));
        assert_eq!(master.read_coils(1, 0, 3).unwrap(), vec![true, true, true]);
    }

    #[test]
    fn test_checksum_error_is_retried() {
        let mut script = vec![1, 3, 2, 0, 7, 0, 0];
        script.extend(rtu_frame(&[1, 3, 2, 0, 7]));
        let (mut master, written) = rtu_master(&script);

        assert_eq!(master.read_holding_registers(1, 0, 1).unwrap(), vec![7]);
        // the request went out twice
        assert_eq!(written.lock().unwrap().len(), 16);
    }

    #[test]
    fn test_busy_exception_is_retried() {
        let mut script = rtu_frame(&[1, 0x83, 6]);
        script.extend(rtu_frame(&[1, 3, 2, 0, 9]));
        let (mut master, _) = rtu_master(&script);
        assert_eq!(master.read_holding_registers(1, 0, 1).unwrap(), vec![9]);
    }

    #[test]
    fn test_busy_exception_surfaces_after_retries() {
        let mut script = Vec::new();
        for _ in 0..2 {
            script.extend(rtu_frame(&[1, 0x83, 6]));
        }
        let (mut master, _) = rtu_master(&script);
        master.settings_mut().retries = 1;

        let err = master.read_holding_registers(1, 0, 1).unwrap_err();
        assert_eq!(err.slave_exception_code(), Some(SlaveExceptionCode::SlaveDeviceBusy));
    }

    #[test]
    fn test_illegal_address_is_not_retried() {
        let (mut master, written) = rtu_master(&rtu_frame(&[1, 0x83, 2]));
        let err = master.read_holding_registers(1, 0, 1).unwrap_err();
        assert_eq!(err.slave_exception_code(), Some(SlaveExceptionCode::IllegalDataAddress));
        assert_eq!(written.lock().unwrap().len(), 8);
    }

    #[test]
    fn test_bounds_checked_before_sending() {
        let (mut master, written) = rtu_master(&[]);
        assert!(matches!(
            master.read_holding_registers(1, 0, 126),
            Err(ModbusError::ArgumentOutOfRange(_))
        ));
        assert!(matches!(master.read_coils(1, 0, 0), Err(ModbusError::ArgumentOutOfRange(_))));
        assert!(matches!(
            master.write_multiple_registers(1, 0, &[0; 124]),
            Err(ModbusError::ArgumentOutOfRange(_))
        ));
        assert!(matches!(
            master.read_write_multiple_registers(1, 0, 1, 0, &[0; 122]),
            Err(ModbusError::ArgumentOutOfRange(_))
        ));
        assert!(matches!(master.read_inputs(1, 0, 2041), Err(ModbusError::ArgumentOutOfRange(_))));
        assert!(matches!(
            master.write_multiple_coils(1, 0, &[false; 2041]),
            Err(ModbusError::ArgumentOutOfRange(_))
        ));
        assert!(written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_counts_at_the_limit_are_sent() {
        // an empty script closes the link once the request is written
        let (mut master, written) = rtu_master(&[]);
        assert!(master.read_coils(1, 0, 2040).unwrap_err().is_connection_closed());
        assert!(master.write_multiple_coils(1, 0, &[true; 2040]).unwrap_err().is_connection_closed());
        assert!(master.read_input_registers(1, 0, 125).unwrap_err().is_connection_closed());
        assert!(master.write_multiple_registers(1, 0, &[1; 123]).unwrap_err().is_connection_closed());
        assert!(master
            .read_write_multiple_registers(1, 0, 125, 0, &[1; 121])
            .unwrap_err()
            .is_connection_closed());
        assert!(!written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_return_query_data() {
        let (mut master, _) = rtu_master(&rtu_frame(&[1, 8, 0, 0, 0x12, 0x34]));
        assert!(master.return_query_data(1, 0x1234).unwrap());
    }

    #[test]
    fn test_closed_stream_is_not_retried() {
        let (mut master, written) = rtu_master(&[]);
        assert!(master.write_single_register(1, 0, 5).unwrap_err().is_connection_closed());
        assert_eq!(written.lock().unwrap().len(), 8);
    }
}
