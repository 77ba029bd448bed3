use crate::data::RegisterCollection;
use crate::message::{
    check_function_code, checked_payload, read_u16, DecodeMessage, MessageHeader,
    ModbusMessage, ModbusMessageFrame,
};
use crate::modbus::protocol::READ_WRITE_MULTIPLE_REGISTERS;
use crate::utils::error::{ModbusError, ModbusResult};

/// Read/write multiple registers (23). The write happens before the read.
/// Answered by a `ReadHoldingInputRegistersResponse` carrying function code 23.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadWriteMultipleRegistersRequest {
    header: MessageHeader,
    pub read_start_address: u16,
    pub number_of_points_to_read: u16,
    pub write_start_address: u16,
    pub write_data: RegisterCollection,
}

impl ReadWriteMultipleRegistersRequest {
    pub fn new(
        slave_address: u8,
        read_start_address: u16,
        number_of_points_to_read: u16,
        write_start_address: u16,
        write_data: RegisterCollection,
    ) -> Self {
        Self {
            header: MessageHeader::new(slave_address, READ_WRITE_MULTIPLE_REGISTERS),
            read_start_address,
            number_of_points_to_read,
            write_start_address,
            write_data,
        }
    }

    pub fn number_of_points_to_write(&self) -> u16 {
        self.write_data.len() as u16
    }

    pub fn validate_response(&self, response: &ModbusMessage) -> ModbusResult<()> {
        check_function_code(self.function_code(), response)?;

        if let ModbusMessage::ReadHoldingInputRegistersResponse(typed) = response {
            let expected = self.number_of_points_to_read as usize * 2;
            if typed.byte_count() != expected {
                return Err(ModbusError::ResponseMismatch(format!(
                    "Unexpected byte count. Expected {}, received {}.",
                    expected,
                    typed.byte_count()
                )));
            }
        }
        Ok(())
    }
}

impl ModbusMessageFrame for ReadWriteMultipleRegistersRequest {
    impl_header!();

    fn protocol_data_unit(&self) -> Vec<u8> {
        let mut pdu = vec![self.function_code()];
        pdu.extend_from_slice(&self.read_start_address.to_be_bytes());
        pdu.extend_from_slice(&self.number_of_points_to_read.to_be_bytes());
        pdu.extend_from_slice(&self.write_start_address.to_be_bytes());
        pdu.extend_from_slice(&self.number_of_points_to_write().to_be_bytes());
        pdu.push(self.write_data.byte_count() as u8);
        pdu.extend(self.write_data.network_bytes());
        pdu
    }
}

impl DecodeMessage for ReadWriteMultipleRegistersRequest {
    const MINIMUM_FRAME_SIZE: usize = 11;

    fn decode_unique(header: MessageHeader, frame: &[u8]) -> ModbusResult<Self> {
        let payload = checked_payload(frame, 10)?;
        let write_data = RegisterCollection::from_bytes(payload)?;

        let declared = read_u16(frame, 8);
        if declared as usize != write_data.len() {
            return Err(ModbusError::InvalidData(format!(
                "Write count {} does not match the {} register(s) supplied",
                declared,
                write_data.len()
            )));
        }

        Ok(Self {
            header,
            read_start_address: read_u16(frame, 2),
            number_of_points_to_read: read_u16(frame, 4),
            write_start_address: read_u16(frame, 6),
            write_data,
        })
    }

    fn into_message(self) -> ModbusMessage {
        ModbusMessage::ReadWriteMultipleRegistersRequest(self)
    }
}
