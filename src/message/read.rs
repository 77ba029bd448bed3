use crate::data::{DiscreteCollection, RegisterCollection};
use crate::message::{
    check_function_code, checked_payload, read_u16, DecodeMessage, MessageHeader,
    ModbusMessage, ModbusMessageFrame,
};
use crate::utils::error::{ModbusError, ModbusResult};

/// Read coils (1) or read discrete inputs (2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCoilsInputsRequest {
    header: MessageHeader,
    pub start_address: u16,
    pub number_of_points: u16,
}

impl ReadCoilsInputsRequest {
    pub fn new(function_code: u8, slave_address: u8, start_address: u16, number_of_points: u16) -> Self {
        Self {
            header: MessageHeader::new(slave_address, function_code),
            start_address,
            number_of_points,
        }
    }

    pub fn validate_response(&self, response: &ModbusMessage) -> ModbusResult<()> {
        check_function_code(self.function_code(), response)?;

        if let ModbusMessage::ReadCoilsInputsResponse(typed) = response {
            // best effort, 1 and 6 points share a byte count
            let expected = (self.number_of_points as usize + 7) / 8;
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

impl ModbusMessageFrame for ReadCoilsInputsRequest {
    impl_header!();

    fn protocol_data_unit(&self) -> Vec<u8> {
        let mut pdu = vec![self.function_code()];
        pdu.extend_from_slice(&self.start_address.to_be_bytes());
        pdu.extend_from_slice(&self.number_of_points.to_be_bytes());
        pdu
    }
}

impl DecodeMessage for ReadCoilsInputsRequest {
    const MINIMUM_FRAME_SIZE: usize = 6;

    fn decode_unique(header: MessageHeader, frame: &[u8]) -> ModbusResult<Self> {
        Ok(Self {
            header,
            start_address: read_u16(frame, 2),
            number_of_points: read_u16(frame, 4),
        })
    }

    fn into_message(self) -> ModbusMessage {
        ModbusMessage::ReadCoilsInputsRequest(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCoilsInputsResponse {
    header: MessageHeader,
    /// Padded to a whole number of bytes.
    pub data: DiscreteCollection,
}

impl ReadCoilsInputsResponse {
    pub fn new(function_code: u8, slave_address: u8, data: DiscreteCollection) -> Self {
        Self {
            header: MessageHeader::new(slave_address, function_code),
            data,
        }
    }

    pub fn byte_count(&self) -> usize {
        self.data.byte_count()
    }
}

impl ModbusMessageFrame for ReadCoilsInputsResponse {
    impl_header!();

    fn protocol_data_unit(&self) -> Vec<u8> {
        let mut pdu = vec![self.function_code(), self.byte_count() as u8];
        pdu.extend(self.data.network_bytes());
        pdu
    }
}

impl DecodeMessage for ReadCoilsInputsResponse {
    const MINIMUM_FRAME_SIZE: usize = 3;

    fn decode_unique(header: MessageHeader, frame: &[u8]) -> ModbusResult<Self> {
        let payload = checked_payload(frame, 2)?;
        Ok(Self {
            header,
            data: DiscreteCollection::from_bytes(payload),
        })
    }

    fn into_message(self) -> ModbusMessage {
        ModbusMessage::ReadCoilsInputsResponse(self)
    }
}

/// Read holding registers (3) or read input registers (4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadHoldingInputRegistersRequest {
    header: MessageHeader,
    pub start_address: u16,
    pub number_of_points: u16,
}

impl ReadHoldingInputRegistersRequest {
    pub fn new(function_code: u8, slave_address: u8, start_address: u16, number_of_points: u16) -> Self {
        Self {
            header: MessageHeader::new(slave_address, function_code),
            start_address,
            number_of_points,
        }
    }

    pub fn validate_response(&self, response: &ModbusMessage) -> ModbusResult<()> {
        check_function_code(self.function_code(), response)?;

        if let ModbusMessage::ReadHoldingInputRegistersResponse(typed) = response {
            let expected = self.number_of_points as usize * 2;
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

impl ModbusMessageFrame for ReadHoldingInputRegistersRequest {
    impl_header!();

    fn protocol_data_unit(&self) -> Vec<u8> {
        let mut pdu = vec![self.function_code()];
        pdu.extend_from_slice(&self.start_address.to_be_bytes());
        pdu.extend_from_slice(&self.number_of_points.to_be_bytes());
        pdu
    }
}

impl DecodeMessage for ReadHoldingInputRegistersRequest {
    const MINIMUM_FRAME_SIZE: usize = 6;

    fn decode_unique(header: MessageHeader, frame: &[u8]) -> ModbusResult<Self> {
        Ok(Self {
            header,
            start_address: read_u16(frame, 2),
            number_of_points: read_u16(frame, 4),
        })
    }

    fn into_message(self) -> ModbusMessage {
        ModbusMessage::ReadHoldingInputRegistersRequest(self)
    }
}

/// Also answers read/write multiple registers (23).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadHoldingInputRegistersResponse {
    header: MessageHeader,
    pub data: RegisterCollection,
}

impl ReadHoldingInputRegistersResponse {
    pub fn new(function_code: u8, slave_address: u8, data: RegisterCollection) -> Self {
        Self {
            header: MessageHeader::new(slave_address, function_code),
            data,
        }
    }

    pub fn byte_count(&self) -> usize {
        self.data.byte_count()
    }
}

impl ModbusMessageFrame for ReadHoldingInputRegistersResponse {
    impl_header!();

    fn protocol_data_unit(&self) -> Vec<u8> {
        let mut pdu = vec![self.function_code(), self.byte_count() as u8];
        pdu.extend(self.data.network_bytes());
        pdu
    }
}

impl DecodeMessage for ReadHoldingInputRegistersResponse {
    const MINIMUM_FRAME_SIZE: usize = 3;

    fn decode_unique(header: MessageHeader, frame: &[u8]) -> ModbusResult<Self> {
        let payload = checked_payload(frame, 2)?;
        Ok(Self {
            header,
            data: RegisterCollection::from_bytes(payload)?,
        })
    }

    fn into_message(self) -> ModbusMessage {
        ModbusMessage::ReadHoldingInputRegistersResponse(self)
    }
}
