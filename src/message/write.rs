use crate::data::{DiscreteCollection, RegisterCollection};
use crate::message::{
    check_function_code, checked_payload, read_u16, DecodeMessage, MessageHeader,
    ModbusMessage, ModbusMessageFrame,
};
use crate::modbus::protocol::{
    COIL_OFF, COIL_ON, WRITE_MULTIPLE_COILS, WRITE_MULTIPLE_REGISTERS, WRITE_SINGLE_COIL,
    WRITE_SINGLE_REGISTER,
};
use crate::utils::error::{ModbusError, ModbusResult};

fn mismatch(field: &str, expected: impl std::fmt::Display, received: impl std::fmt::Display) -> ModbusError {
    ModbusError::ResponseMismatch(format!(
        "Response {} does not match request. Expected {}, received {}.",
        field, expected, received
    ))
}

/// Request and echoed response of write single coil (5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSingleCoilRequestResponse {
    header: MessageHeader,
    pub start_address: u16,
    pub coil_state: bool,
}

impl WriteSingleCoilRequestResponse {
    pub fn new(slave_address: u8, start_address: u16, coil_state: bool) -> Self {
        Self {
            header: MessageHeader::new(slave_address, WRITE_SINGLE_COIL),
            start_address,
            coil_state,
        }
    }

    pub fn validate_response(&self, response: &ModbusMessage) -> ModbusResult<()> {
        check_function_code(self.function_code(), response)?;

        if let ModbusMessage::WriteSingleCoil(typed) = response {
            if typed.start_address != self.start_address {
                return Err(mismatch("address", self.start_address, typed.start_address));
            }
            if typed.coil_state != self.coil_state {
                return Err(mismatch("coil state", self.coil_state, typed.coil_state));
            }
        }
        Ok(())
    }
}

impl ModbusMessageFrame for WriteSingleCoilRequestResponse {
    impl_header!();

    fn protocol_data_unit(&self) -> Vec<u8> {
        let value = if self.coil_state { COIL_ON } else { COIL_OFF };
        let mut pdu = vec![self.function_code()];
        pdu.extend_from_slice(&self.start_address.to_be_bytes());
        pdu.extend_from_slice(&value.to_be_bytes());
        pdu
    }
}

impl DecodeMessage for WriteSingleCoilRequestResponse {
    const MINIMUM_FRAME_SIZE: usize = 6;

    fn decode_unique(header: MessageHeader, frame: &[u8]) -> ModbusResult<Self> {
        Ok(Self {
            header,
            start_address: read_u16(frame, 2),
            coil_state: read_u16(frame, 4) == COIL_ON,
        })
    }

    fn into_message(self) -> ModbusMessage {
        ModbusMessage::WriteSingleCoil(self)
    }
}

/// Request and echoed response of write single register (6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSingleRegisterRequestResponse {
    header: MessageHeader,
    pub start_address: u16,
    pub value: u16,
}

impl WriteSingleRegisterRequestResponse {
    pub fn new(slave_address: u8, start_address: u16, value: u16) -> Self {
        Self {
            header: MessageHeader::new(slave_address, WRITE_SINGLE_REGISTER),
            start_address,
            value,
        }
    }

    pub fn validate_response(&self, response: &ModbusMessage) -> ModbusResult<()> {
        check_function_code(self.function_code(), response)?;

        if let ModbusMessage::WriteSingleRegister(typed) = response {
            if typed.start_address != self.start_address {
                return Err(mismatch("address", self.start_address, typed.start_address));
            }
            if typed.value != self.value {
                return Err(mismatch("value", self.value, typed.value));
            }
        }
        Ok(())
    }
}

impl ModbusMessageFrame for WriteSingleRegisterRequestResponse {
    impl_header!();

    fn protocol_data_unit(&self) -> Vec<u8> {
        let mut pdu = vec![self.function_code()];
        pdu.extend_from_slice(&self.start_address.to_be_bytes());
        pdu.extend_from_slice(&self.value.to_be_bytes());
        pdu
    }
}

impl DecodeMessage for WriteSingleRegisterRequestResponse {
    const MINIMUM_FRAME_SIZE: usize = 6;

    fn decode_unique(header: MessageHeader, frame: &[u8]) -> ModbusResult<Self> {
        Ok(Self {
            header,
            start_address: read_u16(frame, 2),
            value: read_u16(frame, 4),
        })
    }

    fn into_message(self) -> ModbusMessage {
        ModbusMessage::WriteSingleRegister(self)
    }
}

/// Write multiple coils (15).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteMultipleCoilsRequest {
    header: MessageHeader,
    pub start_address: u16,
    pub number_of_points: u16,
    /// May carry padding bits past `number_of_points` after decoding.
    pub data: DiscreteCollection,
}

impl WriteMultipleCoilsRequest {
    pub fn new(slave_address: u8, start_address: u16, data: DiscreteCollection) -> Self {
        Self {
            header: MessageHeader::new(slave_address, WRITE_MULTIPLE_COILS),
            start_address,
            number_of_points: data.len() as u16,
            data,
        }
    }

    pub fn byte_count(&self) -> usize {
        self.data.byte_count()
    }

    /// The declared coils only, padding removed.
    pub fn declared_values(&self) -> &[bool] {
        let count = (self.number_of_points as usize).min(self.data.len());
        &self.data[..count]
    }

    pub fn validate_response(&self, response: &ModbusMessage) -> ModbusResult<()> {
        check_function_code(self.function_code(), response)?;

        if let ModbusMessage::WriteMultipleCoilsResponse(typed) = response {
            if typed.start_address != self.start_address {
                return Err(mismatch("start address", self.start_address, typed.start_address));
            }
            if typed.number_of_points != self.number_of_points {
                return Err(mismatch("number of points", self.number_of_points, typed.number_of_points));
            }
        }
        Ok(())
    }
}

impl ModbusMessageFrame for WriteMultipleCoilsRequest {
    impl_header!();

    fn protocol_data_unit(&self) -> Vec<u8> {
        let mut pdu = vec![self.function_code()];
        pdu.extend_from_slice(&self.start_address.to_be_bytes());
        pdu.extend_from_slice(&self.number_of_points.to_be_bytes());
        pdu.push(self.byte_count() as u8);
        pdu.extend(self.data.network_bytes());
        pdu
    }
}

impl DecodeMessage for WriteMultipleCoilsRequest {
    const MINIMUM_FRAME_SIZE: usize = 7;

    fn decode_unique(header: MessageHeader, frame: &[u8]) -> ModbusResult<Self> {
        let payload = checked_payload(frame, 6)?;
        Ok(Self {
            header,
            start_address: read_u16(frame, 2),
            number_of_points: read_u16(frame, 4),
            data: DiscreteCollection::from_bytes(payload),
        })
    }

    fn into_message(self) -> ModbusMessage {
        ModbusMessage::WriteMultipleCoilsRequest(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteMultipleCoilsResponse {
    header: MessageHeader,
    pub start_address: u16,
    pub number_of_points: u16,
}

impl WriteMultipleCoilsResponse {
    pub fn new(slave_address: u8, start_address: u16, number_of_points: u16) -> Self {
        Self {
            header: MessageHeader::new(slave_address, WRITE_MULTIPLE_COILS),
            start_address,
            number_of_points,
        }
    }
}

impl ModbusMessageFrame for WriteMultipleCoilsResponse {
    impl_header!();

    fn protocol_data_unit(&self) -> Vec<u8> {
        let mut pdu = vec![self.function_code()];
        pdu.extend_from_slice(&self.start_address.to_be_bytes());
        pdu.extend_from_slice(&self.number_of_points.to_be_bytes());
        pdu
    }
}

impl DecodeMessage for WriteMultipleCoilsResponse {
    const MINIMUM_FRAME_SIZE: usize = 6;

    fn decode_unique(header: MessageHeader, frame: &[u8]) -> ModbusResult<Self> {
        Ok(Self {
            header,
            start_address: read_u16(frame, 2),
            number_of_points: read_u16(frame, 4),
        })
    }

    fn into_message(self) -> ModbusMessage {
        ModbusMessage::WriteMultipleCoilsResponse(self)
    }
}

/// Write multiple registers (16).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteMultipleRegistersRequest {
    header: MessageHeader,
    pub start_address: u16,
    pub number_of_points: u16,
    pub data: RegisterCollection,
}

impl WriteMultipleRegistersRequest {
    pub fn new(slave_address: u8, start_address: u16, data: RegisterCollection) -> Self {
        Self {
            header: MessageHeader::new(slave_address, WRITE_MULTIPLE_REGISTERS),
            start_address,
            number_of_points: data.len() as u16,
            data,
        }
    }

    pub fn byte_count(&self) -> usize {
        self.data.byte_count()
    }

    pub fn validate_response(&self, response: &ModbusMessage) -> ModbusResult<()> {
        check_function_code(self.function_code(), response)?;

        if let ModbusMessage::WriteMultipleRegistersResponse(typed) = response {
            if typed.start_address != self.start_address {
                return Err(mismatch("start address", self.start_address, typed.start_address));
            }
            if typed.number_of_points != self.number_of_points {
                return Err(mismatch("number of points", self.number_of_points, typed.number_of_points));
            }
        }
        Ok(())
    }
}

impl ModbusMessageFrame for WriteMultipleRegistersRequest {
    impl_header!();

    fn protocol_data_unit(&self) -> Vec<u8> {
        let mut pdu = vec![self.function_code()];
        pdu.extend_from_slice(&self.start_address.to_be_bytes());
        pdu.extend_from_slice(&self.number_of_points.to_be_bytes());
        pdu.push(self.byte_count() as u8);
        pdu.extend(self.data.network_bytes());
        pdu
    }
}

impl DecodeMessage for WriteMultipleRegistersRequest {
    const MINIMUM_FRAME_SIZE: usize = 7;

    fn decode_unique(header: MessageHeader, frame: &[u8]) -> ModbusResult<Self> {
        let payload = checked_payload(frame, 6)?;
        Ok(Self {
            header,
            start_address: read_u16(frame, 2),
            number_of_points: read_u16(frame, 4),
            data: RegisterCollection::from_bytes(payload)?,
        })
    }

    fn into_message(self) -> ModbusMessage {
        ModbusMessage::WriteMultipleRegistersRequest(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteMultipleRegistersResponse {
    header: MessageHeader,
    pub start_address: u16,
    pub number_of_points: u16,
}

impl WriteMultipleRegistersResponse {
    pub fn new(slave_address: u8, start_address: u16, number_of_points: u16) -> Self {
        Self {
            header: MessageHeader::new(slave_address, WRITE_MULTIPLE_REGISTERS),
            start_address,
            number_of_points,
        }
    }
}

impl ModbusMessageFrame for WriteMultipleRegistersResponse {
    impl_header!();

    fn protocol_data_unit(&self) -> Vec<u8> {
        let mut pdu = vec![self.function_code()];
        pdu.extend_from_slice(&self.start_address.to_be_bytes());
        pdu.extend_from_slice(&self.number_of_points.to_be_bytes());
        pdu
    }
}

impl DecodeMessage for WriteMultipleRegistersResponse {
    const MINIMUM_FRAME_SIZE: usize = 6;

    fn decode_unique(header: MessageHeader, frame: &[u8]) -> ModbusResult<Self> {
        Ok(Self {
            header,
            start_address: read_u16(frame, 2),
            number_of_points: read_u16(frame, 4),
        })
    }

    fn into_message(self) -> ModbusMessage {
        ModbusMessage::WriteMultipleRegistersResponse(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_single_coil_frame() {
        let request = WriteSingleCoilRequestResponse::new(17, 172, true);
        assert_eq!(request.message_frame(), vec![17, 5, 0, 172, 0xFF, 0x00]);

        let off = WriteSingleCoilRequestResponse::decode(&[17, 5, 0, 172, 0, 0]).unwrap();
        assert!(!off.coil_state);
    }

    #[test]
    fn test_write_single_register_echo() {
        let request = WriteSingleRegisterRequestResponse::new(1, 10, 300);
        let echo = WriteSingleRegisterRequestResponse::new(1, 10, 300).into_message();
        let wrong = WriteSingleRegisterRequestResponse::new(1, 10, 301).into_message();

        assert!(request.validate_response(&echo).is_ok());
        assert!(matches!(
            request.validate_response(&wrong),
            Err(ModbusError::ResponseMismatch(_))
        ));
    }

    #[test]
    fn test_write_multiple_coils_frame() {
        let request = WriteMultipleCoilsRequest::new(
            17,
            19,
            DiscreteCollection::new(vec![true, false, true, true, false, false, true, true, true, false]),
        );
        assert_eq!(
            request.message_frame(),
            vec![17, 15, 0, 19, 0, 10, 2, 0xCD, 0x01]
        );

        let decoded = WriteMultipleCoilsRequest::decode(&request.message_frame()).unwrap();
        assert_eq!(decoded.number_of_points, 10);
        assert_eq!(decoded.data.len(), 16);
        assert_eq!(decoded.declared_values().len(), 10);
        assert_eq!(decoded.message_frame(), request.message_frame());
    }

    #[test]
    fn test_write_multiple_registers_frame() {
        let request = WriteMultipleRegistersRequest::new(11, 1, RegisterCollection::new(vec![10, 258]));
        assert_eq!(request.message_frame(), vec![11, 16, 0, 1, 0, 2, 4, 0, 10, 1, 2]);

        assert!(matches!(
            WriteMultipleRegistersRequest::decode(&[11, 16, 0, 1, 0, 2, 4, 0, 10, 1]),
            Err(ModbusError::InvalidData(_))
        ));
        assert!(matches!(
            WriteMultipleRegistersRequest::decode(&[11, 16, 0, 1, 0, 2]),
            Err(ModbusError::FrameTooShort { .. })
        ));
    }

    #[test]
    fn test_write_multiple_response_echo() {
        let request = WriteMultipleRegistersRequest::new(1, 5, RegisterCollection::new(vec![1, 2, 3]));
        let echo = WriteMultipleRegistersResponse::new(1, 5, 3).into_message();
        let short = WriteMultipleRegistersResponse::new(1, 5, 2).into_message();

        assert!(request.validate_response(&echo).is_ok());
        assert!(request.validate_response(&short).is_err());
    }
}
