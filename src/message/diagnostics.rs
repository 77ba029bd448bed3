use crate::data::RegisterCollection;
use crate::message::{
    check_function_code, read_u16, DecodeMessage, MessageHeader, ModbusMessage,
    ModbusMessageFrame,
};
use crate::modbus::protocol::{DIAGNOSTICS, DIAGNOSTICS_RETURN_QUERY_DATA};
use crate::utils::error::{ModbusError, ModbusResult};

/// Diagnostics (8). Only the return query data sub-function is served,
/// which echoes one register of data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsRequestResponse {
    header: MessageHeader,
    pub sub_function_code: u16,
    pub data: RegisterCollection,
}

impl DiagnosticsRequestResponse {
    pub fn new(sub_function_code: u16, slave_address: u8, data: RegisterCollection) -> Self {
        Self {
            header: MessageHeader::new(slave_address, DIAGNOSTICS),
            sub_function_code,
            data,
        }
    }

    pub fn return_query_data(slave_address: u8, data: u16) -> Self {
        Self::new(
            DIAGNOSTICS_RETURN_QUERY_DATA,
            slave_address,
            RegisterCollection::new(vec![data]),
        )
    }

    pub fn validate_response(&self, response: &ModbusMessage) -> ModbusResult<()> {
        check_function_code(self.function_code(), response)?;

        if let ModbusMessage::Diagnostics(typed) = response {
            if typed.sub_function_code != self.sub_function_code {
                return Err(ModbusError::ResponseMismatch(format!(
                    "Unexpected sub-function code. Expected {}, received {}.",
                    self.sub_function_code, typed.sub_function_code
                )));
            }
            if typed.data != self.data {
                return Err(ModbusError::ResponseMismatch(format!(
                    "Diagnostics data not echoed. Expected {}, received {}.",
                    self.data, typed.data
                )));
            }
        }
        Ok(())
    }
}

impl ModbusMessageFrame for DiagnosticsRequestResponse {
    impl_header!();

    fn protocol_data_unit(&self) -> Vec<u8> {
        let mut pdu = vec![self.function_code()];
        pdu.extend_from_slice(&self.sub_function_code.to_be_bytes());
        pdu.extend(self.data.network_bytes());
        pdu
    }
}

impl DecodeMessage for DiagnosticsRequestResponse {
    const MINIMUM_FRAME_SIZE: usize = 6;

    fn decode_unique(header: MessageHeader, frame: &[u8]) -> ModbusResult<Self> {
        Ok(Self {
            header,
            sub_function_code: read_u16(frame, 2),
            data: RegisterCollection::from_bytes(&frame[4..6])?,
        })
    }

    fn into_message(self) -> ModbusMessage {
        ModbusMessage::Diagnostics(self)
    }
}
