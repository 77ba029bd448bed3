use std::any::Any;

use crate::data::file_record::FILE_RECORD_REFERENCE_TYPE;
use crate::data::{FileRecord, ReadFileDataCollection, RegisterCollection};
use crate::message::{
    check_function_code, checked_payload, CustomMessage, DecodeMessage, MessageHeader,
    ModbusMessage, ModbusMessageFrame,
};
use crate::modbus::protocol::READ_FILE_RECORD;
use crate::utils::error::{ModbusError, ModbusResult};

/// Read file record (0x14), served through the custom function registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFileRecordRequest {
    header: MessageHeader,
    pub records: ReadFileDataCollection,
}

impl ReadFileRecordRequest {
    pub fn new(slave_address: u8, records: Vec<FileRecord>) -> Self {
        Self {
            header: MessageHeader::new(slave_address, READ_FILE_RECORD),
            records: ReadFileDataCollection::new(records),
        }
    }

    /// Remaining request bytes on RTU once seven bytes have been read.
    pub fn rtu_request_bytes_remaining(frame_start: &[u8]) -> usize {
        (frame_start[2] as usize).saturating_sub(2)
    }
}

impl ModbusMessageFrame for ReadFileRecordRequest {
    impl_header!();

    fn protocol_data_unit(&self) -> Vec<u8> {
        let mut pdu = vec![self.function_code(), self.records.byte_count() as u8];
        pdu.extend(self.records.network_bytes());
        pdu
    }
}

impl DecodeMessage for ReadFileRecordRequest {
    const MINIMUM_FRAME_SIZE: usize = 3;

    fn decode_unique(header: MessageHeader, frame: &[u8]) -> ModbusResult<Self> {
        let payload = checked_payload(frame, 2)?;
        Ok(Self {
            header,
            records: ReadFileDataCollection::from_bytes(payload),
        })
    }

    fn into_message(self) -> ModbusMessage {
        ModbusMessage::Custom(Box::new(self))
    }
}

impl CustomMessage for ReadFileRecordRequest {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn CustomMessage> {
        Box::new(self.clone())
    }

    fn validate_response(&self, response: &ModbusMessage) -> ModbusResult<()> {
        check_function_code(self.function_code(), response)?;

        if let Some(typed) = response.as_custom::<ReadFileRecordResponse>() {
            if typed.record_data.len() != self.records.len() {
                return Err(ModbusError::ResponseMismatch(format!(
                    "Requested {} file record(s), received {}",
                    self.records.len(),
                    typed.record_data.len()
                )));
            }
        }
        Ok(())
    }
}

/// One data group per requested record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFileRecordResponse {
    header: MessageHeader,
    pub record_data: Vec<Vec<u8>>,
}

impl ReadFileRecordResponse {
    pub fn new(slave_address: u8, record_data: Vec<Vec<u8>>) -> Self {
        Self {
            header: MessageHeader::new(slave_address, READ_FILE_RECORD),
            record_data,
        }
    }

    pub fn add_record_data(&mut self, data: &[u8]) {
        self.record_data.push(data.to_vec());
    }

    pub fn records_as_registers(&self) -> ModbusResult<Vec<RegisterCollection>> {
        self.record_data
            .iter()
            .map(|data| RegisterCollection::from_bytes(data))
            .collect()
    }

    fn data_length(&self) -> usize {
        self.record_data.iter().map(|data| data.len() + 2).sum()
    }
}

impl ModbusMessageFrame for ReadFileRecordResponse {
    impl_header!();

    fn protocol_data_unit(&self) -> Vec<u8> {
        let mut pdu = vec![self.function_code(), self.data_length() as u8];
        for data in &self.record_data {
            pdu.push((data.len() + 1) as u8);
            pdu.push(FILE_RECORD_REFERENCE_TYPE);
            pdu.extend_from_slice(data);
        }
        pdu
    }
}

impl DecodeMessage for ReadFileRecordResponse {
    const MINIMUM_FRAME_SIZE: usize = 3;

    fn decode_unique(header: MessageHeader, frame: &[u8]) -> ModbusResult<Self> {
        let payload = checked_payload(frame, 2)?;
        let mut record_data = Vec::new();
        let mut offset = 0;

        while offset < payload.len() {
            let group_length = payload[offset] as usize;
            let end = offset + 1 + group_length;
            if group_length == 0 || end > payload.len() {
                return Err(ModbusError::InvalidData(format!(
                    "File record group of {} byte(s) at offset {} does not fit the response",
                    group_length, offset
                )));
            }
            if payload[offset + 1] != FILE_RECORD_REFERENCE_TYPE {
                return Err(ModbusError::InvalidData(format!(
                    "Unexpected file record reference type {}",
                    payload[offset + 1]
                )));
            }
            record_data.push(payload[offset + 2..end].to_vec());
            offset = end;
        }

        Ok(Self { header, record_data })
    }

    fn into_message(self) -> ModbusMessage {
        ModbusMessage::Custom(Box::new(self))
    }

    fn rtu_bytes_remaining(frame_start: &[u8]) -> Option<usize> {
        Some(frame_start[2] as usize + 1)
    }
}

impl CustomMessage for ReadFileRecordResponse {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn CustomMessage> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_frame() {
        let request = ReadFileRecordRequest::new(1, vec![FileRecord::new(4, 1, 2), FileRecord::new(3, 9, 2)]);
        let frame = request.message_frame();
        assert_eq!(
            frame,
            vec![1, 0x14, 14, 6, 0, 4, 0, 1, 0, 2, 6, 0, 3, 0, 9, 0, 2]
        );
        assert_eq!(ReadFileRecordRequest::rtu_request_bytes_remaining(&frame[..7]), 12);

        let decoded = ReadFileRecordRequest::decode(&frame).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_response_frame() {
        let mut response = ReadFileRecordResponse::new(1, Vec::new());
        response.add_record_data(&[0x0D, 0xFE, 0x00, 0x20]);
        response.add_record_data(&[0x33, 0xCD, 0x00, 0x40]);
        let frame = response.message_frame();
        assert_eq!(
            frame,
            vec![1, 0x14, 12, 5, 6, 0x0D, 0xFE, 0x00, 0x20, 5, 6, 0x33, 0xCD, 0x00, 0x40]
        );
        // 4 bytes read, the rest plus the CRC follow
        assert_eq!(ReadFileRecordResponse::rtu_bytes_remaining(&frame[..4]), Some(13));

        let decoded = ReadFileRecordResponse::decode(&frame).unwrap();
        assert_eq!(decoded, response);
        let registers = decoded.records_as_registers().unwrap();
        assert_eq!(registers[0].as_slice(), &[0x0DFE, 0x0020]);
    }

    #[test]
    fn test_response_bad_reference_type() {
        let result = ReadFileRecordResponse::decode(&[1, 0x14, 4, 3, 7, 0, 1]);
        assert!(matches!(result, Err(ModbusError::InvalidData(_))));
    }

    #[test]
    fn test_validate_record_count() {
        let request = ReadFileRecordRequest::new(1, vec![FileRecord::new(4, 1, 2)]);
        let response = ReadFileRecordResponse::new(1, vec![vec![0, 1], vec![0, 2]]).into_message();
        assert!(CustomMessage::validate_response(&request, &response).is_err());
    }
}
