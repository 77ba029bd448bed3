use serde::{Deserialize, Serialize};
use std::ops::Deref;

pub const FILE_RECORD_REFERENCE_TYPE: u8 = 0x06;
pub const FILE_RECORD_SIZE: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_number: u16,
    pub record_number: u16,
    pub record_length: u16,
}

impl FileRecord {
    pub fn new(file_number: u16, record_number: u16, record_length: u16) -> Self {
        Self {
            file_number,
            record_number,
            record_length,
        }
    }

    pub fn network_bytes(&self) -> [u8; FILE_RECORD_SIZE] {
        let file = self.file_number.to_be_bytes();
        let record = self.record_number.to_be_bytes();
        let length = self.record_length.to_be_bytes();
        [
            FILE_RECORD_REFERENCE_TYPE,
            file[0],
            file[1],
            record[0],
            record[1],
            length[0],
            length[1],
        ]
    }
}

/// Sub-requests of a read file record request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadFileDataCollection(Vec<FileRecord>);

impl ReadFileDataCollection {
    pub fn new(records: Vec<FileRecord>) -> Self {
        Self(records)
    }

    /// Groups with a reference type other than 0x06 are skipped.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let records = bytes
            .chunks_exact(FILE_RECORD_SIZE)
            .filter(|group| group[0] == FILE_RECORD_REFERENCE_TYPE)
            .map(|group| FileRecord {
                file_number: u16::from_be_bytes([group[1], group[2]]),
                record_number: u16::from_be_bytes([group[3], group[4]]),
                record_length: u16::from_be_bytes([group[5], group[6]]),
            })
            .collect();
        Self(records)
    }

    pub fn network_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|record| record.network_bytes()).collect()
    }

    pub fn byte_count(&self) -> usize {
        self.0.len() * FILE_RECORD_SIZE
    }
}

impl Deref for ReadFileDataCollection {
    type Target = Vec<FileRecord>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_record_bytes() {
        let records = ReadFileDataCollection::new(vec![FileRecord::new(4, 1, 2)]);
        assert_eq!(records.network_bytes(), vec![0x06, 0, 4, 0, 1, 0, 2]);
        assert_eq!(records.byte_count(), 7);
    }

    #[test]
    fn test_skips_unknown_reference_type() {
        let bytes = [0x06, 0, 4, 0, 1, 0, 2, 0x07, 0, 3, 0, 9, 0, 2, 0x06, 0, 3, 0, 9, 0, 2];
        let records = ReadFileDataCollection::from_bytes(&bytes);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], FileRecord::new(3, 9, 2));
    }
}
