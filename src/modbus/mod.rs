pub mod protocol;
pub mod crc;

pub use crc::{crc16_bytes, crc16_modbus, lrc};
pub use protocol::SlaveExceptionCode;
