pub mod collections;
pub mod data_store;
pub mod file_record;

pub use collections::{DiscreteCollection, ModbusDataCollection, ModbusDataType, RegisterCollection};
pub use data_store::{DataStore, DataStoreCollections, DataStoreEvent, DataStoreValues};
pub use file_record::{FileRecord, ReadFileDataCollection};
