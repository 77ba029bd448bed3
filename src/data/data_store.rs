use log::debug;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::data::collections::{
    DiscreteCollection, ModbusDataCollection, ModbusDataType, RegisterCollection,
};
use crate::utils::error::{ModbusError, ModbusResult};

/// Addressable entries per collection in the default store.
pub const DEFAULT_COLLECTION_SIZE: usize = u16::MAX as usize;

const TEST_PATTERN_SIZE: u16 = 3000;

/// The four collections guarded together by the store mutex.
#[derive(Debug, Clone)]
pub struct DataStoreCollections {
    pub coil_discretes: ModbusDataCollection<bool>,
    pub input_discretes: ModbusDataCollection<bool>,
    pub holding_registers: ModbusDataCollection<u16>,
    pub input_registers: ModbusDataCollection<u16>,
}

impl DataStoreCollections {
    fn discretes(&self, data_type: ModbusDataType) -> ModbusResult<&ModbusDataCollection<bool>> {
        match data_type {
            ModbusDataType::Coil => Ok(&self.coil_discretes),
            ModbusDataType::Input => Ok(&self.input_discretes),
            other => Err(ModbusError::InvalidData(format!("{} is not a discrete type", other))),
        }
    }

    fn discretes_mut(&mut self, data_type: ModbusDataType) -> ModbusResult<&mut ModbusDataCollection<bool>> {
        match data_type {
            ModbusDataType::Coil => Ok(&mut self.coil_discretes),
            ModbusDataType::Input => Ok(&mut self.input_discretes),
            other => Err(ModbusError::InvalidData(format!("{} is not a discrete type", other))),
        }
    }

    fn registers(&self, data_type: ModbusDataType) -> ModbusResult<&ModbusDataCollection<u16>> {
        match data_type {
            ModbusDataType::HoldingRegister => Ok(&self.holding_registers),
            ModbusDataType::InputRegister => Ok(&self.input_registers),
            other => Err(ModbusError::InvalidData(format!("{} is not a register type", other))),
        }
    }

    fn registers_mut(&mut self, data_type: ModbusDataType) -> ModbusResult<&mut ModbusDataCollection<u16>> {
        match data_type {
            ModbusDataType::HoldingRegister => Ok(&mut self.holding_registers),
            ModbusDataType::InputRegister => Ok(&mut self.input_registers),
            other => Err(ModbusError::InvalidData(format!("{} is not a register type", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataStoreValues {
    Discretes(DiscreteCollection),
    Registers(RegisterCollection),
}

/// Raised after a read from or write to the store, once the lock is released.
#[derive(Debug, Clone, PartialEq)]
pub struct DataStoreEvent {
    pub start_address: u16,
    pub data_type: ModbusDataType,
    pub data: DataStoreValues,
}

pub type DataStoreListener = Arc<dyn Fn(&DataStoreEvent) + Send + Sync>;

/// In-memory data map of a slave.
pub struct DataStore {
    collections: Mutex<DataStoreCollections>,
    written_to: RwLock<Vec<DataStoreListener>>,
    read_from: RwLock<Vec<DataStoreListener>>,
}

impl DataStore {
    pub fn with_sizes(coils: usize, inputs: usize, holding: usize, input_registers: usize) -> Self {
        Self::from_collections(DataStoreCollections {
            coil_discretes: ModbusDataCollection::with_size(ModbusDataType::Coil, coils),
            input_discretes: ModbusDataCollection::with_size(ModbusDataType::Input, inputs),
            holding_registers: ModbusDataCollection::with_size(ModbusDataType::HoldingRegister, holding),
            input_registers: ModbusDataCollection::with_size(ModbusDataType::InputRegister, input_registers),
        })
    }

    pub fn from_collections(collections: DataStoreCollections) -> Self {
        Self {
            collections: Mutex::new(collections),
            written_to: RwLock::new(Vec::new()),
            read_from: RwLock::new(Vec::new()),
        }
    }

    /// Zero-initialized store covering the whole 16-bit address space.
    pub fn create_default() -> Self {
        Self::with_sizes(
            DEFAULT_COLLECTION_SIZE,
            DEFAULT_COLLECTION_SIZE,
            DEFAULT_COLLECTION_SIZE,
            DEFAULT_COLLECTION_SIZE,
        )
    }

    /// Store holding only the sentinel element in each collection.
    pub fn create_empty() -> Self {
        Self::with_sizes(0, 0, 0, 0)
    }

    /// Addresses 0..3000: coils at odd positions, inputs at even positions,
    /// holding registers `n` and input registers `n * 10` for position `n`.
    pub fn create_test_pattern() -> Self {
        let positions = 1..=TEST_PATTERN_SIZE;
        Self::from_collections(DataStoreCollections {
            coil_discretes: ModbusDataCollection::from_values(
                ModbusDataType::Coil,
                positions.clone().map(|i| i % 2 > 0),
            ),
            input_discretes: ModbusDataCollection::from_values(
                ModbusDataType::Input,
                positions.clone().map(|i| i % 2 == 0),
            ),
            holding_registers: ModbusDataCollection::from_values(
                ModbusDataType::HoldingRegister,
                positions.clone(),
            ),
            input_registers: ModbusDataCollection::from_values(
                ModbusDataType::InputRegister,
                positions.map(|i| i.wrapping_mul(10)),
            ),
        })
    }

    /// Scoped guard over all four collections. Never hold it across I/O.
    pub fn lock(&self) -> ModbusResult<MutexGuard<'_, DataStoreCollections>> {
        Ok(self.collections.lock()?)
    }

    pub fn on_written_to<F>(&self, listener: F) -> ModbusResult<()>
    where
        F: Fn(&DataStoreEvent) + Send + Sync + 'static,
    {
        self.written_to.write()?.push(Arc::new(listener));
        Ok(())
    }

    pub fn on_read_from<F>(&self, listener: F) -> ModbusResult<()>
    where
        F: Fn(&DataStoreEvent) + Send + Sync + 'static,
    {
        self.read_from.write()?.push(Arc::new(listener));
        Ok(())
    }

    pub fn read_discretes(
        &self,
        data_type: ModbusDataType,
        start_address: u16,
        count: u16,
    ) -> ModbusResult<DiscreteCollection> {
        let values = {
            let guard = self.lock()?;
            let source = guard.discretes(data_type)?;
            read_slice(source, start_address, count)?
        };

        let values = DiscreteCollection::new(values);
        self.raise(&self.read_from, start_address, data_type, DataStoreValues::Discretes(values.clone()))?;
        Ok(values)
    }

    pub fn write_discretes(
        &self,
        data_type: ModbusDataType,
        start_address: u16,
        values: &[bool],
    ) -> ModbusResult<()> {
        {
            let mut guard = self.lock()?;
            let destination = guard.discretes_mut(data_type)?;
            write_slice(destination, start_address, values)?;
        }

        self.raise(
            &self.written_to,
            start_address,
            data_type,
            DataStoreValues::Discretes(DiscreteCollection::from(values)),
        )
    }

    pub fn read_registers(
        &self,
        data_type: ModbusDataType,
        start_address: u16,
        count: u16,
    ) -> ModbusResult<RegisterCollection> {
        let values = {
            let guard = self.lock()?;
            let source = guard.registers(data_type)?;
            read_slice(source, start_address, count)?
        };

        let values = RegisterCollection::new(values);
        self.raise(&self.read_from, start_address, data_type, DataStoreValues::Registers(values.clone()))?;
        Ok(values)
    }

    pub fn write_registers(
        &self,
        data_type: ModbusDataType,
        start_address: u16,
        values: &[u16],
    ) -> ModbusResult<()> {
        {
            let mut guard = self.lock()?;
            let destination = guard.registers_mut(data_type)?;
            write_slice(destination, start_address, values)?;
        }

        self.raise(
            &self.written_to,
            start_address,
            data_type,
            DataStoreValues::Registers(RegisterCollection::from(values)),
        )
    }

    fn raise(
        &self,
        listeners: &RwLock<Vec<DataStoreListener>>,
        start_address: u16,
        data_type: ModbusDataType,
        data: DataStoreValues,
    ) -> ModbusResult<()> {
        let listeners: Vec<DataStoreListener> = listeners.read()?.clone();
        if listeners.is_empty() {
            return Ok(());
        }

        let event = DataStoreEvent {
            start_address,
            data_type,
            data,
        };
        for listener in listeners {
            listener(&event);
        }
        Ok(())
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::create_default()
    }
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore").finish_non_exhaustive()
    }
}

fn check_bounds(len: usize, start_address: u16, count: usize) -> ModbusResult<usize> {
    let start_index = start_address as usize + 1;

    if start_index >= len {
        return Err(ModbusError::ArgumentOutOfRange(format!(
            "Start address {} was out of range. Must be less than the size of the collection ({}).",
            start_address,
            len - 1
        )));
    }

    if len < start_index + count {
        return Err(ModbusError::ArgumentOutOfRange(format!(
            "{} items starting at address {} are outside the collection",
            count, start_address
        )));
    }

    Ok(start_index)
}

fn read_slice<T: Copy + Default>(
    source: &ModbusDataCollection<T>,
    start_address: u16,
    count: u16,
) -> ModbusResult<Vec<T>> {
    let start_index = check_bounds(source.len(), start_address, count as usize)?;
    Ok(source.as_slice()[start_index..start_index + count as usize].to_vec())
}

fn write_slice<T: Copy + Default>(
    destination: &mut ModbusDataCollection<T>,
    start_address: u16,
    values: &[T],
) -> ModbusResult<()> {
    let start_index = check_bounds(destination.len(), start_address, values.len())?;
    destination.as_mut_slice()[start_index..start_index + values.len()].copy_from_slice(values);
    debug!(
        "Wrote {} {} value(s) at address {}",
        values.len(),
        destination.data_type(),
        start_address
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_write_then_read_registers() {
        let store = DataStore::create_default();
        store
            .write_registers(ModbusDataType::HoldingRegister, 100, &[1, 2, 3])
            .unwrap();

        let values = store
            .read_registers(ModbusDataType::HoldingRegister, 100, 3)
            .unwrap();
        assert_eq!(values.into_vec(), vec![1, 2, 3]);

        let guard = store.lock().unwrap();
        assert_eq!(guard.holding_registers.as_slice()[101], 1);
        assert_eq!(guard.holding_registers.get(102), Some(3));
    }

    #[test]
    fn test_out_of_range_write_leaves_store_untouched() {
        let store = DataStore::with_sizes(0, 0, 10, 0);
        let result = store.write_registers(ModbusDataType::HoldingRegister, 8, &[7, 7, 7]);
        assert!(matches!(result, Err(ModbusError::ArgumentOutOfRange(_))));

        let guard = store.lock().unwrap();
        assert!(guard.holding_registers.as_slice().iter().all(|v| *v == 0));
    }

    #[test]
    fn test_start_address_bounds() {
        let store = DataStore::with_sizes(10, 0, 0, 0);
        // address 9 is the last element
        assert!(store.read_discretes(ModbusDataType::Coil, 9, 1).is_ok());
        assert!(store.read_discretes(ModbusDataType::Coil, 10, 0).is_err());
        assert!(store.read_discretes(ModbusDataType::Coil, 9, 2).is_err());
        assert!(store.read_registers(ModbusDataType::Coil, 0, 1).is_err());
    }

    #[test]
    fn test_test_pattern() {
        let store = DataStore::create_test_pattern();
        let coils = store.read_discretes(ModbusDataType::Coil, 0, 4).unwrap();
        assert_eq!(coils.into_vec(), vec![true, false, true, false]);

        let inputs = store.read_discretes(ModbusDataType::Input, 0, 2).unwrap();
        assert_eq!(inputs.into_vec(), vec![false, true]);

        let holding = store.read_registers(ModbusDataType::HoldingRegister, 0, 3).unwrap();
        assert_eq!(holding.into_vec(), vec![1, 2, 3]);

        let input_regs = store.read_registers(ModbusDataType::InputRegister, 2999, 1).unwrap();
        assert_eq!(input_regs.into_vec(), vec![30000]);
    }

    #[test]
    fn test_events_fire_outside_lock() {
        let store = Arc::new(DataStore::create_default());
        let writes = Arc::new(AtomicUsize::new(0));

        let observer = store.clone();
        let counter = writes.clone();
        store
            .on_written_to(move |event| {
                // locking here would deadlock if the event fired under the lock
                let guard = observer.lock().unwrap();
                assert_eq!(guard.coil_discretes.get(event.start_address), Some(true));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        store.write_discretes(ModbusDataType::Coil, 5, &[true]).unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_read_event_carries_values() {
        let store = DataStore::create_test_pattern();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store
            .on_read_from(move |event| sink.lock().unwrap().push(event.clone()))
            .unwrap();

        store.read_registers(ModbusDataType::InputRegister, 0, 2).unwrap();

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data_type, ModbusDataType::InputRegister);
        assert_eq!(
            events[0].data,
            DataStoreValues::Registers(RegisterCollection::new(vec![10, 20]))
        );
    }
}
