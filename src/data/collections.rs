use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::utils::error::{ModbusError, ModbusResult};

/// Kind of data held by a store collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModbusDataType {
    Coil,
    Input,
    HoldingRegister,
    InputRegister,
}

impl fmt::Display for ModbusDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusDataType::Coil => "coil",
            ModbusDataType::Input => "input",
            ModbusDataType::HoldingRegister => "holding register",
            ModbusDataType::InputRegister => "input register",
        };
        f.write_str(name)
    }
}

/// Booleans packed LSB first on the wire, eight per byte.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscreteCollection(Vec<bool>);

impl DiscreteCollection {
    pub fn new(values: Vec<bool>) -> Self {
        Self(values)
    }

    /// Unpacks every bit of `bytes`, padding bits included.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut values = Vec::with_capacity(bytes.len() * 8);
        for byte in bytes {
            for bit in 0..8 {
                values.push(byte & (1 << bit) != 0);
            }
        }
        Self(values)
    }

    pub fn network_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.byte_count()];
        for (index, value) in self.0.iter().enumerate() {
            if *value {
                bytes[index / 8] |= 1 << (index % 8);
            }
        }
        bytes
    }

    pub fn byte_count(&self) -> usize {
        (self.0.len() + 7) / 8
    }

    pub fn truncate_to(&mut self, count: usize) {
        self.0.truncate(count);
    }

    pub fn into_vec(self) -> Vec<bool> {
        self.0
    }
}

impl Deref for DiscreteCollection {
    type Target = Vec<bool>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DiscreteCollection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<bool>> for DiscreteCollection {
    fn from(values: Vec<bool>) -> Self {
        Self(values)
    }
}

impl From<&[bool]> for DiscreteCollection {
    fn from(values: &[bool]) -> Self {
        Self(values.to_vec())
    }
}

impl fmt::Display for DiscreteCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits: Vec<&str> = self.0.iter().map(|b| if *b { "1" } else { "0" }).collect();
        write!(f, "{{{}}}", bits.join(", "))
    }
}

/// 16-bit registers, big endian on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterCollection(Vec<u16>);

impl RegisterCollection {
    pub fn new(values: Vec<u16>) -> Self {
        Self(values)
    }

    pub fn from_bytes(bytes: &[u8]) -> ModbusResult<Self> {
        if bytes.len() % 2 != 0 {
            return Err(ModbusError::InvalidData(format!(
                "Register data must have an even number of bytes, got {}",
                bytes.len()
            )));
        }

        let values = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self(values))
    }

    pub fn network_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|value| value.to_be_bytes()).collect()
    }

    pub fn byte_count(&self) -> usize {
        self.0.len() * 2
    }

    pub fn into_vec(self) -> Vec<u16> {
        self.0
    }
}

impl Deref for RegisterCollection {
    type Target = Vec<u16>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for RegisterCollection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<u16>> for RegisterCollection {
    fn from(values: Vec<u16>) -> Self {
        Self(values)
    }
}

impl From<&[u16]> for RegisterCollection {
    fn from(values: &[u16]) -> Self {
        Self(values.to_vec())
    }
}

impl fmt::Display for RegisterCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "{{{}}}", values.join(", "))
    }
}

/// Store-side collection. Index 0 is a sentinel so logical address `A`
/// lives at index `A + 1` and the collection is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusDataCollection<T> {
    data_type: ModbusDataType,
    values: Vec<T>,
}

impl<T: Copy + Default> ModbusDataCollection<T> {
    pub fn new(data_type: ModbusDataType) -> Self {
        Self {
            data_type,
            values: vec![T::default()],
        }
    }

    /// `size` addressable elements, all set to the default value.
    pub fn with_size(data_type: ModbusDataType, size: usize) -> Self {
        Self {
            data_type,
            values: vec![T::default(); size + 1],
        }
    }

    pub fn from_values(data_type: ModbusDataType, values: impl IntoIterator<Item = T>) -> Self {
        let mut collection = Self::new(data_type);
        collection.values.extend(values);
        collection
    }

    pub fn data_type(&self) -> ModbusDataType {
        self.data_type
    }

    /// Element count including the sentinel.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, value: T) {
        self.values.push(value);
    }

    /// Value at a logical address.
    pub fn get(&self, address: u16) -> Option<T> {
        self.values.get(address as usize + 1).copied()
    }

    pub fn set(&mut self, address: u16, value: T) -> ModbusResult<()> {
        let index = address as usize + 1;
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ModbusError::ArgumentOutOfRange(format!(
                "{} address {} is outside a collection of {} elements",
                self.data_type,
                address,
                self.values.len()
            ))),
        }
    }

    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_discrete_network_bytes() {
        let coils = DiscreteCollection::new(vec![true, false, true, true, false, false, true, true, true, false]);
        assert_eq!(coils.byte_count(), 2);
        assert_eq!(coils.network_bytes(), vec![0xCD, 0x01]);
    }

    #[test]
    fn test_discrete_from_bytes_keeps_padding() {
        let coils = DiscreteCollection::from_bytes(&[0x01]);
        assert_eq!(coils.len(), 8);
        assert!(coils[0]);
        assert!(coils[1..].iter().all(|b| !b));
    }

    #[test]
    fn test_register_network_bytes() {
        let registers = RegisterCollection::new(vec![0x1234, 0x00FF]);
        assert_eq!(registers.byte_count(), 4);
        assert_eq!(registers.network_bytes(), vec![0x12, 0x34, 0x00, 0xFF]);
        assert!(RegisterCollection::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_data_collection_sentinel() {
        let mut collection = ModbusDataCollection::<u16>::new(ModbusDataType::HoldingRegister);
        assert_eq!(collection.len(), 1);
        assert!(collection.set(0, 5).is_err());

        collection.push(0);
        collection.set(0, 5).unwrap();
        assert_eq!(collection.get(0), Some(5));
        assert_eq!(collection.as_slice(), &[0, 5]);
    }

    proptest! {
        #[test]
        fn prop_discrete_bytes_keep_values(values in proptest::collection::vec(any::<bool>(), 0..64)) {
            let collection = DiscreteCollection::new(values.clone());
            let bytes = collection.network_bytes();
            prop_assert_eq!(bytes.len(), (values.len() + 7) / 8);

            let unpacked = DiscreteCollection::from_bytes(&bytes);
            prop_assert_eq!(&unpacked[..values.len()], &values[..]);
            prop_assert!(unpacked[values.len()..].iter().all(|b| !b));
        }

        #[test]
        fn prop_register_bytes_keep_values(values in proptest::collection::vec(any::<u16>(), 0..64)) {
            let collection = RegisterCollection::new(values.clone());
            let decoded = RegisterCollection::from_bytes(&collection.network_bytes()).unwrap();
            prop_assert_eq!(decoded.into_vec(), values);
        }
    }
}
