pub mod settings;

pub use settings::{
    Config, DataStorePreset, MasterConfig, NetworkConfig, OutputConfig, ParityConfig, SerialConfig,
    SlaveConfig, TransportKind,
};
