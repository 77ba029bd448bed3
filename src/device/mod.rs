pub mod master;
pub mod serial_slave;
pub mod slave;
pub mod tcp_slave;
pub mod udp_slave;

pub use master::ModbusMaster;
pub use serial_slave::ModbusSerialSlave;
pub use slave::{CustomFunction, ModbusSlave, SlaveShutdown};
pub use tcp_slave::{MasterInfo, ModbusTcpSlave};
pub use udp_slave::ModbusUdpSlave;
