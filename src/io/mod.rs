pub mod ascii;
pub mod ip;
pub mod rtu;
pub mod stream_resource;
pub mod transport;

pub use ascii::ModbusAsciiTransport;
pub use ip::ModbusIpTransport;
pub use rtu::ModbusRtuTransport;
pub use stream_resource::{SerialPortAdapter, StreamResource, TcpStreamAdapter, UdpClientAdapter};
pub use transport::{ModbusTransport, TransportSettings};
