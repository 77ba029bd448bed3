use log::{debug, info};
use serialport::{ClearBuffer, SerialPort};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use crate::config::settings::{ParityConfig, SerialConfig};
use crate::utils::error::{ModbusError, ModbusResult};

/// Byte stream a transport reads frames from and writes frames to.
pub trait StreamResource: Send {
    /// Reads up to `buffer.len()` bytes, returning how many arrived.
    /// Zero means the peer closed the stream.
    fn read(&mut self, buffer: &mut [u8]) -> ModbusResult<usize>;

    fn write(&mut self, buffer: &[u8]) -> ModbusResult<()>;

    fn read_timeout(&self) -> Option<Duration>;
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> ModbusResult<()>;

    fn write_timeout(&self) -> Option<Duration>;
    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> ModbusResult<()>;

    /// Drops bytes received but not yet read.
    fn discard_in_buffer(&mut self) -> ModbusResult<()>;
}

/// Serial ports have no infinite timeout, this stands in for one.
const SERIAL_INFINITE_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24);

pub struct SerialPortAdapter {
    port: Box<dyn SerialPort>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl SerialPortAdapter {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        let timeout = port.timeout();
        Self {
            port,
            read_timeout: Some(timeout),
            write_timeout: Some(timeout),
        }
    }

    pub fn open(config: &SerialConfig, timeout: Duration) -> ModbusResult<Self> {
        info!("🔌 Opening serial port: {}", config.port);
        info!(
            "⚙️  Configuration: {} baud, {:?} parity, {} data bits, {} stop bit(s)",
            config.baud_rate, config.parity, config.data_bits, config.stop_bits
        );

        let data_bits = match config.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => return Err(ModbusError::ConfigError(format!("Unsupported data bits: {}", other))),
        };
        let stop_bits = match config.stop_bits {
            1 => serialport::StopBits::One,
            2 => serialport::StopBits::Two,
            other => return Err(ModbusError::ConfigError(format!("Unsupported stop bits: {}", other))),
        };
        let parity = match config.parity {
            ParityConfig::None => serialport::Parity::None,
            ParityConfig::Even => serialport::Parity::Even,
            ParityConfig::Odd => serialport::Parity::Odd,
        };

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .timeout(timeout)
            .open()?;

        info!("✅ Serial port {} opened", config.port);
        Ok(Self::new(port))
    }
}

impl StreamResource for SerialPortAdapter {
    fn read(&mut self, buffer: &mut [u8]) -> ModbusResult<usize> {
        Ok(self.port.read(buffer)?)
    }

    fn write(&mut self, buffer: &[u8]) -> ModbusResult<()> {
        self.port.write_all(buffer)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> ModbusResult<()> {
        // a single timeout covers both directions on a serial port
        self.port.set_timeout(timeout.unwrap_or(SERIAL_INFINITE_TIMEOUT))?;
        self.read_timeout = timeout;
        Ok(())
    }

    fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> ModbusResult<()> {
        self.write_timeout = timeout;
        Ok(())
    }

    fn discard_in_buffer(&mut self) -> ModbusResult<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

pub struct TcpStreamAdapter {
    stream: TcpStream,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl TcpStreamAdapter {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_timeout: None,
            write_timeout: None,
        }
    }

    pub fn connect(address: SocketAddr, timeout: Duration) -> ModbusResult<Self> {
        info!("🔌 Connecting to Modbus TCP slave at {}", address);
        let stream = TcpStream::connect_timeout(&address, timeout)?;
        stream.set_nodelay(true)?;
        info!("✅ Connected to {}", address);
        Ok(Self::new(stream))
    }
}

impl StreamResource for TcpStreamAdapter {
    fn read(&mut self, buffer: &mut [u8]) -> ModbusResult<usize> {
        Ok(self.stream.read(buffer)?)
    }

    fn write(&mut self, buffer: &[u8]) -> ModbusResult<()> {
        self.stream.write_all(buffer)?;
        Ok(())
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> ModbusResult<()> {
        self.stream.set_read_timeout(timeout)?;
        self.read_timeout = timeout;
        Ok(())
    }

    fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> ModbusResult<()> {
        self.stream.set_write_timeout(timeout)?;
        self.write_timeout = timeout;
        Ok(())
    }

    fn discard_in_buffer(&mut self) -> ModbusResult<()> {
        Ok(())
    }
}

/// Largest datagram accepted, an MBAP header plus a full PDU fits comfortably.
const MAX_DATAGRAM_SIZE: usize = 1024;

/// Presents datagrams from a connected socket as a byte stream. A datagram
/// is buffered whole and handed out across reads.
pub struct UdpClientAdapter {
    socket: UdpSocket,
    buffer: Vec<u8>,
    position: usize,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl UdpClientAdapter {
    pub fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            buffer: Vec::new(),
            position: 0,
            read_timeout: None,
            write_timeout: None,
        }
    }

    pub fn connect(address: SocketAddr) -> ModbusResult<Self> {
        let local: SocketAddr = if address.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(address)?;
        info!("🔌 UDP master bound to {} for slave {}", socket.local_addr()?, address);
        Ok(Self::new(socket))
    }
}

impl StreamResource for UdpClientAdapter {
    fn read(&mut self, buffer: &mut [u8]) -> ModbusResult<usize> {
        if self.position >= self.buffer.len() {
            let mut datagram = vec![0u8; MAX_DATAGRAM_SIZE];
            let received = self.socket.recv(&mut datagram)?;
            datagram.truncate(received);
            debug!("UDP datagram of {} bytes received", received);
            self.buffer = datagram;
            self.position = 0;
        }

        let available = &self.buffer[self.position..];
        let count = available.len().min(buffer.len());
        buffer[..count].copy_from_slice(&available[..count]);
        self.position += count;
        Ok(count)
    }

    fn write(&mut self, buffer: &[u8]) -> ModbusResult<()> {
        self.socket.send(buffer)?;
        Ok(())
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> ModbusResult<()> {
        self.socket.set_read_timeout(timeout)?;
        self.read_timeout = timeout;
        Ok(())
    }

    fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> ModbusResult<()> {
        self.socket.set_write_timeout(timeout)?;
        self.write_timeout = timeout;
        Ok(())
    }

    fn discard_in_buffer(&mut self) -> ModbusResult<()> {
        self.buffer.clear();
        self.position = 0;
        Ok(())
    }
}

/// Lists serial ports known to the system.
pub fn available_ports() -> ModbusResult<Vec<serialport::SerialPortInfo>> {
    Ok(serialport::available_ports()?)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// In-memory stream fed with scripted input. Reads past the end of the
    /// script report a closed stream.
    pub struct ScriptedStream {
        input: VecDeque<u8>,
        written: Arc<Mutex<Vec<u8>>>,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
        pub discards: usize,
        consumed: usize,
        stall_at: Option<usize>,
        /// Bytes a discard drops when it directly follows the stall.
        stale: usize,
        stalled: bool,
    }

    impl ScriptedStream {
        pub fn new(input: &[u8]) -> (Self, Arc<Mutex<Vec<u8>>>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            let stream = Self {
                input: input.iter().copied().collect(),
                written: written.clone(),
                read_timeout: None,
                write_timeout: None,
                discards: 0,
                consumed: 0,
                stall_at: None,
                stale: 0,
                stalled: false,
            };
            (stream, written)
        }

        /// Once `stall_at` bytes are read, one read times out. The `stale`
        /// bytes after that point count as already buffered, so a discard
        /// issued right after the timeout drops them.
        pub fn with_stall(input: &[u8], stall_at: usize, stale: usize) -> (Self, Arc<Mutex<Vec<u8>>>) {
            let (mut stream, written) = Self::new(input);
            stream.stall_at = Some(stall_at);
            stream.stale = stale;
            (stream, written)
        }
    }

    impl StreamResource for ScriptedStream {
        fn read(&mut self, buffer: &mut [u8]) -> ModbusResult<usize> {
            if self.stall_at == Some(self.consumed) {
                self.stall_at = None;
                self.stalled = true;
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "line stalled").into());
            }
            self.stalled = false;

            if self.input.is_empty() {
                return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "script exhausted").into());
            }
            // hand out at most 3 bytes at a time to exercise partial reads
            let mut count = buffer.len().min(self.input.len()).min(3);
            if let Some(stall_at) = self.stall_at {
                count = count.min(stall_at - self.consumed);
            }
            for slot in buffer.iter_mut().take(count) {
                *slot = self.input.pop_front().unwrap_or_default();
            }
            self.consumed += count;
            Ok(count)
        }

        fn write(&mut self, buffer: &[u8]) -> ModbusResult<()> {
            self.written.lock().unwrap().extend_from_slice(buffer);
            Ok(())
        }

        fn read_timeout(&self) -> Option<Duration> {
            self.read_timeout
        }

        fn set_read_timeout(&mut self, timeout: Option<Duration>) -> ModbusResult<()> {
            self.read_timeout = timeout;
            Ok(())
        }

        fn write_timeout(&self) -> Option<Duration> {
            self.write_timeout
        }

        fn set_write_timeout(&mut self, timeout: Option<Duration>) -> ModbusResult<()> {
            self.write_timeout = timeout;
            Ok(())
        }

        fn discard_in_buffer(&mut self) -> ModbusResult<()> {
            self.discards += 1;
            if self.stalled {
                self.stalled = false;
                let dropped = self.stale.min(self.input.len());
                self.input.drain(..dropped);
                self.consumed += dropped;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedStream;
    use super::*;

    #[test]
    fn test_udp_adapter_buffers_datagram() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut client = UdpClientAdapter::connect(server.local_addr().unwrap()).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        client.write(&[1, 2]).unwrap();
        let mut incoming = [0u8; 16];
        let (count, peer) = server.recv_from(&mut incoming).unwrap();
        assert_eq!(&incoming[..count], &[1, 2]);

        server.send_to(&[10, 11, 12, 13, 14], peer).unwrap();
        let mut first = [0u8; 2];
        let mut rest = [0u8; 8];
        assert_eq!(client.read(&mut first).unwrap(), 2);
        assert_eq!(client.read(&mut rest).unwrap(), 3);
        assert_eq!(first, [10, 11]);
        assert_eq!(&rest[..3], &[12, 13, 14]);
    }

    #[test]
    fn test_scripted_stream_reports_closed() {
        let (mut stream, _) = ScriptedStream::new(&[1]);
        let mut buffer = [0u8; 4];
        assert_eq!(stream.read(&mut buffer).unwrap(), 1);
        assert!(stream.read(&mut buffer).unwrap_err().is_connection_closed());
    }
}
