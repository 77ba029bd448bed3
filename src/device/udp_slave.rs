use log::{debug, info, warn};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::device::slave::{ModbusSlave, SlaveShutdown};
use crate::io::ip::{build_ip_frame, create_ip_request, ip_exception_response};
use crate::message::ModbusMessageFrame;
use crate::utils::error::{ModbusError, ModbusResult};

const MAX_DATAGRAM_SIZE: usize = 1024;

/// How often a blocked receive wakes up to check for a stop request.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Modbus UDP slave. Each datagram holds one request and is answered to
/// its sender.
pub struct ModbusUdpSlave {
    slave: ModbusSlave,
    socket: UdpSocket,
    shutdown: SlaveShutdown,
}

impl ModbusUdpSlave {
    pub fn bind<A: ToSocketAddrs>(slave: ModbusSlave, address: A) -> ModbusResult<Self> {
        let socket = UdpSocket::bind(address)?;
        socket.set_read_timeout(Some(STOP_POLL_INTERVAL))?;
        info!("🔌 Modbus UDP slave bound to {}", socket.local_addr()?);

        Ok(Self {
            slave,
            socket,
            shutdown: SlaveShutdown::new(),
        })
    }

    pub fn local_addr(&self) -> ModbusResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn slave(&self) -> &ModbusSlave {
        &self.slave
    }

    pub fn shutdown_handle(&self) -> SlaveShutdown {
        self.shutdown.clone()
    }

    /// Serves datagrams until a stop is requested.
    pub fn listen(&self) -> ModbusResult<()> {
        info!("🚀 Modbus UDP slave {} listening on {}", self.slave.unit_id(), self.local_addr()?);
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        while !self.shutdown.is_stop_requested() {
            let (received, peer) = match self.socket.recv_from(&mut buffer) {
                Ok(datagram) => datagram,
                Err(e) => {
                    let error = ModbusError::from(e);
                    if !matches!(error, ModbusError::Timeout) {
                        warn!("⚠️  UDP receive failed: {}", error);
                    }
                    continue;
                }
            };

            let frame = &buffer[..received];
            debug!("RX {}: {}", peer, hex::encode_upper(frame));

            let response = match create_ip_request(&self.slave, frame) {
                Ok(request) => {
                    let mut response = self.slave.process_request(&request);
                    response.set_transaction_id(request.transaction_id());
                    response
                }
                Err(e) => match ip_exception_response(frame, &e) {
                    Some(response) => {
                        warn!("⚠️  Rejecting datagram from {}: {}", peer, e);
                        response
                    }
                    None => {
                        warn!("⚠️  Dropping datagram from {}: {}", peer, e);
                        continue;
                    }
                },
            };

            let reply = build_ip_frame(&response);
            debug!("TX {}: {}", peer, hex::encode_upper(&reply));
            if let Err(e) = self.socket.send_to(&reply, peer) {
                warn!("⚠️  Failed to answer {}: {}", peer, e);
            }
        }

        info!("🛑 Modbus UDP slave stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataStore;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_answers_each_datagram_to_its_sender() {
        let store = Arc::new(DataStore::create_default());
        let slave = ModbusUdpSlave::bind(ModbusSlave::new(1, store.clone()), "127.0.0.1:0").unwrap();
        let address = slave.local_addr().unwrap();
        let shutdown = slave.shutdown_handle();
        let worker = thread::spawn(move || slave.listen());

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        // garbage is dropped without a reply
        client.send_to(&[0, 1, 0], address).unwrap();

        client.send_to(&[0, 4, 0, 0, 0, 6, 1, 6, 0, 3, 0, 77], address).unwrap();
        let mut reply = [0u8; 32];
        let (count, _) = client.recv_from(&mut reply).unwrap();
        assert_eq!(&reply[..count], &[0, 4, 0, 0, 0, 6, 1, 6, 0, 3, 0, 77]);

        // unsupported function code 0x2B
        client.send_to(&[0, 1, 0, 0, 0, 3, 1, 0x2B, 0], address).unwrap();
        let (count, _) = client.recv_from(&mut reply).unwrap();
        assert_eq!(&reply[..count], &[0, 1, 0, 0, 0, 3, 1, 0xAB, 1]);

        shutdown.request_stop();
        worker.join().unwrap().unwrap();

        let registers = store
            .read_registers(crate::data::ModbusDataType::HoldingRegister, 3, 1)
            .unwrap();
        assert_eq!(registers.into_vec(), vec![77]);
    }
}
