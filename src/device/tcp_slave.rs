use bytes::BytesMut;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, RwLock};

use crate::device::slave::ModbusSlave;
use crate::io::ip::{build_ip_frame, create_ip_request, ip_exception_response, MbapHeader};
use crate::message::{ModbusMessage, ModbusMessageFrame};
use crate::modbus::protocol::MBAP_HEADER_LENGTH;
use crate::utils::error::ModbusResult;

/// A master connected to the TCP slave.
#[derive(Debug, Clone)]
pub struct MasterInfo {
    pub address: SocketAddr,
    pub connected_at: DateTime<Utc>,
    pub requests_served: u64,
}

type MasterMap = Arc<RwLock<HashMap<SocketAddr, MasterInfo>>>;

/// Modbus TCP slave. Each accepted master is served by its own task, all
/// sharing the slave's data store and custom functions.
pub struct ModbusTcpSlave {
    slave: ModbusSlave,
    listener: TcpListener,
    masters: MasterMap,
    shutdown_tx: broadcast::Sender<()>,
}

impl ModbusTcpSlave {
    pub async fn bind<A: ToSocketAddrs>(slave: ModbusSlave, address: A) -> ModbusResult<Self> {
        let listener = TcpListener::bind(address).await?;
        let (shutdown_tx, _) = broadcast::channel(1);
        info!("🔌 Modbus TCP slave bound to {}", listener.local_addr()?);

        Ok(Self {
            slave,
            listener,
            masters: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> ModbusResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn slave(&self) -> &ModbusSlave {
        &self.slave
    }

    /// Snapshot of the connected masters.
    pub async fn masters(&self) -> HashMap<SocketAddr, MasterInfo> {
        self.masters.read().await.clone()
    }

    /// Sender whose message stops the listener and every connection.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn stop(&self) {
        // no receivers just means nothing is listening
        let _ = self.shutdown_tx.send(());
    }

    /// Accepts masters until stopped.
    pub async fn listen(&self) -> ModbusResult<()> {
        let mut shutdown = self.shutdown_tx.subscribe();
        info!("🚀 Modbus TCP slave {} listening on {}", self.slave.unit_id(), self.local_addr()?);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("🛑 Modbus TCP slave stopping");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, address)) => self.spawn_connection(stream, address).await,
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }
            }
        }

        self.masters.write().await.clear();
        Ok(())
    }

    async fn spawn_connection(&self, stream: TcpStream, address: SocketAddr) {
        info!("🔗 Master connected: {}", address);
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", address, e);
        }

        self.masters.write().await.insert(
            address,
            MasterInfo {
                address,
                connected_at: Utc::now(),
                requests_served: 0,
            },
        );

        let connection = MasterConnection {
            slave: self.slave.clone(),
            stream,
            address,
            masters: self.masters.clone(),
        };
        let shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            connection.run(shutdown).await;
        });
    }
}

struct MasterConnection {
    slave: ModbusSlave,
    stream: TcpStream,
    address: SocketAddr,
    masters: MasterMap,
}

impl MasterConnection {
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let frame = tokio::select! {
                _ = shutdown.recv() => break,
                frame = self.read_frame() => frame,
            };

            match frame {
                Ok(Some(frame)) => {
                    if let Err(e) = self.serve(&frame).await {
                        warn!("⚠️  Connection {} ended: {}", self.address, e);
                        break;
                    }
                }
                Ok(None) => {
                    info!("👋 Master {} disconnected", self.address);
                    break;
                }
                Err(e) if e.is_connection_closed() => {
                    info!("👋 Master {} disconnected: {}", self.address, e);
                    break;
                }
                Err(e) => {
                    warn!("⚠️  Failed to read from {}: {}", self.address, e);
                    break;
                }
            }
        }

        self.masters.write().await.remove(&self.address);
    }

    /// `None` when the master closed the connection between requests.
    async fn read_frame(&mut self) -> ModbusResult<Option<BytesMut>> {
        let mut frame = BytesMut::zeroed(MBAP_HEADER_LENGTH);

        let first = self.stream.read(&mut frame[..]).await?;
        if first == 0 {
            return Ok(None);
        }
        if first < MBAP_HEADER_LENGTH {
            self.stream.read_exact(&mut frame[first..]).await?;
        }

        let header = MbapHeader::parse(&frame)?;
        frame.resize(MBAP_HEADER_LENGTH + header.length as usize, 0);
        self.stream.read_exact(&mut frame[MBAP_HEADER_LENGTH..]).await?;

        debug!("RX {}: {}", self.address, hex::encode_upper(&frame));
        Ok(Some(frame))
    }

    async fn serve(&mut self, frame: &[u8]) -> ModbusResult<()> {
        let request = match create_ip_request(&self.slave, frame) {
            Ok(request) => request,
            Err(e) => {
                // best effort reply, then the connection is dropped
                if let Some(response) = ip_exception_response(frame, &e) {
                    if let Err(write_error) = self.write(&response).await {
                        debug!("Exception reply to {} failed: {}", self.address, write_error);
                    }
                }
                return Err(e);
            }
        };

        let mut response = self.slave.process_request(&request);
        response.set_transaction_id(request.transaction_id());

        if let Some(info) = self.masters.write().await.get_mut(&self.address) {
            info.requests_served += 1;
        }
        self.write(&response).await
    }

    async fn write(&mut self, response: &ModbusMessage) -> ModbusResult<()> {
        let frame = build_ip_frame(response);
        debug!("TX {}: {}", self.address, hex::encode_upper(&frame));
        self.stream.write_all(&frame).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataStore;
    use std::time::Duration;

    async fn start_slave() -> (Arc<ModbusTcpSlave>, SocketAddr) {
        let slave = ModbusSlave::new(1, Arc::new(DataStore::create_default()));
        let tcp_slave = Arc::new(ModbusTcpSlave::bind(slave, "127.0.0.1:0").await.unwrap());
        let address = tcp_slave.local_addr().unwrap();

        let listener = tcp_slave.clone();
        tokio::spawn(async move { listener.listen().await });
        (tcp_slave, address)
    }

    async fn exchange(stream: &mut TcpStream, request: &[u8], response_len: usize) -> Vec<u8> {
        stream.write_all(request).await.unwrap();
        let mut response = vec![0u8; response_len];
        tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut response))
            .await
            .unwrap()
            .unwrap();
        response
    }

    #[tokio::test]
    async fn test_read_holding_registers_keeps_transaction_id() {
        let (_slave, address) = start_slave().await;
        let mut stream = TcpStream::connect(address).await.unwrap();

        let response = exchange(&mut stream, &[0, 9, 0, 0, 0, 6, 1, 3, 0, 104, 0, 2], 13).await;
        assert_eq!(response, vec![0, 9, 0, 0, 0, 7, 1, 3, 4, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_undecodable_frame_gets_exception_and_close() {
        let (_slave, address) = start_slave().await;
        let mut stream = TcpStream::connect(address).await.unwrap();

        // function 0x2B is not served
        let response = exchange(&mut stream, &[0, 1, 0, 0, 0, 3, 1, 0x2B, 0], 9).await;
        assert_eq!(response, vec![0, 1, 0, 0, 0, 3, 1, 0xAB, 1]);

        let mut rest = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn test_masters_are_tracked() {
        let (slave, address) = start_slave().await;
        let mut stream = TcpStream::connect(address).await.unwrap();
        exchange(&mut stream, &[0, 2, 0, 0, 0, 6, 1, 3, 0, 0, 0, 1], 11).await;

        let masters = slave.masters().await;
        assert_eq!(masters.len(), 1);
        let info = masters.values().next().unwrap();
        assert_eq!(info.requests_served, 1);
        assert!(info.connected_at <= Utc::now());

        drop(stream);
        for _ in 0..50 {
            if slave.masters().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(slave.masters().await.is_empty());
        slave.stop();
    }
}
