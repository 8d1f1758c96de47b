//! TCP connect rescue probing.
use super::PortProbe;
use crate::error::ProbeError;
use crate::input::ScanOrder;
use crate::port_strategy::PortSpec;
use async_trait::async_trait;
use log::debug;
use std::collections::BTreeSet;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::{
    io::{self, AsyncWriteExt},
    net::TcpStream,
    time,
};

#[derive(Debug, Clone)]
pub struct TcpProber {
    timeout: Duration,
    order: ScanOrder,
}

impl TcpProber {
    pub const fn new(timeout: Duration, order: ScanOrder) -> Self {
        Self { timeout, order }
    }

    /// Tries every port and returns all that completed a handshake.
    ///
    /// The prober does not stop at the first open port: several open ports are
    /// stronger evidence than one, and the full list ends up in the record.
    /// Refused and timed out connections are both "not open". Only descriptor
    /// exhaustion stops the walk, because every later port would fail the same
    /// way; the ports found before it come back in [`ProbeError::Incomplete`].
    pub async fn probe_ports(
        &self,
        target: IpAddr,
        ports: &PortSpec,
    ) -> Result<BTreeSet<u16>, ProbeError> {
        self.walk_ports(target, ports, |socket| self.connect(socket)).await
    }

    async fn walk_ports<C, Fut>(
        &self,
        target: IpAddr,
        ports: &PortSpec,
        mut connect: C,
    ) -> Result<BTreeSet<u16>, ProbeError>
    where
        C: FnMut(SocketAddr) -> Fut,
        Fut: Future<Output = io::Result<TcpStream>>,
    {
        let mut open = BTreeSet::new();

        for port in ports.order(self.order) {
            let socket = SocketAddr::new(target, port);
            match connect(socket).await {
                Ok(tcp_stream) => {
                    debug!("Connection was successful, shutting down stream {socket}");
                    if let Err(e) = { tcp_stream }.shutdown().await {
                        debug!("Shutdown stream error {e}");
                    }
                    open.insert(port);
                }
                Err(e) => match ProbeError::from_io(e) {
                    err @ ProbeError::ResourceExhausted(_) => {
                        return Err(ProbeError::incomplete(open, err));
                    }
                    err => debug!("{socket} not open: {err}"),
                },
            }
        }

        Ok(open)
    }

    /// Performs the connection to the socket with timeout
    async fn connect(&self, socket: SocketAddr) -> io::Result<TcpStream> {
        time::timeout(self.timeout, async move { TcpStream::connect(socket).await }).await?
    }
}

#[async_trait]
impl PortProbe for TcpProber {
    async fn probe(&self, target: IpAddr, ports: &PortSpec) -> Result<BTreeSet<u16>, ProbeError> {
        self.probe_ports(target, ports).await
    }
}
