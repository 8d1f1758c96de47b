//! UDP rescue probing.
//!
//! UDP has no handshake, so a port only counts as responsive when the target
//! sends back a datagram. Silence after every retry is recorded as no signal:
//! a filtered port and a closed one look the same at this layer.
use super::payloads::build_payload;
use super::PortProbe;
use crate::error::ProbeError;
use crate::input::ScanOrder;
use crate::port_strategy::PortSpec;
use async_trait::async_trait;
use log::debug;
use rand::Rng;
use std::collections::BTreeSet;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{self, Instant};

/// Timing knobs of the UDP rescue prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpTiming {
    /// Extra sends after the first one goes unanswered.
    pub retries: u32,
    /// Pause between an unanswered wait window and the next send.
    pub send_delay: Duration,
    /// How long to listen for a reply after each send.
    pub wait_window: Duration,
    /// Symmetric bound of the random perturbation applied to `send_delay`.
    pub jitter: Duration,
}

impl UdpTiming {
    pub const fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// `send_delay` shifted by a uniform offset in `[-jitter, +jitter]`,
    /// never below zero.
    pub fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.send_delay;
        }

        let jitter = self.jitter.as_secs_f64();
        let offset = rand::rng().random_range(-jitter..=jitter);
        Duration::from_secs_f64((self.send_delay.as_secs_f64() + offset).max(0.0))
    }
}

#[derive(Debug, Clone)]
pub struct UdpProber {
    timing: UdpTiming,
    order: ScanOrder,
}

impl UdpProber {
    pub const fn new(timing: UdpTiming, order: ScanOrder) -> Self {
        Self { timing, order }
    }

    /// Probes every port of `ports` and returns the ones that drew a reply.
    ///
    /// Each port gets its own socket so a late reply to one port is never
    /// credited to the next one.
    ///
    /// If a socket cannot be created the walk stops and the ports found so far
    /// come back inside [`ProbeError::Incomplete`].
    pub async fn probe_ports(
        &self,
        target: IpAddr,
        ports: &PortSpec,
    ) -> Result<BTreeSet<u16>, ProbeError> {
        self.walk_ports(target, ports, udp_bind).await
    }

    async fn walk_ports<B, Fut>(
        &self,
        target: IpAddr,
        ports: &PortSpec,
        mut bind: B,
    ) -> Result<BTreeSet<u16>, ProbeError>
    where
        B: FnMut(IpAddr) -> Fut,
        Fut: Future<Output = io::Result<UdpSocket>>,
    {
        let mut open = BTreeSet::new();

        for port in ports.order(self.order) {
            let socket = match bind(target).await {
                Ok(socket) => socket,
                Err(e) => return Err(ProbeError::incomplete(open, ProbeError::from_io(e))),
            };
            if self.probe_port(&socket, SocketAddr::new(target, port)).await {
                debug!("UDP reply from {target} for port {port}");
                open.insert(port);
            }
        }

        Ok(open)
    }

    /// Sends the port's payload up to `retries + 1` times and stops at the
    /// first datagram received from the target.
    async fn probe_port(&self, socket: &UdpSocket, destination: SocketAddr) -> bool {
        let payload = build_payload(destination.port());
        let attempts = self.timing.attempts();

        for attempt in 1..=attempts {
            if let Err(e) = socket.send_to(&payload, destination).await {
                debug!("UDP send to {destination} failed on attempt {attempt}: {e}");
            } else if self.await_reply(socket, destination.ip()).await {
                return true;
            }

            if attempt < attempts {
                time::sleep(self.timing.next_delay()).await;
            }
        }

        debug!("No UDP reply from {destination} after {attempts} attempts");
        false
    }

    /// Listens for one wait window. Any datagram whose source address is the
    /// target counts, whatever its source port or content.
    async fn await_reply(&self, socket: &UdpSocket, target: IpAddr) -> bool {
        let deadline = Instant::now() + self.timing.wait_window;
        let mut buf = [0u8; 2048];

        loop {
            match time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Ok(Ok((size, from))) if from.ip() == target => {
                    debug!("Received {size} bytes from {from}");
                    return true;
                }
                Ok(Ok((_, from))) => debug!("Ignoring datagram from {from}"),
                Ok(Err(e)) => {
                    debug!("UDP receive error while waiting on {target}: {e}");
                    return false;
                }
                Err(_) => return false,
            }
        }
    }
}

#[async_trait]
impl PortProbe for UdpProber {
    async fn probe(&self, target: IpAddr, ports: &PortSpec) -> Result<BTreeSet<u16>, ProbeError> {
        self.probe_ports(target, ports).await
    }
}

/// Binds an ephemeral socket of the target's address family.
async fn udp_bind(target: IpAddr) -> io::Result<UdpSocket> {
    let local_addr = match target {
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };

    UdpSocket::bind(local_addr).await
}
