//! ICMP echo probing.
//!
//! Which echo facility is usable is decided once, at startup, by
//! [`IcmpProber::detect`]:
//!
//! 1. an ICMP socket opened through `surge-ping` (needs raw-socket privilege
//!    or an unprivileged ping group on Linux);
//! 2. otherwise the platform's `ping` binary, one child process per probe;
//! 3. otherwise nothing: every target is classified Dead by ICMP and the
//!    rescue phase carries the run.
//!
//! The degradation is logged once here rather than once per host.
use super::EchoProbe;
use crate::error::ProbeError;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, SurgeError, ICMP};
use tokio::process::Command;
use tokio::time;

const PAYLOAD: [u8; 56] = [0; 56];

/// Grace period on top of the probe timeout for the system `ping` to exit.
const PROCESS_GRACE: Duration = Duration::from_millis(500);

/// The echo facility picked at startup.
enum Facility {
    Socket { v4: Option<Client>, v6: Option<Client> },
    SystemPing,
    Unavailable,
}

pub struct IcmpProber {
    timeout: Duration,
    facility: Facility,
}

impl IcmpProber {
    /// Checks which echo facility this process may use.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn detect(timeout: Duration) -> Self {
        let v4 = Client::new(&Config::default())
            .map_err(|e| debug!("ICMPv4 socket unavailable: {e}"))
            .ok();
        let v6 = Client::new(&Config::builder().kind(ICMP::V6).build())
            .map_err(|e| debug!("ICMPv6 socket unavailable: {e}"))
            .ok();

        if v4.is_some() || v6.is_some() {
            info!("Using ICMP sockets for echo probes");
            return Self {
                timeout,
                facility: Facility::Socket { v4, v6 },
            };
        }

        if system_ping_available().await {
            warn!(
                "Raw ICMP is not permitted for this process; falling back to the system ping \
                 command. Run as root or grant CAP_NET_RAW for faster sweeps."
            );
            return Self::system_ping(timeout);
        }

        warn!(
            "No ICMP facility is available (no privilege and no ping command). Every host will \
             be classified by the rescue probes only."
        );
        Self::unavailable(timeout)
    }

    pub const fn system_ping(timeout: Duration) -> Self {
        Self {
            timeout,
            facility: Facility::SystemPing,
        }
    }

    pub const fn unavailable(timeout: Duration) -> Self {
        Self {
            timeout,
            facility: Facility::Unavailable,
        }
    }

    /// Sends one echo request and waits up to the timeout for the matching reply.
    pub async fn ping(&self, target: IpAddr) -> Result<bool, ProbeError> {
        match &self.facility {
            Facility::Socket { v4, v6 } => {
                let client = if target.is_ipv4() { v4 } else { v6 };
                match client {
                    Some(client) => self.socket_ping(client, target).await,
                    None => self.process_ping(target).await,
                }
            }
            Facility::SystemPing => self.process_ping(target).await,
            Facility::Unavailable => Ok(false),
        }
    }

    async fn socket_ping(&self, client: &Client, target: IpAddr) -> Result<bool, ProbeError> {
        let mut pinger = client.pinger(target, PingIdentifier(rand::random())).await;
        pinger.timeout(self.timeout);

        match pinger.ping(PingSequence(0), &PAYLOAD).await {
            Ok((_, rtt)) => {
                debug!("Host {target} answered ICMP in {rtt:?}");
                Ok(true)
            }
            Err(SurgeError::Timeout { .. }) => Ok(false),
            Err(SurgeError::IOError(e)) => match ProbeError::from_io(e) {
                ProbeError::Socket(e) => {
                    debug!("ICMP to {target} failed: {e}");
                    Ok(false)
                }
                err => Err(err),
            },
            Err(e) => {
                debug!("ICMP to {target} failed: {e}");
                Ok(false)
            }
        }
    }

    async fn process_ping(&self, target: IpAddr) -> Result<bool, ProbeError> {
        let mut cmd = Command::new("ping");
        cmd.args(ping_args(target, self.timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = cmd.status();
        match time::timeout(self.timeout + PROCESS_GRACE, child).await {
            Ok(Ok(status)) => Ok(status.success()),
            Ok(Err(e)) => Err(ProbeError::from_io(e)),
            Err(_) => Ok(false),
        }
    }
}

#[async_trait]
impl EchoProbe for IcmpProber {
    async fn probe(&self, target: IpAddr) -> Result<bool, ProbeError> {
        self.ping(target).await
    }
}

/// Arguments for a single echo with the platform's `ping`.
fn ping_args(target: IpAddr, timeout: Duration) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    if target.is_ipv6() {
        args.push("-6".to_owned());
    }

    #[cfg(target_os = "windows")]
    {
        args.extend(["-n".to_owned(), "1".to_owned(), "-w".to_owned()]);
        args.push(timeout.as_millis().max(1).to_string());
    }

    #[cfg(not(target_os = "windows"))]
    {
        // -W takes whole seconds on most Unix pings; round up.
        let secs = timeout.as_millis().div_ceil(1000).max(1);
        args.extend(["-c".to_owned(), "1".to_owned(), "-W".to_owned()]);
        args.push(secs.to_string());
    }

    args.push(target.to_string());
    args
}

/// Spawns `ping` against loopback once to learn whether the binary exists.
async fn system_ping_available() -> bool {
    let loopback = IpAddr::from([127, 0, 0, 1]);
    let status = Command::new("ping")
        .args(ping_args(loopback, Duration::from_secs(1)))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match time::timeout(Duration::from_secs(1) + PROCESS_GRACE, status).await {
        Ok(Ok(_)) | Err(_) => true,
        Ok(Err(e)) => {
            debug!("System ping unavailable: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn ping_args_round_timeout_up_to_seconds() {
        let args = ping_args("10.0.0.1".parse().unwrap(), Duration::from_millis(1500));
        assert_eq!(args, ["-c", "1", "-W", "2", "10.0.0.1"]);
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn ping_args_sub_second_timeout_waits_one_second() {
        let args = ping_args("10.0.0.1".parse().unwrap(), Duration::from_millis(200));
        assert_eq!(args[3], "1");
    }

    #[test]
    fn ping_args_force_ipv6() {
        let args = ping_args("::1".parse().unwrap(), Duration::from_secs(1));
        assert_eq!(args.first().map(String::as_str), Some("-6"));
        assert_eq!(args.last().map(String::as_str), Some("::1"));
    }

    #[tokio::test]
    async fn unavailable_facility_classifies_dead_without_error() {
        let prober = IcmpProber::unavailable(Duration::from_millis(100));
        assert!(!prober.ping("10.0.0.1".parse().unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn detected_facility_reports_silent_host_dead() {
        let prober = IcmpProber::detect(Duration::from_millis(200)).await;
        // TEST-NET-3 never answers, whichever facility was picked.
        let result = prober.ping("203.0.113.1".parse().unwrap()).await;
        assert!(!matches!(result, Ok(true)));
    }

    #[tokio::test]
    #[ignore]
    async fn loopback_answers_echo() {
        let prober = IcmpProber::detect(Duration::from_secs(1)).await;
        assert!(prober.ping("127.0.0.1".parse().unwrap()).await.unwrap());
    }
}
