//! Per-protocol probe outcomes and their reconciliation into one record per host.
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

/// Transport of a rescue work unit. ICMP never appears here: it only runs in
/// the first phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RescueProtocol {
    Tcp,
    Udp,
}

/// Result of one (target, protocol) probe. Never mutated once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutcome {
    responded: bool,
    ports: BTreeSet<u16>,
}

impl ProbeOutcome {
    pub const fn echo(responded: bool) -> Self {
        Self {
            responded,
            ports: BTreeSet::new(),
        }
    }

    pub fn ports(ports: BTreeSet<u16>) -> Self {
        Self {
            responded: !ports.is_empty(),
            ports,
        }
    }

    pub const fn responded(&self) -> bool {
        self.responded
    }

    pub const fn open_ports(&self) -> &BTreeSet<u16> {
        &self.ports
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingStatus {
    Alive,
    Dead,
}

impl fmt::Display for PingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Alive => "Alive",
            Self::Dead => "Dead",
        })
    }
}

/// Which probe established liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescueSource {
    Icmp,
    Tcp,
    Udp,
    TcpUdp,
    None,
}

impl RescueSource {
    pub const fn includes_tcp(self) -> bool {
        matches!(self, Self::Tcp | Self::TcpUdp)
    }
}

impl fmt::Display for RescueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Icmp => "ICMP",
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::TcpUdp => "TCP+UDP",
            Self::None => "None",
        })
    }
}

/// What answered, rendered as the `Open_Details` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenDetails {
    Icmp,
    Ports(BTreeSet<u16>),
    Both { tcp: BTreeSet<u16>, udp: BTreeSet<u16> },
    NoResponse,
}

fn join_ports(f: &mut fmt::Formatter<'_>, ports: &BTreeSet<u16>) -> fmt::Result {
    for (i, port) in ports.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{port}")?;
    }
    Ok(())
}

impl fmt::Display for OpenDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Icmp => f.write_str("ICMP"),
            Self::Ports(ports) => join_ports(f, ports),
            Self::Both { tcp, udp } => {
                f.write_str("TCP:")?;
                join_ports(f, tcp)?;
                f.write_str(" | UDP:")?;
                join_ports(f, udp)
            }
            Self::NoResponse => f.write_str("no response"),
        }
    }
}

/// Final classification of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    target: IpAddr,
    ping_status: PingStatus,
    rescue_source: RescueSource,
    open_details: OpenDetails,
}

impl HostRecord {
    pub const fn target(&self) -> IpAddr {
        self.target
    }

    pub const fn ping_status(&self) -> PingStatus {
        self.ping_status
    }

    pub const fn rescue_source(&self) -> RescueSource {
        self.rescue_source
    }

    pub const fn open_details(&self) -> &OpenDetails {
        &self.open_details
    }

    /// Alive by ICMP, or dead by ICMP but rescued by TCP or UDP.
    pub const fn is_live(&self) -> bool {
        !matches!(self.rescue_source, RescueSource::None)
    }

    /// `IP, Ping_Status, Rescue_Source, Open_Details`
    pub fn fields(&self) -> [String; 4] {
        [
            self.target.to_string(),
            self.ping_status.to_string(),
            self.rescue_source.to_string(),
            self.open_details.to_string(),
        ]
    }
}

impl fmt::Display for HostRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}",
            self.target, self.ping_status, self.rescue_source, self.open_details
        )
    }
}

/// Merges one target's outcomes into its record.
///
/// `tcp` and `udp` are `None` when that rescue protocol was disabled. They are
/// ignored entirely when ICMP answered, since the rescue phase never runs for
/// such hosts.
pub fn aggregate(
    target: IpAddr,
    icmp: &ProbeOutcome,
    tcp: Option<&ProbeOutcome>,
    udp: Option<&ProbeOutcome>,
) -> HostRecord {
    if icmp.responded() {
        return HostRecord {
            target,
            ping_status: PingStatus::Alive,
            rescue_source: RescueSource::Icmp,
            open_details: OpenDetails::Icmp,
        };
    }

    let open = |outcome: Option<&ProbeOutcome>| {
        outcome
            .map(ProbeOutcome::open_ports)
            .filter(|ports| !ports.is_empty())
            .cloned()
    };

    let (rescue_source, open_details) = match (open(tcp), open(udp)) {
        (Some(tcp), Some(udp)) => (RescueSource::TcpUdp, OpenDetails::Both { tcp, udp }),
        (Some(tcp), None) => (RescueSource::Tcp, OpenDetails::Ports(tcp)),
        (None, Some(udp)) => (RescueSource::Udp, OpenDetails::Ports(udp)),
        (None, None) => (RescueSource::None, OpenDetails::NoResponse),
    };

    HostRecord {
        target,
        ping_status: PingStatus::Dead,
        rescue_source,
        open_details,
    }
}

/// Everything a run produced, in target input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub records: Vec<HostRecord>,
    /// The run was cancelled before every target was finalised.
    pub interrupted: bool,
    /// Targets left without a record because of the interruption.
    pub unfinished: usize,
}

/// End-of-run counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub alive_icmp: usize,
    pub rescued: usize,
    pub dead: usize,
}

impl Summary {
    pub const fn total_live(&self) -> usize {
        self.alive_icmp + self.rescued
    }
}

impl ScanReport {
    pub fn summary(&self) -> Summary {
        self.records
            .iter()
            .fold(Summary::default(), |mut summary, record| {
                match record.rescue_source() {
                    RescueSource::Icmp => summary.alive_icmp += 1,
                    RescueSource::None => summary.dead += 1,
                    _ => summary.rescued += 1,
                }
                summary
            })
    }

    pub fn live_records(&self) -> impl Iterator<Item = &HostRecord> {
        self.records.iter().filter(|record| record.is_live())
    }
}
