//! Provides a means to read, parse and hold configuration options for a discovery run.
use crate::error::ConfigError;
use crate::port_strategy::PortSpec;
use crate::scanner::udp::UdpTiming;
use clap::{Parser, ValueEnum};
use serde_derive::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const LOWEST_PORT_NUMBER: u16 = 1;
const TOP_PORT_NUMBER: u16 = 65535;

/// Management, mail, web and VPN ports tried when a host ignores ICMP.
pub const DEFAULT_TCP_PORTS: [u16; 28] = [
    21, 22, 25, 80, 110, 143, 443, 465, 587, 993, 995, 8080, 8443, 9443, 10443, 2222, 4353, 4433,
    500, 1701, 4500, 1194, 1494, 2598, 17777, 17778, 161, 162,
];

/// UDP services with a protocol-aware payload in the rescue table.
pub const DEFAULT_UDP_PORTS: [u16; 8] = [53, 123, 161, 162, 500, 1194, 1701, 4500];

pub const DEFAULT_THREADS: usize = 50;
pub const DEFAULT_TIMEOUT_SECS: f64 = 2.0;
pub const DEFAULT_UDP_RETRIES: u32 = 2;
pub const DEFAULT_OUTPUT: &str = "live_ips.csv";

/// Represents the order in which a rescue prober walks its ports.
///   - Serial walks them in ascending order.
///   - Random shuffles them for every host.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Serial,
    Random,
}

pub type Ports = Vec<u16>;

#[cfg(not(tarpaulin_include))]
pub fn parse_ports_and_ranges(input: &str) -> Result<Ports, String> {
    let mut ports = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('-') {
            ports.extend(parse_port_range(part)?);
        } else {
            ports.push(parse_single_port(part)?);
        }
    }

    if ports.is_empty() {
        return Err(String::from("No valid ports or ranges provided"));
    }

    ports.sort_unstable();
    ports.dedup();

    Ok(ports)
}

fn parse_port_range(range_str: &str) -> Result<Vec<u16>, String> {
    let Some((start, end)) = range_str.split_once('-') else {
        return Err(format!("Invalid range format '{range_str}'"));
    };
    if end.contains('-') {
        return Err(format!(
            "Invalid range format '{range_str}'. Expected 'start-end'. Example: 1-1000.",
        ));
    }

    let start: u16 = start
        .trim()
        .parse()
        .map_err(|_| format!("Invalid start port '{start}' in range '{range_str}'"))?;
    let end: u16 = end
        .trim()
        .parse()
        .map_err(|_| format!("Invalid end port '{end}' in range '{range_str}'"))?;

    if start > end {
        return Err(format!(
            "Start port {start} is greater than end port {end} in range '{range_str}'",
        ));
    }

    if start < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Ports in range '{range_str}' must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok((start..=end).collect())
}

fn parse_single_port(port_str: &str) -> Result<u16, String> {
    let port: u16 = port_str
        .parse()
        .map_err(|_| format!("Invalid port number '{port_str}'"))?;

    if port < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok(port)
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "liveipfinder",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Finds live hosts with an ICMP sweep, then rescues silent hosts with TCP connects
/// and protocol-aware UDP probes.
pub struct Opts {
    /// File with one IP address or CIDR network per line.
    pub input_file: Option<PathBuf>,

    /// A comma-delimited list of IPs or CIDRs, probed in addition to the input file.
    #[arg(short, long, value_delimiter = ',')]
    pub addresses: Vec<String>,

    /// Number of concurrent workers.
    #[arg(short = 'n', long, default_value_t = DEFAULT_THREADS)]
    pub threads: usize,

    /// Seconds to wait for an ICMP echo reply or a TCP handshake.
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: f64,

    /// Seconds to pause between the ICMP sweep and the rescue phase.
    #[arg(short, long, default_value_t = 0.0)]
    pub inter_phase_delay: f64,

    /// TCP rescue ports. Examples: 22,443 or 1-1024 or 1-1024,8443
    #[arg(long, value_parser = parse_ports_and_ranges)]
    pub tcp_ports: Option<Ports>,

    /// UDP rescue ports. Examples: 53,123,161
    #[arg(long, value_parser = parse_ports_and_ranges)]
    pub udp_ports: Option<Ports>,

    /// Disable the TCP rescue phase.
    #[arg(long)]
    pub no_tcp: bool,

    /// Disable the UDP rescue phase.
    #[arg(long)]
    pub no_udp: bool,

    /// Extra UDP sends per port after the first one goes unanswered.
    #[arg(long, default_value_t = DEFAULT_UDP_RETRIES)]
    pub udp_retries: u32,

    /// Seconds to wait between unanswered UDP sends.
    #[arg(long)]
    pub udp_send_delay: Option<f64>,

    /// Seconds to listen for a UDP reply after each send. Defaults to the timeout.
    #[arg(long)]
    pub udp_wait_window: Option<f64>,

    /// Symmetric random perturbation, in seconds, applied to the UDP send delay.
    #[arg(long)]
    pub udp_jitter: Option<f64>,

    /// The order in which rescue ports are tried on each host.
    #[arg(long, value_enum, ignore_case = true, default_value = "serial")]
    pub scan_order: ScanOrder,

    /// CSV file the host records are written to.
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Only write hosts that were found alive by ICMP or rescued.
    #[arg(long)]
    pub live_only: bool,

    /// Greppable mode. No banner or progress bars, only the record lines.
    #[arg(short, long)]
    pub greppable: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// Log probe level detail.
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        Self::parse()
    }

    /// Merges the values found within the user configuration file into the
    /// command line options.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            addresses,
            threads,
            timeout,
            inter_phase_delay,
            no_tcp,
            no_udp,
            udp_retries,
            scan_order,
            live_only,
            greppable
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(
            tcp_ports,
            udp_ports,
            udp_send_delay,
            udp_wait_window,
            udp_jitter,
            ulimit
        );
    }

    /// Validates the options and converts them into the engine configuration.
    pub fn scan_config(&self) -> Result<ScanConfig, ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::InvalidValue {
                name: "threads",
                reason: "must be a positive integer".to_owned(),
            });
        }

        let timeout = positive_seconds("timeout", self.timeout)?;

        let tcp_ports = if self.no_tcp {
            PortSpec::disabled()
        } else {
            PortSpec::new(self.tcp_ports.clone().unwrap_or_else(|| DEFAULT_TCP_PORTS.to_vec()))?
        };
        let udp_ports = if self.no_udp {
            PortSpec::disabled()
        } else {
            PortSpec::new(self.udp_ports.clone().unwrap_or_else(|| DEFAULT_UDP_PORTS.to_vec()))?
        };

        let udp = UdpTiming {
            retries: self.udp_retries,
            send_delay: optional_seconds("udp_send_delay", self.udp_send_delay)?
                .unwrap_or(Duration::ZERO),
            wait_window: optional_seconds("udp_wait_window", self.udp_wait_window)?
                .unwrap_or(timeout),
            jitter: optional_seconds("udp_jitter", self.udp_jitter)?.unwrap_or(Duration::ZERO),
        };

        Ok(ScanConfig {
            threads: self.threads,
            timeout,
            inter_phase_delay: seconds("inter_phase_delay", self.inter_phase_delay)?,
            tcp_ports,
            udp_ports,
            udp,
            scan_order: self.scan_order,
        })
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            input_file: None,
            addresses: vec![],
            threads: DEFAULT_THREADS,
            timeout: DEFAULT_TIMEOUT_SECS,
            inter_phase_delay: 0.0,
            tcp_ports: None,
            udp_ports: None,
            no_tcp: false,
            no_udp: false,
            udp_retries: DEFAULT_UDP_RETRIES,
            udp_send_delay: None,
            udp_wait_window: None,
            udp_jitter: None,
            scan_order: ScanOrder::Serial,
            output: PathBuf::from(DEFAULT_OUTPUT),
            live_only: false,
            greppable: true,
            no_config: true,
            config_path: None,
            ulimit: None,
            verbose: false,
        }
    }
}

fn seconds(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidValue {
        name,
        reason: format!("{value} is not a non-negative number of seconds"),
    })
}

fn positive_seconds(name: &'static str, value: f64) -> Result<Duration, ConfigError> {
    let duration = seconds(name, value)?;
    if duration.is_zero() {
        return Err(ConfigError::InvalidValue {
            name,
            reason: "must be greater than zero".to_owned(),
        });
    }
    Ok(duration)
}

fn optional_seconds(name: &'static str, value: Option<f64>) -> Result<Option<Duration>, ConfigError> {
    value.map(|v| seconds(name, v)).transpose()
}

/// Engine configuration, validated and converted to `Duration`s.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub threads: usize,
    /// Per-probe wait for ICMP and TCP.
    pub timeout: Duration,
    pub inter_phase_delay: Duration,
    pub tcp_ports: PortSpec,
    pub udp_ports: PortSpec,
    pub udp: UdpTiming,
    pub scan_order: ScanOrder,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let timeout = Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS);
        Self {
            threads: DEFAULT_THREADS,
            timeout,
            inter_phase_delay: Duration::ZERO,
            tcp_ports: PortSpec::new(DEFAULT_TCP_PORTS).unwrap_or_default(),
            udp_ports: PortSpec::new(DEFAULT_UDP_PORTS).unwrap_or_default(),
            udp: UdpTiming {
                retries: DEFAULT_UDP_RETRIES,
                send_delay: Duration::ZERO,
                wait_window: timeout,
                jitter: Duration::ZERO,
            },
            scan_order: ScanOrder::Serial,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[cfg(not(tarpaulin_include))]
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    addresses: Option<Vec<String>>,
    threads: Option<usize>,
    timeout: Option<f64>,
    inter_phase_delay: Option<f64>,
    tcp_ports: Option<Vec<u16>>,
    udp_ports: Option<Vec<u16>>,
    no_tcp: Option<bool>,
    no_udp: Option<bool>,
    udp_retries: Option<u32>,
    udp_send_delay: Option<f64>,
    udp_wait_window: Option<f64>,
    udp_jitter: Option<f64>,
    scan_order: Option<ScanOrder>,
    live_only: Option<bool>,
    greppable: Option<bool>,
    ulimit: Option<u64>,
}

#[cfg(not(tarpaulin_include))]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file yields an empty configuration.
    ///
    /// # Format
    ///
    /// threads = 100
    /// timeout = 1.5
    /// tcp_ports = [22, 443, 3389]
    /// udp_ports = [53, 161]
    /// udp_retries = 3
    /// udp_jitter = 0.2
    /// scan_order = "Random"
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config_path = match custom_config_path {
            Some(path) => path,
            None => match default_config_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)?;
        toml::from_str(&content).map_err(|e| ConfigError::InvalidValue {
            name: "config",
            reason: format!("{}: {e}", config_path.display()),
        })
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> Option<PathBuf> {
    let mut config_path = dirs::home_dir()?;
    config_path.push(".liveipfinder.toml");
    Some(config_path)
}
