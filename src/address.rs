//! Provides functions to parse input IP addresses, CIDRs or files.
use crate::error::ConfigError;
use crate::input::Opts;
use cidr_utils::cidr::{IpCidr, IpInet};
use itertools::Itertools;
use log::debug;
use std::net::IpAddr;
use std::str::FromStr;
use tokio::fs;

/// Largest accepted network: 2^24 addresses, an IPv4 /8 or an IPv6 /104.
const MAX_HOST_BITS: u8 = 24;

/// Collects the targets of a run from the input file and `--addresses`.
///
/// File entries come first, then command-line entries. Duplicates are dropped
/// keeping the first occurrence, so the result order is the order in which
/// targets were first presented.
///
/// ```rust
/// # use liveipfinder::input::Opts;
/// # use liveipfinder::address::read_targets;
/// # tokio_test_block_on(async {
/// let opts = Opts {
///     addresses: vec!["192.168.0.0/30".to_owned()],
///     ..Opts::default()
/// };
///
/// let ips = read_targets(&opts).await.unwrap();
/// assert_eq!(ips.len(), 4);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
pub async fn read_targets(input: &Opts) -> Result<Vec<IpAddr>, ConfigError> {
    let mut entries = Vec::new();

    if let Some(path) = &input.input_file {
        let contents = fs::read_to_string(path).await?;
        entries.extend(contents.lines().map(str::to_owned));
    }
    entries.extend(input.addresses.iter().cloned());

    let targets = parse_entries(entries.iter().map(String::as_str))?;
    if targets.is_empty() {
        return Err(ConfigError::NoTargets);
    }

    debug!("Collected {} distinct targets", targets.len());
    Ok(targets)
}

/// Expands every usable entry and removes duplicates, preserving order.
///
/// Blank lines and `#` comments are skipped silently; anything else that is
/// neither an address nor a network is skipped with a debug line. A network
/// wider than 2^24 addresses is rejected before anything is expanded.
pub fn parse_entries<'a, I>(entries: I) -> Result<Vec<IpAddr>, ConfigError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut networks = Vec::new();

    for entry in entries
        .into_iter()
        .map(str::trim)
        .filter(|entry| !entry.is_empty() && !entry.starts_with('#'))
    {
        let Some(network) = parse_address(entry) else {
            debug!("Skipping unparsable target entry {entry:?}");
            continue;
        };

        let address_bits = match network {
            IpCidr::V4(_) => 32,
            IpCidr::V6(_) => 128,
        };
        if address_bits - network.network_length() > MAX_HOST_BITS {
            return Err(ConfigError::InvalidValue {
                name: "target",
                reason: format!("{entry} spans more than 2^{MAX_HOST_BITS} addresses"),
            });
        }
        networks.push(network);
    }

    Ok(networks
        .iter()
        .flat_map(|network| network.iter().map(|inet| inet.address()))
        .unique()
        .collect())
}

/// Parses an address or a CIDR network.
///
/// A plain address is a single-host network. Networks with host bits set
/// (`10.0.0.7/24`) are accepted and widened to the enclosing network.
///
/// ```rust
/// # use liveipfinder::address::parse_address;
/// let network = parse_address("10.1.2.3/30").unwrap();
/// assert_eq!(network.to_string(), "10.1.2.0/30");
/// ```
pub fn parse_address(address: &str) -> Option<IpCidr> {
    if let Ok(ip) = IpAddr::from_str(address) {
        return Some(IpCidr::new_host(ip));
    }

    IpCidr::from_str(address)
        .or_else(|_| IpInet::from_str(address).map(|inet| inet.network()))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::Ipv4Addr;
    use tempfile::NamedTempFile;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    fn input_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn parse_correct_addresses() {
        let opts = Opts {
            addresses: vec!["127.0.0.1".to_owned(), "192.168.0.0/30".to_owned()],
            ..Opts::default()
        };
        let ips = read_targets(&opts).await.unwrap();

        assert_eq!(
            ips,
            [
                v4(127, 0, 0, 1),
                v4(192, 168, 0, 0),
                v4(192, 168, 0, 1),
                v4(192, 168, 0, 2),
                v4(192, 168, 0, 3)
            ]
        );
    }

    #[tokio::test]
    async fn parse_correct_and_incorrect_addresses() {
        let opts = Opts {
            addresses: vec!["127.0.0.1".to_owned(), "im_wrong".to_owned()],
            ..Opts::default()
        };
        let ips = read_targets(&opts).await.unwrap();

        assert_eq!(ips, [v4(127, 0, 0, 1)]);
    }

    #[tokio::test]
    async fn parse_incorrect_addresses() {
        let opts = Opts {
            addresses: vec!["im_wrong".to_owned(), "300.10.1.1".to_owned()],
            ..Opts::default()
        };

        assert!(matches!(read_targets(&opts).await, Err(ConfigError::NoTargets)));
    }

    #[tokio::test]
    async fn input_file_skips_blanks_comments_and_garbage() {
        let file = input_file(
            "# office network\n\n10.0.0.1\n  10.0.0.2  \nnot-an-ip\n10.0.1.0/31\n# done\n",
        );
        let opts = Opts {
            input_file: Some(file.path().to_path_buf()),
            ..Opts::default()
        };

        let ips = read_targets(&opts).await.unwrap();

        assert_eq!(
            ips,
            [v4(10, 0, 0, 1), v4(10, 0, 0, 2), v4(10, 0, 1, 0), v4(10, 0, 1, 1)]
        );
    }

    #[tokio::test]
    async fn file_entries_precede_command_line_entries() {
        let file = input_file("10.0.0.9\n10.0.0.1\n");
        let opts = Opts {
            input_file: Some(file.path().to_path_buf()),
            addresses: vec!["10.0.0.1".to_owned(), "10.0.0.5".to_owned()],
            ..Opts::default()
        };

        let ips = read_targets(&opts).await.unwrap();

        assert_eq!(ips, [v4(10, 0, 0, 9), v4(10, 0, 0, 1), v4(10, 0, 0, 5)]);
    }

    #[tokio::test]
    async fn missing_input_file_is_an_input_error() {
        let opts = Opts {
            input_file: Some("/nonexistent/targets.txt".into()),
            ..Opts::default()
        };

        assert!(matches!(read_targets(&opts).await, Err(ConfigError::Input(_))));
    }

    #[tokio::test]
    async fn empty_input_file_has_no_targets() {
        let file = input_file("\n# nothing here\n");
        let opts = Opts {
            input_file: Some(file.path().to_path_buf()),
            ..Opts::default()
        };

        assert!(matches!(read_targets(&opts).await, Err(ConfigError::NoTargets)));
    }

    #[test]
    fn overlapping_networks_are_deduplicated_in_first_seen_order() {
        let ips = parse_entries(["10.0.0.2", "10.0.0.0/30", "10.0.0.1"]).unwrap();
        assert_eq!(
            ips,
            [v4(10, 0, 0, 2), v4(10, 0, 0, 0), v4(10, 0, 0, 1), v4(10, 0, 0, 3)]
        );
    }

    #[test]
    fn host_bits_are_widened_to_the_network() {
        let ips = parse_entries(["192.168.5.77/30"]).unwrap();
        assert_eq!(ips.len(), 4);
        assert_eq!(ips[0], v4(192, 168, 5, 76));
    }

    #[test]
    fn ipv6_entries_are_accepted() {
        let ips = parse_entries(["2001:db8::1", "2001:db8::/127"]).unwrap();
        assert_eq!(ips.len(), 2);
        assert_eq!(ips[0], "2001:db8::1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn oversized_networks_are_rejected_before_expansion() {
        for entry in ["2001:db8::/64", "10.0.0.0/7", "::/0"] {
            let result = parse_entries(["10.0.0.1", entry]);
            assert!(
                matches!(result, Err(ConfigError::InvalidValue { name: "target", .. })),
                "{entry} was accepted"
            );
        }
    }

    #[test]
    fn networks_up_to_the_cap_are_expanded() {
        assert_eq!(parse_entries(["172.16.0.0/16"]).unwrap().len(), 65_536);
        assert_eq!(parse_entries(["2001:db8::/112"]).unwrap().len(), 65_536);
    }

    #[tokio::test]
    async fn oversized_network_in_input_file_fails_the_run() {
        let file = input_file("10.0.0.1\n2001:db8::/64\n");
        let opts = Opts {
            input_file: Some(file.path().to_path_buf()),
            ..Opts::default()
        };

        assert!(matches!(
            read_targets(&opts).await,
            Err(ConfigError::InvalidValue { name: "target", .. })
        ));
    }
}
