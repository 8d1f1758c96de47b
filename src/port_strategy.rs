//! Holds the port sets used by the rescue probers and the order they are walked in.
use crate::error::ConfigError;
use crate::input::{parse_ports_and_ranges, ScanOrder};
use rand::seq::SliceRandom;

/// An ascending set of distinct ports in `1..=65535`.
///
/// An empty port set disables the rescue protocol it is attached to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSpec {
    ports: Vec<u16>,
}

impl PortSpec {
    pub fn new<I: IntoIterator<Item = u16>>(ports: I) -> Result<Self, ConfigError> {
        let mut ports: Vec<u16> = ports.into_iter().collect();
        if ports.contains(&0) {
            return Err(ConfigError::InvalidPort(
                "port 0 must be between 1 and 65535".to_owned(),
            ));
        }
        ports.sort_unstable();
        ports.dedup();
        Ok(Self { ports })
    }

    /// Parses a port expression such as `22,80,8000-8010`.
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        parse_ports_and_ranges(expr)
            .map_err(ConfigError::InvalidPort)
            .and_then(Self::new)
    }

    pub const fn disabled() -> Self {
        Self { ports: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.ports
    }

    /// Returns the ports in the order a prober should try them.
    ///
    /// `Serial` keeps ascending order, `Random` shuffles a copy so repeated
    /// rescues do not hit ports in a mechanical sequence.
    pub fn order(&self, order: ScanOrder) -> Vec<u16> {
        match order {
            ScanOrder::Serial => self.ports.clone(),
            ScanOrder::Random => {
                let mut ports = self.ports.clone();
                ports.shuffle(&mut rand::rng());
                ports
            }
        }
    }
}
