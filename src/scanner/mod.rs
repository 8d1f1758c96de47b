//! Core functionality for the two-phase discovery run.
//!
//! Phase 1 sends one ICMP work unit per target. Targets that stay silent get
//! a TCP and/or UDP rescue work unit in phase 2. Both phases share one bound:
//! no more than `threads` work units are in flight at any time.
pub mod icmp;
pub mod payloads;
pub mod tcp;
pub mod udp;

use crate::error::{ConfigError, ProbeError};
use crate::input::ScanConfig;
use crate::port_strategy::PortSpec;
use crate::results::{aggregate, ProbeOutcome, RescueProtocol, ScanReport};
use async_trait::async_trait;
use futures::{future, stream, FutureExt, StreamExt};
use icmp::IcmpProber;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use tcp::TcpProber;
use tokio::time;
use tokio_util::sync::CancellationToken;
use udp::UdpProber;

/// Primary liveness check for one target.
#[async_trait]
pub trait EchoProbe: Send + Sync {
    async fn probe(&self, target: IpAddr) -> Result<bool, ProbeError>;
}

/// Rescue check over a set of ports of one target; returns the ports that
/// gave a positive signal.
///
/// A prober that has to give up part way through returns
/// [`ProbeError::Incomplete`] so the ports it already found are kept.
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn probe(&self, target: IpAddr, ports: &PortSpec) -> Result<BTreeSet<u16>, ProbeError>;
}

/// Runs the ICMP sweep and the rescue phase over a fixed target set.
pub struct Scanner {
    targets: Box<[IpAddr]>,
    config: ScanConfig,
    tcp_ports: Arc<PortSpec>,
    udp_ports: Arc<PortSpec>,
    icmp: Arc<dyn EchoProbe>,
    tcp: Arc<dyn PortProbe>,
    udp: Arc<dyn PortProbe>,
    progress: bool,
    cancel: CancellationToken,
}

impl Scanner {
    /// Builds a scanner with the network probers, running the ICMP capability
    /// check once.
    pub async fn new(targets: Vec<IpAddr>, config: ScanConfig) -> Result<Self, ConfigError> {
        let icmp = IcmpProber::detect(config.timeout).await;
        let tcp = TcpProber::new(config.timeout, config.scan_order);
        let udp = UdpProber::new(config.udp, config.scan_order);
        Self::with_probers(targets, config, Arc::new(icmp), Arc::new(tcp), Arc::new(udp))
    }

    /// Builds a scanner around arbitrary probers. Duplicate targets are
    /// dropped, keeping the first occurrence.
    pub fn with_probers(
        targets: Vec<IpAddr>,
        config: ScanConfig,
        icmp: Arc<dyn EchoProbe>,
        tcp: Arc<dyn PortProbe>,
        udp: Arc<dyn PortProbe>,
    ) -> Result<Self, ConfigError> {
        let targets: Box<[IpAddr]> = targets.into_iter().unique().collect();
        if targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if config.threads == 0 {
            return Err(ConfigError::InvalidValue {
                name: "threads",
                reason: "must be a positive integer".to_owned(),
            });
        }

        Ok(Self {
            targets,
            tcp_ports: Arc::new(config.tcp_ports.clone()),
            udp_ports: Arc::new(config.udp_ports.clone()),
            config,
            icmp,
            tcp,
            udp,
            progress: false,
            cancel: CancellationToken::new(),
        })
    }

    /// Shows a progress bar per phase.
    #[must_use]
    pub const fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Token that aborts the run when cancelled. Records finalised before the
    /// cancellation are still returned.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn targets(&self) -> &[IpAddr] {
        &self.targets
    }

    /// Runs both phases and returns one record per finalised target, in
    /// target order.
    pub async fn run(&self) -> ScanReport {
        debug!(
            "Start discovery.\nThreads {}\nTargets {}\nTCP rescue ports {}\nUDP rescue ports {}",
            self.config.threads,
            self.targets.len(),
            self.tcp_ports.len(),
            self.udp_ports.len()
        );

        let echo = self.ping_sweep().await;

        let dead: Vec<IpAddr> = self
            .targets
            .iter()
            .copied()
            .filter(|target| echo.get(target).is_some_and(|outcome| !outcome.responded()))
            .collect();
        info!(
            "ICMP sweep complete: {} alive, {} silent",
            echo.len() - dead.len(),
            dead.len()
        );

        let rescue = self.rescue(&dead).await;
        self.reconcile(&echo, &rescue)
    }

    async fn ping_sweep(&self) -> HashMap<IpAddr, ProbeOutcome> {
        let units = self.targets.iter().map(|&target| (target, ())).collect();
        let icmp = Arc::clone(&self.icmp);

        self.execute("Pinging", units, move |target, ()| {
            let icmp = Arc::clone(&icmp);
            async move { icmp.probe(target).await.map(ProbeOutcome::echo) }
        })
        .await
        .into_iter()
        .map(|(target, _, outcome)| (target, outcome))
        .collect()
    }

    async fn rescue(&self, dead: &[IpAddr]) -> HashMap<(IpAddr, RescueProtocol), ProbeOutcome> {
        let mut protocols = Vec::with_capacity(2);
        if !self.tcp_ports.is_empty() {
            protocols.push(RescueProtocol::Tcp);
        }
        if !self.udp_ports.is_empty() {
            protocols.push(RescueProtocol::Udp);
        }
        if dead.is_empty() || protocols.is_empty() {
            return HashMap::new();
        }

        if !self.config.inter_phase_delay.is_zero() {
            debug!("Waiting {:?} before the rescue phase", self.config.inter_phase_delay);
            tokio::select! {
                () = self.cancel.cancelled() => return HashMap::new(),
                () = time::sleep(self.config.inter_phase_delay) => {}
            }
        }

        let units = dead
            .iter()
            .cartesian_product(protocols)
            .map(|(&target, protocol)| (target, protocol))
            .collect();
        let (tcp, udp) = (Arc::clone(&self.tcp), Arc::clone(&self.udp));
        let (tcp_ports, udp_ports) = (Arc::clone(&self.tcp_ports), Arc::clone(&self.udp_ports));

        self.execute("Rescue", units, move |target, protocol| {
            let (prober, ports) = match protocol {
                RescueProtocol::Tcp => (Arc::clone(&tcp), Arc::clone(&tcp_ports)),
                RescueProtocol::Udp => (Arc::clone(&udp), Arc::clone(&udp_ports)),
            };
            async move { prober.probe(target, &ports).await.map(ProbeOutcome::ports) }
        })
        .await
        .into_iter()
        .map(|(target, protocol, outcome)| ((target, protocol), outcome))
        .collect()
    }

    /// Dispatches work units with at most `threads` in flight.
    ///
    /// Every unit runs in its own task so a panic stays inside it. A failed or
    /// panicked unit yields a negative outcome, an incomplete one keeps the
    /// ports it found, a cancelled one yields nothing. Each distinct failure is
    /// logged once after the phase.
    async fn execute<K, F, Fut>(
        &self,
        phase: &'static str,
        units: Vec<(IpAddr, K)>,
        mut work: F,
    ) -> Vec<(IpAddr, K, ProbeOutcome)>
    where
        K: Copy + Send + 'static,
        F: FnMut(IpAddr, K) -> Fut,
        Fut: Future<Output = Result<ProbeOutcome, ProbeError>> + Send + 'static,
    {
        let bar = self.progress_bar(phase, units.len());
        let mut errors: HashSet<String> = HashSet::new();
        let mut record_error = |err: ProbeError| match err {
            ProbeError::Incomplete { open, cause } => {
                errors.insert(cause.to_string());
                ProbeOutcome::ports(open)
            }
            err => {
                errors.insert(err.to_string());
                ProbeOutcome::default()
            }
        };

        let outcomes = stream::iter(units)
            .map(|(target, protocol)| {
                let probe = work(target, protocol);
                let cancel = self.cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        result = probe => Some(result),
                    }
                })
                .map(move |joined| (target, protocol, joined))
            })
            .buffer_unordered(self.config.threads)
            .filter_map(|(target, protocol, joined)| {
                bar.inc(1);
                let outcome = match joined {
                    Ok(Some(Ok(outcome))) => Some(outcome),
                    Ok(Some(Err(err))) => Some(record_error(err)),
                    Ok(None) => None,
                    Err(join_err) if join_err.is_cancelled() => None,
                    Err(join_err) => Some(record_error(ProbeError::from_join(join_err))),
                };
                future::ready(outcome.map(|outcome| (target, protocol, outcome)))
            })
            .collect::<Vec<_>>()
            .await;

        bar.finish_and_clear();
        for error in &errors {
            warn!("{phase}: {error}");
        }

        outcomes
    }

    /// Builds records for every target whose applicable phases all completed.
    fn reconcile(
        &self,
        echo: &HashMap<IpAddr, ProbeOutcome>,
        rescue: &HashMap<(IpAddr, RescueProtocol), ProbeOutcome>,
    ) -> ScanReport {
        let tcp_enabled = !self.tcp_ports.is_empty();
        let udp_enabled = !self.udp_ports.is_empty();
        let mut report = ScanReport::default();

        for &target in self.targets.iter() {
            let Some(icmp) = echo.get(&target) else {
                report.unfinished += 1;
                continue;
            };

            let tcp = rescue.get(&(target, RescueProtocol::Tcp));
            let udp = rescue.get(&(target, RescueProtocol::Udp));
            let pending = !icmp.responded()
                && ((tcp_enabled && tcp.is_none()) || (udp_enabled && udp.is_none()));
            if pending {
                report.unfinished += 1;
                continue;
            }

            report.records.push(aggregate(target, icmp, tcp, udp));
        }

        report.interrupted = self.cancel.is_cancelled() && report.unfinished > 0;
        if report.interrupted {
            warn!(
                "Run interrupted: {} of {} targets were not finalised",
                report.unfinished,
                self.targets.len()
            );
        }
        report
    }

    fn progress_bar(&self, phase: &'static str, len: usize) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }

        let style = ProgressStyle::with_template("{msg:>10} [{bar:40}] {pos}/{len} {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        ProgressBar::new(len as u64).with_style(style).with_message(phase)
    }
}
