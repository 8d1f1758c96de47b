//! End-to-end discovery runs over the public API with scripted probers.

use async_trait::async_trait;
use liveipfinder::error::{ConfigError, ProbeError};
use liveipfinder::input::ScanConfig;
use liveipfinder::output::write_csv;
use liveipfinder::port_strategy::PortSpec;
use liveipfinder::results::{PingStatus, RescueSource};
use liveipfinder::scanner::{EchoProbe, PortProbe, Scanner};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[derive(Default)]
struct ScriptedEcho {
    alive: HashSet<IpAddr>,
    calls: AtomicUsize,
}

#[async_trait]
impl EchoProbe for ScriptedEcho {
    async fn probe(&self, target: IpAddr) -> Result<bool, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.alive.contains(&target))
    }
}

/// Answers with the scripted open ports and records every target it was asked
/// about.
#[derive(Default)]
struct ScriptedPorts {
    open: HashMap<IpAddr, Vec<u16>>,
    probed: Mutex<Vec<IpAddr>>,
}

#[async_trait]
impl PortProbe for ScriptedPorts {
    async fn probe(&self, target: IpAddr, ports: &PortSpec) -> Result<BTreeSet<u16>, ProbeError> {
        self.probed.lock().unwrap().push(target);
        Ok(self
            .open
            .get(&target)
            .into_iter()
            .flatten()
            .copied()
            .filter(|port| ports.as_slice().contains(port))
            .collect())
    }
}

struct Network {
    echo: Arc<ScriptedEcho>,
    tcp: Arc<ScriptedPorts>,
    udp: Arc<ScriptedPorts>,
}

impl Network {
    /// 10.0.0.1 pings, .2 has SSH, .3 has SNMP, .4 has HTTPS and SNMP, .5 is dark.
    fn office() -> Self {
        Self {
            echo: Arc::new(ScriptedEcho {
                alive: [ip("10.0.0.1")].into(),
                ..ScriptedEcho::default()
            }),
            tcp: Arc::new(ScriptedPorts {
                open: [(ip("10.0.0.2"), vec![22]), (ip("10.0.0.4"), vec![443])].into(),
                ..ScriptedPorts::default()
            }),
            udp: Arc::new(ScriptedPorts {
                open: [(ip("10.0.0.3"), vec![161]), (ip("10.0.0.4"), vec![161])].into(),
                ..ScriptedPorts::default()
            }),
        }
    }

    fn scanner(&self, targets: &[&str], config: ScanConfig) -> Result<Scanner, ConfigError> {
        Scanner::with_probers(
            targets.iter().map(|t| ip(t)).collect(),
            config,
            Arc::clone(&self.echo) as Arc<dyn EchoProbe>,
            Arc::clone(&self.tcp) as Arc<dyn PortProbe>,
            Arc::clone(&self.udp) as Arc<dyn PortProbe>,
        )
    }
}

fn config(tcp: &[u16], udp: &[u16]) -> ScanConfig {
    ScanConfig {
        threads: 2,
        tcp_ports: PortSpec::new(tcp.iter().copied()).unwrap(),
        udp_ports: PortSpec::new(udp.iter().copied()).unwrap(),
        ..ScanConfig::default()
    }
}

const OFFICE: [&str; 5] = ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5"];

#[tokio::test]
async fn classifies_every_kind_of_host() {
    let network = Network::office();
    let report = network
        .scanner(&OFFICE, config(&[22, 443], &[161]))
        .unwrap()
        .run()
        .await;

    let lines: Vec<String> = report.records.iter().map(ToString::to_string).collect();
    assert_eq!(
        lines,
        [
            "10.0.0.1, Alive, ICMP, ICMP",
            "10.0.0.2, Dead, TCP, 22",
            "10.0.0.3, Dead, UDP, 161",
            "10.0.0.4, Dead, TCP+UDP, TCP:443 | UDP:161",
            "10.0.0.5, Dead, None, no response",
        ]
    );

    let summary = report.summary();
    assert_eq!((summary.alive_icmp, summary.rescued, summary.dead), (1, 3, 1));
}

#[tokio::test]
async fn one_record_per_target_with_matching_address() {
    let network = Network::office();
    let report = network
        .scanner(&OFFICE, config(&[22], &[161]))
        .unwrap()
        .run()
        .await;

    assert_eq!(report.records.len(), OFFICE.len());
    for (record, target) in report.records.iter().zip(OFFICE) {
        assert_eq!(record.target(), ip(target));
    }
}

#[tokio::test]
async fn icmp_alive_hosts_see_no_rescue_traffic() {
    let network = Network::office();
    network
        .scanner(&OFFICE, config(&[22], &[161]))
        .unwrap()
        .run()
        .await;

    assert_eq!(network.echo.calls.load(Ordering::SeqCst), OFFICE.len());
    assert!(!network.tcp.probed.lock().unwrap().contains(&ip("10.0.0.1")));
    assert!(!network.udp.probed.lock().unwrap().contains(&ip("10.0.0.1")));
    assert_eq!(network.tcp.probed.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn disabled_tcp_never_appears_as_a_source() {
    let network = Network::office();
    let report = network
        .scanner(&OFFICE, config(&[], &[161]))
        .unwrap()
        .run()
        .await;

    assert!(report
        .records
        .iter()
        .all(|record| !record.rescue_source().includes_tcp()));
    assert_eq!(report.records[1].rescue_source(), RescueSource::None);
    assert_eq!(report.records[3].rescue_source(), RescueSource::Udp);
}

#[tokio::test]
async fn all_rescue_disabled_leaves_dead_hosts_dead() {
    let network = Network::office();
    let report = network
        .scanner(&OFFICE, config(&[], &[]))
        .unwrap()
        .run()
        .await;

    assert!(network.tcp.probed.lock().unwrap().is_empty());
    assert!(network.udp.probed.lock().unwrap().is_empty());
    assert_eq!(report.records[0].ping_status(), PingStatus::Alive);
    assert_eq!(report.live_records().count(), 1);
}

#[tokio::test]
async fn identical_inputs_give_identical_reports() {
    let first = Network::office()
        .scanner(&OFFICE, config(&[22, 443], &[161]))
        .unwrap()
        .run()
        .await;
    let second = Network::office()
        .scanner(&OFFICE, config(&[22, 443], &[161]))
        .unwrap()
        .run()
        .await;

    assert_eq!(first, second);
}

#[test]
fn empty_target_set_fails_before_scheduling() {
    let network = Network::office();
    assert!(matches!(
        network.scanner(&[], config(&[22], &[])),
        Err(ConfigError::NoTargets)
    ));
    assert_eq!(network.echo.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn csv_report_matches_terminal_records() {
    let network = Network::office();
    let report = network
        .scanner(&OFFICE, config(&[22, 443], &[161]))
        .unwrap()
        .run()
        .await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live_ips.csv");

    let written = write_csv(&path, &report, true).unwrap();
    let contents = fs::read_to_string(&path).unwrap();

    assert_eq!(written, 4);
    assert_eq!(
        contents,
        "IP,Ping_Status,Rescue_Source,Open_Details\n\
         10.0.0.1,Alive,ICMP,ICMP\n\
         10.0.0.2,Dead,TCP,22\n\
         10.0.0.3,Dead,UDP,161\n\
         10.0.0.4,Dead,TCP+UDP,TCP:443 | UDP:161\n"
    );
}
