//! Writes host records to the terminal and to a CSV file.
use crate::results::{HostRecord, ScanReport, Summary};
use colored::Colorize;
use std::io;
use std::path::Path;

pub const CSV_HEADER: [&str; 4] = ["IP", "Ping_Status", "Rescue_Source", "Open_Details"];

/// Writes `records` as CSV, header first, in the order given.
pub fn write_records<'a, W, I>(writer: W, records: I, live_only: bool) -> csv::Result<usize>
where
    W: io::Write,
    I: IntoIterator<Item = &'a HostRecord>,
{
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(CSV_HEADER)?;

    let mut written = 0;
    for record in records {
        if live_only && !record.is_live() {
            continue;
        }
        csv.write_record(record.fields())?;
        written += 1;
    }

    csv.flush()?;
    Ok(written)
}

/// Creates (or truncates) `path` and writes the report into it.
pub fn write_csv(path: &Path, report: &ScanReport, live_only: bool) -> csv::Result<usize> {
    let file = std::fs::File::create(path)?;
    write_records(file, &report.records, live_only)
}

/// One terminal line per record; live hosts are highlighted unless the
/// output is meant for grepping.
pub fn format_line(record: &HostRecord, greppable: bool) -> String {
    let line = record.to_string();
    if greppable {
        line
    } else if record.is_live() {
        line.green().to_string()
    } else {
        line.dimmed().to_string()
    }
}

/// End-of-run statistics block.
pub fn format_summary(summary: &Summary, report: &ScanReport) -> String {
    let mut out = format!(
        "Alive via ICMP: {}\nAlive via rescue: {}\nTotal live: {}\nDead: {}",
        summary.alive_icmp,
        summary.rescued,
        summary.total_live(),
        summary.dead
    );
    if report.interrupted {
        out.push_str(&format!(
            "\nInterrupted: {} targets were not finalised",
            report.unfinished
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{aggregate, ProbeOutcome};
    use std::net::IpAddr;

    fn report() -> ScanReport {
        let ip = |s: &str| s.parse::<IpAddr>().unwrap();
        let dead = ProbeOutcome::echo(false);
        let tcp = ProbeOutcome::ports([22, 443].into());
        let udp = ProbeOutcome::ports([161].into());
        ScanReport {
            records: vec![
                aggregate(ip("10.0.0.1"), &ProbeOutcome::echo(true), None, None),
                aggregate(ip("10.0.0.2"), &dead, Some(&tcp), Some(&udp)),
                aggregate(ip("10.0.0.3"), &dead, Some(&ProbeOutcome::default()), None),
            ],
            ..ScanReport::default()
        }
    }

    #[test]
    fn csv_quotes_multi_port_details() {
        let mut buf = Vec::new();
        let written = write_records(&mut buf, &report().records, false).unwrap();

        assert_eq!(written, 3);
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "IP,Ping_Status,Rescue_Source,Open_Details\n\
             10.0.0.1,Alive,ICMP,ICMP\n\
             10.0.0.2,Dead,TCP+UDP,\"TCP:22,443 | UDP:161\"\n\
             10.0.0.3,Dead,None,no response\n"
        );
    }

    #[test]
    fn live_only_drops_dead_hosts() {
        let mut buf = Vec::new();
        let written = write_records(&mut buf, &report().records, true).unwrap();

        assert_eq!(written, 2);
        assert!(!String::from_utf8(buf).unwrap().contains("10.0.0.3"));
    }

    #[test]
    fn empty_report_still_has_header() {
        let mut buf = Vec::new();
        write_records(&mut buf, &Vec::<HostRecord>::new(), false).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "IP,Ping_Status,Rescue_Source,Open_Details\n"
        );
    }

    #[test]
    fn greppable_lines_are_plain() {
        let report = report();
        assert_eq!(
            format_line(&report.records[0], true),
            "10.0.0.1, Alive, ICMP, ICMP"
        );
    }

    #[test]
    fn summary_mentions_interruption() {
        let mut report = report();
        report.interrupted = true;
        report.unfinished = 4;

        let text = format_summary(&report.summary(), &report);

        assert!(text.contains("Total live: 2"));
        assert!(text.contains("Dead: 1"));
        assert!(text.ends_with("4 targets were not finalised"));
    }
}
