use anyhow::Context;
use colored::Colorize;
use liveipfinder::address::read_targets;
use liveipfinder::input::{Config, Opts, ScanConfig};
use liveipfinder::output::{format_line, format_summary, write_csv};
use liveipfinder::scanner::Scanner;
use log::{debug, info, warn};

/// Descriptors a single work unit may hold at once (one socket plus slack for
/// the system `ping` child).
const FDS_PER_WORKER: u64 = 4;
/// Descriptors reserved for stdio, the CSV file and the runtime.
const RESERVED_FDS: u64 = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut opts: Opts = Opts::read();
    init_logging(opts.verbose);

    let config = Config::read(opts.config_path.clone())?;
    opts.merge(&config);

    debug!("Main() `opts` arguments are {opts:?}");

    let scan_config: ScanConfig = opts.scan_config()?;

    if !opts.greppable {
        print_opening(&opts, &scan_config);
    }

    let targets = read_targets(&opts).await?;

    adjust_ulimit_size(&opts, &scan_config);

    let scanner = Scanner::new(targets, scan_config)
        .await?
        .with_progress(!opts.greppable);
    info!("Probing {} targets", scanner.targets().len());

    let cancel = scanner.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight probes");
            cancel.cancel();
        }
    });

    let report = scanner.run().await;

    for record in &report.records {
        println!("{}", format_line(record, opts.greppable));
    }

    let written = write_csv(&opts.output, &report, opts.live_only)
        .with_context(|| format!("could not write {}", opts.output.display()))?;
    info!("Wrote {written} records to {}", opts.output.display());

    if !opts.greppable {
        println!();
        println!("{}", format_summary(&report.summary(), &report).bold());
        println!(
            "{} {}",
            "Results saved to".blue(),
            opts.output.display().to_string().bold()
        );
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

/// Prints the opening title of the run.
fn print_opening(opts: &Opts, config: &ScanConfig) {
    let title = "liveipfinder: ping sweep with TCP/UDP rescue".bold().green();
    println!("{title}");
    println!(
        "{} threads {}, timeout {:?}, TCP ports {}, UDP ports {} (retries {})",
        "[~]".blue(),
        config.threads,
        config.timeout,
        config.tcp_ports.len(),
        config.udp_ports.len(),
        config.udp.retries
    );
    if let Some(path) = &opts.input_file {
        println!("{} targets from {}", "[~]".blue(), path.display());
    }
}

/// Raises the open-file limit so `threads` concurrent work units fit.
///
/// An explicit `--ulimit` wins; otherwise the soft limit is raised towards
/// what the worker count needs, capped by the hard limit.
#[cfg(unix)]
fn adjust_ulimit_size(opts: &Opts, config: &ScanConfig) {
    use rlimit::Resource;

    if let Some(limit) = opts.ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            info!("Automatically increasing ulimit value to {limit}");
        } else {
            warn!("Failed to set ulimit value {limit}");
        }
        return;
    }

    let wanted = (config.threads as u64)
        .saturating_mul(FDS_PER_WORKER)
        .saturating_add(RESERVED_FDS);

    match Resource::NOFILE.get() {
        Ok((soft, hard)) if soft < wanted => {
            let target = wanted.min(hard);
            if Resource::NOFILE.set(target, hard).is_ok() {
                debug!("Raised open-file soft limit from {soft} to {target}");
            }
            if target < wanted {
                warn!(
                    "Open-file limit {target} is low for {} threads; lower --threads or raise --ulimit",
                    config.threads
                );
            }
        }
        Ok(_) => {}
        Err(e) => warn!("Could not read the open-file limit: {e}"),
    }
}

#[cfg(not(unix))]
fn adjust_ulimit_size(_opts: &Opts, _config: &ScanConfig) {}
