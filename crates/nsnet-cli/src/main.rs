//! nsnet: build a namespace topology, probe it, tear it down.
//!
//! The topology comes from a TOML file or from `--ring`. Without either a
//! three-switch ring with one host per switch is used.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use nsnet_core::{NetConfig, Network, PingReport, SystemExecutor, TopoSpec};
use tracing_subscriber::EnvFilter;

const DEFAULT_RING_SWITCHES: usize = 3;

/// Namespace network emulator.
#[derive(Parser, Debug)]
#[command(name = "nsnet", about = "Build a virtual network in namespaces and ping across it")]
struct Cli {
    /// TOML file with `[settings]` and `[topology]` tables.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Build a ring of this many STP switches instead of the file's topology.
    #[arg(long)]
    ring: Option<usize>,

    /// Hosts attached to each ring switch.
    #[arg(long, default_value_t = 1)]
    hosts_per_switch: usize,

    /// Prefix every command with sudo.
    #[arg(long, default_value_t = false)]
    sudo: bool,

    /// Also report round-trip times per pair.
    #[arg(long, default_value_t = false)]
    full: bool,
}

fn load(cli: &Cli) -> anyhow::Result<NetConfig> {
    let mut config = match &cli.config {
        Some(path) => NetConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NetConfig::from_toml_str("")?,
    };

    let ring = match (cli.ring, cli.config.is_some()) {
        (Some(n), _) => Some(n),
        (None, false) => Some(DEFAULT_RING_SWITCHES),
        (None, true) => None,
    };
    if let Some(switches) = ring {
        config.topology = TopoSpec::ring(switches, cli.hosts_per_switch)?;
    }
    if cli.sudo {
        config.settings.use_sudo = true;
    }
    Ok(config)
}

fn print_report(report: &PingReport, full: bool) {
    for pair in &report.pairs {
        let s = &pair.stats;
        if full {
            println!(
                "{} <-> {}: {}/{} received, rtt min/avg/max/mdev = {:.3}/{:.3}/{:.3}/{:.3} ms",
                pair.src, pair.dst, s.received, s.sent, s.rtt_min, s.rtt_avg, s.rtt_max, s.rtt_mdev
            );
        } else {
            println!("{} <-> {}: {}/{} received", pair.src, pair.dst, s.received, s.sent);
        }
    }
    println!(
        "Results: {:.0}% dropped ({}/{} received)",
        report.dropped_percent(),
        report.received(),
        report.sent()
    );
}

fn run(cli: &Cli) -> anyhow::Result<bool> {
    let config = load(cli)?;
    tracing::info!(
        nodes = config.topology.nodes().len(),
        links = config.topology.links().len(),
        sudo = config.settings.use_sudo,
        "nsnet starting"
    );

    let executor = Arc::new(SystemExecutor::new(config.settings.use_sudo));
    let mut net = Network::from_topo(config.settings, executor, &config.topology)
        .context("building network")?;

    let outcome = probe(&mut net, cli.full);
    let teardown = net.stop().context("tearing down network");
    let report = outcome?;
    teardown?;

    print_report(&report, cli.full);
    Ok(!report.lost_any())
}

fn probe(net: &mut Network, full: bool) -> anyhow::Result<PingReport> {
    net.start().context("starting network")?;
    if !net.wait_connected()? {
        tracing::warn!("switches did not converge before the timeout; probing anyway");
    }
    let report = if full {
        net.ping_all_full()?
    } else {
        net.ping_all()?
    };
    Ok(report)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::from(2)
        }
    }
}
