use std::process::exit;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod exporter;
mod iface;
mod lists;
mod loader;
mod maps;
mod registry;
mod resolver;

use exporter::{EXPORT_INTERVAL, Exporter};
use lists::ListSources;
use loader::{Firewall, FirewallMaps};
use maps::StatsArray;
use registry::DomainRegistry;
use resolver::Resolver;

#[derive(Parser)]
#[command(name = "ebaf")]
#[command(about = "eBPF ad firewall", long_about = None)]
struct Cli {
    /// Interface to attach to; auto-selected from the default route when omitted
    interface: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(Cli::parse()) {
        error!("{err:#}");
        exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let iface = iface::select(cli.interface)?;
    info!("using interface {iface}");

    loader::raise_memlock_limit();
    let artifact = loader::find_artifact()?;
    let (mut firewall, maps) = Firewall::load(&artifact)?;
    let FirewallMaps {
        mut block_set,
        allow_set,
        stats,
    } = maps;

    let ListSources {
        seed_ips,
        domains,
        patterns,
    } = ListSources::discover()?;

    for ip in &seed_ips {
        if let Err(err) = block_set.insert(*ip) {
            debug!("failed to seed {ip}: {err:#}");
        }
    }

    let registry = Arc::new(DomainRegistry::new());
    for name in &domains {
        if let Err(err) = registry.add(name) {
            warn!("not registering {name}: {err}");
        }
    }
    info!(
        "registered {} domains for periodic resolution",
        registry.len()
    );

    // First resolution runs inline so the filter is populated before the
    // classifier sees its first packet.
    let mut resolver = Resolver::new(
        registry.clone(),
        block_set,
        allow_set,
        domains,
        patterns,
    );
    resolver.run_iteration();

    let blocked = resolver.blocked_addrs();
    info!("block_set holds {} addresses after initial seed", blocked.len());
    for addr in &blocked {
        debug!("blocked {addr}");
    }

    firewall.attach(&iface)?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::Relaxed);
    })
    .context("failed to install signal handler")?;

    let resolver_handle = resolver::spawn(resolver, running.clone())?;

    let exporter = Exporter::new();
    info!("ebaf running, blocking enabled on {iface}");
    while running.load(Ordering::Relaxed) {
        export_tick(&exporter, &stats, &registry);
        resolver::sleep_sliced(&running, EXPORT_INTERVAL);
    }

    info!("shutting down");
    if resolver_handle.join().is_err() {
        warn!("resolver thread panicked during shutdown");
    }
    if let Err(err) = firewall.detach() {
        warn!("detach failed: {err:#}");
    }
    export_tick(&exporter, &stats, &registry);
    info!("clean shutdown");
    Ok(())
}

fn export_tick(exporter: &Exporter, stats: &StatsArray, registry: &DomainRegistry) {
    let counters = stats
        .total()
        .and_then(|total| stats.blocked().map(|blocked| (total, blocked)));
    match counters {
        Ok((total, blocked)) => {
            if let Err(err) = exporter.export(total, blocked, &registry.snapshot_for_export()) {
                warn!("stats export failed: {err}");
            }
        }
        Err(err) => warn!("failed to read stats counters: {err:#}"),
    }
}
