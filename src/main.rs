mod collectors;
mod config;
mod error;
mod models;
mod monitor;
mod registry;
mod spindown;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use collectors::diskstats::DiskstatsFeed;
use config::Config;
use monitor::IdleMonitor;
use registry::DeviceRegistry;
use spindown::{CommandSpinDown, DryRunSpinDown};
use std::io::{Read, Seek};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "spindownd",
    about = "Spin down disks that have seen no I/O for a while",
    version
)]
struct Cli {
    /// Block devices to watch (overrides [devices] paths from the config file)
    #[arg(value_name = "DISK")]
    disks: Vec<PathBuf>,

    /// How long a disk needs to be idle, e.g. 10m, 1h30m, 600
    #[arg(short, long, value_name = "DURATION")]
    idle: Option<String>,

    /// Config file (default: ~/.config/spindownd/spindownd.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Counters feed to sample
    #[arg(long, value_name = "PATH")]
    diskstats: Option<PathBuf>,

    /// Log idle disks instead of spinning them down
    #[arg(long)]
    dry_run: bool,

    /// Print one JSON sample of the watched disks and exit
    #[arg(long)]
    once: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Print a shell completion script and exit
    #[arg(long, value_name = "SHELL")]
    completions: Option<Shell>,

    /// Log every sample, not just spin-downs
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli) {
        error!("{:#}", err);
        // Usage problems exit 2, everything else 1.
        let code = match err.downcast_ref::<error::MonitorError>() {
            Some(error::MonitorError::Config(_)) => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "spindownd=debug" } else { "spindownd=info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<()> {
    if let Some(shell) = cli.completions {
        clap_complete::generate(shell, &mut Cli::command(), "spindownd", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = effective_config(&cli)?;

    if cli.print_config {
        print!("{}", cfg.to_toml()?);
        return Ok(());
    }

    cfg.validate()?;
    let interval = cfg.interval()?;

    let mut registry = DeviceRegistry::from_paths(cfg.devices.paths.as_slice())?;
    for dev in registry.devices() {
        info!(device = %dev.name, id = %dev.id, "watching");
    }

    let feed = DiskstatsFeed::open(&cfg.general.diskstats)?;

    if cli.once {
        return print_snapshot(&registry, feed);
    }

    let result = if cli.dry_run {
        IdleMonitor::new(&mut registry, feed, DryRunSpinDown, interval).run()
    } else {
        let action = CommandSpinDown::new(cfg.spindown.command.clone(), cfg.spindown.args.clone());
        IdleMonitor::new(&mut registry, feed, action, interval).run()
    };
    result.context("monitoring stopped")
}

/// Config file with command-line overrides applied on top.
fn effective_config(cli: &Cli) -> Result<Config> {
    let mut cfg = Config::load(cli.config.as_deref())?;
    if !cli.disks.is_empty() {
        cfg.devices.paths = cli.disks.clone();
    }
    if let Some(idle) = &cli.idle {
        cfg.general.idle = idle.clone();
    }
    if let Some(path) = &cli.diskstats {
        cfg.general.diskstats = path.clone();
    }
    Ok(cfg)
}

fn print_snapshot(registry: &DeviceRegistry, mut feed: DiskstatsFeed<std::fs::File>) -> Result<()> {
    let snapshot = snapshot_json(registry, &mut feed)?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// One sample of every tracked device; devices missing from the feed are
/// listed with `"present": false`.
fn snapshot_json<R: Read + Seek>(
    registry: &DeviceRegistry,
    feed:     &mut DiskstatsFeed<R>,
) -> Result<serde_json::Value> {
    use serde_json::{json, Value};

    let records = feed.read_all()?;
    let devices: Vec<Value> = registry.devices().iter().map(|dev| {
        match records.iter().find(|r| r.id == dev.id) {
            Some(rec) => json!({
                "name":        dev.name,
                "kernel_name": rec.name,
                "major":       dev.id.major(),
                "minor":       dev.id.minor(),
                "present":     true,
                "reads":       rec.counters.reads,
                "writes":      rec.counters.writes,
                "in_progress": rec.in_progress,
            }),
            None => json!({
                "name":    dev.name,
                "major":   dev.id.major(),
                "minor":   dev.id.minor(),
                "present": false,
            }),
        }
    }).collect();

    Ok(json!({
        "timestamp": chrono::Local::now().to_rfc3339(),
        "diskstats": feed.path(),
        "devices":   devices,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config() {
        let cli = Cli::parse_from([
            "spindownd", "--idle", "20m", "--diskstats", "/tmp/diskstats",
            "--config", "/nonexistent/spindownd.toml", "/dev/sda",
        ]);
        // The explicit config file is missing, so loading fails before any override.
        assert!(effective_config(&cli).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"[devices]\npaths = [\"/dev/sdz\"]\n").unwrap();
        let config = file.path().display().to_string();
        let cli = Cli::parse_from([
            "spindownd", "--idle", "20m", "--config", config.as_str(), "/dev/sda", "/dev/sdb",
        ]);
        let cfg = effective_config(&cli).unwrap();
        assert_eq!(cfg.devices.paths, [PathBuf::from("/dev/sda"), PathBuf::from("/dev/sdb")]);
        assert_eq!(cfg.interval().unwrap(), std::time::Duration::from_secs(1200));
    }

    #[test]
    fn config_devices_used_without_positional_args() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"[devices]\npaths = [\"/dev/sdz\"]\n").unwrap();
        let config = file.path().display().to_string();
        let cli = Cli::parse_from(["spindownd", "-c", config.as_str()]);
        let cfg = effective_config(&cli).unwrap();
        assert_eq!(cfg.devices.paths, [PathBuf::from("/dev/sdz")]);
        assert_eq!(cfg.general.idle, "10m");
    }

    #[test]
    fn snapshot_reports_present_and_missing_devices() {
        use crate::models::device::DeviceId;
        use serde_json::json;

        let mut registry = DeviceRegistry::new();
        registry.insert("/dev/sda".into(), DeviceId::new(8, 0));
        registry.insert("/dev/sdc".into(), DeviceId::new(8, 32));
        let text = "8 0 sda 100 0 0 0 50 0 0 0 2 0 0\n8 16 sdb 7 0 0 0 7 0 0 0 0 0 0\n";
        let mut feed = DiskstatsFeed::new("/proc/diskstats", std::io::Cursor::new(text));

        let snap = snapshot_json(&registry, &mut feed).unwrap();
        assert_eq!(snap["diskstats"], "/proc/diskstats");
        assert!(snap["timestamp"].is_string());
        assert_eq!(snap["devices"], json!([
            {
                "name": "/dev/sda", "kernel_name": "sda", "major": 8, "minor": 0,
                "present": true, "reads": 100, "writes": 50, "in_progress": 2
            },
            { "name": "/dev/sdc", "major": 8, "minor": 32, "present": false }
        ]));
    }

    #[test]
    fn snapshot_fails_on_malformed_feed() {
        let mut registry = DeviceRegistry::new();
        registry.insert("/dev/sda".into(), crate::models::device::DeviceId::new(8, 0));
        let mut feed = DiskstatsFeed::new("test", std::io::Cursor::new("8 0 sda 1 2\n"));
        let err = snapshot_json(&registry, &mut feed).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<error::MonitorError>(),
            Some(error::MonitorError::FeedParse { line_no: 1, .. })
        ));
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
