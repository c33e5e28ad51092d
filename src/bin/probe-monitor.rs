use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use probe_monitor::{
    Monitor,
    config::{Config, read_config_file},
    probes::ProcessProbe,
};
use tracing::{debug, error, info, instrument, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Number of simulated send cycles (0 = until interrupted)
    #[arg(long, default_value_t = 10)]
    cycles: u64,

    /// Pause between two cycles, in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Feedback window between the after-send and after-timeout hooks, in milliseconds
    #[arg(long, default_value_t = 200)]
    feedback_ms: u64,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![("probe_monitor", LevelFilter::TRACE)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    let mut monitor = build_monitor(&config)?;

    monitor.start();
    if !monitor.start_all_probes() {
        warn!("some probes failed to start");
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let mut cycles = tokio::task::spawn_blocking({
        let interrupted = interrupted.clone();
        move || {
            run_cycles(&mut monitor, &args, &interrupted);
            monitor.stop();
        }
    });

    tokio::select! {
        result = &mut cycles => {
            result?;
            return Ok(());
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("failed to listen for ctrl-c: {e}");
            }
            info!("interrupted, stopping monitor");
            interrupted.store(true, Ordering::SeqCst);
        }
    }

    // the current cycle finishes, then the monitor stops its probes
    cycles.await?;
    Ok(())
}

fn build_monitor(config: &Config) -> anyhow::Result<Monitor> {
    let settings = config.monitor.clone().unwrap_or_default();
    let mut monitor = Monitor::new(&settings);

    for probe in config.probes.iter().flatten() {
        debug!(probe = %probe.name(), process = %probe.process_name, "registering probe");
        monitor.add_probe(ProcessProbe::from_config(probe), probe.mode())?;
    }

    Ok(monitor)
}

/// Drive the monitor the way a fuzzing engine would around each test input
#[instrument(skip_all)]
fn run_cycles(monitor: &mut Monitor, args: &Args, interrupted: &AtomicBool) {
    let mut cycle = 0;

    while !interrupted.load(Ordering::SeqCst) && (args.cycles == 0 || cycle < args.cycles) {
        cycle += 1;

        monitor.do_before_sending_data();
        trace!(cycle, "test input sent");
        monitor.do_after_sending_data();

        std::thread::sleep(Duration::from_millis(args.feedback_ms));
        monitor.do_after_timeout();

        let status = monitor.target_status();
        if status.is_ok() {
            info!(cycle, "target status: {}", status.code());
        } else {
            warn!(cycle, "target status: {} (target degraded)", status.code());
            for name in monitor.get_probes_names() {
                if let Ok(probe_status) = monitor.get_probe_status(&name) {
                    warn!(probe = %name, code = ?probe_status.code, info = ?probe_status.info);
                }
            }
        }

        std::thread::sleep(Duration::from_millis(args.interval_ms));
    }
}
