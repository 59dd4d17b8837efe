use arm_inference_lib::{
    init_tracing, shutdown_on_ctrl_c, sleep_unless_shutdown, ActuatorGateway, ArmConfig,
    Register, SimulatedGateway,
};
use clap::Parser;
use eyre::{eyre, Result};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "position_monitor")]
#[command(about = "Print live actuator positions of an arm")]
struct Cli {
    #[arg(long, env = "ARM_CONFIG", default_value = "config/so101_leader.toml")]
    config: String,

    #[arg(long, env = "MONITOR_INTERVAL_MS", default_value_t = 100)]
    interval_ms: u64,

    /// Stop after this many samples instead of waiting for Ctrl-C
    #[arg(long, env = "MONITOR_SAMPLES")]
    samples: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let arm_config = ArmConfig::load_from_file(&cli.config)
        .map_err(|e| eyre!("Failed to load arm config from {}: {}", cli.config, e))?;

    let mut gateway = SimulatedGateway::new(&arm_config);
    gateway.connect()?;
    info!("Monitoring {} (Ctrl-C to stop)", arm_config.name);

    let result = monitor(&mut gateway, &cli).await;

    if gateway.is_connected() {
        if let Err(e) = gateway.disconnect() {
            warn!("Failed to disconnect {}: {}", arm_config.name, e);
        }
    }
    result
}

async fn monitor(gateway: &mut dyn ActuatorGateway, cli: &Cli) -> Result<()> {
    let mut shutdown = shutdown_on_ctrl_c();
    let interval = Duration::from_millis(cli.interval_ms);
    let ids = gateway.actuator_ids();
    let mut sample = 0u64;

    while cli.samples.map_or(true, |limit| sample < limit) {
        let mut line = Vec::with_capacity(ids.len());
        for id in &ids {
            let normalized = gateway.read(Register::PresentPosition, id, true)?;
            let raw = gateway.read(Register::PresentPosition, id, false)?;
            line.push(format!(
                "{}={:.1} ({})",
                id,
                normalized.as_f64(),
                raw.raw().unwrap_or_default()
            ));
        }
        info!("{}", line.join(" | "));
        sample += 1;

        if !sleep_unless_shutdown(interval, &mut shutdown).await {
            break;
        }
    }

    info!("Collected {} samples", sample);
    Ok(())
}
