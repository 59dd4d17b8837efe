use arm_inference_lib::{
    init_tracing, ActuatorGateway, ArmConfig, HomingConfig, HomingRoutine, SimulatedGateway,
};
use clap::Parser;
use eyre::{eyre, Result};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "arm_homing")]
#[command(about = "Move an arm to the middle of its calibrated ranges and back to rest")]
struct Cli {
    #[arg(long, env = "ARM_CONFIG", default_value = "config/so101_follower.toml")]
    config: String,

    /// Interpolation steps per move
    #[arg(long, env = "HOMING_STEPS", default_value_t = 10)]
    steps: u32,

    #[arg(long, env = "HOMING_STEP_DELAY_MS", default_value_t = 500)]
    step_delay_ms: u64,

    #[arg(long, env = "HOMING_SETTLE_MS", default_value_t = 2000)]
    settle_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let arm_config = ArmConfig::load_from_file(&cli.config)
        .map_err(|e| eyre!("Failed to load arm config from {}: {}", cli.config, e))?;
    let routine = HomingRoutine::new(HomingConfig {
        steps: cli.steps,
        step_delay: Duration::from_millis(cli.step_delay_ms),
        settle_delay: Duration::from_millis(cli.settle_ms),
    })?;

    let mut gateway = SimulatedGateway::new(&arm_config);
    gateway.connect()?;
    info!("Connected to {}", arm_config.name);

    let result = routine.run(&mut gateway).await;

    if gateway.is_connected() {
        if let Err(e) = gateway.disconnect() {
            warn!("Failed to disconnect {}: {}", arm_config.name, e);
        }
    }

    let report = result?;
    for (id, zero) in report.zero.iter() {
        info!(
            "{:<14} zero {:>5}  rest {:>5}",
            id,
            zero,
            report.rest.get(id).unwrap_or_default()
        );
    }
    Ok(())
}
