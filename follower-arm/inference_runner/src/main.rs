use arm_inference_lib::{
    init_tracing, shutdown_on_ctrl_c, ActuatorGateway, ArmConfig, ClientConfig, ControlLoop,
    InferenceSession, LoopConfig, LoopError, LoopExit, PerformanceSummary, SimulatedGateway,
};
use clap::Parser;
use eyre::{eyre, Result, WrapErr};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "inference_runner")]
#[command(about = "Drive the follower arm from a remote policy")]
struct Cli {
    /// Task description forwarded to the policy with every observation
    #[arg(long, env = "TASK")]
    task: Option<String>,

    /// Run length in seconds
    #[arg(long, env = "INFERENCE_TIME", default_value_t = 30)]
    inference_time: u32,

    #[arg(long, env = "FPS", default_value_t = 25)]
    fps: u32,

    /// Compute device requested from the inference service
    #[arg(long, env = "DEVICE", default_value = "mps")]
    device: String,

    #[arg(long, env = "ROBOT_TYPE", default_value = "so101_follower")]
    robot_type: String,

    /// Recreated on startup; receives summary.json
    #[arg(long, env = "OUTPUT_DIR", default_value = "images")]
    output_dir: PathBuf,

    #[arg(long, env = "INFERENCE_URL", default_value = "ws://localhost:8765")]
    endpoint: String,

    /// Arm description, defaults to config/<robot_type>.toml
    #[arg(long, env = "ARM_CONFIG")]
    config: Option<String>,

    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 1000)]
    request_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| format!("config/{}.toml", cli.robot_type));
    let arm_config = ArmConfig::load_from_file(&config_path)
        .map_err(|e| eyre!("Failed to load arm config from {}: {}", config_path, e))?;
    if arm_config.robot_type != cli.robot_type {
        warn!(
            "Config {} describes a {}, running as {}",
            config_path, arm_config.robot_type, cli.robot_type
        );
    }

    let loop_config = LoopConfig::new(cli.fps, cli.inference_time).with_task(cli.task.clone());
    loop_config.validate()?;

    prepare_output_dir(&cli.output_dir)?;

    let mut gateway = SimulatedGateway::new(&arm_config);
    gateway.connect()?;
    info!(
        "Robot connected: {} ({} actuators)",
        arm_config.name,
        arm_config.actuators.len()
    );

    let client_config = ClientConfig {
        request_timeout: Duration::from_millis(cli.request_timeout_ms),
        action_dim: Some(arm_config.actuators.len()),
        robot_type: Some(cli.robot_type.clone()),
        device: Some(cli.device.clone()),
        ..Default::default()
    };
    let session = match InferenceSession::open(&cli.endpoint, client_config).await {
        Ok(session) => session,
        Err(e) => {
            if let Err(disconnect_err) = gateway.disconnect() {
                warn!("Failed to disconnect robot: {}", disconnect_err);
            }
            return Err(eyre!("Failed to connect to inference service at {}: {}", cli.endpoint, e));
        }
    };
    info!(
        "Policy: {}",
        session.policy_name().unwrap_or("unnamed")
    );

    let mut control_loop = ControlLoop::new(loop_config, gateway, session)?;
    match control_loop.run(shutdown_on_ctrl_c()).await {
        Ok(report) => {
            write_summary(&cli.output_dir, &report.summary)?;
            if report.exit == LoopExit::Cancelled {
                info!("Inference stopped by user");
            }
            Ok(())
        }
        Err(LoopError::Gateway { step, summary, source }) => {
            write_summary(&cli.output_dir, &summary)?;
            error!("Robot connection lost at step {}", step);
            Err(eyre!("Actuator gateway failed at step {}: {}", step, source))
        }
        Err(e) => Err(e.into()),
    }
}

fn prepare_output_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .wrap_err_with(|| format!("Failed to clear output directory {}", dir.display()))?;
    }
    fs::create_dir_all(dir)
        .wrap_err_with(|| format!("Failed to create output directory {}", dir.display()))?;
    Ok(())
}

fn write_summary(dir: &Path, summary: &PerformanceSummary) -> Result<()> {
    let path = dir.join("summary.json");
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(&path, json).wrap_err_with(|| format!("Failed to write {}", path.display()))?;
    info!("Summary written to {}", path.display());
    Ok(())
}
