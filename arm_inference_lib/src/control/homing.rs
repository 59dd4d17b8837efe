use std::time::Duration;
use tracing::{debug, info};

use crate::gateway::{read_raw_positions, write_raw_goal, ActuatorGateway};
use crate::types::{ActuatorState, ConfigurationError, HomingConfig, HomingError};
use crate::utils::plan;

/// Poses visited by a homing run, in raw ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomingReport {
    /// Where the arm was before homing; also where it ends up.
    pub rest: ActuatorState,
    /// Midpoint of every actuator's calibration range.
    pub zero: ActuatorState,
}

/// Drives an arm to the middle of its calibrated ranges and back.
pub struct HomingRoutine {
    config: HomingConfig,
}

impl HomingRoutine {
    pub fn new(config: HomingConfig) -> Result<Self, ConfigurationError> {
        if config.steps == 0 {
            return Err(ConfigurationError::InvalidStepCount(config.steps));
        }
        Ok(Self { config })
    }

    pub async fn run<G: ActuatorGateway + ?Sized>(&self, gateway: &mut G) -> Result<HomingReport, HomingError> {
        let calibration = gateway.read_calibration()?;
        let rest = read_raw_positions(gateway)?;

        let mut zero = ActuatorState::new();
        for (id, position) in rest.iter() {
            let range = calibration
                .get(id)
                .ok_or_else(|| ConfigurationError::MissingCalibration(id.to_string()))?;
            let midpoint = range.zero_position();
            info!("{}: rest {} -> zero {}", id, position, midpoint);
            zero.insert(id, midpoint);
        }

        info!("Moving to zero position");
        self.move_to(gateway, &zero).await?;

        info!("Returning to rest position");
        self.move_to(gateway, &rest).await?;

        info!("Homing complete");
        Ok(HomingReport { rest, zero })
    }

    async fn move_to<G: ActuatorGateway + ?Sized>(&self, gateway: &mut G, goal: &ActuatorState) -> Result<(), HomingError> {
        let current = read_raw_positions(gateway)?;
        let trajectory = plan(&current, goal, self.config.steps)?;

        for (i, pose) in trajectory.iter().enumerate() {
            write_raw_goal(gateway, pose)?;
            debug!("Step {}/{}: {:?}", i + 1, trajectory.len(), pose);
            pause(self.config.step_delay).await;
        }
        pause(self.config.settle_delay).await;
        Ok(())
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
