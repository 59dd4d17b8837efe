//! Fixed-rate observe → infer → act loop.
//!
//! One cycle at a time: capture every actuator's normalized position (plus
//! auxiliary sensors), ask the policy for an action, write it as goal
//! positions, then sleep out the rest of the frame budget. Inference
//! failures are counted and skipped; actuator failures end the run.

use chrono::Local;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::control::reporter::PerformanceReporter;
use crate::gateway::ActuatorGateway;
use crate::inference::{ConnectionState, PolicyClient};
use crate::types::{
    Action, ActuatorValue, ConfigurationError, CycleStats, GatewayError, InferenceError,
    LoopConfig, LoopError, Observation, PerformanceSummary, Register, RunningStats, Tensor,
    STATE_KEY,
};
use crate::utils::{shutdown_requested, sleep_unless_shutdown, wait_for_shutdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Draining,
    Terminated,
}

/// Why a run ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct LoopReport {
    pub exit: LoopExit,
    pub summary: PerformanceSummary,
}

enum CycleOutcome {
    Dispatched,
    Failed(InferenceError),
    Cancelled,
}

pub struct ControlLoop<G: ActuatorGateway, P: PolicyClient> {
    config: LoopConfig,
    gateway: G,
    policy: P,
    state: LoopState,
    actuator_ids: Vec<String>,
    reporter: PerformanceReporter,
}

impl<G: ActuatorGateway, P: PolicyClient> ControlLoop<G, P> {
    pub fn new(config: LoopConfig, gateway: G, policy: P) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            config,
            gateway,
            policy,
            state: LoopState::Idle,
            actuator_ids: Vec::new(),
            reporter: PerformanceReporter::new(),
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Runs until every step is done, `shutdown` flips to `true`, or the
    /// gateway fails. The policy session and the gateway are released on
    /// every path that reached `Running`.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<LoopReport, LoopError> {
        if self.state != LoopState::Idle {
            return Err(LoopError::NotReady(format!("control loop is {:?}", self.state)));
        }
        if !self.gateway.is_connected() {
            return Err(LoopError::NotReady("actuator gateway is not connected".to_string()));
        }
        let policy_state = self.policy.state();
        if policy_state != ConnectionState::Ready {
            return Err(LoopError::NotReady(format!("inference session is {:?}", policy_state)));
        }

        self.actuator_ids = self.gateway.actuator_ids();
        let total_steps = self.config.total_steps();
        let budget = self.config.frame_budget();

        self.state = LoopState::Running;
        self.reporter.start();
        info!(
            "Running {} steps at {} FPS ({} actuators{})",
            total_steps,
            self.config.fps,
            self.actuator_ids.len(),
            self.config
                .task
                .as_deref()
                .map(|t| format!(", task: \"{}\"", t))
                .unwrap_or_default()
        );

        let mut exit = LoopExit::Completed;
        let mut fatal = None;

        for step in 0..total_steps {
            if shutdown_requested(&shutdown) {
                exit = LoopExit::Cancelled;
                break;
            }

            let cycle_start = Instant::now();
            let success = match self.run_cycle(step, &mut shutdown).await {
                Ok(CycleOutcome::Dispatched) => {
                    let stats = self.record(step, cycle_start, true);
                    log_success(step, cycle_start.elapsed(), &stats);
                    true
                }
                Ok(CycleOutcome::Failed(e)) => {
                    let stats = self.record(step, cycle_start, false);
                    warn!(
                        "Step {}: FAILED ({}) | Overall: {:.1} FPS | Success: {}/{}",
                        step, e, stats.overall_fps, stats.successful, stats.attempted
                    );
                    false
                }
                Ok(CycleOutcome::Cancelled) => {
                    exit = LoopExit::Cancelled;
                    break;
                }
                Err(e) => {
                    self.record(step, cycle_start, false);
                    error!("Step {}: actuator gateway failed: {}", step, e);
                    fatal = Some((step, e));
                    break;
                }
            };

            let mut pause = budget.saturating_sub(cycle_start.elapsed());
            if !success {
                pause = pause.max(self.config.failure_backoff);
            }
            if !pause.is_zero() && !sleep_unless_shutdown(pause, &mut shutdown).await {
                exit = LoopExit::Cancelled;
                break;
            }
        }

        self.state = LoopState::Draining;
        if exit == LoopExit::Cancelled {
            info!("Control loop cancelled");
        }
        let summary = self.reporter.summarize();
        info!("\n{}", summary);
        self.release().await;
        self.state = LoopState::Terminated;

        match fatal {
            Some((step, source)) => Err(LoopError::Gateway {
                step,
                summary: Box::new(summary),
                source,
            }),
            None => Ok(LoopReport { exit, summary }),
        }
    }

    async fn run_cycle(
        &mut self,
        step: u64,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<CycleOutcome, GatewayError> {
        let observation = self.capture_observation()?;
        debug!("Step {}: observation captured at {}", step, timestamp());

        let result = tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => return Ok(CycleOutcome::Cancelled),
            result = self.policy.infer(observation) => result,
        };
        let action = match result {
            Ok(action) => action,
            Err(e) => return Ok(CycleOutcome::Failed(e)),
        };
        debug!("Step {}: action received at {}", step, timestamp());

        if action.len() != self.actuator_ids.len() {
            return Ok(CycleOutcome::Failed(InferenceError::Protocol(format!(
                "action has {} values for {} actuators",
                action.len(),
                self.actuator_ids.len()
            ))));
        }

        self.dispatch(&action)?;
        debug!("Step {}: action dispatched at {}", step, timestamp());
        Ok(CycleOutcome::Dispatched)
    }

    fn capture_observation(&mut self) -> Result<Observation, GatewayError> {
        let mut state = Vec::with_capacity(self.actuator_ids.len());
        for id in &self.actuator_ids {
            let value = self.gateway.read(Register::PresentPosition, id, true)?;
            state.push(value.as_f64() as f32);
        }

        let mut observation = Observation::new().with_task(self.config.task.clone());
        observation.insert(STATE_KEY, Tensor::vector(state));
        for (name, tensor) in self.gateway.read_auxiliary()? {
            observation.insert(name, tensor);
        }
        Ok(observation)
    }

    fn dispatch(&mut self, action: &Action) -> Result<(), GatewayError> {
        for (id, value) in self.actuator_ids.iter().zip(&action.values) {
            self.gateway
                .write(Register::GoalPosition, id, ActuatorValue::Normalized(*value as f64))?;
        }
        Ok(())
    }

    fn record(&mut self, step: u64, cycle_start: Instant, success: bool) -> RunningStats {
        self.reporter.record(CycleStats {
            step,
            duration: cycle_start.elapsed(),
            success,
        })
    }

    async fn release(&mut self) {
        self.policy.close().await;
        if self.gateway.is_connected() {
            match self.gateway.disconnect() {
                Ok(()) => info!("Robot disconnected"),
                Err(e) => warn!("Failed to disconnect robot: {}", e),
            }
        }
    }
}

fn log_success(step: u64, elapsed: Duration, stats: &RunningStats) {
    info!(
        "Step {}: {:.1}ms | Avg: {:.1}ms ({:.1} FPS) | Overall: {:.1} FPS | Success: {}/{}",
        step,
        elapsed.as_secs_f64() * 1000.0,
        stats.avg_latency_ms,
        stats.avg_fps,
        stats.overall_fps,
        stats.successful,
        stats.attempted
    );
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}
