use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::gateway::ActuatorGateway;
use crate::types::{
    ActuatorValue, ArmConfig, CalibrationRange, GatewayError, NormMode, Register, Tensor,
};

/// One accepted register write, recorded in raw ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub register: Register,
    pub actuator: String,
    pub raw: i32,
}

struct SimActuator {
    name: String,
    norm_mode: NormMode,
    range: CalibrationRange,
    present: i32,
    goal: i32,
}

struct SimState {
    arm_name: String,
    actuators: Vec<SimActuator>,
    connected: bool,
    reads: usize,
    disconnect_after_reads: Option<usize>,
    writes: Vec<WriteRecord>,
    auxiliary: BTreeMap<String, Tensor>,
}

impl SimState {
    fn actuator_mut(&mut self, name: &str) -> Result<&mut SimActuator, GatewayError> {
        self.actuators
            .iter_mut()
            .find(|a| a.name == name)
            .ok_or_else(|| GatewayError::UnknownActuator(name.to_string()))
    }

    fn ensure_connected(&self) -> Result<(), GatewayError> {
        if self.connected {
            Ok(())
        } else {
            Err(GatewayError::NotConnected)
        }
    }
}

/// In-memory arm that follows goal writes instantly.
///
/// Clones share the same arm, so a test can keep a handle for inspection
/// after handing the gateway to the control loop.
#[derive(Clone)]
pub struct SimulatedGateway {
    inner: Arc<Mutex<SimState>>,
}

impl SimulatedGateway {
    pub fn new(config: &ArmConfig) -> Self {
        let actuators = config
            .actuators
            .iter()
            .map(|a| SimActuator {
                name: a.name.clone(),
                norm_mode: a.norm_mode,
                range: a.range(),
                present: a.initial_position,
                goal: a.initial_position,
            })
            .collect();

        Self {
            inner: Arc::new(Mutex::new(SimState {
                arm_name: config.name.clone(),
                actuators,
                connected: false,
                reads: 0,
                disconnect_after_reads: None,
                writes: Vec::new(),
                auxiliary: BTreeMap::new(),
            })),
        }
    }

    /// Drop the simulated bus once `reads` register reads have succeeded.
    pub fn disconnect_after_reads(self, reads: usize) -> Self {
        self.state().disconnect_after_reads = Some(reads);
        self
    }

    pub fn set_auxiliary(&self, name: impl Into<String>, tensor: Tensor) {
        self.state().auxiliary.insert(name.into(), tensor);
    }

    pub fn present_position(&self, actuator: &str) -> Option<i32> {
        self.state()
            .actuators
            .iter()
            .find(|a| a.name == actuator)
            .map(|a| a.present)
    }

    pub fn write_log(&self) -> Vec<WriteRecord> {
        self.state().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state().writes.len()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ActuatorGateway for SimulatedGateway {
    fn connect(&mut self) -> Result<(), GatewayError> {
        let mut state = self.state();
        if state.connected {
            return Err(GatewayError::AlreadyConnected);
        }
        state.connected = true;
        debug!("Simulated arm '{}' connected", state.arm_name);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.ensure_connected()?;
        state.connected = false;
        debug!("Simulated arm '{}' disconnected", state.arm_name);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn actuator_ids(&self) -> Vec<String> {
        self.state().actuators.iter().map(|a| a.name.clone()).collect()
    }

    fn read(&mut self, register: Register, actuator: &str, normalize: bool) -> Result<ActuatorValue, GatewayError> {
        let mut state = self.state();
        state.ensure_connected()?;

        if let Some(limit) = state.disconnect_after_reads {
            if state.reads >= limit {
                state.connected = false;
                warn!("Simulated bus dropped after {} reads", state.reads);
                return Err(GatewayError::ConnectionLost(format!(
                    "no response from '{}' on {}",
                    actuator, register
                )));
            }
        }

        let sim = state.actuator_mut(actuator)?;
        let raw = match register {
            Register::PresentPosition => sim.present,
            Register::GoalPosition => sim.goal,
        };
        let value = if normalize {
            ActuatorValue::Normalized(sim.norm_mode.normalize(raw, &sim.range))
        } else {
            ActuatorValue::Raw(raw)
        };

        state.reads += 1;
        Ok(value)
    }

    fn write(&mut self, register: Register, actuator: &str, value: ActuatorValue) -> Result<(), GatewayError> {
        let mut state = self.state();
        state.ensure_connected()?;

        if register == Register::PresentPosition {
            return Err(GatewayError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is read-only", register),
            )));
        }

        let sim = state.actuator_mut(actuator)?;
        let raw = match value {
            ActuatorValue::Raw(raw) => sim.range.clamp(raw as i64),
            ActuatorValue::Normalized(v) => sim.norm_mode.denormalize(v, &sim.range),
        };
        sim.goal = raw;
        sim.present = raw;

        state.writes.push(WriteRecord {
            register,
            actuator: actuator.to_string(),
            raw,
        });
        Ok(())
    }

    fn read_calibration(&mut self) -> Result<BTreeMap<String, CalibrationRange>, GatewayError> {
        let state = self.state();
        state.ensure_connected()?;
        Ok(state
            .actuators
            .iter()
            .map(|a| (a.name.clone(), a.range))
            .collect())
    }

    fn read_auxiliary(&mut self) -> Result<BTreeMap<String, Tensor>, GatewayError> {
        let state = self.state();
        state.ensure_connected()?;
        Ok(state.auxiliary.clone())
    }
}
