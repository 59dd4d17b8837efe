//! Actuator bus seam.
//!
//! The control loop and the homing routine only ever talk to
//! [`ActuatorGateway`], so the physical bus driver can be swapped for
//! [`SimulatedGateway`] without touching either of them.

pub mod sim;

pub use sim::*;

use std::collections::BTreeMap;

use crate::types::{ActuatorState, ActuatorValue, CalibrationRange, GatewayError, Register, Tensor};

/// Read/write access to a set of named actuators.
///
/// Only one phase of the program (control loop or homing) holds the gateway
/// at a time; implementations do not need to guard against concurrent
/// writers.
pub trait ActuatorGateway: Send {
    fn connect(&mut self) -> Result<(), GatewayError>;

    fn disconnect(&mut self) -> Result<(), GatewayError>;

    fn is_connected(&self) -> bool;

    /// Actuator names in bus order. This is also the action vector order.
    fn actuator_ids(&self) -> Vec<String>;

    /// Reads a register, in raw ticks or in the normalized range.
    fn read(&mut self, register: Register, actuator: &str, normalize: bool) -> Result<ActuatorValue, GatewayError>;

    /// Writes a register. The value's variant decides whether it is
    /// denormalized first.
    fn write(&mut self, register: Register, actuator: &str, value: ActuatorValue) -> Result<(), GatewayError>;

    fn read_calibration(&mut self) -> Result<BTreeMap<String, CalibrationRange>, GatewayError>;

    /// Extra named sensor tensors captured alongside joint positions.
    fn read_auxiliary(&mut self) -> Result<BTreeMap<String, Tensor>, GatewayError> {
        Ok(BTreeMap::new())
    }
}

/// Raw present position of every actuator.
pub fn read_raw_positions<G: ActuatorGateway + ?Sized>(gateway: &mut G) -> Result<ActuatorState, GatewayError> {
    let mut state = ActuatorState::new();
    for id in gateway.actuator_ids() {
        let value = gateway.read(Register::PresentPosition, &id, false)?;
        let raw = value.raw().ok_or_else(|| {
            GatewayError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("raw read of '{}' returned a normalized value", id),
            ))
        })?;
        state.insert(id, raw);
    }
    Ok(state)
}

/// Writes one raw goal pose, actuator by actuator in bus order.
///
/// The pose must name exactly the gateway's actuators; nothing is written
/// otherwise.
pub fn write_raw_goal<G: ActuatorGateway + ?Sized>(gateway: &mut G, pose: &ActuatorState) -> Result<(), GatewayError> {
    let ids = gateway.actuator_ids();
    if let Some(unknown) = pose.actuators().find(|name| !ids.iter().any(|id| id == name)) {
        return Err(GatewayError::UnknownActuator(unknown.to_string()));
    }

    let targets = ids
        .into_iter()
        .map(|id| match pose.get(&id) {
            Some(raw) => Ok((id, raw)),
            None => Err(GatewayError::UnknownActuator(id)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    for (id, raw) in targets {
        gateway.write(Register::GoalPosition, &id, ActuatorValue::Raw(raw))?;
    }
    Ok(())
}
