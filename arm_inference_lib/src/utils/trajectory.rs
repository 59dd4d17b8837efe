//! Coordinated point-to-point interpolation for a set of actuators.
//!
//! Every actuator moves along its own straight line and all of them reach
//! step `i` together. Targets are computed from the start pose for every
//! step, so rounding never accumulates:
//!
//! ```text
//! target_k(i) = round_half_away(start_k + (goal_k - start_k) * i / steps)
//! ```
//!
//! The division is carried out exactly in integer arithmetic, so the final
//! step lands on the goal for any input.

use serde::{Deserialize, Serialize};

use crate::types::{ActuatorState, ConfigurationError};

/// Per-step target poses; `points[steps - 1]` is the goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trajectory {
    points: Vec<ActuatorState>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Zero-based: `get(0)` is the first step away from the start pose.
    pub fn get(&self, index: usize) -> Option<&ActuatorState> {
        self.points.get(index)
    }

    pub fn last(&self) -> Option<&ActuatorState> {
        self.points.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ActuatorState> {
        self.points.iter()
    }

    pub fn into_points(self) -> Vec<ActuatorState> {
        self.points
    }
}

impl<'a> IntoIterator for &'a Trajectory {
    type Item = &'a ActuatorState;
    type IntoIter = std::slice::Iter<'a, ActuatorState>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Plan `steps` synchronized moves from `start` to `goal`.
///
/// Both poses must name exactly the same actuators and `steps` must be at
/// least 1.
pub fn plan(
    start: &ActuatorState,
    goal: &ActuatorState,
    steps: u32,
) -> Result<Trajectory, ConfigurationError> {
    if steps == 0 {
        return Err(ConfigurationError::InvalidStepCount(steps));
    }
    check_same_actuators(start, goal)?;

    let points: Vec<ActuatorState> = (1..=steps as i128)
        .map(|i| {
            start
                .iter()
                .map(|(name, from)| {
                    let to = goal.get(name).unwrap_or(from);
                    (name, interpolate(from, to, i, steps as i128))
                })
                .collect::<ActuatorState>()
        })
        .collect();

    Ok(Trajectory { points })
}

fn check_same_actuators(start: &ActuatorState, goal: &ActuatorState) -> Result<(), ConfigurationError> {
    let only_in_start: Vec<String> = start
        .actuators()
        .filter(|name| !goal.contains(name))
        .map(str::to_string)
        .collect();
    let only_in_goal: Vec<String> = goal
        .actuators()
        .filter(|name| !start.contains(name))
        .map(str::to_string)
        .collect();

    if only_in_start.is_empty() && only_in_goal.is_empty() {
        Ok(())
    } else {
        Err(ConfigurationError::ActuatorSetMismatch {
            only_in_start,
            only_in_goal,
        })
    }
}

fn interpolate(from: i32, to: i32, step: i128, steps: i128) -> i32 {
    let offset = div_round_half_away((to as i128 - from as i128) * step, steps);
    // The offset never overshoots `to - from`, so the sum stays in range.
    (from as i128 + offset) as i32
}

/// `numerator / denominator` rounded half away from zero; `denominator > 0`.
fn div_round_half_away(numerator: i128, denominator: i128) -> i128 {
    let magnitude = (2 * numerator.abs() + denominator) / (2 * denominator);
    if numerator < 0 {
        -magnitude
    } else {
        magnitude
    }
}
