use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Control table registers the loop and homing routine touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Register {
    PresentPosition,
    GoalPosition,
}

impl Register {
    pub fn as_str(&self) -> &'static str {
        match self {
            Register::PresentPosition => "Present_Position",
            Register::GoalPosition => "Goal_Position",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A register value, either in raw encoder ticks or in the actuator's
/// normalized range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum ActuatorValue {
    Raw(i32),
    Normalized(f64),
}

impl ActuatorValue {
    pub fn raw(&self) -> Option<i32> {
        match self {
            ActuatorValue::Raw(v) => Some(*v),
            ActuatorValue::Normalized(_) => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            ActuatorValue::Raw(v) => *v as f64,
            ActuatorValue::Normalized(v) => *v,
        }
    }
}

/// Raw position bounds recorded for one actuator during calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationRange {
    pub range_min: i32,
    pub range_max: i32,
}

impl CalibrationRange {
    pub fn new(range_min: i32, range_max: i32) -> Self {
        Self {
            range_min,
            range_max,
        }
    }

    /// Midpoint of the range, rounded toward negative infinity.
    pub fn zero_position(&self) -> i32 {
        let sum = self.range_min as i64 + self.range_max as i64;
        sum.div_euclid(2) as i32
    }

    pub fn span(&self) -> i64 {
        self.range_max as i64 - self.range_min as i64
    }

    pub fn contains(&self, raw: i32) -> bool {
        (self.range_min..=self.range_max).contains(&raw)
    }

    pub fn clamp(&self, raw: i64) -> i32 {
        raw.clamp(self.range_min as i64, self.range_max as i64) as i32
    }
}

/// Raw positions keyed by actuator name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActuatorState(BTreeMap<String, i32>);

impl ActuatorState {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, actuator: impl Into<String>, position: i32) -> Option<i32> {
        self.0.insert(actuator.into(), position)
    }

    pub fn get(&self, actuator: &str) -> Option<i32> {
        self.0.get(actuator).copied()
    }

    pub fn contains(&self, actuator: &str) -> bool {
        self.0.contains_key(actuator)
    }

    pub fn actuators(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, i32>> for ActuatorState {
    fn from(positions: BTreeMap<String, i32>) -> Self {
        Self(positions)
    }
}

impl<K: Into<String>> FromIterator<(K, i32)> for ActuatorState {
    fn from_iter<I: IntoIterator<Item = (K, i32)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
