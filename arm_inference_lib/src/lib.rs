//! # Arm Inference Library
//!
//! Shared types and runtime pieces for driving a robotic arm from a remote
//! policy: the actuator gateway seam, the inference session, the fixed-rate
//! control loop with its performance reporter, and the homing routine built
//! on trajectory interpolation. Used by every binary in the workspace.

pub mod control;
pub mod gateway;
pub mod inference;
pub mod types;
pub mod utils;

// Re-export everything for convenience
pub use control::*;
pub use gateway::*;
pub use inference::*;
pub use types::*;
pub use utils::*;
