pub mod actuator_types;
pub mod config;
pub mod errors;
pub mod observation_types;
pub mod performance_types;

pub use actuator_types::*;
pub use config::*;
pub use errors::*;
pub use observation_types::*;
pub use performance_types::*;
