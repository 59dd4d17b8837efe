pub mod driver;
pub mod homing;
pub mod reporter;

pub use driver::*;
pub use homing::*;
pub use reporter::*;
