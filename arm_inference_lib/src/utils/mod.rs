pub mod logging;
pub mod shutdown;
pub mod trajectory;

pub use logging::*;
pub use shutdown::*;
pub use trajectory::*;
