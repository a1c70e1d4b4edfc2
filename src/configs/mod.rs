pub mod base;
pub mod fc2;
pub mod logging;

pub use base::*;
pub use fc2::*;
pub use logging::*;
