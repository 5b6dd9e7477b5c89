pub mod expander;
pub mod window;

pub use expander::*;
pub use window::*;
