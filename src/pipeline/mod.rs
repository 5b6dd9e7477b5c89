pub mod error;
pub mod orchestrator;
pub mod state;

pub use error::*;
pub use orchestrator::*;
pub use state::*;
