pub mod device;
pub mod formulation;
pub mod interpretation;
pub mod plan;
pub mod program;
pub mod untrusted;

pub use device::*;
pub use formulation::*;
pub use interpretation::*;
pub use plan::*;
pub use program::*;
