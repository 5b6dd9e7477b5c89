pub mod csv_loader;
pub mod dataset;

pub use csv_loader::*;
pub use dataset::*;
