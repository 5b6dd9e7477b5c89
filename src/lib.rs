//! Demand-response planning for a virtual power plant.
//!
//! A request is turned into a formal allocation model by external collaborators,
//! solved by running a synthesized program in a sandbox, checked and retried a
//! bounded number of times, and finally expanded into per-device dispatch series
//! with profit accounting.

pub mod api;
pub mod app;
pub mod auth;
pub mod baseline;
pub mod collaborators;
pub mod comfort;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod pipeline;
pub mod sandbox;
pub mod session;
pub mod telemetry;
