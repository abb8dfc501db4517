//! Demo runner for the ADI engine.
//!
//! Wires the engine end to end over a simulated gateway:
//! - TOML configuration
//! - Simulated transport that synchronises feeds over exercise ticks
//! - Account lookup through the layered incubator
//! - Per-definition incubation with timeout and cancellation

pub mod app;
pub mod config;
pub mod error;
pub mod simulator;

pub use app::{Application, DemoReport, IncubationRecord};
pub use config::{DemoConfig, SimulatorConfig};
pub use error::{AppError, AppResult};
pub use simulator::SimulatedTransport;
