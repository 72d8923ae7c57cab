//! Beacon control plane: token authority, session store and service
//! registry engines, plus the HTTP surface that exposes them.

pub mod api;
pub mod config;
pub mod health;
pub mod registry;
pub mod session;
pub mod telemetry;
pub mod token;
pub mod worker;

pub use config::{Config, ConfigError};
pub use health::{HealthProber, HttpProber, ProbeOutcome};
pub use registry::{Registry, SweepSummary};
pub use session::SessionStore;
pub use token::TokenAuthority;
