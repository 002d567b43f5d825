//! # Branchline Server
//!
//! Configuration, telemetry and the composition root that wires [`BookingEngine`] and
//! [`QueueEngine`] to `PostgreSQL` and Redis.
//!
//! [`BookingEngine`]: branchline_engine::BookingEngine
//! [`QueueEngine`]: branchline_engine::QueueEngine

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod config;
pub mod telemetry;

pub use bootstrap::{BootstrapError, Branchline};
pub use config::{Config, ConfigError, PostgresConfig, RedisConfig, ServerConfig};
