//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (structural checks, all errors at once)
//!     → ServerConfig (raw, per-domain settings)
//!     → domain.rs / federation.rs (defaults, certificate loading)
//!     → DomainConfig (validated, immutable, shared via Arc)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a domain server never sees a change
//! - All fields have defaults to allow minimal configs
//! - A disabled federation section is never validated
//! - Missing trust material is a startup error, never a runtime one

pub mod domain;
pub mod federation;
pub mod loader;
pub mod schema;
pub mod validation;

pub use domain::{DomainConfig, StreamRole, TransportSettings};
pub use federation::FederationConfig;
pub use loader::{load_config, ConfigError};
pub use schema::{ClientSettings, DomainSettings, FederationSettings, ServerConfig};
pub use validation::ValidationError;
