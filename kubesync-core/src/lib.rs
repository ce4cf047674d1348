//! kubesync core library: resource model, object identity, configuration.
//!
//! Public API surface:
//! - [`types`]: resource types, opaque objects, change events
//! - [`error`]: [`ConfigError`], [`IdentityError`]
//! - [`config`]: load / validate the YAML configuration

pub mod config;
pub mod error;
pub mod types;

pub use config::{BackoffConfig, Config, SinkConfig, SourceConfig};
pub use error::{ConfigError, IdentityError};
pub use types::{
    ChangeEvent, Listing, ObjectIdentity, ResourceObject, ResourceType, ResumptionToken,
};
