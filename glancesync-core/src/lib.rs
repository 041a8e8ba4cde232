//! GlanceSync core library: domain types, policies, configuration, errors.
//!
//! - [`types`]: images, region/target names, sync statuses
//! - [`policy`]: per-target [`Policy`] and [`MetadataCondition`]
//! - [`config`]: YAML [`SyncConfig`] load / save
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod policy;
pub mod types;

pub use config::SyncConfig;
pub use error::ConfigError;
pub use policy::{MetadataCondition, Policy, Predicate};
pub use types::{Image, ImageId, RegionName, SyncStatus, TargetName, Visibility};
