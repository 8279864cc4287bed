//! Value types and configuration for Sluice.
//!
//! This crate defines the schema layer: typed identifiers (`StageId`,
//! `OwnerId`, `TypeTag`) and stage variant descriptors (`StageType`), the
//! lifecycle `Phase` names validators subscribe to, immutable
//! `ValidationResult`s, package `Requirement`s grouped into `ChangeSet`s, and
//! the TOML configuration file (`SluiceConfig`).

pub mod changeset;
pub mod config;
pub mod phase;
pub mod results;
pub mod types;

pub use changeset::{validate_package_name, ChangeSet, Requirement, RequirementError};
pub use config::{
    parse_config_file, parse_config_str, ConfigError, EngineSection, ExcludeSection, PathsSection,
    SluiceConfig, CONFIG_FILE_NAME,
};
pub use phase::Phase;
pub use results::{overall_status, OverallStatus, ResultError, Severity, ValidationResult};
pub use types::{OwnerId, StageId, StageType, TypeTag, DEFAULT_FAILURE_MESSAGE};
