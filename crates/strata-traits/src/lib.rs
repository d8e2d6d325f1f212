//! # Strata Traits
//!
//! Trait definitions for the Strata configuration engine.
//!
//! This crate contains ONLY trait definitions and plain data contracts, with no
//! runtime dependencies. All implementations are in separate crates.
//!
//! ## Module Structure
//!
//! - [`storage`]: Storage collaborator traits (hierarchy, contexts, configuration, permissions)
//! - [`config`]: Engine configuration
//! - [`error`]: Error type shared by every trait
//!
//! ## Dependency Injection
//!
//! The engine uses these traits via dependency injection:
//!
//! ```ignore
//! StrataEngineBuilder::new()
//!     .with_storage(StorageAdapter::from_store(store))
//!     .with_config(EngineConfig::default())
//!     .build()
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod storage;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::TraitError;
pub use storage::{
    ChangesetRow, ConfigurationRow, ConfigurationStore, HierarchyStore, NewVariationProperty,
    NewVariationPropertyValue, PermissionStore, ServiceVersionRow, ServiceVersionSpecifier,
    StorageAdapter, UserRow, VariationContextStore, VersionSelector,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::error::TraitError;
    pub use crate::storage::*;
}
