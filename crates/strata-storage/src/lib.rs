//! Strata Storage Layer
//!
//! This crate provides the storage backends for the Strata configuration
//! engine. Both backends implement every collaborator trait from
//! `strata-traits`, so either can be wrapped in a
//! [`StorageAdapter`](strata_traits::StorageAdapter).
//!
//! # Features
//!
//! - **Variation hierarchy**: properties, value trees and service-type priority links
//! - **Variation contexts**: idempotent find-or-create of canonical value sets
//! - **Versioned configuration**: service versions, changesets and temporally valid values
//! - **Permissions**: users, groups and grants
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use strata_storage::InMemoryStore;
//! use strata_traits::StorageAdapter;
//!
//! let store = Arc::new(InMemoryStore::new());
//! let adapter = StorageAdapter::from_store(store);
//! # let _ = adapter;
//! ```
//!
//! # Storage Backends
//!
//! ## RedbStore
//!
//! Uses [redb](https://crates.io/crates/redb), a pure-Rust embedded database
//! with ACID transactions. Suitable for single-process deployments.
//!
//! ## InMemoryStore
//!
//! A concurrent in-memory implementation for testing and development.
//! Data is not persisted across restarts.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod memory;
mod redb;
mod types;

// Re-export core types
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStore;
pub use redb::RedbStore;
pub use types::{
    FeatureRecord, GrantRecord, GrantSubject, GroupId, GroupMembership, KeyRecord,
    PropertyRecord, ServiceRecord, ServiceVersionRecord, StoredValue, ValueRecord,
};
