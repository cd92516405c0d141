//! Core domain types and shared logic for atelier.
//!
//! This crate defines the data model used across all other crates:
//! - Asset records and their reserve/confirm lifecycle
//! - Subjects and per-request identities
//! - Row-level change events
//! - The error taxonomy shared by every component
//! - Configuration and validation of declared upload attributes

pub mod asset;
pub mod change;
pub mod config;
pub mod error;
pub mod subject;
pub mod validation;

pub use asset::{AssetId, AssetRecord, AssetState, EntityId, ParentEntity, WriteGrant};
pub use change::{ChangeEvent, ChangeKind};
pub use error::{Error, ErrorKind, Result};
pub use subject::{Identity, Subject};
