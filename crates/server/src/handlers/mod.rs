//! HTTP request handlers.

pub mod admin;
pub mod assets;
pub mod blobs;
pub mod common;
pub mod entities;
pub mod feeds;

pub use admin::*;
pub use assets::*;
pub use blobs::*;
pub use entities::*;
pub use feeds::*;
