//! Repository traits for metadata operations.

pub mod assets;
pub mod entities;

pub use assets::AssetRepo;
pub use entities::EntityRepo;
