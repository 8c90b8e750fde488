//! Gateway adapters and the cache that owns them.

pub mod registry;
pub mod sandbox;
