pub mod baseline;
pub mod defs;
pub mod memory;

pub use baseline::BaselineDraftingService;
pub use defs::*;
pub use memory::{MemoryBlobStore, MemorySecretStore};
