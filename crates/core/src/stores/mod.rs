pub mod files;
pub mod flat;

pub use files::{IndexFiles, PersistedIndex, CHUNKS_FILE, METADATA_FILE, VECTORS_FILE};
pub use flat::FlatL2Index;
