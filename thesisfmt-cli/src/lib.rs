// All core functionality is in thesisfmt-core
// This CLI acts as a thin wrapper around the core library

// CLI-specific modules
pub mod paths;

// Re-export core types for convenience
pub use thesisfmt_core::*;

// Re-export CLI utilities
pub use paths::{default_data_dir, load_config};
