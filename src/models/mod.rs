pub mod outcome;
pub mod slot;

// Re-exports for convenience
pub use outcome::*;
pub use slot::*;
