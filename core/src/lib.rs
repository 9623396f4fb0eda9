//! # Tessera Core
//!
//! Backend-free building blocks shared by the Tessera execution engine.
//!
//! - [`arena`] - stack/bump sub-allocation with bookmarks, used for per-batch
//!   upload and scratch memory
//! - [`profiling`] - optional Tracy instrumentation macros

pub mod arena;
pub mod profiling;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
