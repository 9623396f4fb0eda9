//! Profiling support via Tracy.
//!
//! Re-exports the CPU profiling macros from [`tessera_core::profiling`]. Enable
//! the `profiling` feature of this crate to turn them on; GPU timings come from
//! the batch timestamp queries instead (see [`crate::execution::BatchStatistics`]).

pub use tessera_core::profiling::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros_compile() {
        frame_mark!();
        profile_scope!("test_scope");
        profile_function!();
        profile_plot!("test_value", 42);
    }
}
