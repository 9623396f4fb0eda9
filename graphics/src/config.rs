//! Execution engine configuration.

use crate::error::GraphicsError;
use crate::types::QueueType;

/// Configuration of an [`ExecutionContext`](crate::execution::ExecutionContext).
///
/// # Example
///
/// ```
/// use tessera_graphics::{ExecutionConfig, QueueType};
///
/// let config = ExecutionConfig::new()
///     .with_queues(vec![QueueType::Graphics, QueueType::Copy])
///     .with_max_batches_in_flight(3)
///     .with_label("main");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Queues the engine submits to, in [`QueueIndex`](crate::types::QueueIndex) order.
    pub queues: Vec<QueueType>,
    /// Capacity of the per-batch immediate constant buffer pair, in bytes.
    pub immediate_constant_buffer_size: u64,
    /// Offset alignment of immediate constants.
    pub immediate_constant_alignment: u64,
    /// Capacity of the per-batch acceleration-structure scratch arena, in bytes.
    pub scratch_arena_size: u64,
    /// Batches that may be executing on the GPU before `execute_batch` blocks.
    pub max_batches_in_flight: usize,
    /// Whether `mark_timestamp` records GPU timestamp queries.
    pub timestamps_enabled: bool,
    /// Debug label used in logs.
    pub label: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            queues: vec![QueueType::Graphics, QueueType::Compute, QueueType::Copy],
            immediate_constant_buffer_size: 1024 * 1024,
            immediate_constant_alignment: 256,
            scratch_arena_size: 16 * 1024 * 1024,
            max_batches_in_flight: 2,
            timestamps_enabled: true,
            label: None,
        }
    }
}

impl ExecutionConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queues(mut self, queues: Vec<QueueType>) -> Self {
        self.queues = queues;
        self
    }

    pub fn with_immediate_constant_buffer_size(mut self, size: u64) -> Self {
        self.immediate_constant_buffer_size = size;
        self
    }

    pub fn with_immediate_constant_alignment(mut self, alignment: u64) -> Self {
        self.immediate_constant_alignment = alignment;
        self
    }

    pub fn with_scratch_arena_size(mut self, size: u64) -> Self {
        self.scratch_arena_size = size;
        self
    }

    pub fn with_max_batches_in_flight(mut self, count: usize) -> Self {
        self.max_batches_in_flight = count;
        self
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.timestamps_enabled = enabled;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Check the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        if self.queues.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "at least one queue is required".to_string(),
            ));
        }
        if self.immediate_constant_alignment == 0
            || !self.immediate_constant_alignment.is_power_of_two()
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "immediate constant alignment must be a power of two, got {}",
                self.immediate_constant_alignment
            )));
        }
        if self.immediate_constant_buffer_size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "immediate constant buffer size must be non-zero".to_string(),
            ));
        }
        if self.scratch_arena_size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "scratch arena size must be non-zero".to_string(),
            ));
        }
        if self.max_batches_in_flight == 0 {
            return Err(GraphicsError::InvalidParameter(
                "max_batches_in_flight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ExecutionConfig::default();
        assert_eq!(config.queues.len(), 3);
        assert_eq!(config.immediate_constant_buffer_size, 1 << 20);
        assert_eq!(config.immediate_constant_alignment, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let invalid = [
            ExecutionConfig::new().with_queues(Vec::new()),
            ExecutionConfig::new().with_immediate_constant_alignment(0),
            ExecutionConfig::new().with_immediate_constant_alignment(48),
            ExecutionConfig::new().with_immediate_constant_buffer_size(0),
            ExecutionConfig::new().with_scratch_arena_size(0),
            ExecutionConfig::new().with_max_batches_in_flight(0),
        ];
        for config in invalid {
            assert!(
                matches!(config.validate(), Err(GraphicsError::InvalidParameter(_))),
                "{config:?} should be rejected"
            );
        }
    }
}
