//! Batch execution.
//!
//! An [`ExecutionContext`] collects commands recorded on every queue and
//! replays them once per batch:
//!
//! 1. retire batches whose fence has signaled and flush descriptor array
//!    writes,
//! 2. compute cross-queue semaphore waits from the resources each command
//!    touches (`dependency`),
//! 3. replay the queues in recording order, each through its own
//!    `QueueContext` state machine, staging transitions before every command,
//! 4. submit a batch fence and keep the batch's ledger until it signals.

mod batch;
mod context;
pub(crate) mod dependency;
pub(crate) mod immediate;
mod queue;

pub use batch::BatchResources;
pub use context::{BatchStatistics, BatchSubmission, ExecutionContext, TimestampSample};
pub use immediate::ImmediateConstantView;
pub use queue::{PresentResult, QueueStatistics};
