//! Immediate constant staging.
//!
//! Small per-draw constant data is not given a buffer of its own. While a
//! batch is recorded, every [`QueueRecorder::stage_immediate_constant_buffer`]
//! call sub-allocates an aligned range of a CPU shadow copy through a
//! [`StackArena`]. When the batch executes, the shadow is written into one
//! upload buffer in a single host write, and each queue copies its own ranges
//! into a device-local constant buffer before its first command runs. Draws
//! bind the device buffer at the staged offset.
//!
//! The pair of buffers is sized to a fixed cap
//! ([`ExecutionConfig::immediate_constant_buffer_size`]). Running out of space
//! is a fatal allocation failure.
//!
//! [`QueueRecorder::stage_immediate_constant_buffer`]: crate::command::QueueRecorder::stage_immediate_constant_buffer
//! [`ExecutionConfig::immediate_constant_buffer_size`]: crate::ExecutionConfig::immediate_constant_buffer_size

use tessera_core::arena::{ArenaAllocation, StackArena};

use crate::backend::BufferHandle;
use crate::types::QueueIndex;

/// Location of staged immediate constants inside the batch's constant buffer.
///
/// Only valid in the batch it was staged for, and only on the queue that
/// staged it: that queue is the one copying the data into place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImmediateConstantView {
    pub(crate) batch: u64,
    pub(crate) queue: QueueIndex,
    offset: u64,
    size: u64,
}

impl ImmediateConstantView {
    /// Byte offset into the batch's constant buffer.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Index of the batch the data belongs to.
    pub fn batch(&self) -> u64 {
        self.batch
    }

    /// Queue that staged the data.
    pub fn queue(&self) -> QueueIndex {
        self.queue
    }
}

/// Constants staged for the batch being recorded.
#[derive(Debug)]
pub(crate) struct ImmediateConstantStaging {
    arena: StackArena,
    alignment: u64,
    shadow: Vec<u8>,
    ranges: Vec<Vec<ArenaAllocation>>,
}

impl ImmediateConstantStaging {
    pub(crate) fn new(capacity: u64, alignment: u64, queue_count: usize) -> Self {
        Self {
            arena: StackArena::new(capacity),
            alignment,
            shadow: Vec::new(),
            ranges: vec![Vec::new(); queue_count],
        }
    }

    /// Reserve `size` bytes for `queue` and return them for writing.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero or the buffer is exhausted.
    pub(crate) fn stage(
        &mut self,
        batch: u64,
        queue: QueueIndex,
        size: u64,
    ) -> (ImmediateConstantView, &mut [u8]) {
        assert!(size > 0, "contract violation: empty immediate constant buffer");
        let Some(allocation) = self.arena.allocate(size, self.alignment) else {
            panic!(
                "immediate constant buffer exhausted: {} byte(s) requested, {} of {} in use",
                size,
                self.arena.used(),
                self.arena.capacity()
            );
        };
        let end = allocation.end() as usize;
        if self.shadow.len() < end {
            self.shadow.resize(end, 0);
        }
        self.ranges[queue.index()].push(allocation);

        let view = ImmediateConstantView {
            batch,
            queue,
            offset: allocation.offset,
            size,
        };
        (view, &mut self.shadow[allocation.offset as usize..end])
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub(crate) fn capacity(&self) -> u64 {
        self.arena.capacity()
    }

    /// Move the staged data out and start over for the next batch.
    pub(crate) fn take(&mut self) -> StagedConstants {
        let ranges = self
            .ranges
            .iter_mut()
            .map(std::mem::take)
            .collect();
        if self.arena.used() > 0 {
            log::trace!(
                "Immediate constants: {} of {} byte(s) used (peak {})",
                self.arena.used(),
                self.arena.capacity(),
                self.arena.peak_usage()
            );
        }
        self.arena.reset();
        StagedConstants {
            data: std::mem::take(&mut self.shadow),
            ranges,
            alignment: self.alignment,
        }
    }
}

/// Constants of one batch, ready for upload.
#[derive(Debug, Clone, Default)]
pub(crate) struct StagedConstants {
    pub(crate) data: Vec<u8>,
    ranges: Vec<Vec<ArenaAllocation>>,
    alignment: u64,
}

impl StagedConstants {
    pub(crate) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy regions of one queue as `(offset, size)`, with ranges separated
    /// only by alignment padding merged together.
    pub(crate) fn copy_regions(&self, queue: QueueIndex) -> Vec<(u64, u64)> {
        let mut regions: Vec<(u64, u64)> = Vec::new();
        let Some(ranges) = self.ranges.get(queue.index()) else {
            return regions;
        };
        for range in ranges {
            match regions.last_mut() {
                Some((offset, size)) if range.offset - (*offset + *size) < self.alignment => {
                    *size = range.end() - *offset;
                }
                _ => regions.push((range.offset, range.size)),
            }
        }
        regions
    }
}

/// The upload/device buffer pair holding one batch's constants.
#[derive(Debug)]
pub(crate) struct ImmediateConstantBuffers {
    pub(crate) upload: BufferHandle,
    pub(crate) device: BufferHandle,
    pub(crate) staged: StagedConstants,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staged_bytes_land_in_the_shadow() {
        let mut staging = ImmediateConstantStaging::new(1024, 256, 1);
        let (view, bytes) = staging.stage(0, QueueIndex(0), 4);
        bytes.copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(view.offset(), 0);

        let (view, bytes) = staging.stage(0, QueueIndex(0), 2);
        bytes.copy_from_slice(&[5, 6]);
        assert_eq!(view.offset(), 256);
        assert_eq!(view.queue(), QueueIndex(0));

        let staged = staging.take();
        assert_eq!(&staged.data[..4], &[1, 2, 3, 4]);
        assert_eq!(&staged.data[256..258], &[5, 6]);
        assert!(staging.is_empty());
    }

    #[test]
    fn test_copy_regions_merge_per_queue() {
        let mut staging = ImmediateConstantStaging::new(4096, 256, 2);
        staging.stage(0, QueueIndex(0), 16);
        staging.stage(0, QueueIndex(0), 300);
        staging.stage(0, QueueIndex(1), 8);
        staging.stage(0, QueueIndex(0), 4);

        let staged = staging.take();
        assert_eq!(staged.copy_regions(QueueIndex(0)), [(0, 556), (1024, 4)]);
        assert_eq!(staged.copy_regions(QueueIndex(1)), [(768, 8)]);
    }

    #[test]
    #[should_panic(expected = "immediate constant buffer exhausted")]
    fn test_exhaustion_is_fatal() {
        let mut staging = ImmediateConstantStaging::new(512, 256, 1);
        staging.stage(0, QueueIndex(0), 256);
        staging.stage(0, QueueIndex(0), 257);
    }
}
