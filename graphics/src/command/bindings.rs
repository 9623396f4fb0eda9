//! Shader resource bindings of draws, dispatches and ray tracing calls.
//!
//! Bindings are grouped into descriptor sets by space. Each set lists the
//! resources bound at its registers:
//!
//! ```ignore
//! let bindings = ResourceBindings::new()
//!     .with_set(
//!         DescriptorSetBinding::new(0)
//!             .with(0, BoundResource::ImmediateConstants(camera))
//!             .with(1, BoundResource::read_only_image(albedo))
//!             .with(2, BoundResource::Sampler(SamplerDescriptor::linear())),
//!     )
//!     .with_set(DescriptorSetBinding::new(1).with(0, BoundResource::ImageArray(textures)));
//! ```
//!
//! A descriptor array is a complete set of its own, so it must be the only
//! binding of its space.

use crate::execution::ImmediateConstantView;
use crate::resources::{
    AccelerationStructureId, BufferDescriptorArrayId, BufferId, ImageDescriptorArrayId, ImageId,
};
use crate::types::{DescriptorType, MipRange, SamplerDescriptor};

/// A resource bound at one register.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BoundResource {
    /// Sampled image.
    ReadOnlyImage { image: ImageId, mips: MipRange },
    /// Storage image.
    ReadWriteImage { image: ImageId, mips: MipRange },
    /// Read-only structured buffer.
    ReadOnlyBuffer {
        buffer: BufferId,
        offset: u64,
        size: u64,
        stride: u32,
    },
    /// Read-write structured buffer.
    ReadWriteBuffer {
        buffer: BufferId,
        offset: u64,
        size: u64,
        stride: u32,
    },
    /// Constant buffer range of a registry buffer.
    ConstantBuffer {
        buffer: BufferId,
        offset: u64,
        size: u64,
    },
    /// Constant data staged with
    /// [`QueueRecorder::stage_immediate_constant_buffer`](super::QueueRecorder::stage_immediate_constant_buffer).
    ImmediateConstants(ImmediateConstantView),
    /// Sampler, created once per batch for each distinct descriptor.
    Sampler(SamplerDescriptor),
    /// Bindless image table.
    ImageArray(ImageDescriptorArrayId),
    /// Bindless buffer table.
    BufferArray(BufferDescriptorArrayId),
    /// Top-level acceleration structure.
    AccelerationStructure(AccelerationStructureId),
}

impl BoundResource {
    /// Every mip of `image`, sampled.
    pub fn read_only_image(image: ImageId) -> Self {
        Self::ReadOnlyImage {
            image,
            mips: MipRange::all(),
        }
    }

    /// Every mip of `image`, as a storage image.
    pub fn read_write_image(image: ImageId) -> Self {
        Self::ReadWriteImage {
            image,
            mips: MipRange::all(),
        }
    }

    /// Descriptor type of the register this resource occupies.
    pub fn descriptor_type(&self) -> DescriptorType {
        match self {
            Self::ReadOnlyImage { .. } => DescriptorType::ReadOnlyImage,
            Self::ReadWriteImage { .. } => DescriptorType::ReadWriteImage,
            Self::ReadOnlyBuffer { .. } => DescriptorType::ReadOnlyBuffer,
            Self::ReadWriteBuffer { .. } => DescriptorType::ReadWriteBuffer,
            Self::ConstantBuffer { .. } | Self::ImmediateConstants(_) => {
                DescriptorType::ConstantBuffer
            }
            Self::Sampler(_) => DescriptorType::Sampler,
            Self::AccelerationStructure(_) => DescriptorType::AccelerationStructure,
            Self::ImageArray(_) | Self::BufferArray(_) => {
                unreachable!("descriptor arrays carry their own layout")
            }
        }
    }

    pub(crate) fn is_array(&self) -> bool {
        matches!(self, Self::ImageArray(_) | Self::BufferArray(_))
    }
}

/// A resource at a register.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
    pub register: u32,
    pub resource: BoundResource,
}

/// Resources bound in one descriptor space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorSetBinding {
    pub space: u32,
    pub bindings: Vec<Binding>,
}

impl DescriptorSetBinding {
    pub fn new(space: u32) -> Self {
        Self {
            space,
            bindings: Vec::new(),
        }
    }

    /// Bind `resource` at `register`.
    ///
    /// # Panics
    ///
    /// Panics if `register` is already bound in this set, or if a descriptor
    /// array would share the set with another binding.
    pub fn with(mut self, register: u32, resource: BoundResource) -> Self {
        assert!(
            !self.bindings.iter().any(|b| b.register == register),
            "contract violation: duplicate binding of register {} in space {}",
            register,
            self.space
        );
        assert!(
            self.bindings.is_empty()
                || !(resource.is_array() || self.bindings[0].resource.is_array()),
            "contract violation: a descriptor array must be the only binding of space {}",
            self.space
        );
        self.bindings.push(Binding { register, resource });
        self
    }

    /// The descriptor array bound in this set, if it holds one.
    pub(crate) fn array(&self) -> Option<&BoundResource> {
        match self.bindings.as_slice() {
            [binding] if binding.resource.is_array() => Some(&binding.resource),
            _ => None,
        }
    }
}

/// All descriptor sets used by one command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ResourceBindings {
    /// Sets in ascending space order.
    pub sets: Vec<DescriptorSetBinding>,
}

impl ResourceBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a set, keeping sets ordered by space.
    ///
    /// # Panics
    ///
    /// Panics if the space is already bound.
    pub fn with_set(mut self, set: DescriptorSetBinding) -> Self {
        match self.sets.binary_search_by_key(&set.space, |s| s.space) {
            Ok(_) => panic!(
                "contract violation: space {} bound more than once",
                set.space
            ),
            Err(position) => self.sets.insert(position, set),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Every bound resource, in space then register order.
    pub fn resources(&self) -> impl Iterator<Item = &BoundResource> {
        self.sets
            .iter()
            .flat_map(|set| set.bindings.iter().map(|b| &b.resource))
    }
}
