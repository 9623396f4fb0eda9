//! Pipeline and descriptor layout cache.
//!
//! Creating pipeline state objects is the most expensive thing a frame can do,
//! and descriptor set layouts and pipeline layouts are needed for every draw.
//! The [`PipelineCache`] memoizes all of them by structural key. A miss creates
//! the object synchronously through the backend; there is no background
//! compilation, so the first use of a new pipeline may hitch.
//!
//! Entries are never evicted implicitly. [`PipelineCache::clear`] drops every
//! entry (e.g. after a shader hot-reload) and hands the backend objects back to
//! the caller for deferred disposal, since in-flight batches may still use them.

mod keys;

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

pub use keys::{
    ComputePipelineKey, DescriptorSetLayoutKey, GraphicsPipelineKey, HitGroupKey,
    PipelineResourcesKey, RaytracingPipelineKey,
};

use crate::backend::{
    BackendObject, ComputePipelineDescriptor, DescriptorSetLayoutHandle, GpuBackend,
    GraphicsPipelineDescriptor, HitGroupDescriptor, PipelineResourcesHandle,
    PipelineStateHandle, RaytracingPipelineDescriptor,
};
use crate::error::GraphicsError;
use crate::profiling::profile_scope;

/// Hit and miss counts of one cache table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounter {
    pub hits: u64,
    pub misses: u64,
}

impl CacheCounter {
    /// Number of lookups.
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Lookup statistics of a [`PipelineCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatistics {
    pub descriptor_set_layouts: CacheCounter,
    pub pipeline_resources: CacheCounter,
    pub graphics_pipelines: CacheCounter,
    pub compute_pipelines: CacheCounter,
    pub raytracing_pipelines: CacheCounter,
}

fn get_or_create<K, H>(
    table: &mut HashMap<K, H>,
    counter: &mut CacheCounter,
    key: &K,
    kind: &str,
    create: impl FnOnce() -> Result<H, GraphicsError>,
) -> Result<H, GraphicsError>
where
    K: Clone + Eq + Hash,
    H: Copy,
{
    if let Some(handle) = table.get(key) {
        counter.hits += 1;
        return Ok(*handle);
    }

    profile_scope!("pipeline_cache_miss");
    log::debug!("{kind} cache miss ({} cached)", table.len());
    let handle = create()?;
    counter.misses += 1;
    table.insert(key.clone(), handle);
    Ok(handle)
}

/// Cache of pipeline states, pipeline resource layouts and descriptor set layouts.
pub struct PipelineCache {
    backend: Arc<dyn GpuBackend>,
    descriptor_set_layouts: HashMap<DescriptorSetLayoutKey, DescriptorSetLayoutHandle>,
    pipeline_resources: HashMap<PipelineResourcesKey, PipelineResourcesHandle>,
    graphics_pipelines: HashMap<GraphicsPipelineKey, PipelineStateHandle>,
    compute_pipelines: HashMap<ComputePipelineKey, PipelineStateHandle>,
    raytracing_pipelines: HashMap<RaytracingPipelineKey, PipelineStateHandle>,
    statistics: CacheStatistics,
}

impl PipelineCache {
    pub fn new(backend: Arc<dyn GpuBackend>) -> Self {
        Self {
            backend,
            descriptor_set_layouts: HashMap::new(),
            pipeline_resources: HashMap::new(),
            graphics_pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
            raytracing_pipelines: HashMap::new(),
            statistics: CacheStatistics::default(),
        }
    }

    pub fn get_descriptor_set_layout(
        &mut self,
        key: &DescriptorSetLayoutKey,
    ) -> Result<DescriptorSetLayoutHandle, GraphicsError> {
        let backend = &self.backend;
        get_or_create(
            &mut self.descriptor_set_layouts,
            &mut self.statistics.descriptor_set_layouts,
            key,
            "descriptor set layout",
            || backend.create_descriptor_set_layout(&key.ranges, key.visibility),
        )
    }

    pub fn get_pipeline_resources(
        &mut self,
        key: &PipelineResourcesKey,
    ) -> Result<PipelineResourcesHandle, GraphicsError> {
        let backend = &self.backend;
        get_or_create(
            &mut self.pipeline_resources,
            &mut self.statistics.pipeline_resources,
            key,
            "pipeline resources",
            || backend.create_pipeline_resources(&key.sets),
        )
    }

    /// Get or create the graphics pipeline for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::PipelineCreationFailed`] with the driver
    /// diagnostics if creation fails. Nothing is cached in that case.
    pub fn get_graphics_pipeline_state(
        &mut self,
        key: &GraphicsPipelineKey,
    ) -> Result<PipelineStateHandle, GraphicsError> {
        let backend = &self.backend;
        get_or_create(
            &mut self.graphics_pipelines,
            &mut self.statistics.graphics_pipelines,
            key,
            "graphics pipeline",
            || {
                backend.create_graphics_pipeline_state(&GraphicsPipelineDescriptor {
                    resources: key.resources,
                    vertex_shader: &key.vertex_shader,
                    pixel_shader: &key.pixel_shader,
                    input_buffers: &key.input_buffers,
                    color_formats: &key.color_formats,
                    depth_stencil_format: key.depth_stencil_format,
                    state: &key.state,
                    topology: key.topology,
                })
            },
        )
    }

    pub fn get_compute_pipeline_state(
        &mut self,
        key: &ComputePipelineKey,
    ) -> Result<PipelineStateHandle, GraphicsError> {
        let backend = &self.backend;
        get_or_create(
            &mut self.compute_pipelines,
            &mut self.statistics.compute_pipelines,
            key,
            "compute pipeline",
            || {
                backend.create_compute_pipeline_state(&ComputePipelineDescriptor {
                    resources: key.resources,
                    shader: &key.shader,
                })
            },
        )
    }

    pub fn get_raytracing_pipeline_state(
        &mut self,
        key: &RaytracingPipelineKey,
    ) -> Result<PipelineStateHandle, GraphicsError> {
        let backend = &self.backend;
        get_or_create(
            &mut self.raytracing_pipelines,
            &mut self.statistics.raytracing_pipelines,
            key,
            "ray tracing pipeline",
            || {
                let hit_groups: Vec<_> = key
                    .hit_groups
                    .iter()
                    .map(|group| HitGroupDescriptor {
                        closest_hit: group.closest_hit.as_ref(),
                        any_hit: group.any_hit.as_ref(),
                    })
                    .collect();
                backend.create_raytracing_pipeline_state(&RaytracingPipelineDescriptor {
                    resources: key.resources,
                    ray_generation: &key.ray_generation,
                    miss: &key.miss,
                    hit_groups: &hit_groups,
                    max_recursion_depth: key.max_recursion_depth,
                    max_payload_size: key.max_payload_size,
                    max_attribute_size: key.max_attribute_size,
                })
            },
        )
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.statistics
    }

    /// Number of cached objects of all kinds.
    pub fn len(&self) -> usize {
        self.descriptor_set_layouts.len()
            + self.pipeline_resources.len()
            + self.graphics_pipelines.len()
            + self.compute_pipelines.len()
            + self.raytracing_pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and return the backend objects, dependents first.
    ///
    /// The caller is responsible for destroying them once no in-flight batch
    /// uses them.
    #[must_use = "cleared objects must be handed to deferred disposal"]
    pub fn clear(&mut self) -> Vec<BackendObject> {
        let mut objects = Vec::with_capacity(self.len());
        objects.extend(self.graphics_pipelines.drain().map(|(_, h)| BackendObject::from(h)));
        objects.extend(self.compute_pipelines.drain().map(|(_, h)| BackendObject::from(h)));
        objects.extend(self.raytracing_pipelines.drain().map(|(_, h)| BackendObject::from(h)));
        objects.extend(self.pipeline_resources.drain().map(|(_, h)| BackendObject::from(h)));
        objects.extend(
            self.descriptor_set_layouts
                .drain()
                .map(|(_, h)| BackendObject::from(h)),
        );
        log::info!("Pipeline cache cleared ({} objects)", objects.len());
        objects
    }
}

impl std::fmt::Debug for PipelineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCache")
            .field("entries", &self.len())
            .field("statistics", &self.statistics)
            .finish()
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::{DescriptorRangeBinding, DummyBackend, SpaceLayout};
    use crate::shader::{Shader, ShaderStage};
    use crate::types::{
        DescriptorType, InputBufferLayout, PipelineState, PrimitiveTopology, ShaderStages,
        TextureFormat,
    };

    fn setup() -> (Arc<DummyBackend>, PipelineCache) {
        let backend = Arc::new(DummyBackend::new());
        let cache = PipelineCache::new(backend.clone());
        (backend, cache)
    }

    fn graphics_key(resources: PipelineResourcesHandle, stride: u32) -> GraphicsPipelineKey {
        GraphicsPipelineKey {
            resources,
            vertex_shader: Shader::from_binary(ShaderStage::Vertex, "vs_main", vec![1u8, 2]),
            pixel_shader: Shader::from_binary(ShaderStage::Pixel, "ps_main", vec![3u8, 4]),
            input_buffers: vec![InputBufferLayout::new(0, stride)],
            color_formats: vec![TextureFormat::Rgba8Unorm],
            depth_stencil_format: Some(TextureFormat::Depth32Float),
            state: PipelineState::default(),
            topology: PrimitiveTopology::TriangleList,
        }
    }

    #[test]
    fn test_structurally_equal_keys_hit() {
        let (backend, mut cache) = setup();
        let resources = cache
            .get_pipeline_resources(&PipelineResourcesKey::new(Vec::new()))
            .unwrap();

        let first = cache
            .get_graphics_pipeline_state(&graphics_key(resources, 12))
            .unwrap();
        let second = cache
            .get_graphics_pipeline_state(&graphics_key(resources, 12))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.statistics().graphics_pipelines_created, 1);
        assert_eq!(
            cache.statistics().graphics_pipelines,
            CacheCounter { hits: 1, misses: 1 }
        );

        let third = cache
            .get_graphics_pipeline_state(&graphics_key(resources, 16))
            .unwrap();
        assert_ne!(first, third);
        assert_eq!(cache.statistics().graphics_pipelines.misses, 2);
    }

    #[test]
    fn test_layout_and_resources_are_shared() {
        let (backend, mut cache) = setup();
        let ranges = vec![DescriptorRangeBinding {
            register: 0,
            count: 1,
            ty: DescriptorType::ConstantBuffer,
        }];
        let layout = cache
            .get_descriptor_set_layout(&DescriptorSetLayoutKey::new(
                ranges.clone(),
                ShaderStages::ALL,
            ))
            .unwrap();
        let again = cache
            .get_descriptor_set_layout(&DescriptorSetLayoutKey::new(ranges, ShaderStages::ALL))
            .unwrap();
        assert_eq!(layout, again);

        let sets = vec![SpaceLayout { space: 0, layout }];
        cache
            .get_pipeline_resources(&PipelineResourcesKey::new(sets.clone()))
            .unwrap();
        cache
            .get_pipeline_resources(&PipelineResourcesKey::new(sets))
            .unwrap();
        let stats = backend.statistics();
        assert_eq!(stats.descriptor_set_layouts_created, 1);
        assert_eq!(stats.pipeline_resources_created, 1);
    }

    #[test]
    fn test_failed_creation_is_not_cached() {
        let (backend, mut cache) = setup();
        let resources = cache
            .get_pipeline_resources(&PipelineResourcesKey::new(Vec::new()))
            .unwrap();
        let key = ComputePipelineKey {
            resources,
            shader: Shader::from_binary(ShaderStage::Compute, "main", vec![9u8]),
        };

        backend.fail_next_pipeline_creation("register pressure");
        assert!(matches!(
            cache.get_compute_pipeline_state(&key),
            Err(GraphicsError::PipelineCreationFailed(message)) if message == "register pressure"
        ));
        assert!(cache.get_compute_pipeline_state(&key).is_ok());
        assert_eq!(cache.statistics().compute_pipelines.misses, 1);
    }

    #[test]
    fn test_clear_returns_every_object() {
        let (_backend, mut cache) = setup();
        let resources = cache
            .get_pipeline_resources(&PipelineResourcesKey::new(Vec::new()))
            .unwrap();
        cache
            .get_graphics_pipeline_state(&graphics_key(resources, 12))
            .unwrap();

        let objects = cache.clear();
        assert_eq!(objects.len(), 2);
        assert!(matches!(objects[0], BackendObject::PipelineState(_)));
        assert!(cache.is_empty());
    }
}
