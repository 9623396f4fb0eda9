//! Compiled shader binaries and the compiler seam.
//!
//! The engine never compiles shaders itself. Binaries come from a
//! [`ShaderCompiler`] implementation (DXC, Metal IR conversion, ...) or are
//! loaded pre-built with [`Shader::from_binary`]. A shader's identity is a hash
//! of its stage, entry point and bytes, so two independently loaded copies of
//! the same binary produce identical pipeline cache keys.
//!
//! ```ignore
//! let vs = Shader::from_binary(ShaderStage::Vertex, "main", spirv_bytes);
//! let draw = DrawInstanced::new(vs.clone(), ps.clone()).with_vertex_count(3);
//! ```

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::GraphicsError;
use crate::types::ShaderStages;

/// Pipeline stage a shader runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
    RayGeneration,
    Miss,
    ClosestHit,
    AnyHit,
    Intersection,
}

impl ShaderStage {
    /// The visibility flag matching this stage.
    pub fn visibility(&self) -> ShaderStages {
        match self {
            Self::Vertex => ShaderStages::VERTEX,
            Self::Pixel => ShaderStages::PIXEL,
            Self::Compute => ShaderStages::COMPUTE,
            Self::RayGeneration => ShaderStages::RAY_GENERATION,
            Self::Miss => ShaderStages::MISS,
            Self::ClosestHit => ShaderStages::CLOSEST_HIT,
            Self::AnyHit => ShaderStages::ANY_HIT,
            Self::Intersection => ShaderStages::INTERSECTION,
        }
    }
}

/// Content hash identifying a shader binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(u64);

impl ShaderId {
    /// Raw hash value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ShaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A compiled shader binary.
///
/// Cheap to clone. Equality compares the binary itself, hashing uses the
/// precomputed [`ShaderId`].
#[derive(Clone)]
pub struct Shader {
    id: ShaderId,
    stage: ShaderStage,
    entry_point: Arc<str>,
    binary: Arc<[u8]>,
}

impl Shader {
    /// Wrap an already compiled binary.
    pub fn from_binary(
        stage: ShaderStage,
        entry_point: impl Into<Arc<str>>,
        binary: impl Into<Arc<[u8]>>,
    ) -> Self {
        let entry_point = entry_point.into();
        let binary = binary.into();

        let mut hasher = DefaultHasher::new();
        stage.hash(&mut hasher);
        entry_point.hash(&mut hasher);
        binary.hash(&mut hasher);

        Self {
            id: ShaderId(hasher.finish()),
            stage,
            entry_point,
            binary,
        }
    }

    /// Content hash of the shader.
    pub fn id(&self) -> ShaderId {
        self.id
    }

    /// Stage the shader was compiled for.
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Entry point name.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Backend-specific binary.
    pub fn binary(&self) -> &[u8] {
        &self.binary
    }
}

impl PartialEq for Shader {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.stage == other.stage
            && self.entry_point == other.entry_point
            && (Arc::ptr_eq(&self.binary, &other.binary) || self.binary == other.binary)
    }
}

impl Eq for Shader {}

impl Hash for Shader {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shader")
            .field("id", &self.id)
            .field("stage", &self.stage)
            .field("entry_point", &self.entry_point)
            .field("binary_len", &self.binary.len())
            .finish()
    }
}

/// Source-to-binary compilation service.
///
/// Failures return [`GraphicsError::ShaderCompilationFailed`] with the
/// compiler's diagnostics.
pub trait ShaderCompiler: Send + Sync {
    /// Compile `source` for `stage`, starting at `entry_point`.
    fn compile(
        &self,
        source: &[u8],
        stage: ShaderStage,
        entry_point: &str,
    ) -> Result<Shader, GraphicsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_binaries_are_equal() {
        let a = Shader::from_binary(ShaderStage::Vertex, "main", vec![1u8, 2, 3]);
        let b = Shader::from_binary(ShaderStage::Vertex, "main", vec![1u8, 2, 3]);
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_stage_and_entry_point_participate() {
        let vs = Shader::from_binary(ShaderStage::Vertex, "main", vec![1u8, 2, 3]);
        let ps = Shader::from_binary(ShaderStage::Pixel, "main", vec![1u8, 2, 3]);
        let other = Shader::from_binary(ShaderStage::Vertex, "main2", vec![1u8, 2, 3]);
        assert_ne!(vs, ps);
        assert_ne!(vs, other);
        assert_eq!(vs.stage().visibility(), ShaderStages::VERTEX);
    }

    struct FailingCompiler;

    impl ShaderCompiler for FailingCompiler {
        fn compile(
            &self,
            _source: &[u8],
            _stage: ShaderStage,
            entry_point: &str,
        ) -> Result<Shader, GraphicsError> {
            Err(GraphicsError::ShaderCompilationFailed(format!(
                "entry point `{entry_point}` not found"
            )))
        }
    }

    #[test]
    fn test_compiler_diagnostics_propagate() {
        let err = FailingCompiler
            .compile(b"void f() {}", ShaderStage::Pixel, "main")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "shader compilation failed: entry point `main` not found"
        );
    }
}
