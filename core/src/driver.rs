//! Driver abstraction
//!
//! Everything above this trait (caches, trackers, blend policy) is pure
//! bookkeeping and runs headless in tests against [`recording::RecordingDriver`].
//! The wgpu implementation lives in [`crate::device`] behind the
//! `wgpu-backend` feature.

use thiserror::Error;

use crate::blend::HwBlend;
use crate::selector::{ColorMaskSelector, DepthStencilSelector, SamplerSelector};

pub mod recording;

/// Opaque driver-side program object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawProgram(pub u32);

/// Opaque driver-side sampler object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawSampler(pub u32);

/// Opaque driver-side depth/stencil state object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawDepthStencil(pub u32);

/// Caller-assigned identity of a render target or source texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub u64);

/// The attachment pair of one draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSet {
    pub color: TargetId,
    pub depth: Option<TargetId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    Pixel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    Points,
    Lines,
    Triangles,
}

#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("program compilation failed: {0}")]
    Compile(String),
    #[error("driver object creation failed: {0}")]
    ObjectCreation(String),
    #[error("driver state error: {0}")]
    State(String),
    #[error("device context lost")]
    ContextLost,
}

/// The mutation surface of the underlying graphics device.
///
/// Object creation returns ids the caller caches; `bind_*` calls are
/// stateful and last until replaced. Implementations do not elide redundant
/// binds, that is [`crate::tracker::ContextTracker`]'s job.
pub trait Driver {
    fn compile_program(&mut self, vs_source: &str, ps_source: &str)
    -> Result<RawProgram, DriverError>;
    fn create_sampler(&mut self, sel: SamplerSelector) -> Result<RawSampler, DriverError>;
    fn create_depth_stencil(
        &mut self,
        sel: DepthStencilSelector,
    ) -> Result<RawDepthStencil, DriverError>;

    fn bind_program(&mut self, program: RawProgram) -> Result<(), DriverError>;
    fn bind_sampler(&mut self, sampler: RawSampler) -> Result<(), DriverError>;
    fn bind_depth_stencil(&mut self, dss: RawDepthStencil) -> Result<(), DriverError>;
    fn bind_render_target(&mut self, targets: TargetSet) -> Result<(), DriverError>;
    fn bind_texture(&mut self, texture: TargetId) -> Result<(), DriverError>;
    fn bind_color_mask(&mut self, mask: ColorMaskSelector) -> Result<(), DriverError>;
    /// `None` disables fixed-function blending entirely.
    fn bind_blend(&mut self, blend: Option<HwBlend>) -> Result<(), DriverError>;

    fn upload_uniforms(&mut self, stage: Stage, bytes: &[u8]) -> Result<(), DriverError>;
    fn upload_vertices(&mut self, bytes: &[u8]) -> Result<(), DriverError>;

    /// Make prior writes to the bound render target visible to destination
    /// reads in subsequent draws.
    fn texture_barrier(&mut self) -> Result<(), DriverError>;

    fn draw(&mut self, first: u32, count: u32, topology: Topology) -> Result<(), DriverError>;

    /// Destroy every object this driver handed out.
    fn release_all(&mut self);
}

/// Cache epoch. Bumped when a cache is cleared so handles minted before the
/// clear can be told apart from current ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Generation(pub u32);

impl Generation {
    pub fn bump(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}

/// Program handle tagged with the cache generation that minted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHandle {
    pub(crate) raw: RawProgram,
    pub(crate) generation: Generation,
}

/// Sampler handle tagged with the cache generation that minted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerHandle {
    pub(crate) raw: RawSampler,
    pub(crate) generation: Generation,
}

/// Depth/stencil handle tagged with the cache generation that minted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilHandle {
    pub(crate) raw: RawDepthStencil,
    pub(crate) generation: Generation,
}
