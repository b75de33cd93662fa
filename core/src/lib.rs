//! gsforge-core: shader permutation and render state caching for a
//! hardware-accelerated renderer of a legacy fixed-function GPU.
//!
//! The emulated unit has no programmable shaders; every drawing mode is a
//! combination of fixed-function switches. This crate maps each combination
//! onto a modern pipeline: selectors (packed bitfields) name the permutation,
//! caches hold the compiled programs and state objects, a bind tracker drops
//! redundant driver calls, and the blend policy decides per draw whether the
//! hardware blend unit can express the emulated equation or the pixel stage
//! has to compute it.
//!
//! Everything above the [`driver::Driver`] trait is device-independent and
//! tested headless; the wgpu realization lives in [`device`] behind the
//! `wgpu-backend` feature.

pub mod backend;
pub mod blend;
pub mod driver;
pub mod program_cache;
pub mod selector;
pub mod shader_gen;
pub mod state_cache;
pub mod tracker;
pub mod uniforms;

#[cfg(feature = "wgpu-backend")]
pub mod device;

pub use backend::{ColorTarget, DrawError, DrawOutcome, DrawRequest, RenderBackend};
pub use blend::{BlendStrategy, HwBlend, TargetFormat};
pub use driver::{Driver, DriverError, Stage, TargetId, TargetSet, Topology};
pub use selector::{
    BlendSelector, ColorMaskSelector, DepthStencilSelector, GsSelector, PsSelector,
    SamplerSelector, VsSelector,
};
pub use uniforms::{PsConstants, VsConstants};

#[cfg(feature = "wgpu-backend")]
pub use device::WgpuDevice;
