//! Draw orchestration
//!
//! [`RenderBackend`] ties the caches, the bind tracker and the blend policy
//! together: one [`DrawRequest`] in, a fully configured draw (or a degraded
//! one) out. Object failures degrade, a lost context aborts.

use thiserror::Error;
use tracing::warn;

use crate::blend::{self, BlendFactor, BlendOp, BlendStrategy, HwBlend, TargetFormat};
use crate::driver::{
    Driver, DriverError, RawDepthStencil, RawProgram, RawSampler, Stage, TargetId, TargetSet,
    Topology,
};
use crate::program_cache::ProgramCache;
use crate::selector::{
    BlendSelector, ColorMaskSelector, DepthStencilSelector, GsSelector, PsSelector,
    SamplerSelector, VsSelector,
};
use crate::state_cache::{CacheError, StateCache};
use crate::tracker::ContextTracker;
use crate::uniforms::{PsConstants, UniformMirror, VsConstants};

/// Color attachment of a draw, with the format class the blend policy needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorTarget {
    pub id: TargetId,
    pub format: TargetFormat,
}

/// Everything one draw needs. Selector fields describe the fixed-function
/// and program state; the blend selector is resolved into a strategy here,
/// so callers never set the software-blend bits of `ps` themselves.
#[derive(Debug, Clone, Copy)]
pub struct DrawRequest<'a> {
    pub vs: VsSelector,
    pub gs: GsSelector,
    pub ps: PsSelector,
    pub sampler: SamplerSelector,
    pub depth_stencil: DepthStencilSelector,
    pub color_mask: ColorMaskSelector,
    pub blend: BlendSelector,
    pub target: ColorTarget,
    pub depth: Option<TargetId>,
    pub texture: Option<TargetId>,
    pub vs_constants: VsConstants,
    pub ps_constants: PsConstants,
    pub vertices: &'a [u8],
    pub vertex_count: u32,
    pub topology: Topology,
}

/// What actually happened to a draw request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    Drawn,
    /// Drawn with the pass-through program after the permutation failed to
    /// compile.
    DrawnWithFallback,
    /// Nothing reached the target (empty draw, or unrecoverable object
    /// failure short of a lost context).
    Skipped,
}

#[derive(Debug, Clone, Error)]
pub enum DrawError {
    #[error("invalid {kind} selector {raw:#x}")]
    InvalidSelector { kind: &'static str, raw: u64 },
    #[error("device context lost")]
    ContextLost,
}

/// The render-state engine. Generic over the driver so every policy above
/// the bind calls is testable without a device.
#[derive(Debug)]
pub struct RenderBackend<D: Driver> {
    driver: D,
    states: StateCache,
    programs: ProgramCache,
    tracker: ContextTracker,
    vs_uniforms: UniformMirror<VsConstants>,
    ps_uniforms: UniformMirror<PsConstants>,
}

impl<D: Driver> RenderBackend<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            states: StateCache::new(),
            programs: ProgramCache::new(),
            tracker: ContextTracker::new(),
            vs_uniforms: UniformMirror::new(Stage::Vertex),
            ps_uniforms: UniformMirror::new(Stage::Pixel),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    pub fn states(&self) -> &StateCache {
        &self.states
    }

    /// Execute one draw request.
    pub fn draw(&mut self, request: &DrawRequest<'_>) -> Result<DrawOutcome, DrawError> {
        Self::validate(request)?;
        if request.vertex_count == 0 {
            return Ok(DrawOutcome::Skipped);
        }

        let strategy = blend::select_strategy(request.blend, request.target.format);
        let ps = Self::effective_ps(request, strategy);

        // Fixed-function objects degrade to defaults on failure.
        let Some(dss) = self.depth_stencil_or_default(request.depth_stencil)? else {
            return Ok(DrawOutcome::Skipped);
        };
        let sampler = match request.texture {
            Some(_) => match self.sampler_or_default(request.sampler)? {
                Some(sampler) => Some(sampler),
                None => return Ok(DrawOutcome::Skipped),
            },
            None => None,
        };

        let (program, fallback_used) = self.program_or_fallback(request.vs, request.gs, ps)?;
        let Some(program) = program else {
            return Ok(DrawOutcome::Skipped);
        };

        let hw_blend = Self::hardware_blend(request, strategy);
        let targets = TargetSet {
            color: request.target.id,
            depth: request.depth,
        };

        {
            let Self {
                driver, tracker, ..
            } = self;
            Self::tolerate(tracker.bind_program(driver, program))?;
            Self::tolerate(tracker.bind_depth_stencil(driver, dss))?;
            if let Some(sampler) = sampler {
                Self::tolerate(tracker.bind_sampler(driver, sampler))?;
            }
            if let Some(texture) = request.texture {
                Self::tolerate(tracker.bind_texture(driver, texture))?;
            }
            Self::tolerate(tracker.bind_render_target(driver, targets))?;
            Self::tolerate(tracker.bind_color_mask(driver, request.color_mask))?;
            Self::tolerate(tracker.bind_blend(driver, hw_blend))?;
        }

        self.upload(request)?;

        // Permutations that sample the destination copy need it refreshed
        // even when the blend equation itself runs on the hardware unit.
        let reads_destination = ps.date() != 0 || ps.fbmask() || ps.tex_is_fb();

        let outcome = match strategy {
            BlendStrategy::Software { barrier, .. } => {
                self.software_sub_draws(request, barrier || reads_destination, ps.pabe())?
            }
            _ => {
                if reads_destination {
                    Self::tolerate(self.driver.texture_barrier())?;
                }
                Self::tolerate(self.driver.draw(0, request.vertex_count, request.topology))?;
                DrawOutcome::Drawn
            }
        };

        Ok(if fallback_used && outcome == DrawOutcome::Drawn {
            DrawOutcome::DrawnWithFallback
        } else {
            outcome
        })
    }

    /// Drop every cached object, unbind records and mirrored uniforms, and
    /// release the driver side. Outstanding handles become stale.
    pub fn reset(&mut self) {
        self.programs.clear();
        self.states.clear();
        self.tracker.reset();
        self.vs_uniforms.reset();
        self.ps_uniforms.reset();
        self.driver.release_all();
    }

    fn validate(request: &DrawRequest<'_>) -> Result<(), DrawError> {
        let invalid = |kind: &'static str, raw: u64| DrawError::InvalidSelector { kind, raw };
        if !request.ps.is_valid() {
            return Err(invalid("pixel", request.ps.raw()));
        }
        if !request.vs.is_valid() {
            return Err(invalid("vertex", request.vs.raw() as u64));
        }
        if !request.gs.is_valid() {
            return Err(invalid("geometry", request.gs.raw() as u64));
        }
        if !request.sampler.is_valid() {
            return Err(invalid("sampler", request.sampler.raw() as u64));
        }
        if !request.depth_stencil.is_valid() {
            return Err(invalid("depth/stencil", request.depth_stencil.raw() as u64));
        }
        if !request.color_mask.is_valid() {
            return Err(invalid("color mask", request.color_mask.raw() as u64));
        }
        if !request.blend.is_valid() {
            return Err(invalid("blend", request.blend.raw() as u64));
        }
        Ok(())
    }

    /// The pixel selector actually compiled: the software-blend fields are
    /// owned by the strategy, not the caller.
    fn effective_ps(request: &DrawRequest<'_>, strategy: BlendStrategy) -> PsSelector {
        let mut ps = request.ps;
        match strategy {
            BlendStrategy::Direct { clr1 } => {
                ps.clear_blend();
                ps.set_clr1(clr1);
            }
            BlendStrategy::Approximate => {
                ps.clear_blend();
                ps.set_clr1(false);
            }
            BlendStrategy::Software { accumulation, .. } => {
                ps.set_clr1(false);
                ps.set_blend_a(request.blend.a());
                ps.set_blend_b(request.blend.b());
                ps.set_blend_c(request.blend.c());
                // Accumulation leaves the destination term to the hardware
                // adder, so the shader drops it.
                ps.set_blend_d(if accumulation { 2 } else { request.blend.d() });
            }
        }
        ps
    }

    fn hardware_blend(request: &DrawRequest<'_>, strategy: BlendStrategy) -> Option<HwBlend> {
        let af = request.ps_constants.ta_af.z;
        match strategy {
            BlendStrategy::Direct { .. } | BlendStrategy::Approximate => {
                let entry = blend::entry(request.blend);
                Some(HwBlend {
                    op: entry.op,
                    src: entry.src,
                    dst: entry.dst,
                    constant: af,
                })
            }
            BlendStrategy::Software {
                accumulation: true, ..
            } => Some(HwBlend {
                op: BlendOp::Add,
                src: BlendFactor::One,
                dst: BlendFactor::One,
                constant: af,
            }),
            BlendStrategy::Software { .. } => None,
        }
    }

    fn depth_stencil_or_default(
        &mut self,
        sel: DepthStencilSelector,
    ) -> Result<Option<RawDepthStencil>, DrawError> {
        match self.states.get_or_create_depth_stencil(&mut self.driver, sel) {
            Ok(handle) => Ok(Some(handle.raw)),
            Err(CacheError::Driver(DriverError::ContextLost)) => Err(DrawError::ContextLost),
            Err(e) => {
                warn!(selector = sel.raw(), error = %e, "depth/stencil creation failed, using default");
                match self
                    .states
                    .get_or_create_depth_stencil(&mut self.driver, DepthStencilSelector::default())
                {
                    Ok(handle) => Ok(Some(handle.raw)),
                    Err(CacheError::Driver(DriverError::ContextLost)) => {
                        Err(DrawError::ContextLost)
                    }
                    Err(_) => Ok(None),
                }
            }
        }
    }

    fn sampler_or_default(
        &mut self,
        sel: SamplerSelector,
    ) -> Result<Option<RawSampler>, DrawError> {
        match self.states.get_or_create_sampler(&mut self.driver, sel) {
            Ok(handle) => Ok(Some(handle.raw)),
            Err(CacheError::Driver(DriverError::ContextLost)) => Err(DrawError::ContextLost),
            Err(e) => {
                warn!(selector = sel.raw(), error = %e, "sampler creation failed, using default");
                match self
                    .states
                    .get_or_create_sampler(&mut self.driver, SamplerSelector::default())
                {
                    Ok(handle) => Ok(Some(handle.raw)),
                    Err(CacheError::Driver(DriverError::ContextLost)) => {
                        Err(DrawError::ContextLost)
                    }
                    Err(_) => Ok(None),
                }
            }
        }
    }

    /// Returns the program to bind and whether it is the fallback.
    fn program_or_fallback(
        &mut self,
        vs: VsSelector,
        gs: GsSelector,
        ps: PsSelector,
    ) -> Result<(Option<RawProgram>, bool), DrawError> {
        match self.programs.get_or_compile(&mut self.driver, vs, gs, ps) {
            Ok(handle) => Ok((Some(handle.raw), false)),
            Err(CacheError::Driver(DriverError::ContextLost)) => Err(DrawError::ContextLost),
            Err(e) => {
                warn!(ps = ps.raw(), error = %e, "falling back to pass-through program");
                match self.programs.fallback(&mut self.driver) {
                    Ok(handle) => Ok((Some(handle.raw), true)),
                    Err(CacheError::Driver(DriverError::ContextLost)) => {
                        Err(DrawError::ContextLost)
                    }
                    Err(_) => Ok((None, false)),
                }
            }
        }
    }

    fn upload(&mut self, request: &DrawRequest<'_>) -> Result<(), DrawError> {
        let vs = self
            .vs_uniforms
            .upload_if_changed(&mut self.driver, &request.vs_constants);
        Self::tolerate(vs.map(|_| ()))?;
        let ps = self
            .ps_uniforms
            .upload_if_changed(&mut self.driver, &request.ps_constants);
        Self::tolerate(ps.map(|_| ()))?;
        Self::tolerate(self.driver.upload_vertices(request.vertices))
    }

    /// Software-blend sub-draws. Each destination-reading sub-draw is
    /// preceded by a visibility barrier so it sees the previous writes. The
    /// per-pixel alpha-gated mode splits color and alpha into two sub-draws,
    /// the second writing alpha only.
    fn software_sub_draws(
        &mut self,
        request: &DrawRequest<'_>,
        barrier: bool,
        split_alpha: bool,
    ) -> Result<DrawOutcome, DrawError> {
        let passes = if split_alpha { 2 } else { 1 };
        for pass in 0..passes {
            if pass == 1 {
                let Self {
                    driver, tracker, ..
                } = self;
                Self::tolerate(tracker.bind_color_mask(driver, ColorMaskSelector::ALPHA_ONLY))?;
            }
            if barrier {
                Self::tolerate(self.driver.texture_barrier())?;
            }
            Self::tolerate(self.driver.draw(0, request.vertex_count, request.topology))?;
        }
        Ok(DrawOutcome::Drawn)
    }

    /// Escalate lost contexts, log and keep going on anything else. A failed
    /// bind leaves the previous state bound, which is degraded output, not a
    /// reason to drop the draw.
    fn tolerate(result: Result<(), DriverError>) -> Result<(), DrawError> {
        match result {
            Ok(()) => Ok(()),
            Err(DriverError::ContextLost) => Err(DrawError::ContextLost),
            Err(e) => {
                warn!(error = %e, "driver call failed, continuing degraded");
                Ok(())
            }
        }
    }
}
