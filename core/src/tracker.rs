//! Redundant-bind elision
//!
//! Mirrors what is currently bound on the driver and drops bind calls that
//! would not change anything. The record is written from the requested value
//! even when the driver errors: the driver was asked, and a caller that wants
//! certainty after an error resets the tracker.

use crate::blend::HwBlend;
use crate::driver::{Driver, DriverError, RawDepthStencil, RawProgram, RawSampler, TargetId, TargetSet};
use crate::selector::ColorMaskSelector;

/// Last bound value per bind point. `None` means unknown, never elided.
#[derive(Debug, Default)]
pub struct ContextTracker {
    program: Option<RawProgram>,
    sampler: Option<RawSampler>,
    depth_stencil: Option<RawDepthStencil>,
    targets: Option<TargetSet>,
    texture: Option<TargetId>,
    color_mask: Option<ColorMaskSelector>,
    blend: Option<Option<HwBlend>>,
}

impl ContextTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_program<D: Driver>(
        &mut self,
        driver: &mut D,
        program: RawProgram,
    ) -> Result<(), DriverError> {
        if self.program == Some(program) {
            return Ok(());
        }
        self.program = Some(program);
        driver.bind_program(program)
    }

    pub fn bind_sampler<D: Driver>(
        &mut self,
        driver: &mut D,
        sampler: RawSampler,
    ) -> Result<(), DriverError> {
        if self.sampler == Some(sampler) {
            return Ok(());
        }
        self.sampler = Some(sampler);
        driver.bind_sampler(sampler)
    }

    pub fn bind_depth_stencil<D: Driver>(
        &mut self,
        driver: &mut D,
        dss: RawDepthStencil,
    ) -> Result<(), DriverError> {
        if self.depth_stencil == Some(dss) {
            return Ok(());
        }
        self.depth_stencil = Some(dss);
        driver.bind_depth_stencil(dss)
    }

    pub fn bind_render_target<D: Driver>(
        &mut self,
        driver: &mut D,
        targets: TargetSet,
    ) -> Result<(), DriverError> {
        if self.targets == Some(targets) {
            return Ok(());
        }
        self.targets = Some(targets);
        driver.bind_render_target(targets)
    }

    pub fn bind_texture<D: Driver>(
        &mut self,
        driver: &mut D,
        texture: TargetId,
    ) -> Result<(), DriverError> {
        if self.texture == Some(texture) {
            return Ok(());
        }
        self.texture = Some(texture);
        driver.bind_texture(texture)
    }

    pub fn bind_color_mask<D: Driver>(
        &mut self,
        driver: &mut D,
        mask: ColorMaskSelector,
    ) -> Result<(), DriverError> {
        if self.color_mask == Some(mask) {
            return Ok(());
        }
        self.color_mask = Some(mask);
        driver.bind_color_mask(mask)
    }

    pub fn bind_blend<D: Driver>(
        &mut self,
        driver: &mut D,
        blend: Option<HwBlend>,
    ) -> Result<(), DriverError> {
        if self.blend == Some(blend) {
            return Ok(());
        }
        self.blend = Some(blend);
        driver.bind_blend(blend)
    }

    /// Drop every record. Used after external code may have touched the
    /// driver, and after a cache reset where ids can be reissued.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
