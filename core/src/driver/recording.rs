//! Call-recording driver for headless tests.

use crate::blend::HwBlend;
use crate::selector::{ColorMaskSelector, DepthStencilSelector, SamplerSelector};

use super::{
    Driver, DriverError, RawDepthStencil, RawProgram, RawSampler, Stage, TargetId, TargetSet,
    Topology,
};

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CompileProgram { vs_len: usize, ps_len: usize },
    CreateSampler(SamplerSelector),
    CreateDepthStencil(DepthStencilSelector),
    BindProgram(RawProgram),
    BindSampler(RawSampler),
    BindDepthStencil(RawDepthStencil),
    BindRenderTarget(TargetSet),
    BindTexture(TargetId),
    BindColorMask(ColorMaskSelector),
    BindBlend(Option<HwBlend>),
    UploadUniforms { stage: Stage, len: usize },
    UploadVertices { len: usize },
    TextureBarrier,
    Draw { first: u32, count: u32, topology: Topology },
    ReleaseAll,
}

/// Records every driver call and hands out sequential object ids. Failure
/// injection flags make the next matching creation call fail once;
/// `context_lost` makes every call fail until cleared.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    calls: Vec<Call>,
    next_id: u32,
    pub fail_next_compile: bool,
    pub fail_next_sampler: bool,
    pub fail_next_depth_stencil: bool,
    pub context_lost: bool,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn compiles(&self) -> usize {
        self.count(|c| matches!(c, Call::CompileProgram { .. }))
    }

    pub fn draws(&self) -> usize {
        self.count(|c| matches!(c, Call::Draw { .. }))
    }

    pub fn barriers(&self) -> usize {
        self.count(|c| matches!(c, Call::TextureBarrier))
    }

    pub fn program_binds(&self) -> usize {
        self.count(|c| matches!(c, Call::BindProgram(_)))
    }

    pub fn sampler_creations(&self) -> usize {
        self.count(|c| matches!(c, Call::CreateSampler(_)))
    }

    pub fn depth_stencil_creations(&self) -> usize {
        self.count(|c| matches!(c, Call::CreateDepthStencil(_)))
    }

    pub fn uploaded_uniform_bytes(&self) -> usize {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::UploadUniforms { len, .. } => Some(*len),
                _ => None,
            })
            .sum()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn check_context(&self) -> Result<(), DriverError> {
        if self.context_lost {
            Err(DriverError::ContextLost)
        } else {
            Ok(())
        }
    }

    fn fresh_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Driver for RecordingDriver {
    fn compile_program(
        &mut self,
        vs_source: &str,
        ps_source: &str,
    ) -> Result<RawProgram, DriverError> {
        self.check_context()?;
        self.calls.push(Call::CompileProgram {
            vs_len: vs_source.len(),
            ps_len: ps_source.len(),
        });
        if std::mem::take(&mut self.fail_next_compile) {
            return Err(DriverError::Compile("injected compile failure".into()));
        }
        Ok(RawProgram(self.fresh_id()))
    }

    fn create_sampler(&mut self, sel: SamplerSelector) -> Result<RawSampler, DriverError> {
        self.check_context()?;
        self.calls.push(Call::CreateSampler(sel));
        if std::mem::take(&mut self.fail_next_sampler) {
            return Err(DriverError::ObjectCreation("injected sampler failure".into()));
        }
        Ok(RawSampler(self.fresh_id()))
    }

    fn create_depth_stencil(
        &mut self,
        sel: DepthStencilSelector,
    ) -> Result<RawDepthStencil, DriverError> {
        self.check_context()?;
        self.calls.push(Call::CreateDepthStencil(sel));
        if std::mem::take(&mut self.fail_next_depth_stencil) {
            return Err(DriverError::ObjectCreation(
                "injected depth/stencil failure".into(),
            ));
        }
        Ok(RawDepthStencil(self.fresh_id()))
    }

    fn bind_program(&mut self, program: RawProgram) -> Result<(), DriverError> {
        self.calls.push(Call::BindProgram(program));
        self.check_context()
    }

    fn bind_sampler(&mut self, sampler: RawSampler) -> Result<(), DriverError> {
        self.calls.push(Call::BindSampler(sampler));
        self.check_context()
    }

    fn bind_depth_stencil(&mut self, dss: RawDepthStencil) -> Result<(), DriverError> {
        self.calls.push(Call::BindDepthStencil(dss));
        self.check_context()
    }

    fn bind_render_target(&mut self, targets: TargetSet) -> Result<(), DriverError> {
        self.calls.push(Call::BindRenderTarget(targets));
        self.check_context()
    }

    fn bind_texture(&mut self, texture: TargetId) -> Result<(), DriverError> {
        self.calls.push(Call::BindTexture(texture));
        self.check_context()
    }

    fn bind_color_mask(&mut self, mask: ColorMaskSelector) -> Result<(), DriverError> {
        self.calls.push(Call::BindColorMask(mask));
        self.check_context()
    }

    fn bind_blend(&mut self, blend: Option<HwBlend>) -> Result<(), DriverError> {
        self.calls.push(Call::BindBlend(blend));
        self.check_context()
    }

    fn upload_uniforms(&mut self, stage: Stage, bytes: &[u8]) -> Result<(), DriverError> {
        self.check_context()?;
        self.calls.push(Call::UploadUniforms {
            stage,
            len: bytes.len(),
        });
        Ok(())
    }

    fn upload_vertices(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        self.check_context()?;
        self.calls.push(Call::UploadVertices { len: bytes.len() });
        Ok(())
    }

    fn texture_barrier(&mut self) -> Result<(), DriverError> {
        self.check_context()?;
        self.calls.push(Call::TextureBarrier);
        Ok(())
    }

    fn draw(&mut self, first: u32, count: u32, topology: Topology) -> Result<(), DriverError> {
        self.check_context()?;
        self.calls.push(Call::Draw {
            first,
            count,
            topology,
        });
        Ok(())
    }

    fn release_all(&mut self) {
        self.calls.push(Call::ReleaseAll);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids() {
        let mut d = RecordingDriver::new();
        let p = d.compile_program("vs", "ps").unwrap();
        let s = d.create_sampler(SamplerSelector::default()).unwrap();
        assert_eq!(p, RawProgram(0));
        assert_eq!(s, RawSampler(1));
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let mut d = RecordingDriver::new();
        d.fail_next_compile = true;
        assert!(d.compile_program("vs", "ps").is_err());
        assert!(d.compile_program("vs", "ps").is_ok());
        assert_eq!(d.compiles(), 2);
    }

    #[test]
    fn test_context_lost_fails_everything() {
        let mut d = RecordingDriver::new();
        d.context_lost = true;
        assert!(matches!(
            d.draw(0, 3, Topology::Triangles),
            Err(DriverError::ContextLost)
        ));
        assert!(d.create_sampler(SamplerSelector::default()).is_err());
    }
}
