//! Constant buffer layouts and change tracking
//!
//! The two uniform blocks mirror the WGSL structs in `shaders/` field for
//! field; both are 16-byte aligned end to end so the Pod view maps straight
//! onto the GPU buffer. `UniformMirror` keeps the last uploaded contents and
//! skips the upload when nothing changed, comparing in 16-byte chunks the way
//! the constants are consumed.

use bytemuck::{Pod, Zeroable};
use glam::{UVec2, UVec4, Vec2, Vec4};

use crate::driver::{Driver, DriverError, Stage};

/// Vertex stage constants. `vertex_scale_offset` maps native window units to
/// clip space, xy scale and zw offset.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VsConstants {
    pub vertex_scale_offset: Vec4,
    pub texture_offset: Vec4,
    pub depth_mask: UVec2,
    pub point_size: Vec2,
}

/// Pixel stage constants.
///
/// `fog_color_aref` packs the fog color in rgb and the alpha test reference
/// in w. `ta_af` carries the two 16-bit alpha expansion values in xy and the
/// fixed blend coefficient in z. `wh` holds the source texture size in xy and
/// its reciprocal in zw.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PsConstants {
    pub fog_color_aref: Vec4,
    pub wh: Vec4,
    pub ta_af: Vec4,
    pub msk_fix: UVec4,
    pub fb_mask: UVec4,
    pub half_texel: Vec4,
    pub min_max: Vec4,
    pub tc_oh_ts: Vec4,
    pub channel_shuffle: UVec4,
}

/// Holds the last uploaded value of one uniform block and elides redundant
/// uploads. The first upload after construction or [`reset`](Self::reset)
/// always goes through.
#[derive(Debug)]
pub struct UniformMirror<T> {
    stage: Stage,
    current: T,
    primed: bool,
}

impl<T: Pod + PartialEq> UniformMirror<T> {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            current: T::zeroed(),
            primed: false,
        }
    }

    /// Upload `next` if it differs from the last uploaded value. Returns
    /// whether an upload happened. The whole block is uploaded on any
    /// difference; the chunked compare exists to find that difference early.
    pub fn upload_if_changed<D: Driver>(
        &mut self,
        driver: &mut D,
        next: &T,
    ) -> Result<bool, DriverError> {
        if self.primed && !Self::differs(&self.current, next) {
            return Ok(false);
        }

        driver.upload_uniforms(self.stage, bytemuck::bytes_of(next))?;
        self.current = *next;
        self.primed = true;
        Ok(true)
    }

    fn differs(a: &T, b: &T) -> bool {
        let a = bytemuck::bytes_of(a);
        let b = bytemuck::bytes_of(b);
        a.chunks_exact(16)
            .zip(b.chunks_exact(16))
            .any(|(ca, cb)| ca != cb)
            || a.len() % 16 != 0 && a[a.len() - a.len() % 16..] != b[b.len() - b.len() % 16..]
    }

    /// Forget the mirrored contents so the next upload is unconditional.
    pub fn reset(&mut self) {
        self.primed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::recording::{Call, RecordingDriver};

    #[test]
    fn test_layout_sizes() {
        assert_eq!(std::mem::size_of::<VsConstants>(), 48);
        assert_eq!(std::mem::size_of::<PsConstants>(), 144);
        assert_eq!(std::mem::size_of::<VsConstants>() % 16, 0);
        assert_eq!(std::mem::size_of::<PsConstants>() % 16, 0);
    }

    #[test]
    fn test_first_upload_always_goes_through() {
        let mut driver = RecordingDriver::new();
        let mut mirror = UniformMirror::<PsConstants>::new(Stage::Pixel);

        let uploaded = mirror
            .upload_if_changed(&mut driver, &PsConstants::default())
            .unwrap();
        assert!(uploaded);
        assert_eq!(driver.uploaded_uniform_bytes(), 144);
    }

    #[test]
    fn test_identical_contents_skip_upload() {
        let mut driver = RecordingDriver::new();
        let mut mirror = UniformMirror::<PsConstants>::new(Stage::Pixel);
        let cb = PsConstants {
            fog_color_aref: Vec4::new(0.5, 0.5, 0.5, 0.25),
            ..Default::default()
        };

        assert!(mirror.upload_if_changed(&mut driver, &cb).unwrap());
        assert!(!mirror.upload_if_changed(&mut driver, &cb).unwrap());
        assert_eq!(driver.uploaded_uniform_bytes(), 144);
    }

    #[test]
    fn test_single_chunk_change_uploads_whole_block() {
        let mut driver = RecordingDriver::new();
        let mut mirror = UniformMirror::<PsConstants>::new(Stage::Pixel);

        let mut cb = PsConstants::default();
        mirror.upload_if_changed(&mut driver, &cb).unwrap();

        // Touch one field in one 16-byte chunk.
        cb.min_max = Vec4::new(0.0, 0.0, 1.0, 1.0);
        assert!(mirror.upload_if_changed(&mut driver, &cb).unwrap());
        assert_eq!(driver.uploaded_uniform_bytes(), 288);
    }

    #[test]
    fn test_reset_forces_next_upload() {
        let mut driver = RecordingDriver::new();
        let mut mirror = UniformMirror::<VsConstants>::new(Stage::Vertex);
        let cb = VsConstants::default();

        mirror.upload_if_changed(&mut driver, &cb).unwrap();
        mirror.reset();
        assert!(mirror.upload_if_changed(&mut driver, &cb).unwrap());
        assert_eq!(
            driver
                .calls()
                .iter()
                .filter(|c| matches!(c, Call::UploadUniforms { .. }))
                .count(),
            2
        );
    }
}
