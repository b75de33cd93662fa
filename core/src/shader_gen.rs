//! Shader permutation generation
//!
//! Generates WGSL for each selector value by injecting a const block into the
//! embedded stage templates: every selector field becomes a shader-visible
//! `const`, and the template branches on those consts. The driver's shader
//! compiler folds the branches away, so each distinct selector produces a
//! distinct specialized program.
//!
//! Generation never touches the GPU; compilation happens in the driver when
//! the program cache misses.

use std::fmt::Write;

use thiserror::Error;

use crate::selector::{PsSelector, VsSelector};

const TEMPLATE_TFX_VS: &str = include_str!("../shaders/tfx_vs.wgsl");
const TEMPLATE_TFX_FS: &str = include_str!("../shaders/tfx_fs.wgsl");
const TEMPLATE_CONVERT_VS: &str = include_str!("../shaders/convert_vs.wgsl");
const TEMPLATE_CONVERT_FS: &str = include_str!("../shaders/convert_fs.wgsl");

const PERMUTATION_PLACEHOLDER: &str = "//PERMUTATION_CONSTANTS";

/// Error type for selector values the generator cannot render into valid
/// source. These are programming errors on the caller's side, reported
/// rather than panicked on so a bad selector cannot poison the caches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShaderGenError {
    #[error("pixel selector {0:#x} has reserved bits set")]
    ReservedBits(u64),
    #[error("pixel selector field out of range: {field} = {value}")]
    FieldOutOfRange { field: &'static str, value: u32 },
}

fn check_ps(sel: PsSelector) -> Result<(), ShaderGenError> {
    if sel.raw() >> 51 != 0 {
        return Err(ShaderGenError::ReservedBits(sel.raw()));
    }
    let ranges: [(&'static str, u32, u32); 7] = [
        ("tfx", sel.tfx(), 4),
        ("date", sel.date(), 3),
        ("channel", sel.channel(), 6),
        ("blend_a", sel.blend_a(), 2),
        ("blend_b", sel.blend_b(), 2),
        ("blend_c", sel.blend_c(), 2),
        ("blend_d", sel.blend_d(), 2),
    ];
    for (field, value, max) in ranges {
        if value > max {
            return Err(ShaderGenError::FieldOutOfRange { field, value });
        }
    }
    Ok(())
}

fn push_u32(block: &mut String, name: &str, value: u32) {
    // The template only ever sees well-formed const declarations.
    let _ = writeln!(block, "const {name}: u32 = {value}u;");
}

fn push_bool(block: &mut String, name: &str, value: bool) {
    let _ = writeln!(block, "const {name}: bool = {value};");
}

/// Generate the vertex stage source. Total: the vertex program has no
/// permutation fields yet, so every selector yields the same source.
pub fn generate_vs(_sel: VsSelector) -> String {
    TEMPLATE_TFX_VS.replace(PERMUTATION_PLACEHOLDER, "")
}

/// Generate the pixel stage source for one selector permutation.
pub fn generate_ps(sel: PsSelector) -> Result<String, ShaderGenError> {
    check_ps(sel)?;

    let mut block = String::with_capacity(1024);
    push_u32(&mut block, "PS_TEX_FMT", sel.tex_fmt());
    push_u32(&mut block, "PS_DFMT", sel.dfmt());
    push_u32(&mut block, "PS_DEPTH_FMT", sel.depth_fmt());
    push_bool(&mut block, "PS_AEM", sel.aem());
    push_bool(&mut block, "PS_FBA", sel.fba());
    push_bool(&mut block, "PS_FOG", sel.fog());
    push_bool(&mut block, "PS_IIP", sel.iip());
    push_u32(&mut block, "PS_DATE", sel.date());
    push_u32(&mut block, "PS_ATST", sel.atst());
    push_bool(&mut block, "PS_FST", sel.fst());
    push_u32(&mut block, "PS_TFX", sel.tfx());
    push_bool(&mut block, "PS_TCC", sel.tcc());
    push_u32(&mut block, "PS_WMS", sel.wms());
    push_u32(&mut block, "PS_WMT", sel.wmt());
    push_bool(&mut block, "PS_LTF", sel.ltf());
    push_bool(&mut block, "PS_SHUFFLE", sel.shuffle());
    push_bool(&mut block, "PS_READ_BA", sel.read_ba());
    push_bool(&mut block, "PS_WRITE_RG", sel.write_rg());
    push_bool(&mut block, "PS_FBMASK", sel.fbmask());
    push_u32(&mut block, "PS_BLEND_A", sel.blend_a());
    push_u32(&mut block, "PS_BLEND_B", sel.blend_b());
    push_u32(&mut block, "PS_BLEND_C", sel.blend_c());
    push_u32(&mut block, "PS_BLEND_D", sel.blend_d());
    push_bool(&mut block, "PS_SW_BLEND", sel.sw_blend());
    push_bool(&mut block, "PS_CLR1", sel.clr1());
    push_bool(&mut block, "PS_PABE", sel.pabe());
    push_bool(&mut block, "PS_HDR", sel.hdr());
    push_bool(&mut block, "PS_COLCLIP", sel.colclip());
    push_u32(&mut block, "PS_CHANNEL", sel.channel());
    push_bool(&mut block, "PS_TC_OFFSET_HACK", sel.tcoffsethack());
    push_bool(&mut block, "PS_TEX_IS_FB", sel.tex_is_fb());

    Ok(TEMPLATE_TFX_FS.replace(PERMUTATION_PLACEHOLDER, &block))
}

/// Pass-through program sources: the fallback when a permutation fails to
/// compile, and the base of merge-style full-target passes.
pub fn generate_passthrough() -> (String, String) {
    (
        TEMPLATE_CONVERT_VS.to_string(),
        TEMPLATE_CONVERT_FS.to_string(),
    )
}
