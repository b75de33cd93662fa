//! End-to-end scenarios against the recording driver.

use gsforge_core::backend::{ColorTarget, DrawOutcome, DrawRequest, RenderBackend};
use gsforge_core::driver::recording::{Call, RecordingDriver};
use gsforge_core::driver::{TargetId, Topology};
use gsforge_core::selector::{
    BlendSelector, ColorMaskSelector, DepthStencilSelector, GsSelector, PsSelector,
    SamplerSelector, VsSelector,
};
use gsforge_core::uniforms::{PsConstants, VsConstants};
use gsforge_core::TargetFormat;

const VERTICES: [u8; 120] = [0; 120];

/// Route engine logs through the test harness; `RUST_LOG` filters as usual.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn base_request() -> DrawRequest<'static> {
    DrawRequest {
        vs: VsSelector::default(),
        gs: GsSelector::default(),
        ps: PsSelector::default(),
        sampler: SamplerSelector::default(),
        depth_stencil: DepthStencilSelector::default(),
        color_mask: ColorMaskSelector::ALL,
        blend: BlendSelector::default(),
        target: ColorTarget {
            id: TargetId(1),
            format: TargetFormat::Color32,
        },
        depth: None,
        texture: None,
        vs_constants: VsConstants::default(),
        ps_constants: PsConstants::default(),
        vertices: &VERTICES,
        vertex_count: 3,
        topology: Topology::Triangles,
    }
}

/// Textured alpha-blended draw: the most common permutation in practice.
fn textured_request() -> DrawRequest<'static> {
    let mut req = base_request();
    req.ps.set_tfx(1);
    req.ps.set_atst(2);
    req.ps.set_fst(true);
    req.texture = Some(TargetId(2));
    req.sampler.set_biln(true);
    req.blend = BlendSelector::from_abcd(0, 1, 0, 1);
    req
}

#[test]
fn test_identical_draws_share_everything() {
    let mut backend = RenderBackend::new(RecordingDriver::new());
    let req = textured_request();

    assert_eq!(backend.draw(&req).unwrap(), DrawOutcome::Drawn);
    assert_eq!(backend.draw(&req).unwrap(), DrawOutcome::Drawn);

    let driver = backend.driver();
    assert_eq!(driver.compiles(), 1);
    assert_eq!(driver.sampler_creations(), 1);
    assert_eq!(driver.depth_stencil_creations(), 1);
    assert_eq!(driver.program_binds(), 1);
    assert_eq!(driver.draws(), 2);
    // Constant buffers did not change between the draws.
    assert_eq!(driver.uploaded_uniform_bytes(), 48 + 144);
}

#[test]
fn test_permutation_changes_compile_separately() {
    let mut backend = RenderBackend::new(RecordingDriver::new());

    backend.draw(&textured_request()).unwrap();

    let mut fogged = textured_request();
    fogged.ps.set_fog(true);
    backend.draw(&fogged).unwrap();

    // Back to the first permutation: cache hit, but the program rebinds.
    backend.draw(&textured_request()).unwrap();

    let driver = backend.driver();
    assert_eq!(driver.compiles(), 2);
    assert_eq!(driver.program_binds(), 3);
    assert_eq!(backend.programs().len(), 2);
}

#[test]
fn test_software_blend_barrier_precedes_every_sub_draw() {
    let mut backend = RenderBackend::new(RecordingDriver::new());
    let mut req = textured_request();
    // Extended-range target forces the shader path with destination reads.
    req.target.format = TargetFormat::FloatHdr;
    req.ps.set_hdr(true);

    backend.draw(&req).unwrap();
    backend.draw(&req).unwrap();

    let driver = backend.driver();
    assert_eq!(driver.draws(), 2);
    assert_eq!(driver.barriers(), 2);

    // Strict interleave: barrier, draw, barrier, draw.
    let sequence: Vec<&Call> = driver
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::TextureBarrier | Call::Draw { .. }))
        .collect();
    assert!(matches!(
        sequence.as_slice(),
        [
            Call::TextureBarrier,
            Call::Draw { .. },
            Call::TextureBarrier,
            Call::Draw { .. }
        ]
    ));

    // The fixed-function unit is off for the pure shader path.
    assert!(driver.calls().contains(&Call::BindBlend(None)));
}

#[test]
fn test_alpha_gated_blend_splits_color_and_alpha() {
    let mut backend = RenderBackend::new(RecordingDriver::new());
    let mut req = textured_request();
    req.target.format = TargetFormat::FloatHdr;
    req.ps.set_pabe(true);

    backend.draw(&req).unwrap();

    let driver = backend.driver();
    assert_eq!(driver.draws(), 2);
    assert_eq!(driver.barriers(), 2);

    // Second sub-draw writes alpha only.
    let masks: Vec<ColorMaskSelector> = driver
        .calls()
        .iter()
        .filter_map(|c| match c {
            Call::BindColorMask(m) => Some(*m),
            _ => None,
        })
        .collect();
    assert_eq!(masks, vec![ColorMaskSelector::ALL, ColorMaskSelector::ALPHA_ONLY]);
}

#[test]
fn test_color_mask_restored_on_next_draw() {
    let mut backend = RenderBackend::new(RecordingDriver::new());
    let mut gated = textured_request();
    gated.target.format = TargetFormat::FloatHdr;
    gated.ps.set_pabe(true);

    backend.draw(&gated).unwrap();
    backend.draw(&textured_request()).unwrap();

    let masks: Vec<ColorMaskSelector> = backend
        .driver()
        .calls()
        .iter()
        .filter_map(|c| match c {
            Call::BindColorMask(m) => Some(*m),
            _ => None,
        })
        .collect();
    assert_eq!(
        masks,
        vec![
            ColorMaskSelector::ALL,
            ColorMaskSelector::ALPHA_ONLY,
            ColorMaskSelector::ALL
        ]
    );
}

#[test]
fn test_reset_releases_and_rebuilds() {
    let mut backend = RenderBackend::new(RecordingDriver::new());
    let req = textured_request();

    backend.draw(&req).unwrap();
    assert_eq!(backend.programs().len(), 1);

    backend.reset();
    assert!(backend.programs().is_empty());
    assert!(backend.driver().calls().contains(&Call::ReleaseAll));

    // Everything is recreated from scratch under the new generation.
    backend.draw(&req).unwrap();
    let driver = backend.driver();
    assert_eq!(driver.compiles(), 2);
    assert_eq!(driver.sampler_creations(), 2);
    assert_eq!(driver.program_binds(), 2);
}

#[test]
fn test_uniform_change_uploads_once_per_block() {
    let mut backend = RenderBackend::new(RecordingDriver::new());
    let mut req = textured_request();

    backend.draw(&req).unwrap();

    // Change only the pixel block; the vertex block stays mirrored.
    req.ps_constants.fog_color_aref = glam::Vec4::new(0.2, 0.3, 0.4, 0.5);
    backend.draw(&req).unwrap();

    assert_eq!(backend.driver().uploaded_uniform_bytes(), 48 + 144 + 144);
}

#[test]
fn test_fallback_program_keeps_frame_going() {
    init_logging();
    let mut driver = RecordingDriver::new();
    driver.fail_next_compile = true;
    let mut backend = RenderBackend::new(driver);

    let outcome = backend.draw(&textured_request()).unwrap();
    assert_eq!(outcome, DrawOutcome::DrawnWithFallback);

    // The failure was not cached: the same permutation compiles cleanly on
    // the next draw and gets used.
    let outcome = backend.draw(&textured_request()).unwrap();
    assert_eq!(outcome, DrawOutcome::Drawn);
    assert_eq!(backend.programs().len(), 1);
}

#[test]
fn test_destination_doubling_uses_factor_output() {
    let mut backend = RenderBackend::new(RecordingDriver::new());
    let mut req = base_request();
    req.ps.set_tfx(1);
    req.ps.set_atst(2);
    // (Cd - 0) * As + Cd: destination color becomes the hardware factor and
    // the pixel stage outputs (1 + As).
    req.blend = BlendSelector::from_abcd(1, 2, 0, 1);

    backend.draw(&req).unwrap();
    backend.draw(&req).unwrap();

    let driver = backend.driver();
    assert_eq!(driver.compiles(), 1);
    assert_eq!(driver.draws(), 2);
    assert_eq!(driver.barriers(), 0);
    let hw = driver
        .calls()
        .iter()
        .find_map(|c| match c {
            Call::BindBlend(Some(b)) => Some(*b),
            _ => None,
        })
        .expect("hardware unit stays on");
    assert_eq!(hw.src, gsforge_core::blend::BlendFactor::Dst);
    assert_eq!(hw.dst, gsforge_core::blend::BlendFactor::Zero);
}

#[test]
fn test_accumulation_blend_keeps_hardware_adder() {
    let mut backend = RenderBackend::new(RecordingDriver::new());
    let mut req = textured_request();
    // Cs * As + Cd with an explicit accumulation request.
    req.blend = BlendSelector::from_abcd(0, 2, 0, 1);
    req.blend.set_accu(true);

    backend.draw(&req).unwrap();

    let driver = backend.driver();
    // No destination read in the shader, so no barrier; hardware adds Cd.
    assert_eq!(driver.barriers(), 0);
    assert_eq!(driver.draws(), 1);
    let hw = driver.calls().iter().find_map(|c| match c {
        Call::BindBlend(Some(b)) => Some(*b),
        _ => None,
    });
    let hw = hw.expect("accumulation keeps the blend unit on");
    assert_eq!(hw.src, gsforge_core::blend::BlendFactor::One);
    assert_eq!(hw.dst, gsforge_core::blend::BlendFactor::One);
}
