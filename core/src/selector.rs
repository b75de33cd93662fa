//! Pipeline configuration selectors
//!
//! Every programmable stage and fixed-function state object is described by a
//! fixed-width bitfield key. Two selectors with equal raw value denote
//! behaviorally identical configurations; equality is always integer
//! equality, never field-by-field. All field encode/decode lives here so call
//! sites never touch raw shifts.
//!
//! Selectors are value types: trivially copyable, hashable, immutable once
//! built (the `set_*` methods exist for staged construction, callers compare
//! and cache by raw value only).
//!
//! No validation happens at construction. Illegal field combinations are a
//! logic error on the caller's side; the engine checks `is_valid()` before
//! touching any cache.

/// Extract `len` bits of `key` starting at `lo`.
#[inline]
const fn bits(key: u64, lo: u32, len: u32) -> u64 {
    (key >> lo) & ((1u64 << len) - 1)
}

/// Return `key` with `len` bits at `lo` replaced by `value` (truncated).
#[inline]
const fn with_bits(key: u64, lo: u32, len: u32, value: u64) -> u64 {
    let mask = ((1u64 << len) - 1) << lo;
    (key & !mask) | ((value << lo) & mask)
}

/// Generates a getter/setter pair for one named bit range.
macro_rules! field {
    ($(#[$doc:meta])* $get:ident / $set:ident : $lo:literal + $len:literal) => {
        $(#[$doc])*
        #[inline]
        pub const fn $get(self) -> u32 {
            bits(self.0 as u64, $lo, $len) as u32
        }

        #[inline]
        pub fn $set(&mut self, value: u32) {
            self.0 = with_bits(self.0 as u64, $lo, $len, value as u64) as _;
        }
    };
}

/// Generates a boolean getter/setter pair for one flag bit.
macro_rules! flag {
    ($(#[$doc:meta])* $get:ident / $set:ident : $lo:literal) => {
        $(#[$doc])*
        #[inline]
        pub const fn $get(self) -> bool {
            bits(self.0 as u64, $lo, 1) != 0
        }

        #[inline]
        pub fn $set(&mut self, value: bool) {
            self.0 = with_bits(self.0 as u64, $lo, 1, value as u64) as _;
        }
    };
}

// ============================================================================
// Programmable stage selectors
// ============================================================================

/// Vertex stage selector.
///
/// The vertex program currently has no permutation fields (one program covers
/// every draw); the key is kept so the program cache key shape does not change
/// when fields appear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct VsSelector(pub u32);

impl VsSelector {
    #[inline]
    pub const fn from_raw(key: u32) -> Self {
        Self(key)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 == 0
    }
}

/// Geometry expansion selector.
///
/// Describes which primitive class the draw carries (sprites, points, lines
/// expanded to quads). The expansion itself happens in the vertex supplier;
/// the bits participate in the program cache key only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GsSelector(pub u32);

impl GsSelector {
    flag!(sprite / set_sprite: 0);
    flag!(point / set_point: 1);
    flag!(line / set_line: 2);

    #[inline]
    pub const fn from_raw(key: u32) -> Self {
        Self(key)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 >> 3 == 0
    }
}

/// Pixel stage selector.
///
/// One value per fragment-program permutation. There are too many legal
/// combinations to precompile; programs are built lazily per distinct key.
/// Bits 51..64 are reserved and must stay zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PsSelector(pub u64);

impl PsSelector {
    // Word 1: format, tests and sampling.
    field!(
        /// Source texture format class (palette, 16/24/32-bit).
        tex_fmt / set_tex_fmt: 0 + 4
    );
    field!(
        /// Framebuffer format class of the draw target.
        dfmt / set_dfmt: 4 + 2
    );
    field!(
        /// Depth-as-color sampling format, when the source is a depth buffer.
        depth_fmt / set_depth_fmt: 6 + 2
    );
    flag!(
        /// Alpha expansion for 24-bit sources (zero alpha stays zero).
        aem / set_aem: 8
    );
    flag!(
        /// Force the framebuffer alpha MSB after the pixel stage.
        fba / set_fba: 9
    );
    flag!(fog / set_fog: 10);
    flag!(
        /// Flat (vs gouraud) shading of the provoking vertex color.
        iip / set_iip: 11
    );
    field!(
        /// Destination-alpha test mode.
        date / set_date: 12 + 3
    );
    field!(
        /// Alpha test function.
        atst / set_atst: 15 + 3
    );
    flag!(
        /// Texel-space (vs normalized) texture coordinates.
        fst / set_fst: 18
    );
    field!(
        /// Texture function (modulate, decal, highlight, highlight2, none).
        tfx / set_tfx: 19 + 3
    );
    flag!(
        /// Texture alpha participates in the texture function.
        tcc / set_tcc: 22
    );
    field!(wms / set_wms: 23 + 2);
    field!(wmt / set_wmt: 25 + 2);
    flag!(
        /// Bilinear filtering resolved inside the shader (region wrap modes).
        ltf / set_ltf: 27
    );
    flag!(
        /// 16-bit read/write channel shuffle draw.
        shuffle / set_shuffle: 28
    );
    flag!(read_ba / set_read_ba: 29);
    flag!(write_rg / set_write_rg: 30);
    flag!(
        /// Per-channel framebuffer bit masking in the shader.
        fbmask / set_fbmask: 31
    );

    // Word 2: blend emulation and channel tricks.
    field!(blend_a / set_blend_a: 32 + 2);
    field!(blend_b / set_blend_b: 34 + 2);
    field!(blend_c / set_blend_c: 36 + 2);
    field!(blend_d / set_blend_d: 38 + 2);
    flag!(
        /// Pixel stage outputs the blend factor; hardware multiplies it by
        /// the destination color.
        clr1 / set_clr1: 40
    );
    flag!(
        /// Per-pixel alpha blend enable (blend only where alpha MSB is set).
        pabe / set_pabe: 41
    );
    flag!(
        /// Draw routed through an extended-range target.
        hdr / set_hdr: 42
    );
    flag!(
        /// Wrap color instead of clamping at the unit range.
        colclip / set_colclip: 43
    );
    field!(
        /// Alternate channel fetch (green-for-blue style effects).
        channel / set_channel: 44 + 3
    );
    flag!(tcoffsethack / set_tcoffsethack: 47);
    flag!(
        /// The sampled texture aliases the draw target.
        tex_is_fb / set_tex_is_fb: 48
    );
    flag!(automatic_lod / set_automatic_lod: 49);
    flag!(manual_lod / set_manual_lod: 50);

    #[inline]
    pub const fn from_raw(key: u64) -> Self {
        Self(key)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Reserved bits clear and every enum field in range.
    pub const fn is_valid(self) -> bool {
        self.0 >> 51 == 0
            && self.tfx() <= 4
            && self.date() <= 3
            && self.channel() <= 6
            && self.blend_a() <= 2
            && self.blend_b() <= 2
            && self.blend_c() <= 2
            && self.blend_d() <= 2
    }

    /// True when the permutation computes the blend equation itself.
    #[inline]
    pub const fn sw_blend(self) -> bool {
        bits(self.0, 32, 8) != 0
    }

    /// Clears the software-blend fields (hardware blend paths).
    pub fn clear_blend(&mut self) {
        self.0 = with_bits(self.0, 32, 8, 0);
    }
}

// ============================================================================
// Fixed-function state selectors
// ============================================================================

/// Sampler configuration selector. Seven used bits, so the whole space fits a
/// direct-indexed table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SamplerSelector(pub u32);

impl SamplerSelector {
    flag!(
        /// Wrap (vs clamp) on U.
        tau / set_tau: 0
    );
    flag!(
        /// Wrap (vs clamp) on V.
        tav / set_tav: 1
    );
    flag!(
        /// Bilinear magnification/minification.
        biln / set_biln: 2
    );
    field!(
        /// Trilinear/mipmap mode.
        triln / set_triln: 3 + 3
    );
    flag!(aniso / set_aniso: 6);

    #[inline]
    pub const fn from_raw(key: u32) -> Self {
        Self(key)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 >> 7 == 0
    }
}

/// Depth/stencil configuration selector. Five used bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DepthStencilSelector(pub u32);

impl DepthStencilSelector {
    field!(
        /// Depth test function (never, always, gequal, greater).
        ztst / set_ztst: 0 + 2
    );
    flag!(
        /// Depth write enable.
        zwe / set_zwe: 2
    );
    flag!(
        /// Destination-alpha test through the stencil unit.
        date / set_date: 3
    );
    flag!(
        /// First-pixel-only variant of the destination-alpha test.
        date_one / set_date_one: 4
    );

    #[inline]
    pub const fn from_raw(key: u32) -> Self {
        Self(key)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 >> 5 == 0
    }
}

/// Color write mask selector. Defaults to all channels enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorMaskSelector(pub u32);

impl ColorMaskSelector {
    flag!(wr / set_wr: 0);
    flag!(wg / set_wg: 1);
    flag!(wb / set_wb: 2);
    flag!(wa / set_wa: 3);

    pub const ALL: Self = Self(0xf);
    /// Alpha channel only (alpha-resolve sub-draws).
    pub const ALPHA_ONLY: Self = Self(0x8);

    #[inline]
    pub const fn from_raw(key: u32) -> Self {
        Self(key & 0xf)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0 & 0xf
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 >> 4 == 0
    }
}

impl Default for ColorMaskSelector {
    fn default() -> Self {
        Self::ALL
    }
}

/// Blend equation selector: `(A - B) * C + D` over source color, destination
/// color and zero, with C one of source alpha, destination alpha or the fixed
/// alpha coefficient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BlendSelector(pub u32);

/// Number of (A, B, C, D) factor combinations in the blend table.
pub const BLEND_COMBINATIONS: usize = 3 * 3 * 3 * 3;

/// Table index of the merge-pass special case.
pub const BLEND_MERGE_INDEX: usize = BLEND_COMBINATIONS;

impl BlendSelector {
    field!(a / set_a: 0 + 2);
    field!(b / set_b: 2 + 2);
    field!(c / set_c: 4 + 2);
    field!(d / set_d: 6 + 2);
    flag!(
        /// Caller explicitly requested accumulation blending.
        accu / set_accu: 8
    );

    pub fn from_abcd(a: u32, b: u32, c: u32, d: u32) -> Self {
        let mut sel = Self::default();
        sel.set_a(a);
        sel.set_b(b);
        sel.set_c(c);
        sel.set_d(d);
        sel
    }

    #[inline]
    pub const fn from_raw(key: u32) -> Self {
        Self(key)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Blend table index for this factor combination.
    #[inline]
    pub const fn index(self) -> usize {
        (((self.a() * 3 + self.b()) * 3 + self.c()) * 3 + self.d()) as usize
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 >> 9 == 0 && self.a() <= 2 && self.b() <= 2 && self.c() <= 2 && self.d() <= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ps_selector_roundtrip() {
        let mut sel = PsSelector::default();
        sel.set_tfx(1);
        sel.set_atst(2);
        sel.set_fog(false);
        sel.set_blend_a(1);
        sel.set_blend_b(2);
        sel.set_blend_c(0);
        sel.set_blend_d(1);

        assert_eq!(sel.tfx(), 1);
        assert_eq!(sel.atst(), 2);
        assert!(!sel.fog());
        assert_eq!(sel.blend_a(), 1);
        assert_eq!(sel.blend_b(), 2);
        assert_eq!(sel.blend_c(), 0);
        assert_eq!(sel.blend_d(), 1);

        let copy = PsSelector::from_raw(sel.raw());
        assert_eq!(copy, sel);
        assert_eq!(copy.raw(), sel.raw());
    }

    #[test]
    fn test_ps_selector_field_independence() {
        let mut sel = PsSelector::default();
        sel.set_wms(3);
        sel.set_wmt(3);
        sel.set_channel(6);
        let before = sel.raw();

        sel.set_tfx(4);
        assert_eq!(sel.wms(), 3);
        assert_eq!(sel.wmt(), 3);
        assert_eq!(sel.channel(), 6);
        assert_ne!(sel.raw(), before);
    }

    #[test]
    fn test_equal_fields_equal_keys() {
        let mut a = PsSelector::default();
        let mut b = PsSelector::default();
        for sel in [&mut a, &mut b] {
            sel.set_tfx(2);
            sel.set_fst(true);
            sel.set_date(3);
        }
        assert_eq!(a, b);
        assert_eq!(a.raw(), b.raw());
    }

    #[test]
    fn test_ps_selector_validity() {
        assert!(PsSelector::default().is_valid());

        let mut sel = PsSelector::default();
        sel.set_tfx(4);
        assert!(sel.is_valid());
        sel.set_tfx(5);
        assert!(!sel.is_valid());

        // Reserved bits must stay zero.
        assert!(!PsSelector::from_raw(1 << 51).is_valid());
        assert!(!PsSelector::from_raw(1 << 63).is_valid());

        let mut sel = PsSelector::default();
        sel.set_blend_a(3);
        assert!(!sel.is_valid());
    }

    #[test]
    fn test_ps_sw_blend_detection() {
        let mut sel = PsSelector::default();
        assert!(!sel.sw_blend());
        sel.set_blend_d(1);
        assert!(sel.sw_blend());
        sel.clear_blend();
        assert!(!sel.sw_blend());
    }

    #[test]
    fn test_sampler_selector_space() {
        let mut sel = SamplerSelector::default();
        sel.set_tau(true);
        sel.set_tav(true);
        sel.set_biln(true);
        sel.set_triln(7);
        sel.set_aniso(true);
        assert!(sel.is_valid());
        assert_eq!(sel.raw(), 0x7f);
        assert!(!SamplerSelector::from_raw(1 << 7).is_valid());
    }

    #[test]
    fn test_depth_stencil_selector() {
        let mut sel = DepthStencilSelector::default();
        sel.set_ztst(2);
        sel.set_zwe(true);
        sel.set_date(true);
        assert_eq!(sel.ztst(), 2);
        assert!(sel.zwe());
        assert!(sel.date());
        assert!(!sel.date_one());
        assert!(sel.is_valid());
        assert!(sel.raw() < 1 << 5);
    }

    #[test]
    fn test_color_mask_defaults() {
        let mask = ColorMaskSelector::default();
        assert!(mask.wr() && mask.wg() && mask.wb() && mask.wa());
        assert_eq!(mask, ColorMaskSelector::ALL);

        let alpha = ColorMaskSelector::ALPHA_ONLY;
        assert!(!alpha.wr() && !alpha.wg() && !alpha.wb() && alpha.wa());
    }

    #[test]
    fn test_blend_selector_index() {
        // (A - B) * C + D enumerated with D fastest.
        assert_eq!(BlendSelector::from_abcd(0, 0, 0, 0).index(), 0);
        assert_eq!(BlendSelector::from_abcd(0, 0, 0, 1).index(), 1);
        assert_eq!(BlendSelector::from_abcd(0, 0, 1, 0).index(), 3);
        assert_eq!(BlendSelector::from_abcd(0, 1, 0, 0).index(), 9);
        assert_eq!(BlendSelector::from_abcd(1, 0, 0, 0).index(), 27);
        assert_eq!(
            BlendSelector::from_abcd(2, 2, 2, 2).index(),
            BLEND_COMBINATIONS - 1
        );
    }

    #[test]
    fn test_blend_selector_validity() {
        assert!(BlendSelector::from_abcd(2, 2, 2, 2).is_valid());
        let mut sel = BlendSelector::default();
        sel.set_a(3);
        assert!(!sel.is_valid());
        assert!(!BlendSelector::from_raw(1 << 9).is_valid());
    }
}
