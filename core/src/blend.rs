//! Blend table and blend-emulation policy
//!
//! The GS blend unit computes `(A - B) * C + D` where A, B and D select among
//! source color, destination color and zero, and C selects among source
//! alpha, destination alpha and the fixed alpha coefficient. The 3^4
//! combinations (plus the merge-pass special case) are tabulated once: each
//! entry gives the closest hardware blend configuration and extension flags
//! describing how far from exact that configuration is.
//!
//! The table is derived at compile time from the equation itself rather than
//! transcribed, so every entry is auditable against the algebra: expand
//! `(A - B) * C + D` into a source coefficient and a destination coefficient
//! and map those onto the hardware factor set.

use bitflags::bitflags;

use crate::selector::{BLEND_COMBINATIONS, BLEND_MERGE_INDEX, BlendSelector};

bitflags! {
    /// Extension flags qualifying a blend table entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlendFlags: u8 {
        /// A coefficient exceeds 1; the hardware configuration clamps it.
        const A_MAX = 1 << 0;
        /// Destination color is the blend factor itself; the pixel stage must
        /// output the factor (`clr1` shader bit).
        const C_CLR = 1 << 1;
        /// The equation never reads the destination, so the software path
        /// needs no visibility barrier.
        const NO_BAR = 1 << 2;
        /// Eligible for mixed software/hardware accumulation (shader computes
        /// the scaled source term, hardware adds the destination).
        const ACCU = 1 << 3;
    }
}

/// Hardware blend operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
}

/// Hardware blend factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    Constant,
    OneMinusConstant,
    /// Destination color (the `C_CLR` trick).
    Dst,
}

/// One pre-tabulated blend-unit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendEntry {
    pub flags: BlendFlags,
    pub op: BlendOp,
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendEntry {
    /// Exact means the hardware unit alone reproduces the equation (the
    /// `C_CLR` trick counts as exact given its shader bit).
    #[inline]
    pub fn is_exact(self) -> bool {
        !self.flags.contains(BlendFlags::A_MAX)
    }
}

/// Concrete hardware blend binding: table entry plus the fixed-alpha
/// coefficient when the factor is `Constant`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HwBlend {
    pub op: BlendOp,
    pub src: BlendFactor,
    pub dst: BlendFactor,
    /// Fixed alpha coefficient, only read when a factor is `Constant`.
    pub constant: f32,
}

/// Pixel format class of the draw target, as far as blending is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    /// 32-bit unorm color; hardware clamping matches the emulated unit.
    Color32,
    /// 16-bit unorm color.
    Color16,
    /// Extended-range float target (colclip/hdr); clamping would corrupt the
    /// wrapped-color math.
    FloatHdr,
}

impl TargetFormat {
    /// Whether the hardware clamp at the unit range is acceptable here.
    #[inline]
    pub fn clamps(self) -> bool {
        !matches!(self, TargetFormat::FloatHdr)
    }
}

// ============================================================================
// Table derivation
// ============================================================================

// Symbolic coefficient of Cs or Cd after expanding (A - B) * C + D.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Coef {
    Zero,
    One,
    C,
    NegC,
    OnePlusC,
    OneMinusC,
}

const CS: u32 = 0;
const CD: u32 = 1;
const ZERO: u32 = 2;
const C_AS: u32 = 0;
const C_AD: u32 = 1;

const fn coef_of(term: u32, a: u32, b: u32, d: u32) -> Coef {
    let plus = a == term;
    let minus = b == term;
    let unit = d == term;
    match (plus, minus, unit) {
        (true, true, true) => Coef::One,
        (true, true, false) => Coef::Zero,
        (true, false, true) => Coef::OnePlusC,
        (true, false, false) => Coef::C,
        (false, true, true) => Coef::OneMinusC,
        (false, true, false) => Coef::NegC,
        (false, false, true) => Coef::One,
        (false, false, false) => Coef::Zero,
    }
}

const fn factor_for(coef: Coef, c: u32) -> BlendFactor {
    match coef {
        Coef::Zero => BlendFactor::Zero,
        // OnePlusC is clamped to One by the caller (A_MAX).
        Coef::One | Coef::OnePlusC => BlendFactor::One,
        Coef::C | Coef::NegC => match c {
            C_AS => BlendFactor::SrcAlpha,
            C_AD => BlendFactor::DstAlpha,
            _ => BlendFactor::Constant,
        },
        Coef::OneMinusC => match c {
            C_AS => BlendFactor::OneMinusSrcAlpha,
            C_AD => BlendFactor::OneMinusDstAlpha,
            _ => BlendFactor::OneMinusConstant,
        },
    }
}

const fn derive_entry(a: u32, b: u32, c: u32, d: u32) -> BlendEntry {
    let cs = coef_of(CS, a, b, d);
    let cd = coef_of(CD, a, b, d);

    let mut flags = 0u8;
    if !(a == CD || b == CD || d == CD || c == C_AD) {
        flags |= BlendFlags::NO_BAR.bits();
    }
    if a == CS && b == ZERO && d == CD && c != C_AD {
        flags |= BlendFlags::ACCU.bits();
    }

    // Cd * (1 + C) with no source term: the pixel stage outputs the factor
    // and hardware multiplies by the destination color.
    if matches!(cs, Coef::Zero) && matches!(cd, Coef::OnePlusC) {
        return BlendEntry {
            flags: BlendFlags::from_bits_retain(flags | BlendFlags::C_CLR.bits()),
            op: BlendOp::Add,
            src: BlendFactor::Dst,
            dst: BlendFactor::Zero,
        };
    }

    if matches!(cs, Coef::OnePlusC) || matches!(cd, Coef::OnePlusC) {
        flags |= BlendFlags::A_MAX.bits();
    }

    let op = if matches!(cs, Coef::NegC) {
        BlendOp::ReverseSubtract
    } else if matches!(cd, Coef::NegC) {
        BlendOp::Subtract
    } else {
        BlendOp::Add
    };

    BlendEntry {
        flags: BlendFlags::from_bits_retain(flags),
        op,
        src: factor_for(cs, c),
        dst: factor_for(cd, c),
    }
}

/// The 3^4 factor combinations plus the merge-pass entry.
pub static BLEND_TABLE: [BlendEntry; BLEND_COMBINATIONS + 1] = {
    let mut table = [BlendEntry {
        flags: BlendFlags::empty(),
        op: BlendOp::Add,
        src: BlendFactor::One,
        dst: BlendFactor::Zero,
    }; BLEND_COMBINATIONS + 1];

    let mut i = 0;
    while i < BLEND_COMBINATIONS {
        let a = (i / 27) as u32;
        let b = (i / 9 % 3) as u32;
        let c = (i / 3 % 3) as u32;
        let d = (i % 3) as u32;
        table[i] = derive_entry(a, b, c, d);
        i += 1;
    }

    // Merge pass: plain source-alpha interpolation against the destination.
    table[BLEND_MERGE_INDEX] = BlendEntry {
        flags: BlendFlags::empty(),
        op: BlendOp::Add,
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::OneMinusSrcAlpha,
    };

    table
};

/// Look up the table entry for a blend selector.
#[inline]
pub fn entry(sel: BlendSelector) -> BlendEntry {
    BLEND_TABLE[sel.index()]
}

// ============================================================================
// Policy
// ============================================================================

/// How one draw's blend equation is realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendStrategy {
    /// Hardware blend unit alone; `clr1` asserts the factor-output shader
    /// bit for `C_CLR` entries.
    Direct { clr1: bool },
    /// Hardware approximation (clamped coefficient) plus a constant
    /// correction factor supplied through the blend constant.
    Approximate,
    /// Pixel stage computes the equation itself. `barrier` means each
    /// sub-draw must be preceded by a destination-visibility barrier;
    /// `accumulation` keeps hardware addition of the destination term.
    Software { barrier: bool, accumulation: bool },
}

/// Decide how to realize `sel` against a target of format `format`.
///
/// Pure function of its inputs: the static table entry resolves the exact
/// case, `A_MAX` plus a clamping format resolves the approximate case, and
/// everything else is computed in the shader. An explicit accumulation
/// request is honored only when the entry is eligible.
pub fn select_strategy(sel: BlendSelector, format: TargetFormat) -> BlendStrategy {
    let entry = entry(sel);

    if sel.accu() && entry.flags.contains(BlendFlags::ACCU) {
        return BlendStrategy::Software {
            barrier: false,
            accumulation: true,
        };
    }

    if entry.is_exact() && format.clamps() {
        return BlendStrategy::Direct {
            clr1: entry.flags.contains(BlendFlags::C_CLR),
        };
    }

    if entry.flags.contains(BlendFlags::A_MAX) && format.clamps() {
        return BlendStrategy::Approximate;
    }

    BlendStrategy::Software {
        barrier: !entry.flags.contains(BlendFlags::NO_BAR),
        accumulation: false,
    }
}
