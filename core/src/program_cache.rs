//! Compiled program cache
//!
//! Keyed by the exact selector triple, no normalization: two selectors that
//! happen to generate identical source still occupy two entries. The pixel
//! selector space is sparse so this is a hash map rather than a flat table.

use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::driver::{Driver, Generation, ProgramHandle, RawProgram};
use crate::selector::{GsSelector, PsSelector, VsSelector};
use crate::shader_gen;
use crate::state_cache::CacheError;

/// Full selector triple identifying one program permutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    pub vs: u32,
    pub gs: u32,
    pub ps: u64,
}

impl ProgramKey {
    pub fn new(vs: VsSelector, gs: GsSelector, ps: PsSelector) -> Self {
        Self {
            vs: vs.raw(),
            gs: gs.raw(),
            ps: ps.raw(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ProgramCache {
    generation: Generation,
    programs: HashMap<ProgramKey, RawProgram>,
    fallback: Option<RawProgram>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Look up the permutation, generating and compiling on miss. Failed
    /// compiles are not cached; a later identical request retries.
    pub fn get_or_compile<D: Driver>(
        &mut self,
        driver: &mut D,
        vs: VsSelector,
        gs: GsSelector,
        ps: PsSelector,
    ) -> Result<ProgramHandle, CacheError> {
        let key = ProgramKey::new(vs, gs, ps);
        if let Some(&raw) = self.programs.get(&key) {
            return Ok(ProgramHandle {
                raw,
                generation: self.generation,
            });
        }

        let vs_source = shader_gen::generate_vs(vs);
        let ps_source = shader_gen::generate_ps(ps)?;
        let raw = driver.compile_program(&vs_source, &ps_source).map_err(|e| {
            warn!(ps = ps.raw(), error = %e, "permutation failed to compile");
            e
        })?;
        debug!(
            vs = vs.raw(),
            ps = ps.raw(),
            cached = self.programs.len() + 1,
            "compiled program permutation"
        );
        self.programs.insert(key, raw);
        Ok(ProgramHandle {
            raw,
            generation: self.generation,
        })
    }

    /// The pass-through fallback program, compiled lazily. Used when a
    /// permutation fails to compile so the frame keeps going.
    pub fn fallback<D: Driver>(&mut self, driver: &mut D) -> Result<ProgramHandle, CacheError> {
        let raw = match self.fallback {
            Some(raw) => raw,
            None => {
                let (vs_source, ps_source) = shader_gen::generate_passthrough();
                let raw = driver.compile_program(&vs_source, &ps_source)?;
                self.fallback = Some(raw);
                raw
            }
        };
        Ok(ProgramHandle {
            raw,
            generation: self.generation,
        })
    }

    pub fn resolve(&self, handle: ProgramHandle) -> Result<RawProgram, CacheError> {
        if handle.generation != self.generation {
            return Err(CacheError::Stale);
        }
        Ok(handle.raw)
    }

    /// Drop every entry and start a new generation.
    pub fn clear(&mut self) {
        self.programs.clear();
        self.fallback = None;
        self.generation.bump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::recording::RecordingDriver;

    fn pixel_selector() -> PsSelector {
        let mut ps = PsSelector::default();
        ps.set_tfx(1);
        ps.set_atst(2);
        ps
    }

    #[test]
    fn test_compiled_once_per_key() {
        let mut driver = RecordingDriver::new();
        let mut cache = ProgramCache::new();
        let (vs, gs, ps) = (VsSelector::default(), GsSelector::default(), pixel_selector());

        let a = cache.get_or_compile(&mut driver, vs, gs, ps).unwrap();
        let b = cache.get_or_compile(&mut driver, vs, gs, ps).unwrap();
        assert_eq!(a, b);
        assert_eq!(driver.compiles(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_distinct_keys_not_normalized() {
        let mut driver = RecordingDriver::new();
        let mut cache = ProgramCache::new();
        let vs = VsSelector::default();
        let gs = GsSelector::default();

        let mut other = pixel_selector();
        other.set_fog(true);

        cache.get_or_compile(&mut driver, vs, gs, pixel_selector()).unwrap();
        cache.get_or_compile(&mut driver, vs, gs, other).unwrap();
        assert_eq!(driver.compiles(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_compile_not_cached() {
        let mut driver = RecordingDriver::new();
        let mut cache = ProgramCache::new();
        let (vs, gs, ps) = (VsSelector::default(), GsSelector::default(), pixel_selector());

        driver.fail_next_compile = true;
        assert!(cache.get_or_compile(&mut driver, vs, gs, ps).is_err());
        assert!(cache.is_empty());

        assert!(cache.get_or_compile(&mut driver, vs, gs, ps).is_ok());
        assert_eq!(driver.compiles(), 2);
    }

    #[test]
    fn test_invalid_pixel_selector_never_reaches_driver() {
        let mut driver = RecordingDriver::new();
        let mut cache = ProgramCache::new();
        let ps = PsSelector::from_raw(1 << 60);

        assert!(matches!(
            cache.get_or_compile(&mut driver, VsSelector::default(), GsSelector::default(), ps),
            Err(CacheError::ShaderGen(_))
        ));
        assert_eq!(driver.compiles(), 0);
    }

    #[test]
    fn test_fallback_compiled_once() {
        let mut driver = RecordingDriver::new();
        let mut cache = ProgramCache::new();

        let a = cache.fallback(&mut driver).unwrap();
        let b = cache.fallback(&mut driver).unwrap();
        assert_eq!(a, b);
        assert_eq!(driver.compiles(), 1);
    }

    #[test]
    fn test_clear_starts_new_generation() {
        let mut driver = RecordingDriver::new();
        let mut cache = ProgramCache::new();
        let (vs, gs, ps) = (VsSelector::default(), GsSelector::default(), pixel_selector());

        let stale = cache.get_or_compile(&mut driver, vs, gs, ps).unwrap();
        cache.clear();
        assert!(matches!(cache.resolve(stale), Err(CacheError::Stale)));
        assert!(cache.is_empty());

        // Same key recompiles under the new generation.
        cache.get_or_compile(&mut driver, vs, gs, ps).unwrap();
        assert_eq!(driver.compiles(), 2);
    }
}
