//! Sampler and depth/stencil state caches
//!
//! Both selector spaces are small enough for flat arrays indexed by the raw
//! selector bits, so a hit is one bounds-checked load. Creation happens at
//! most once per selector value per generation; a failed creation leaves the
//! slot empty so the next request retries.

use tracing::debug;

use crate::driver::{
    DepthStencilHandle, Driver, DriverError, Generation, RawDepthStencil, RawSampler,
    SamplerHandle,
};
use crate::selector::{DepthStencilSelector, SamplerSelector};
use crate::shader_gen::ShaderGenError;

const SAMPLER_SLOTS: usize = 1 << 7;
const DEPTH_STENCIL_SLOTS: usize = 1 << 5;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("selector {0:#x} is not a valid cache key")]
    InvalidSelector(u64),
    #[error("handle is from a previous cache generation")]
    Stale,
    #[error(transparent)]
    ShaderGen(#[from] ShaderGenError),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Fixed-size caches for the two small state object families.
#[derive(Debug)]
pub struct StateCache {
    generation: Generation,
    samplers: [Option<RawSampler>; SAMPLER_SLOTS],
    depth_stencil: [Option<RawDepthStencil>; DEPTH_STENCIL_SLOTS],
}

impl Default for StateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCache {
    pub fn new() -> Self {
        Self {
            generation: Generation::default(),
            samplers: [None; SAMPLER_SLOTS],
            depth_stencil: [None; DEPTH_STENCIL_SLOTS],
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn get_or_create_sampler<D: Driver>(
        &mut self,
        driver: &mut D,
        sel: SamplerSelector,
    ) -> Result<SamplerHandle, CacheError> {
        if !sel.is_valid() {
            return Err(CacheError::InvalidSelector(sel.raw() as u64));
        }
        let slot = sel.raw() as usize;
        let raw = match self.samplers[slot] {
            Some(raw) => raw,
            None => {
                let raw = driver.create_sampler(sel)?;
                debug!(selector = sel.raw(), id = raw.0, "created sampler state");
                self.samplers[slot] = Some(raw);
                raw
            }
        };
        Ok(SamplerHandle {
            raw,
            generation: self.generation,
        })
    }

    pub fn get_or_create_depth_stencil<D: Driver>(
        &mut self,
        driver: &mut D,
        sel: DepthStencilSelector,
    ) -> Result<DepthStencilHandle, CacheError> {
        if !sel.is_valid() {
            return Err(CacheError::InvalidSelector(sel.raw() as u64));
        }
        let slot = sel.raw() as usize;
        let raw = match self.depth_stencil[slot] {
            Some(raw) => raw,
            None => {
                let raw = driver.create_depth_stencil(sel)?;
                debug!(selector = sel.raw(), id = raw.0, "created depth/stencil state");
                self.depth_stencil[slot] = Some(raw);
                raw
            }
        };
        Ok(DepthStencilHandle {
            raw,
            generation: self.generation,
        })
    }

    /// Unwrap a handle minted by this cache, rejecting handles that survived
    /// a [`clear`](Self::clear).
    pub fn resolve_sampler(&self, handle: SamplerHandle) -> Result<RawSampler, CacheError> {
        if handle.generation != self.generation {
            return Err(CacheError::Stale);
        }
        Ok(handle.raw)
    }

    pub fn resolve_depth_stencil(
        &self,
        handle: DepthStencilHandle,
    ) -> Result<RawDepthStencil, CacheError> {
        if handle.generation != self.generation {
            return Err(CacheError::Stale);
        }
        Ok(handle.raw)
    }

    /// Forget every cached object and start a new generation. The caller
    /// owns releasing the driver-side objects.
    pub fn clear(&mut self) {
        self.samplers = [None; SAMPLER_SLOTS];
        self.depth_stencil = [None; DEPTH_STENCIL_SLOTS];
        self.generation.bump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::recording::RecordingDriver;

    #[test]
    fn test_sampler_created_once_per_selector() {
        let mut driver = RecordingDriver::new();
        let mut cache = StateCache::new();
        let mut sel = SamplerSelector::default();
        sel.set_biln(true);

        let a = cache.get_or_create_sampler(&mut driver, sel).unwrap();
        let b = cache.get_or_create_sampler(&mut driver, sel).unwrap();
        assert_eq!(a, b);
        assert_eq!(driver.sampler_creations(), 1);
    }

    #[test]
    fn test_distinct_selectors_distinct_objects() {
        let mut driver = RecordingDriver::new();
        let mut cache = StateCache::new();
        let plain = SamplerSelector::default();
        let mut bilinear = SamplerSelector::default();
        bilinear.set_biln(true);

        let a = cache.get_or_create_sampler(&mut driver, plain).unwrap();
        let b = cache.get_or_create_sampler(&mut driver, bilinear).unwrap();
        assert_ne!(cache.resolve_sampler(a).unwrap(), cache.resolve_sampler(b).unwrap());
        assert_eq!(driver.sampler_creations(), 2);
    }

    #[test]
    fn test_invalid_selector_rejected_without_driver_call() {
        let mut driver = RecordingDriver::new();
        let mut cache = StateCache::new();
        let sel = SamplerSelector::from_raw(1 << 10);

        assert!(matches!(
            cache.get_or_create_sampler(&mut driver, sel),
            Err(CacheError::InvalidSelector(_))
        ));
        assert_eq!(driver.sampler_creations(), 0);
    }

    #[test]
    fn test_failed_creation_not_cached() {
        let mut driver = RecordingDriver::new();
        let mut cache = StateCache::new();
        let sel = DepthStencilSelector::default();

        driver.fail_next_depth_stencil = true;
        assert!(cache.get_or_create_depth_stencil(&mut driver, sel).is_err());

        // Retry succeeds and actually reaches the driver again.
        assert!(cache.get_or_create_depth_stencil(&mut driver, sel).is_ok());
        assert_eq!(driver.depth_stencil_creations(), 2);
    }

    #[test]
    fn test_clear_invalidates_outstanding_handles() {
        let mut driver = RecordingDriver::new();
        let mut cache = StateCache::new();
        let sel = SamplerSelector::default();

        let stale = cache.get_or_create_sampler(&mut driver, sel).unwrap();
        cache.clear();
        assert!(matches!(cache.resolve_sampler(stale), Err(CacheError::Stale)));

        let fresh = cache.get_or_create_sampler(&mut driver, sel).unwrap();
        assert!(cache.resolve_sampler(fresh).is_ok());
        assert_ne!(stale, fresh);
    }
}
