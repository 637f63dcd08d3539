//! Native function hook engine
//!
//! Tracks installed splices in a registry keyed by target address. The
//! registry update and the underlying splice form one logical transaction:
//! a failed splice adds no record, and a failed unsplice keeps the record
//! so the registry never disagrees with physical reality.

use crate::error::{Result, SpecterError};
use super::trampoline::TrampolineProvider;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// one installed native hook
#[derive(Debug, Clone)]
pub struct HookRecord {
    /// address of the spliced function
    pub target: usize,
    /// address execution is redirected to
    pub replacement: usize,
    /// original entry point reported by the trampoline provider
    pub original: usize,
    /// when the hook was installed
    pub installed_at: Instant,
}

/// hook engine over a trampoline provider
///
/// explicitly constructed and injected; tests instantiate independent
/// engines instead of sharing process-wide state.
pub struct HookEngine<P> {
    provider: P,
    hooks: Mutex<HashMap<usize, HookRecord>>,
}

impl<P: TrampolineProvider> HookEngine<P> {
    /// create an engine over the given provider
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            hooks: Mutex::new(HashMap::new()),
        }
    }

    /// reset to a known clean state
    ///
    /// clears any hooks left over from a previous owner of this provider.
    pub fn initialize(&self) {
        self.clear_all();
        log::debug!("hook engine initialized");
    }

    /// splice `target` to jump to `replacement`
    ///
    /// returns the original entry point so the replacement can call
    /// through to prior behavior. the registry check and the splice run
    /// under one lock, so two racing installers cannot both succeed.
    pub fn register(&self, target: usize, replacement: usize) -> Result<usize> {
        if target == 0 {
            return Err(SpecterError::InvalidArgument { context: "register: null target" });
        }
        if replacement == 0 {
            return Err(SpecterError::InvalidArgument { context: "register: null replacement" });
        }

        let mut hooks = self.hooks.lock().unwrap();

        if hooks.contains_key(&target) {
            return Err(SpecterError::AlreadyHooked { target });
        }

        let original = self
            .provider
            .install(target, replacement)
            .ok_or(SpecterError::SpliceFailed { target })?;

        hooks.insert(
            target,
            HookRecord {
                target,
                replacement,
                original,
                installed_at: Instant::now(),
            },
        );

        log::debug!("hooked {target:#x} -> {replacement:#x}");
        Ok(original)
    }

    /// remove the splice at `target`
    ///
    /// the record is dropped only after the provider confirms the
    /// unsplice; on physical failure the record stays so a retry is
    /// possible.
    pub fn unregister(&self, target: usize) -> Result<()> {
        let mut hooks = self.hooks.lock().unwrap();

        if !hooks.contains_key(&target) {
            return Err(SpecterError::NotHooked { target });
        }

        if !self.provider.remove(target) {
            return Err(SpecterError::UnspliceFailed { target });
        }

        hooks.remove(&target);
        log::debug!("unhooked {target:#x}");
        Ok(())
    }

    /// best-effort removal of every hook
    ///
    /// attempts each unsplice, then empties the registry regardless of
    /// individual failures — a clean registry is prioritized over perfect
    /// physical rollback.
    pub fn clear_all(&self) {
        let mut hooks = self.hooks.lock().unwrap();

        for (&target, _) in hooks.iter() {
            if !self.provider.remove(target) {
                log::warn!("failed to unsplice {target:#x} during clear");
            }
        }

        hooks.clear();
    }

    /// check whether `target` is currently hooked
    pub fn is_hooked(&self, target: usize) -> bool {
        self.hooks.lock().unwrap().contains_key(&target)
    }

    /// saved original entry point for a hooked target
    pub fn original(&self, target: usize) -> Option<usize> {
        self.hooks.lock().unwrap().get(&target).map(|h| h.original)
    }

    /// number of active hooks
    pub fn count(&self) -> usize {
        self.hooks.lock().unwrap().len()
    }

    /// snapshot of the active hooks
    pub fn hooks(&self) -> Vec<HookRecord> {
        self.hooks.lock().unwrap().values().cloned().collect()
    }
}
