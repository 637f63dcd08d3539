//! Anti-detection controller
//!
//! Decides per protection category whether instrumentation side effects
//! should be masked, and tracks an estimate of how likely the process is
//! currently being inspected. Security operations fail soft: a failed
//! obfuscation or protection toggle is reported through the detection
//! callbacks and the log, never escalated — availability is prioritized
//! over stealth.

use crate::error::{Result, SpecterError};
use crate::memory::{MemoryAccess, Protection};
use super::{monitor, sanitize, timing};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// coarse, advisory classification of inspection likelihood
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskLevel {
    /// minimal risk of detection
    Low,
    /// moderate risk, caution advised
    Medium,
    /// high risk, act only when necessary
    High,
    /// extreme risk, likely to be flagged
    Critical,
}

impl RiskLevel {
    fn as_u8(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Low,
            1 => Self::Medium,
            2 => Self::High,
            _ => Self::Critical,
        }
    }
}

impl core::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// protection category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectionType {
    /// memory signature protection
    Memory,
    /// call stack sanitization
    CallStack,
    /// timing attack prevention
    Timing,
    /// anti-analysis countermeasures
    Analysis,
    /// dynamic behavior adaptation
    Behavior,
    /// network traffic obfuscation
    Network,
    /// anti-debugging measures
    Debug,
    /// every category at once
    All,
}

impl ProtectionType {
    /// the concrete categories (`All` fans out to these)
    pub const CATEGORIES: [ProtectionType; 7] = [
        Self::Memory,
        Self::CallStack,
        Self::Timing,
        Self::Analysis,
        Self::Behavior,
        Self::Network,
        Self::Debug,
    ];
}

impl core::fmt::Display for ProtectionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Memory => write!(f, "Memory"),
            Self::CallStack => write!(f, "CallStack"),
            Self::Timing => write!(f, "Timing"),
            Self::Analysis => write!(f, "Analysis"),
            Self::Behavior => write!(f, "Behavior"),
            Self::Network => write!(f, "Network"),
            Self::Debug => write!(f, "Debug"),
            Self::All => write!(f, "All"),
        }
    }
}

/// callback invoked when a protective action fires
pub type ProtectionCallback = Arc<dyn Fn() + Send + Sync>;

/// callback invoked on detection events with the assessed level
pub type DetectionCallback = Arc<dyn Fn(RiskLevel, &str) + Send + Sync>;

/// a region recorded by `protect_region`
#[derive(Debug, Clone, Copy)]
struct TrackedRegion {
    size: usize,
    original: Protection,
}

/// minimum interval between non-forced re-assessments
const REASSESSMENT_INTERVAL: Duration = Duration::from_secs(30);

/// anti-detection controller
///
/// explicitly constructed and injected; one owning context per process.
pub struct AntiDetectionSystem {
    memory: MemoryAccess,
    enabled: Mutex<HashMap<ProtectionType, bool>>,
    // BTreeMap keeps dispatch in registration order (ids are monotonic)
    protection_callbacks: Mutex<BTreeMap<u32, ProtectionCallback>>,
    detection_callbacks: Mutex<BTreeMap<u32, DetectionCallback>>,
    protected_regions: Mutex<HashMap<usize, TrackedRegion>>,
    risk: AtomicU8,
    next_callback_id: AtomicU32,
    last_assessment: Mutex<Option<Instant>>,
}

impl AntiDetectionSystem {
    /// create a controller with every category enabled
    pub fn new(memory: MemoryAccess) -> Self {
        let system = Self {
            memory,
            enabled: Mutex::new(HashMap::new()),
            protection_callbacks: Mutex::new(BTreeMap::new()),
            detection_callbacks: Mutex::new(BTreeMap::new()),
            protected_regions: Mutex::new(HashMap::new()),
            risk: AtomicU8::new(RiskLevel::Low.as_u8()),
            next_callback_id: AtomicU32::new(1),
            last_assessment: Mutex::new(None),
        };
        system.initialize(&[]);
        system
    }

    /// set the enabled categories; an empty slice enables everything
    pub fn initialize(&self, categories: &[ProtectionType]) {
        let mut enabled = self.enabled.lock().unwrap();
        enabled.clear();

        if categories.is_empty() || categories.contains(&ProtectionType::All) {
            for category in ProtectionType::CATEGORIES {
                enabled.insert(category, true);
            }
        } else {
            for category in ProtectionType::CATEGORIES {
                enabled.insert(category, categories.contains(&category));
            }
        }
    }

    /// enable one category (`All` enables every one)
    pub fn enable(&self, category: ProtectionType) {
        self.set_enabled(category, true);
    }

    /// disable one category (`All` disables every one)
    pub fn disable(&self, category: ProtectionType) {
        self.set_enabled(category, false);
    }

    fn set_enabled(&self, category: ProtectionType, value: bool) {
        let mut enabled = self.enabled.lock().unwrap();
        if category == ProtectionType::All {
            for category in ProtectionType::CATEGORIES {
                enabled.insert(category, value);
            }
        } else {
            enabled.insert(category, value);
        }
    }

    /// check whether a category is enabled
    pub fn is_enabled(&self, category: ProtectionType) -> bool {
        if category == ProtectionType::All {
            let enabled = self.enabled.lock().unwrap();
            return ProtectionType::CATEGORIES
                .iter()
                .all(|c| enabled.get(c).copied().unwrap_or(false));
        }
        self.enabled
            .lock()
            .unwrap()
            .get(&category)
            .copied()
            .unwrap_or(false)
    }

    /// register a callback fired when a protective action triggers
    ///
    /// returns a handle for O(1) removal.
    pub fn register_protection_callback(&self, callback: ProtectionCallback) -> u32 {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.protection_callbacks.lock().unwrap().insert(id, callback);
        id
    }

    /// remove a protection callback by handle
    pub fn unregister_protection_callback(&self, id: u32) -> bool {
        self.protection_callbacks.lock().unwrap().remove(&id).is_some()
    }

    /// register a callback fired on detection events
    pub fn register_detection_callback(&self, callback: DetectionCallback) -> u32 {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.detection_callbacks.lock().unwrap().insert(id, callback);
        id
    }

    /// remove a detection callback by handle
    pub fn unregister_detection_callback(&self, id: u32) -> bool {
        self.detection_callbacks.lock().unwrap().remove(&id).is_some()
    }

    // dispatch runs on a snapshot taken under the lock, never with the
    // lock held: callbacks may re-enter the system, including removing
    // themselves or registering new callbacks mid-dispatch
    fn notify_protection(&self) {
        let callbacks: Vec<ProtectionCallback> = self
            .protection_callbacks
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    fn notify_detection(&self, level: RiskLevel, details: &str) {
        let callbacks: Vec<DetectionCallback> = self
            .detection_callbacks
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(level, details);
        }
    }

    /// write-protect a region and record it for later restoration
    ///
    /// a later [`unprotect_region`](Self::unprotect_region) needs only the
    /// address; size and original flags come from the tracking map.
    pub fn protect_region(&self, address: usize, size: usize) -> Result<()> {
        if address == 0 || size == 0 {
            return Err(SpecterError::InvalidArgument { context: "protect_region" });
        }

        let original = self
            .memory
            .region_info(address)
            .map(|r| r.protection)
            .ok_or(SpecterError::ProtectionQueryFailed { address })?;

        match self.memory.protect(address, size, original - Protection::WRITE) {
            Ok(_) => {
                self.protected_regions
                    .lock()
                    .unwrap()
                    .insert(address, TrackedRegion { size, original });
                self.notify_protection();
                Ok(())
            }
            Err(err) => {
                log::warn!("protect_region({address:#x}) failed: {err}");
                self.notify_detection(
                    self.current_risk_level(),
                    "memory region protection failed",
                );
                Err(err)
            }
        }
    }

    /// restore the protection recorded for `address`
    pub fn unprotect_region(&self, address: usize) -> Result<()> {
        let tracked = self
            .protected_regions
            .lock()
            .unwrap()
            .remove(&address)
            .ok_or(SpecterError::RegionNotTracked { address })?;

        self.memory.protect(address, tracked.size, tracked.original)?;
        Ok(())
    }

    /// overwrite a region's byte signature, returning the original bytes
    ///
    /// the fill is random so the obfuscated region does not itself become
    /// a searchable marker. when the Memory category is disabled the
    /// bytes are captured but not overwritten, so the caller's later
    /// restore remains valid either way.
    ///
    /// # Safety
    /// the region must not be a live instruction stream: obfuscate only
    /// data bytes or padding, never the opcodes of an installed hook.
    pub unsafe fn obfuscate_signature(&self, address: usize, length: usize) -> Result<Vec<u8>> {
        if length == 0 {
            return Err(SpecterError::InvalidArgument { context: "obfuscate_signature" });
        }

        // SAFETY: forwarded from the caller
        let original = unsafe { self.memory.read(address, length)? };

        if !self.is_enabled(ProtectionType::Memory) {
            log::debug!("memory protection disabled, signature left in place");
            return Ok(original);
        }

        let mut fill = vec![0u8; length];
        rand::thread_rng().fill(fill.as_mut_slice());

        // SAFETY: forwarded from the caller
        match unsafe { self.memory.write(address, &fill) } {
            Ok(()) => {
                self.notify_protection();
                Ok(original)
            }
            Err(err) => {
                // fail soft: report, hand back the original bytes anyway
                log::warn!("signature obfuscation at {address:#x} failed: {err}");
                self.notify_detection(
                    self.current_risk_level(),
                    "signature obfuscation failed",
                );
                Ok(original)
            }
        }
    }

    /// write the captured original bytes back
    ///
    /// fails cleanly with `RegionGone` when the target region is no
    /// longer mapped.
    ///
    /// # Safety
    /// same conditions as [`obfuscate_signature`](Self::obfuscate_signature).
    pub unsafe fn restore_signature(&self, address: usize, original: &[u8]) -> Result<()> {
        if original.is_empty() {
            return Err(SpecterError::InvalidArgument { context: "restore_signature" });
        }
        if self.memory.region_info(address).is_none() {
            return Err(SpecterError::RegionGone { address });
        }

        // SAFETY: forwarded from the caller
        unsafe { self.memory.write(address, original) }
    }

    /// run the monitoring heuristics and update the shared risk level
    ///
    /// advisory only: `Low` is not a guarantee of safety, and consecutive
    /// calls may return different levels.
    pub fn check_for_monitoring(&self) -> RiskLevel {
        let report = monitor::scan();
        let level = monitor::classify(&report);

        self.risk.store(level.as_u8(), Ordering::Release);
        *self.last_assessment.lock().unwrap() = Some(Instant::now());

        if level > RiskLevel::Low {
            self.notify_detection(level, &report.summary());
        }

        level
    }

    /// last assessed risk level without re-scanning
    pub fn current_risk_level(&self) -> RiskLevel {
        RiskLevel::from_u8(self.risk.load(Ordering::Acquire))
    }

    /// re-assess if forced or the last assessment has gone stale
    ///
    /// returns true when a re-scan actually ran.
    pub fn update_detection_techniques(&self, force: bool) -> bool {
        let stale = {
            let last = self.last_assessment.lock().unwrap();
            last.map_or(true, |t| t.elapsed() > REASSESSMENT_INTERVAL)
        };

        if force || stale {
            self.check_for_monitoring();
            true
        } else {
            false
        }
    }

    /// perturb operation timing with bounded random jitter
    ///
    /// no-op when the Timing category is disabled.
    pub fn apply_anti_timing_measures(&self, randomize: bool) {
        if self.is_enabled(ProtectionType::Timing) {
            timing::jitter(randomize);
        }
    }

    /// run `f` with call-stack sanitization applied around it
    ///
    /// the sanitize/restore pair holds on every exit path including
    /// panics. when the CallStack category is disabled `f` runs bare.
    pub fn execute_sanitized<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        if self.is_enabled(ProtectionType::CallStack) {
            sanitize::execute_sanitized(f)
        } else {
            f()
        }
    }
}

/// RAII signature mask over a memory region
///
/// captures and obfuscates on acquisition, restores the original bytes
/// unconditionally on release.
pub struct ScopedSignatureMask<'a> {
    system: &'a AntiDetectionSystem,
    address: usize,
    original: Vec<u8>,
}

impl<'a> ScopedSignatureMask<'a> {
    /// obfuscate `length` bytes at `address` until drop
    ///
    /// # Safety
    /// same conditions as [`AntiDetectionSystem::obfuscate_signature`].
    pub unsafe fn new(
        system: &'a AntiDetectionSystem,
        address: usize,
        length: usize,
    ) -> Result<Self> {
        // SAFETY: forwarded from the caller
        let original = unsafe { system.obfuscate_signature(address, length)? };
        Ok(Self {
            system,
            address,
            original,
        })
    }

    /// bytes that will be restored on drop
    pub fn original(&self) -> &[u8] {
        &self.original
    }
}

impl Drop for ScopedSignatureMask<'_> {
    fn drop(&mut self) {
        // SAFETY: same region the constructor validated
        if let Err(err) = unsafe { self.system.restore_signature(self.address, &self.original) } {
            log::warn!("failed to restore signature at {:#x}: {err}", self.address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn system() -> AntiDetectionSystem {
        AntiDetectionSystem::new(MemoryAccess::new())
    }

    #[test]
    fn defaults_to_all_categories_enabled() {
        let system = system();
        for category in ProtectionType::CATEGORIES {
            assert!(system.is_enabled(category), "{category} should default on");
        }
        assert!(system.is_enabled(ProtectionType::All));
    }

    #[test]
    fn initialize_with_subset_disables_the_rest() {
        let system = system();
        system.initialize(&[ProtectionType::Memory, ProtectionType::Timing]);

        assert!(system.is_enabled(ProtectionType::Memory));
        assert!(system.is_enabled(ProtectionType::Timing));
        assert!(!system.is_enabled(ProtectionType::CallStack));
        assert!(!system.is_enabled(ProtectionType::All));
    }

    #[test]
    fn all_category_fans_out() {
        let system = system();
        system.disable(ProtectionType::All);
        for category in ProtectionType::CATEGORIES {
            assert!(!system.is_enabled(category));
        }

        system.enable(ProtectionType::All);
        assert!(system.is_enabled(ProtectionType::All));
    }

    #[test]
    fn callback_handles_remove_in_o1() {
        let system = system();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = Arc::clone(&hits);
        let id = system.register_protection_callback(Arc::new(move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        }));

        system.notify_protection();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(system.unregister_protection_callback(id));
        assert!(!system.unregister_protection_callback(id));

        system.notify_protection();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detection_callbacks_dispatch_in_registration_order() {
        let system = system();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            system.register_detection_callback(Arc::new(move |_, _| {
                order.lock().unwrap().push(tag);
            }));
        }

        system.notify_detection(RiskLevel::High, "test");
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn callback_may_unregister_itself_during_dispatch() {
        let system = Arc::new(system());
        let id_slot = Arc::new(Mutex::new(None::<u32>));

        let sys = Arc::clone(&system);
        let slot = Arc::clone(&id_slot);
        let id = system.register_protection_callback(Arc::new(move || {
            if let Some(id) = *slot.lock().unwrap() {
                sys.unregister_protection_callback(id);
            }
        }));
        *id_slot.lock().unwrap() = Some(id);

        // must return, not deadlock on the registry lock
        system.notify_protection();
        assert!(
            !system.unregister_protection_callback(id),
            "one-shot callback removed itself"
        );
    }

    #[test]
    fn detection_callback_may_reenter_the_system() {
        let system = Arc::new(system());
        let seen = Arc::new(Mutex::new(None));

        let sys = Arc::clone(&system);
        let seen_clone = Arc::clone(&seen);
        system.register_detection_callback(Arc::new(move |level, _| {
            // queries and registrations from inside dispatch must not hang
            let _ = sys.current_risk_level();
            sys.register_protection_callback(Arc::new(|| {}));
            *seen_clone.lock().unwrap() = Some(level);
        }));

        system.notify_detection(RiskLevel::Medium, "test");
        assert_eq!(*seen.lock().unwrap(), Some(RiskLevel::Medium));
    }

    #[test]
    fn obfuscate_then_restore_round_trips() {
        let system = system();
        let mut buf = vec![0x42u8; 32];
        let addr = buf.as_mut_ptr() as usize;

        let original = unsafe { system.obfuscate_signature(addr, 32) }.unwrap();
        assert_eq!(original, vec![0x42u8; 32]);

        unsafe { system.restore_signature(addr, &original) }.unwrap();
        assert_eq!(buf, vec![0x42u8; 32]);
    }

    #[test]
    fn obfuscation_actually_changes_bytes() {
        let system = system();
        let mut buf = vec![0x42u8; 64];
        let addr = buf.as_mut_ptr() as usize;

        let original = unsafe { system.obfuscate_signature(addr, 64) }.unwrap();
        // 64 random bytes matching the original exactly is not happening
        assert_ne!(buf, original);

        unsafe { system.restore_signature(addr, &original) }.unwrap();
    }

    #[test]
    fn disabled_memory_category_skips_the_overwrite() {
        let system = system();
        system.disable(ProtectionType::Memory);

        let mut buf = vec![0x42u8; 32];
        let addr = buf.as_mut_ptr() as usize;

        let original = unsafe { system.obfuscate_signature(addr, 32) }.unwrap();
        assert_eq!(original, buf);
        assert_eq!(buf, vec![0x42u8; 32], "bytes must be untouched");
    }

    #[test]
    fn restore_on_unmapped_region_fails_cleanly() {
        let system = system();

        // the zero page is never mapped
        let addr = 0x100;
        let result = unsafe { system.restore_signature(addr, &[1, 2, 3]) };
        assert_eq!(result, Err(SpecterError::RegionGone { address: addr }));
    }

    #[test]
    fn scoped_mask_restores_on_drop() {
        let system = system();
        let mut buf = vec![0x13u8; 16];
        let addr = buf.as_mut_ptr() as usize;

        {
            let mask = unsafe { ScopedSignatureMask::new(&system, addr, 16) }.unwrap();
            assert_eq!(mask.original(), &[0x13u8; 16]);
        }
        assert_eq!(buf, vec![0x13u8; 16]);
    }

    #[test]
    fn protect_region_tracks_and_unprotect_restores() {
        let system = system();
        let memory = MemoryAccess::new();
        let size = crate::memory::page_size();

        // SAFETY: fresh anonymous mapping, unmapped at end of test
        let addr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        } as usize;
        assert_ne!(addr as isize, -1);

        system.protect_region(addr, size).unwrap();
        assert!(!memory
            .region_info(addr)
            .unwrap()
            .protection
            .contains(Protection::WRITE));

        system.unprotect_region(addr).unwrap();
        assert!(memory
            .region_info(addr)
            .unwrap()
            .protection
            .contains(Protection::WRITE));

        // second unprotect has nothing tracked
        assert_eq!(
            system.unprotect_region(addr),
            Err(SpecterError::RegionNotTracked { address: addr })
        );

        // SAFETY: mapping created above
        unsafe { libc::munmap(addr as *mut libc::c_void, size) };
    }

    #[test]
    fn risk_level_starts_low_and_tracks_assessment() {
        let system = system();
        assert_eq!(system.current_risk_level(), RiskLevel::Low);

        let assessed = system.check_for_monitoring();
        assert_eq!(system.current_risk_level(), assessed);
    }

    #[test]
    fn consecutive_checks_may_differ_without_error() {
        let system = system();
        let first = system.check_for_monitoring();
        let second = system.check_for_monitoring();
        // both are valid classifications; inequality is not an error
        let _ = (first, second);
    }

    #[test]
    fn forced_update_always_rescans() {
        let system = system();
        assert!(system.update_detection_techniques(true));
        // fresh assessment just happened, non-forced update is a no-op
        assert!(!system.update_detection_techniques(false));
    }

    #[test]
    fn first_non_forced_update_scans() {
        let system = system();
        assert!(system.update_detection_techniques(false));
    }

    #[test]
    fn sanitized_execution_respects_category() {
        let system = system();

        system.execute_sanitized(|| {
            assert!(sanitize::is_sanitized());
        });

        system.disable(ProtectionType::CallStack);
        system.execute_sanitized(|| {
            assert!(!sanitize::is_sanitized());
        });
    }

    #[test]
    fn risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert_eq!(RiskLevel::from_u8(RiskLevel::High.as_u8()), RiskLevel::High);
    }

    #[test]
    fn display_vocabulary() {
        assert_eq!(RiskLevel::Critical.to_string(), "Critical");
        assert_eq!(ProtectionType::CallStack.to_string(), "CallStack");
        assert_eq!(ProtectionType::All.to_string(), "All");
    }
}
