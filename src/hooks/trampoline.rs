//! Trampoline provider abstraction
//!
//! The low-level splicing library is a black box behind this trait:
//! production builds link a real provider (Dobby, behind the `dobby`
//! feature), tests supply lookup-table fakes that redirect without
//! touching live code.

/// low-level control-flow splicing capability
///
/// implementations redirect execution from `target` to `replacement`
/// while preserving a path back to the original code.
pub trait TrampolineProvider {
    /// splice `target` to jump to `replacement`
    ///
    /// returns the original entry point on success so the caller can
    /// invoke the prior behavior from inside the replacement; None means
    /// the splice failed and nothing was patched.
    fn install(&self, target: usize, replacement: usize) -> Option<usize>;

    /// remove the splice at `target`, restoring original control flow
    fn remove(&self, target: usize) -> bool;
}

/// Dobby-backed trampoline provider
///
/// requires the external Dobby library at link time.
#[cfg(feature = "dobby")]
#[derive(Debug, Clone, Copy, Default)]
pub struct DobbyProvider;

#[cfg(feature = "dobby")]
impl DobbyProvider {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "dobby")]
impl TrampolineProvider for DobbyProvider {
    fn install(&self, target: usize, replacement: usize) -> Option<usize> {
        let mut original: *mut core::ffi::c_void = core::ptr::null_mut();

        // SAFETY: DobbyHook validates the target internally and reports
        // failure through its return code; a null original is a failure
        let rc = unsafe {
            DobbyHook(
                target as *mut core::ffi::c_void,
                replacement as *mut core::ffi::c_void,
                &mut original,
            )
        };

        if rc == 0 && !original.is_null() {
            Some(original as usize)
        } else {
            None
        }
    }

    fn remove(&self, target: usize) -> bool {
        // SAFETY: DobbyDestroy is a no-op for unhooked addresses
        unsafe { DobbyDestroy(target as *mut core::ffi::c_void) == 0 }
    }
}

#[cfg(feature = "dobby")]
#[link(name = "dobby")]
extern "C" {
    fn DobbyHook(
        address: *mut core::ffi::c_void,
        replace_call: *mut core::ffi::c_void,
        origin_call: *mut *mut core::ffi::c_void,
    ) -> core::ffi::c_int;

    fn DobbyDestroy(address: *mut core::ffi::c_void) -> core::ffi::c_int;
}
