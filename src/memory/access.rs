//! Process memory read/write/protect primitives
//!
//! All operations act on the current process. Reads and writes are bounded
//! by the live region map so a request spilling past the end of a mapping
//! fails as a partial transfer instead of faulting. Writes to non-writable
//! pages transition the page to writable for the duration of the copy and
//! restore the prior protection unconditionally, even when the copy fails —
//! leaving a page writable after the operation is itself a detection signal.

use crate::error::{Result, SpecterError};
use bitflags::bitflags;

bitflags! {
    /// page protection flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u32 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXECUTE = 0b100;
    }
}

impl Protection {
    /// convert to the POSIX mprotect flag value
    pub fn to_posix(self) -> i32 {
        let mut prot = libc::PROT_NONE;
        if self.contains(Self::READ) {
            prot |= libc::PROT_READ;
        }
        if self.contains(Self::WRITE) {
            prot |= libc::PROT_WRITE;
        }
        if self.contains(Self::EXECUTE) {
            prot |= libc::PROT_EXEC;
        }
        prot
    }
}

/// a live memory mapping, produced by [`MemoryAccess::region_info`]
///
/// transient: protections can change under concurrent threads, so this is
/// never cached beyond the call that obtained it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// start address of the mapping
    pub address: usize,
    /// size of the mapping in bytes
    pub size: usize,
    /// protection at query time
    pub protection: Protection,
}

impl MemoryRegion {
    /// end address (exclusive)
    pub fn end(&self) -> usize {
        self.address + self.size
    }

    /// check if the region fully contains [address, address + len)
    pub fn contains(&self, address: usize, len: usize) -> bool {
        address >= self.address && address.saturating_add(len) <= self.end()
    }
}

/// memory access service for the current process
///
/// stateless; construct one per owning context and share by reference.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryAccess;

impl MemoryAccess {
    pub fn new() -> Self {
        Self
    }

    /// query the mapping containing `address`
    ///
    /// returns None when the address is not mapped or the map query failed.
    pub fn region_info(&self, address: usize) -> Option<MemoryRegion> {
        let pid = std::process::id() as proc_maps::Pid;
        let maps = proc_maps::get_process_maps(pid).ok()?;

        maps.iter()
            .find(|m| address >= m.start() && address < m.start() + m.size())
            .map(|m| {
                let mut protection = Protection::empty();
                if m.is_read() {
                    protection |= Protection::READ;
                }
                if m.is_write() {
                    protection |= Protection::WRITE;
                }
                if m.is_exec() {
                    protection |= Protection::EXECUTE;
                }
                MemoryRegion {
                    address: m.start(),
                    size: m.size(),
                    protection,
                }
            })
    }

    /// read `len` bytes at `address`
    ///
    /// fails with `InvalidArgument` on a null address or zero length, and
    /// with `PartialRead` when the request extends past the end of the
    /// containing mapping. Never reports a short copy as success.
    ///
    /// # Safety
    /// `address` must point into memory owned by this process; the region
    /// map check narrows the window but cannot rule out a concurrent unmap.
    pub unsafe fn read(&self, address: usize, len: usize) -> Result<Vec<u8>> {
        if address == 0 {
            return Err(SpecterError::InvalidArgument { context: "read: null address" });
        }
        if len == 0 {
            return Err(SpecterError::InvalidArgument { context: "read: zero length" });
        }

        if let Some(region) = self.region_info(address) {
            if !region.contains(address, len) {
                return Err(SpecterError::PartialRead {
                    address,
                    requested: len,
                    copied: region.end().saturating_sub(address),
                });
            }
        }

        let mut buf = vec![0u8; len];
        // SAFETY: caller guarantees the address is valid; bounds checked
        // against the live region map above
        unsafe {
            core::ptr::copy_nonoverlapping(address as *const u8, buf.as_mut_ptr(), len);
        }
        Ok(buf)
    }

    /// write `bytes` at `address`, juggling page protection as needed
    ///
    /// queries current protection; if the page is not writable, transitions
    /// it to writable, performs the copy, then restores the prior protection
    /// regardless of outcome. Costs two extra syscalls per write to a
    /// protected page, but avoids holding writable pages open.
    ///
    /// # Safety
    /// `address` must point into memory owned by this process, and the
    /// destination must not be an instruction stream another thread is
    /// currently executing.
    pub unsafe fn write(&self, address: usize, bytes: &[u8]) -> Result<()> {
        if address == 0 {
            return Err(SpecterError::InvalidArgument { context: "write: null address" });
        }
        if bytes.is_empty() {
            return Err(SpecterError::InvalidArgument { context: "write: empty buffer" });
        }

        let region = self.region_info(address);

        if let Some(region) = region {
            if !region.contains(address, bytes.len()) {
                return Err(SpecterError::PartialWrite {
                    address,
                    requested: bytes.len(),
                    copied: region.end().saturating_sub(address),
                });
            }
        }

        let needs_unprotect = region.map_or(false, |r| !r.protection.contains(Protection::WRITE));

        if needs_unprotect {
            // region is known here, or needs_unprotect would be false
            let original = region.map(|r| r.protection).unwrap_or(Protection::READ);
            self.protect(address, bytes.len(), original | Protection::WRITE)?;

            // SAFETY: page made writable above, bounds checked against map
            unsafe {
                core::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
            }

            // restore is unconditional; a failed restore is still an error
            self.protect(address, bytes.len(), original)?;
        } else {
            // SAFETY: caller guarantees writability when the map is silent
            unsafe {
                core::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
            }
        }

        Ok(())
    }

    /// change protection of [address, address + size)
    ///
    /// passthrough to mprotect with page alignment; the change is
    /// process-global and affects every concurrent reader of the region.
    /// returns the protection that was in effect before the change.
    pub fn protect(&self, address: usize, size: usize, protection: Protection) -> Result<Protection> {
        if address == 0 {
            return Err(SpecterError::InvalidArgument { context: "protect: null address" });
        }
        if size == 0 {
            return Err(SpecterError::InvalidArgument { context: "protect: zero size" });
        }

        let previous = self
            .region_info(address)
            .map(|r| r.protection)
            .ok_or(SpecterError::ProtectionQueryFailed { address })?;

        let page_size = page_size();
        let page_base = address & !(page_size - 1);
        let span = address + size - page_base;

        // SAFETY: page_base is page-aligned and span covers the request
        let rc = unsafe {
            libc::mprotect(
                page_base as *mut libc::c_void,
                span,
                protection.to_posix(),
            )
        };

        if rc != 0 {
            return Err(SpecterError::ProtectionChangeFailed { address, size });
        }

        Ok(previous)
    }
}

/// RAII guard for memory protection changes
///
/// applies the requested protection on construction and restores the
/// original on drop, on every exit path.
pub struct ProtectionGuard {
    memory: MemoryAccess,
    address: usize,
    size: usize,
    original: Protection,
}

impl ProtectionGuard {
    /// change protection, returning a guard that restores on drop
    pub fn new(
        memory: MemoryAccess,
        address: usize,
        size: usize,
        protection: Protection,
    ) -> Result<Self> {
        let original = memory.protect(address, size, protection)?;
        Ok(Self {
            memory,
            address,
            size,
            original,
        })
    }

    /// protection that will be restored on drop
    pub fn original(&self) -> Protection {
        self.original
    }
}

impl Drop for ProtectionGuard {
    fn drop(&mut self) {
        if let Err(err) = self.memory.protect(self.address, self.size, self.original) {
            log::warn!("failed to restore protection: {err}");
        }
    }
}

/// system page size
pub fn page_size() -> usize {
    // SAFETY: sysconf(_SC_PAGESIZE) has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}
