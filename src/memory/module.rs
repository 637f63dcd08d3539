//! Loaded module discovery
//!
//! Module base lookup goes through the dyld image list; size is computed
//! by parsing the Mach-O header in place. Lookup failures are reported as
//! address 0, never as an error — callers must treat 0 as "not found".

use super::access::MemoryAccess;
use super::macho;

/// how much of a module header to read before walking load commands
const HEADER_PROBE_SIZE: usize = 32;

/// a loaded module located in the current process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    /// base address of the Mach-O header
    pub base: usize,
    /// loaded extent in bytes
    pub size: usize,
    /// name the module was found under
    pub name: String,
}

impl ModuleDescriptor {
    /// check if an address falls within this module
    pub fn contains(&self, address: usize) -> bool {
        address >= self.base && address < self.base + self.size
    }
}

/// fixed set of name variants tried by [`module_base`]
///
/// the literal name first, then the usual dylib/framework spellings.
pub fn candidate_names(name: &str) -> Vec<String> {
    let mut candidates = vec![name.to_string()];

    if !name.contains('/') && !name.ends_with(".dylib") {
        candidates.push(format!("{name}.dylib"));
        candidates.push(format!("lib{name}.dylib"));
        candidates.push(format!("/usr/lib/lib{name}.dylib"));
        candidates.push(format!(
            "/System/Library/Frameworks/{name}.framework/{name}"
        ));
    }

    candidates
}

/// find the base address of a loaded module by name
///
/// tries the literal name and the fixed variant set; matches either the
/// full image path or its final path component. returns 0 when nothing
/// matches.
pub fn module_base(name: &str) -> usize {
    if name.is_empty() {
        return 0;
    }

    for candidate in candidate_names(name) {
        let base = image_base_for(&candidate);
        if base != 0 {
            return base;
        }
    }

    0
}

/// compute the loaded size of the module at `base`
///
/// validates the Mach-O magic first; a mismatch yields 0, never a garbage
/// size. the segment walk falls back to a fixed 16 MiB estimate when no
/// segment command is parseable.
pub fn module_size(memory: &MemoryAccess, base: usize) -> usize {
    if base == 0 {
        return 0;
    }

    // SAFETY: base comes from the dyld image list or an equally validated
    // source; the probe stays within the header page
    let probe = match unsafe { memory.read(base, HEADER_PROBE_SIZE) } {
        Ok(bytes) => bytes,
        Err(_) => return 0,
    };

    if !macho::validate_magic(&probe) {
        return 0;
    }

    // now that the magic checks out, pull in the full command list
    let sizeofcmds = u32::from_le_bytes([probe[20], probe[21], probe[22], probe[23]]) as usize;
    let full_len = HEADER_PROBE_SIZE + sizeofcmds;

    // SAFETY: same provenance as the probe read above
    let header = match unsafe { memory.read(base, full_len) } {
        Ok(bytes) => bytes,
        Err(_) => probe,
    };

    macho::image_extent(&header).unwrap_or(0)
}

/// locate a module and compute its bounds
pub fn find_module(memory: &MemoryAccess, name: &str) -> Option<ModuleDescriptor> {
    let base = module_base(name);
    if base == 0 {
        return None;
    }

    Some(ModuleDescriptor {
        base,
        size: module_size(memory, base),
        name: name.to_string(),
    })
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn image_base_for(candidate: &str) -> usize {
    // SAFETY: dyld image list accessors take an index bounded by the count;
    // images can load concurrently but indexes below the snapshot count
    // stay valid for the life of the process
    unsafe {
        let count = _dyld_image_count();
        for i in 0..count {
            let name_ptr = _dyld_get_image_name(i);
            if name_ptr.is_null() {
                continue;
            }
            let image_name = core::ffi::CStr::from_ptr(name_ptr);
            let image_name = match image_name.to_str() {
                Ok(s) => s,
                Err(_) => continue,
            };

            let leaf = image_name.rsplit('/').next().unwrap_or(image_name);
            if image_name == candidate || leaf == candidate {
                let header = _dyld_get_image_header(i);
                if !header.is_null() {
                    return header as usize;
                }
            }
        }
    }

    0
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn image_base_for(_candidate: &str) -> usize {
    0
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
extern "C" {
    fn _dyld_image_count() -> u32;
    fn _dyld_get_image_name(index: u32) -> *const core::ffi::c_char;
    fn _dyld_get_image_header(index: u32) -> *const core::ffi::c_void;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::macho::{FALLBACK_MODULE_SIZE, LC_SEGMENT_64, MH_MAGIC_64};

    #[test]
    fn candidate_names_try_literal_first() {
        let names = candidate_names("Metal");
        assert_eq!(names[0], "Metal");
        assert!(names.contains(&"Metal.dylib".to_string()));
        assert!(names.contains(&"libMetal.dylib".to_string()));
        assert!(names
            .iter()
            .any(|n| n.contains("Metal.framework")));
    }

    #[test]
    fn candidate_names_leave_paths_alone() {
        let names = candidate_names("/usr/lib/libSystem.B.dylib");
        assert_eq!(names, vec!["/usr/lib/libSystem.B.dylib".to_string()]);
    }

    #[test]
    fn empty_name_is_not_found() {
        assert_eq!(module_base(""), 0);
    }

    #[test]
    fn module_size_of_null_base_is_zero() {
        let memory = MemoryAccess::new();
        assert_eq!(module_size(&memory, 0), 0);
    }

    #[test]
    fn module_size_rejects_bad_magic() {
        let memory = MemoryAccess::new();
        let buf = vec![0x4Du8; 4096]; // "MZ"-ish garbage, wrong magic
        assert_eq!(module_size(&memory, buf.as_ptr() as usize), 0);
    }

    #[test]
    fn module_size_parses_in_memory_image() {
        let memory = MemoryAccess::new();

        // synthetic header: magic + one __TEXT segment of 0x8000
        let mut image = Vec::new();
        image.extend_from_slice(&MH_MAGIC_64.to_le_bytes());
        image.extend_from_slice(&[0u8; 12]); // cputype/cpusubtype/filetype
        image.extend_from_slice(&1u32.to_le_bytes()); // ncmds
        image.extend_from_slice(&72u32.to_le_bytes()); // sizeofcmds
        image.extend_from_slice(&[0u8; 8]); // flags/reserved

        image.extend_from_slice(&LC_SEGMENT_64.to_le_bytes());
        image.extend_from_slice(&72u32.to_le_bytes());
        let mut segname = [0u8; 16];
        segname[..6].copy_from_slice(b"__TEXT");
        image.extend_from_slice(&segname);
        image.extend_from_slice(&0x1_0000_0000u64.to_le_bytes()); // vmaddr
        image.extend_from_slice(&0x8000u64.to_le_bytes()); // vmsize
        image.extend_from_slice(&[0u8; 16]); // fileoff/filesize
        image.extend_from_slice(&[0u8; 16]); // prots/nsects/flags

        assert_eq!(module_size(&memory, image.as_ptr() as usize), 0x8000);
    }

    #[test]
    fn module_size_falls_back_without_segments() {
        let memory = MemoryAccess::new();

        let mut image = Vec::new();
        image.extend_from_slice(&MH_MAGIC_64.to_le_bytes());
        image.extend_from_slice(&[0u8; 28]); // ncmds = 0, sizeofcmds = 0

        assert_eq!(
            module_size(&memory, image.as_ptr() as usize),
            FALLBACK_MODULE_SIZE
        );
    }
}
