//! Byte-signature scanning
//!
//! Locates byte patterns with wildcards inside modules whose bounds come
//! from the memory layer. Results are untyped addresses: callers must
//! validate them like any other target before hooking or writing.

use crate::error::{Result, SpecterError};
use crate::memory::{MemoryAccess, ModuleDescriptor};

/// a parsed byte pattern with wildcard positions
///
/// source format: hex bytes separated by whitespace, `?` or `??` for a
/// wildcard, e.g. `"48 8B ? ? 90"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    bytes: Vec<u8>,
    mask: Vec<bool>,
}

impl Pattern {
    /// parse a pattern string
    pub fn parse(pattern: &str) -> Result<Self> {
        let mut bytes = Vec::new();
        let mut mask = Vec::new();

        for part in pattern.split_whitespace() {
            if part == "?" || part == "??" {
                bytes.push(0);
                mask.push(true);
            } else {
                let byte = u8::from_str_radix(part, 16).map_err(|_| {
                    SpecterError::InvalidPattern {
                        pattern: pattern.to_string(),
                    }
                })?;
                bytes.push(byte);
                mask.push(false);
            }
        }

        if bytes.is_empty() {
            return Err(SpecterError::InvalidPattern {
                pattern: pattern.to_string(),
            });
        }

        Ok(Self { bytes, mask })
    }

    /// pattern length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// always false: `parse` rejects empty input, so a constructed
    /// pattern has at least one byte
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// check a window of exactly `len()` bytes against the pattern
    pub fn matches(&self, window: &[u8]) -> bool {
        window.len() == self.bytes.len()
            && window
                .iter()
                .zip(self.bytes.iter().zip(self.mask.iter()))
                .all(|(&data, (&byte, &wild))| wild || data == byte)
    }

    /// offset of the first match in `data`
    pub fn find(&self, data: &[u8]) -> Option<usize> {
        data.windows(self.len()).position(|w| self.matches(w))
    }

    /// offsets of every match in `data`
    pub fn find_all(&self, data: &[u8]) -> Vec<usize> {
        data.windows(self.len())
            .enumerate()
            .filter(|(_, w)| self.matches(w))
            .map(|(i, _)| i)
            .collect()
    }
}

/// scan a loaded module for a pattern, returning absolute addresses
///
/// # Safety
/// the module's base and size must describe memory that stays mapped for
/// the duration of the scan.
pub unsafe fn scan_module(
    memory: &MemoryAccess,
    module: &ModuleDescriptor,
    pattern: &Pattern,
) -> Result<Vec<usize>> {
    // SAFETY: forwarded from the caller
    let data = unsafe { memory.read(module.base, module.size)? };

    Ok(pattern
        .find_all(&data)
        .iter()
        .map(|offset| module.base + offset)
        .collect())
}
