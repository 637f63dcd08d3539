//! Mach-O header parsing for module bounds
//!
//! Operates on raw header bytes so the segment walk can be exercised
//! against synthetic images without a live dyld. Only the 64-bit format
//! is supported; anything else fails the magic check.

/// 64-bit Mach-O magic number
pub const MH_MAGIC_64: u32 = 0xfeed_facf;

/// 64-bit segment load command
pub const LC_SEGMENT_64: u32 = 0x19;

/// conservative module size estimate when no segment command parses
///
/// deliberate fallback, matching the behavior scanners depend on: a
/// module whose load commands are unreadable is still given a bound.
pub const FALLBACK_MODULE_SIZE: usize = 16 * 1024 * 1024;

/// size of mach_header_64
const HEADER_SIZE: usize = 32;

/// offset of ncmds in mach_header_64
const NCMDS_OFFSET: usize = 16;

/// offset of sizeofcmds in mach_header_64
const SIZEOFCMDS_OFFSET: usize = 20;

/// segment name that maps no memory and is skipped during the walk
const SEG_PAGEZERO: &[u8] = b"__PAGEZERO";

/// one parsed LC_SEGMENT_64 command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub vmaddr: u64,
    pub vmsize: u64,
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let slice = bytes.get(offset..offset + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice);
    Some(u64::from_le_bytes(buf))
}

/// check that `bytes` starts with a valid 64-bit Mach-O header
pub fn validate_magic(bytes: &[u8]) -> bool {
    read_u32(bytes, 0) == Some(MH_MAGIC_64)
}

/// walk the load commands and collect mapped segments
///
/// the walk is bounded by both `sizeofcmds` and the supplied buffer;
/// a truncated or corrupt command list yields however many segments
/// parsed before the walk fell off the end. `__PAGEZERO` is skipped
/// since it reserves address space without mapping the image.
pub fn parse_segments(bytes: &[u8]) -> Vec<Segment> {
    let mut segments = Vec::new();

    let ncmds = match read_u32(bytes, NCMDS_OFFSET) {
        Some(n) => n,
        None => return segments,
    };
    let sizeofcmds = match read_u32(bytes, SIZEOFCMDS_OFFSET) {
        Some(n) => n as usize,
        None => return segments,
    };

    let commands_end = HEADER_SIZE.saturating_add(sizeofcmds).min(bytes.len());
    let mut offset = HEADER_SIZE;

    for _ in 0..ncmds {
        if offset + 8 > commands_end {
            break;
        }
        let cmd = match read_u32(bytes, offset) {
            Some(c) => c,
            None => break,
        };
        let cmdsize = match read_u32(bytes, offset + 4) {
            Some(c) => c as usize,
            None => break,
        };
        // a zero cmdsize would loop forever
        if cmdsize < 8 || offset + cmdsize > commands_end {
            break;
        }

        if cmd == LC_SEGMENT_64 && cmdsize >= 72 {
            let segname = &bytes[offset + 8..offset + 24];
            let is_pagezero = segname.starts_with(SEG_PAGEZERO)
                && segname[SEG_PAGEZERO.len()..].iter().all(|&b| b == 0);

            if !is_pagezero {
                let vmaddr = read_u64(bytes, offset + 24);
                let vmsize = read_u64(bytes, offset + 32);
                if let (Some(vmaddr), Some(vmsize)) = (vmaddr, vmsize) {
                    segments.push(Segment { vmaddr, vmsize });
                }
            }
        }

        offset += cmdsize;
    }

    segments
}

/// compute the loaded extent of an image from its header bytes
///
/// returns None when the magic does not match (caller reports size 0).
/// otherwise the extent is the maximum (vmaddr + vmsize) over all mapped
/// segments, measured from the lowest mapped segment address — the
/// highest address any segment touches, not the sum of segment sizes,
/// since segments may overlap or leave gaps. When the magic is valid but
/// no segment command parses, falls back to [`FALLBACK_MODULE_SIZE`].
pub fn image_extent(bytes: &[u8]) -> Option<usize> {
    if !validate_magic(bytes) {
        return None;
    }

    let segments = parse_segments(bytes);
    if segments.is_empty() {
        return Some(FALLBACK_MODULE_SIZE);
    }

    let base = segments.iter().map(|s| s.vmaddr).min().unwrap_or(0);
    let max_end = segments
        .iter()
        .map(|s| s.vmaddr.saturating_add(s.vmsize))
        .max()
        .unwrap_or(base);

    Some(max_end.saturating_sub(base) as usize)
}
