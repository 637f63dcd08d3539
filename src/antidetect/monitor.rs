//! Monitoring heuristics
//!
//! Advisory scan for signs the process is being inspected: an attached
//! debugger, injected instrumentation libraries, and scheduling delays
//! typical of single-stepping or heavy tracing. The result is a coarse
//! classification — `Low` is not a guarantee of safety, and two
//! consecutive scans may legitimately disagree.

use super::system::RiskLevel;
use std::time::{Duration, Instant};

/// indicators gathered by one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitoringReport {
    /// a debugger is attached to this process
    pub debugger_attached: bool,
    /// an instrumentation library was injected via the loader environment
    pub injected_libraries: bool,
    /// the timing probe ran far slower than expected
    pub timing_anomaly: bool,
}

impl MonitoringReport {
    /// number of indicators that fired
    pub fn indicator_count(&self) -> u32 {
        self.debugger_attached as u32
            + self.injected_libraries as u32
            + self.timing_anomaly as u32
    }

    /// short diagnostic summary
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.debugger_attached {
            parts.push("debugger attached");
        }
        if self.injected_libraries {
            parts.push("injected libraries");
        }
        if self.timing_anomaly {
            parts.push("timing anomaly");
        }
        if parts.is_empty() {
            "no indicators".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// map an indicator count to a risk level
///
/// a debugger alone is already `High`: it is the strongest signal and
/// outweighs soft indicators.
pub fn classify(report: &MonitoringReport) -> RiskLevel {
    if report.debugger_attached {
        if report.indicator_count() > 1 {
            RiskLevel::Critical
        } else {
            RiskLevel::High
        }
    } else {
        match report.indicator_count() {
            0 => RiskLevel::Low,
            1 => RiskLevel::Medium,
            _ => RiskLevel::High,
        }
    }
}

/// run one bounded scan
pub fn scan() -> MonitoringReport {
    MonitoringReport {
        debugger_attached: debugger_attached(),
        injected_libraries: injected_libraries(),
        timing_anomaly: timing_anomaly(),
    }
}

/// check for loader-environment injection
fn injected_libraries() -> bool {
    std::env::var_os("DYLD_INSERT_LIBRARIES").is_some()
        || std::env::var_os("LD_PRELOAD").is_some()
}

/// probe for tracing-induced slowdown
///
/// times a short busy loop; under single-stepping or syscall tracing the
/// loop runs orders of magnitude slower. The probe is bounded by the loop
/// length and never blocks.
fn timing_anomaly() -> bool {
    const ITERATIONS: u64 = 10_000;
    const THRESHOLD: Duration = Duration::from_millis(50);

    let start = Instant::now();
    let mut acc = 0u64;
    for i in 0..ITERATIONS {
        acc = acc.wrapping_mul(31).wrapping_add(i);
    }
    std::hint::black_box(acc);

    start.elapsed() > THRESHOLD
}

/// check whether a debugger is attached
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub fn debugger_attached() -> bool {
    // P_TRACED from <sys/proc.h>
    const P_TRACED: i32 = 0x0000_0800;
    // kinfo_proc starts with extern_proc: a 16-byte p_un union, then the
    // p_vmspace and p_sigacts pointers (8 bytes each on 64-bit darwin),
    // putting p_flag at offset 32 on both arm64 and x86-64
    const KINFO_PROC_SIZE: usize = 648;
    const P_FLAG_OFFSET: usize = 32;

    let mut buf = [0u8; KINFO_PROC_SIZE];
    let mut size: libc::size_t = KINFO_PROC_SIZE;

    // SAFETY: mib and buffer are valid for the duration of the call
    unsafe {
        let mut mib: [libc::c_int; 4] = [
            libc::CTL_KERN,
            libc::KERN_PROC,
            libc::KERN_PROC_PID,
            libc::getpid(),
        ];

        let rc = libc::sysctl(
            mib.as_mut_ptr(),
            4,
            buf.as_mut_ptr().cast::<libc::c_void>(),
            &mut size,
            core::ptr::null_mut(),
            0,
        );

        if rc != 0 || size < P_FLAG_OFFSET + 4 {
            return false;
        }
    }

    let mut flag_bytes = [0u8; 4];
    flag_bytes.copy_from_slice(&buf[P_FLAG_OFFSET..P_FLAG_OFFSET + 4]);
    (i32::from_ne_bytes(flag_bytes) & P_TRACED) != 0
}

/// check whether a debugger is attached
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn debugger_attached() -> bool {
    let status = match std::fs::read_to_string("/proc/self/status") {
        Ok(s) => s,
        Err(_) => return false,
    };

    for line in status.lines() {
        if let Some(value) = line.strip_prefix("TracerPid:") {
            return value.trim().parse::<i32>().map_or(false, |pid| pid != 0);
        }
    }

    false
}

#[cfg(not(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "linux",
    target_os = "android"
)))]
pub fn debugger_attached() -> bool {
    false
}
