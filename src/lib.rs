#![cfg(unix)]
#![deny(unsafe_op_in_unsafe_fn)]

//! specter: in-process binary instrumentation
//!
//! This library instruments the running process at the binary level:
//!
//! - Function hooking through a pluggable trampoline provider
//! - Dynamic-dispatch (Objective-C style) method hooking
//! - Raw memory read/write with page-protection juggling
//! - Module bounds discovery via Mach-O header parsing
//! - Byte-signature scanning inside located modules
//! - Risk-scored anti-detection countermeasures
//!
//! The hooking engines and the anti-detection controller are plain
//! service objects: construct them explicitly, inject the trampoline
//! provider and dispatch table at the seams, and tests run against
//! in-memory fakes instead of live code patching.
//!
//! # Example
//!
//! ```ignore
//! use specter::hooks::{DobbyProvider, HookEngine};
//! use specter::memory::MemoryAccess;
//! use specter::antidetect::AntiDetectionSystem;
//!
//! let memory = MemoryAccess::new();
//! let guard = AntiDetectionSystem::new(memory);
//! let engine = HookEngine::new(DobbyProvider::new());
//!
//! guard.apply_anti_timing_measures(true);
//! let original = engine.register(target_addr, replacement_addr)?;
//! // call `original` from inside the replacement to reach prior behavior
//! ```
//!
//! # Feature Flags
//!
//! - `dobby`: link the external Dobby library and enable
//!   [`hooks::DobbyProvider`]. Off by default so the crate builds and
//!   tests without native splicing.

pub mod antidetect;
pub mod error;
pub mod hooks;
pub mod memory;
pub mod util;

// re-exports for convenience
pub use antidetect::{AntiDetectionSystem, ProtectionType, RiskLevel};
pub use error::{Result, SpecterError};
pub use hooks::{DispatchTable, HookEngine, MethodHookEngine, TrampolineProvider};
pub use memory::{MemoryAccess, ModuleDescriptor, Protection};

/// library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
