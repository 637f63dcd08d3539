//! Function and method hooking
//!
//! Two independent registries, each behind its own lock:
//!
//! - [`HookEngine`] splices native function addresses through a
//!   [`TrampolineProvider`]
//! - [`MethodHookEngine`] rewrites (type, selector) entries of a
//!   [`DispatchTable`]
//!
//! native-function hooks and dispatch-table hooks never contend.

pub mod dispatch;
pub mod engine;
pub mod method;
pub mod trampoline;

pub use dispatch::{ClassHandle, DispatchTable, SelectorHandle};
pub use engine::{HookEngine, HookRecord};
pub use method::{MethodHookEngine, MethodHookRecord};
pub use trampoline::TrampolineProvider;

#[cfg(feature = "dobby")]
pub use trampoline::DobbyProvider;

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub use dispatch::ObjcDispatchTable;
