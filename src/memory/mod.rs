//! Process memory access and module inspection
//!
//! - raw read/write with protection juggling ([`MemoryAccess`])
//! - RAII protection changes ([`ProtectionGuard`])
//! - Mach-O header parsing for module bounds ([`macho`])
//! - module base/size discovery ([`module`])

pub mod access;
pub mod macho;
pub mod module;

pub use access::{page_size, MemoryAccess, MemoryRegion, Protection, ProtectionGuard};
pub use module::{candidate_names, find_module, module_base, module_size, ModuleDescriptor};
