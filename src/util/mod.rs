//! Shared utilities

pub mod pattern;

pub use pattern::{scan_module, Pattern};
