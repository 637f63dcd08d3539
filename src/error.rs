//! Unified error types for specter

use core::fmt;

/// all errors that can occur in specter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecterError {
    // === memory access ===
    /// null or zero address/length where non-zero expected
    InvalidArgument { context: &'static str },

    /// read moved fewer bytes than requested
    PartialRead {
        address: usize,
        requested: usize,
        copied: usize,
    },

    /// write moved fewer bytes than requested
    PartialWrite {
        address: usize,
        requested: usize,
        copied: usize,
    },

    /// failed to change memory protection
    ProtectionChangeFailed { address: usize, size: usize },

    /// failed to query current protection of a region
    ProtectionQueryFailed { address: usize },

    /// target region is no longer mapped
    RegionGone { address: usize },

    // === function hooks ===
    /// target address already present in the hook registry
    AlreadyHooked { target: usize },

    /// target address not present in the hook registry
    NotHooked { target: usize },

    /// trampoline provider failed to splice the target
    SpliceFailed { target: usize },

    /// trampoline provider failed to remove the splice
    UnspliceFailed { target: usize },

    // === method hooks ===
    /// type name did not resolve in the dispatch runtime
    TypeNotFound { class: String },

    /// selector name could not be registered with the runtime
    SelectorRegistrationFailed { selector: String },

    /// (type, selector) pair has no implementation in the dispatch table
    MethodNotFound { class: String, selector: String },

    /// dispatch entry could not be overwritten
    ImplementationSwapFailed { class: String, selector: String },

    /// (type, selector) pair already present in the method-hook registry
    MethodAlreadyHooked { class: String, selector: String },

    /// (type, selector) pair not present in the method-hook registry
    MethodNotHooked { class: String, selector: String },

    // === anti-detection ===
    /// address was never recorded by protect_region
    RegionNotTracked { address: usize },

    // === pattern scanning ===
    /// pattern string could not be parsed
    InvalidPattern { pattern: String },
}

impl fmt::Display for SpecterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { context } => {
                write!(f, "invalid argument in {context}")
            }
            Self::PartialRead {
                address,
                requested,
                copied,
            } => {
                write!(
                    f,
                    "partial read at {address:#x}: requested {requested}, copied {copied}"
                )
            }
            Self::PartialWrite {
                address,
                requested,
                copied,
            } => {
                write!(
                    f,
                    "partial write at {address:#x}: requested {requested}, copied {copied}"
                )
            }
            Self::ProtectionChangeFailed { address, size } => {
                write!(
                    f,
                    "failed to change protection for {size} bytes at {address:#x}"
                )
            }
            Self::ProtectionQueryFailed { address } => {
                write!(f, "failed to query protection at {address:#x}")
            }
            Self::RegionGone { address } => {
                write!(f, "region at {address:#x} is no longer mapped")
            }
            Self::AlreadyHooked { target } => {
                write!(f, "target {target:#x} is already hooked")
            }
            Self::NotHooked { target } => {
                write!(f, "target {target:#x} is not hooked")
            }
            Self::SpliceFailed { target } => {
                write!(f, "trampoline provider failed to hook {target:#x}")
            }
            Self::UnspliceFailed { target } => {
                write!(f, "trampoline provider failed to unhook {target:#x}")
            }
            Self::TypeNotFound { class } => {
                write!(f, "type not found in runtime: {class}")
            }
            Self::SelectorRegistrationFailed { selector } => {
                write!(f, "selector registration failed: {selector}")
            }
            Self::MethodNotFound { class, selector } => {
                write!(f, "method not found: {class}::{selector}")
            }
            Self::ImplementationSwapFailed { class, selector } => {
                write!(f, "failed to swap implementation of {class}::{selector}")
            }
            Self::MethodAlreadyHooked { class, selector } => {
                write!(f, "method {class}::{selector} is already hooked")
            }
            Self::MethodNotHooked { class, selector } => {
                write!(f, "method {class}::{selector} is not hooked")
            }
            Self::RegionNotTracked { address } => {
                write!(f, "region at {address:#x} was not tracked")
            }
            Self::InvalidPattern { pattern } => {
                write!(f, "invalid byte pattern: {pattern:?}")
            }
        }
    }
}

impl std::error::Error for SpecterError {}

/// result type alias using SpecterError
pub type Result<T> = std::result::Result<T, SpecterError>;
