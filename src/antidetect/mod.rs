//! Risk-scored anti-detection countermeasures
//!
//! - category-gated protection policy and risk tracking ([`system`])
//! - monitoring heuristics ([`monitor`])
//! - scoped call-stack sanitization ([`sanitize`])
//! - bounded timing jitter ([`timing`])

pub mod monitor;
pub mod sanitize;
pub mod system;
pub mod timing;

pub use monitor::MonitoringReport;
pub use sanitize::{execute_sanitized, CallStackSanitizer};
pub use system::{
    AntiDetectionSystem, DetectionCallback, ProtectionCallback, ProtectionType, RiskLevel,
    ScopedSignatureMask,
};
pub use timing::jitter;
