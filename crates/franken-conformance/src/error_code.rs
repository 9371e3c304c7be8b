//! Stable error codes carried by verdicts, log events and error types.

pub const FE_ATTR_MISMATCH: &str = "FE-ATTR-0001";
pub const FE_ATTR_ABSENT: &str = "FE-ATTR-0002";
pub const FE_ATTR_PROBE_ERROR: &str = "FE-ATTR-0003";
pub const FE_ATTR_TIMEOUT: &str = "FE-ATTR-0004";
pub const FE_ATTR_FIXTURE_FAULT: &str = "FE-ATTR-0005";
pub const FE_ATTR_ENGINE_FAULT: &str = "FE-ATTR-0006";
pub const FE_ATTR_INVALID_CONFIG: &str = "FE-ATTR-0007";
pub const FE_ATTR_INVALID_CATALOG: &str = "FE-ATTR-0008";

/// Every code, in numeric order.
pub const ALL_CODES: [&str; 8] = [
    FE_ATTR_MISMATCH,
    FE_ATTR_ABSENT,
    FE_ATTR_PROBE_ERROR,
    FE_ATTR_TIMEOUT,
    FE_ATTR_FIXTURE_FAULT,
    FE_ATTR_ENGINE_FAULT,
    FE_ATTR_INVALID_CONFIG,
    FE_ATTR_INVALID_CATALOG,
];

/// Errors that map onto one of the stable codes above.
pub trait StableErrorCode {
    fn code(&self) -> &'static str;
}
