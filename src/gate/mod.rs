//! Admission gates: address permission checks and rate limiting

pub mod permission;
pub mod rate_limit;

pub use permission::{
    open_permission_gate, AllowAll, GateError, PermissionGate, SqlitePermissionGate, StaticAllowList,
};
pub use rate_limit::{AddressRateLimiter, RateLimitError};
