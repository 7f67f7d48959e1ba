//! Well-known command names.
//!
//! Names are opaque, case-sensitive strings; these path-like constants are
//! the ones the account service registers.

/// Log in with existing credentials.
pub const LOGIN: &str = "/login";

/// Register a new account.
pub const REGISTRY: &str = "/registry";

/// Start password recovery.
pub const FORGOT: &str = "/forgot";
