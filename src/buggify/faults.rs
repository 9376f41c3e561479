//! Fault identifiers
//!
//! Identifiers are `<area>.<fault>` strings so trace output groups by area.

pub mod storage {
    /// PUT fails before anything is stored
    pub const PUT_FAIL: &str = "storage.put_fail";
    /// PUT stores the object but the caller sees an error
    pub const AMBIGUOUS_PUT: &str = "storage.ambiguous_put";
    /// Ranged read fails
    pub const READ_FAIL: &str = "storage.read_fail";
    /// Compose fails before writing the destination
    pub const COMPOSE_FAIL: &str = "storage.compose_fail";
    /// Copy fails before writing the destination
    pub const COPY_FAIL: &str = "storage.copy_fail";
    /// Delete fails and the object is kept
    pub const DELETE_FAIL: &str = "storage.delete_fail";
    /// Any call times out before reaching the store
    pub const TIMEOUT: &str = "storage.timeout";
}

