//! Error code constants
//!
//! Front ends receive these strings instead of English text so they can
//! localize the message themselves.

/// Provider storage is full
pub const ERR_QUOTA_EXCEEDED: &str = "ERR_QUOTA_EXCEEDED";

/// Network timed out or the host was unreachable
pub const ERR_CONNECTION_TIMEOUT: &str = "ERR_CONNECTION_TIMEOUT";

/// Credentials rejected or expired
pub const ERR_AUTHENTICATION_FAILED: &str = "ERR_AUTHENTICATION_FAILED";

/// Path tried to escape its directory
pub const ERR_PATH_TRAVERSAL: &str = "ERR_PATH_TRAVERSAL";

/// Path contained forbidden characters
pub const ERR_INVALID_PATH: &str = "ERR_INVALID_PATH";

/// Anything the classifier could not place
pub const ERR_TRANSFER_FAILED: &str = "ERR_TRANSFER_FAILED";

/// A second start was requested for a task that is already active
pub const ERR_TASK_ALREADY_RUNNING: &str = "ERR_TASK_ALREADY_RUNNING";

/// Remote identifier not present in the registry
pub const ERR_REMOTE_NOT_FOUND: &str = "ERR_REMOTE_NOT_FOUND";
