/// User-friendly message to display in `status.message` whenever a resource's
/// deletion is pending garbage collection.
pub const TERMINATING: &str = "Resource deletion is pending garbage collection.";

/// Message for the losing side of a target-resource lock conflict.
pub const LOCK_CONFLICT: &str = "execution resource for this target already exists";

/// Message set when a backend disappears after the controller created it.
pub const EXTERNALLY_DELETED: &str = "execution resource was deleted externally (not found)";
