//! Error taxonomy shared by every crate in the workspace.
//!
//! Each crate defines its own error enum, but all of them map onto the
//! closed [`ErrorKind`] set so callers can branch on the category without
//! knowing which layer produced the failure.

use std::fmt;

/// Closed set of error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller contract violation (missing input, size zero, out-of-range index).
    InvalidArgument,
    /// Staging ran out of space in the active partition.
    OutOfCapacity,
    /// The backend refused to create a buffer or texture.
    ResourceCreationFailed,
    /// The resource registry rejected an entry.
    ResourceRegistrationFailed,
    /// A descriptor heap partition is exhausted.
    DescriptorAllocationFailed,
    /// Lookup miss for a name, handle, or asset key.
    NotFound,
    /// Console policy rejected a command or CVar mutation.
    Denied,
    /// A bounded wait exceeded its limit.
    Timeout,
    /// Backend failure or contract breach; the frame is skipped.
    Internal,
}

impl ErrorKind {
    /// Stable lowercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::OutOfCapacity => "out_of_capacity",
            Self::ResourceCreationFailed => "resource_creation_failed",
            Self::ResourceRegistrationFailed => "resource_registration_failed",
            Self::DescriptorAllocationFailed => "descriptor_allocation_failed",
            Self::NotFound => "not_found",
            Self::Denied => "denied",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reports a broken caller contract.
///
/// Debug builds panic with the formatted message. Release builds log at
/// `ERROR` and evaluate to `Err($err)` returned from the enclosing function.
///
/// ```ignore
/// if self.entries.contains_key(&id) {
///     contract_violation!(
///         GraphicsError::ResourceRegistrationFailed(format!("{id:?} already registered")),
///         "resource {id:?} registered twice"
///     );
/// }
/// ```
#[macro_export]
macro_rules! contract_violation {
    ($err:expr, $($arg:tt)+) => {{
        if cfg!(debug_assertions) {
            panic!("contract violation: {}", format!($($arg)+));
        }
        $crate::__log::error!("contract violation: {}", format!($($arg)+));
        return Err($err);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_unique() {
        let kinds = [
            ErrorKind::InvalidArgument,
            ErrorKind::OutOfCapacity,
            ErrorKind::ResourceCreationFailed,
            ErrorKind::ResourceRegistrationFailed,
            ErrorKind::DescriptorAllocationFailed,
            ErrorKind::NotFound,
            ErrorKind::Denied,
            ErrorKind::Timeout,
            ErrorKind::Internal,
        ];
        let names: std::collections::HashSet<_> = kinds.iter().map(|k| k.as_str()).collect();
        assert_eq!(names.len(), kinds.len());
    }

    fn checked(value: u32) -> Result<u32, ErrorKind> {
        if value == 0 {
            contract_violation!(ErrorKind::InvalidArgument, "value must be non-zero");
        }
        Ok(value)
    }

    #[test]
    fn test_contract_violation_passes_valid_input() {
        assert_eq!(checked(3), Ok(3));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "contract violation")]
    fn test_contract_violation_panics_in_debug() {
        let _ = checked(0);
    }
}
