//! Unified error handling for rocml
//!
//! Every fallible operation in the crate returns [`MlResult`]. Errors are
//! grouped by [`ErrorCategory`] so callers can tell resource exhaustion
//! (worth a caller-level retry) apart from bad input or backend faults.
//! Nothing inside the library retries on its own.

// Re-export thiserror for convenience
pub use thiserror;

/// Unified error type for rocml
#[derive(Debug, thiserror::Error)]
pub enum MlError {
    // ========== Resource Errors ==========
    /// An allocator could not satisfy a request
    #[error("memory allocation failed: {0}")]
    MemoryAllocationFailed(String),

    /// The planner ran out of escalation steps before the workspace fit
    #[error(
        "batch planning exhausted at batch_count={batch_count}: \
         workspace {workspace_bytes} bytes does not fit in {free_bytes} free bytes"
    )]
    PlanningExhausted {
        batch_count: usize,
        workspace_bytes: usize,
        free_bytes: usize,
    },

    /// An execution was handed less workspace than its layout needs
    #[error("insufficient workspace: need {required} bytes, got {provided}")]
    InsufficientWorkspace { required: usize, provided: usize },

    // ========== Backend Errors ==========
    /// Device, stream or driver failure
    #[error("backend error: {0}")]
    Backend(String),

    /// Copy between memory regions failed
    #[error("memory copy failed: {0}")]
    MemoryCopyFailed(String),

    /// Free/total memory introspection failed
    #[error("memory query failed: {0}")]
    MemoryQueryFailed(String),

    /// Host access requested on memory the host cannot address
    #[error("memory space {0} is not host accessible")]
    UnsupportedMemorySpace(&'static str),

    // ========== User Errors ==========
    /// Slice lengths disagree with the declared problem shape
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== Internal Errors ==========
    /// Logging subsystem could not be initialised
    #[error("logging error: {0}")]
    Logging(String),

    /// Internal error (indicates a bug)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification used for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller supplied bad input or configuration
    User,
    /// Memory exhaustion; may succeed later or with a smaller problem
    Resource,
    /// Device or driver failure
    Backend,
    /// Bug in rocml
    Internal,
}

impl MlError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            MlError::InvalidInput(_) | MlError::InvalidConfiguration(_) => ErrorCategory::User,

            MlError::MemoryAllocationFailed(_)
            | MlError::PlanningExhausted { .. }
            | MlError::InsufficientWorkspace { .. } => ErrorCategory::Resource,

            MlError::Backend(_)
            | MlError::MemoryCopyFailed(_)
            | MlError::MemoryQueryFailed(_)
            | MlError::UnsupportedMemorySpace(_) => ErrorCategory::Backend,

            MlError::Logging(_) | MlError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Check if a caller-level retry could succeed
    ///
    /// Only plain allocation failure qualifies: other consumers of device
    /// memory may have released what they held by the time of the retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MlError::MemoryAllocationFailed(_))
    }

    /// True for resource exhaustion of any kind
    pub fn is_out_of_memory(&self) -> bool {
        self.category() == ErrorCategory::Resource
    }
}

/// Result type used throughout rocml
pub type MlResult<T> = std::result::Result<T, MlError>;

/// Create an allocation failure with context
///
/// # Examples
/// ```ignore
/// return Err(oom_error!("requested {} bytes, {} free", bytes, free));
/// ```
#[macro_export]
macro_rules! oom_error {
    ($msg:expr) => {
        $crate::error::MlError::MemoryAllocationFailed($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::MlError::MemoryAllocationFailed(format!($fmt, $($arg)*))
    };
}

/// Create a backend error with context
#[macro_export]
macro_rules! backend_error {
    ($msg:expr) => {
        $crate::error::MlError::Backend($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::MlError::Backend(format!($fmt, $($arg)*))
    };
}

/// Create an internal error with context
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::MlError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::MlError::Internal(format!($fmt, $($arg)*))
    };
}

impl<T> From<std::sync::PoisonError<T>> for MlError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        MlError::Internal(format!("lock poisoned: {}", err))
    }
}
