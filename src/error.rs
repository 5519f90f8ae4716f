use std::path::PathBuf;

use thiserror::Error;

use crate::platform::PlatformError;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The step of the file-mapping sequence that failed.
///
/// Carried by [`Error::MappingFailed`] so callers can tell a failed mapping-object
/// creation apart from a failed view mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum MappingStage {
    /// Creating the read-only mapping object over the opened file
    #[strum(to_string = "create mapping")]
    CreateMapping,
    /// Mapping a view of the mapping object into the address space
    #[strum(to_string = "map view")]
    MapView,
    /// Unmapping a previously established view
    #[strum(to_string = "unmap view")]
    UnmapView,
}

/// The identity operation that failed.
///
/// Carried by [`Error::SecurityOperationFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SecurityOperation {
    /// Reading the calling thread's current token
    #[strum(to_string = "capture token")]
    CaptureToken,
    /// Duplicating a token handle for the snapshot
    #[strum(to_string = "duplicate token")]
    DuplicateToken,
    /// Dropping the thread's impersonation (revert to self)
    #[strum(to_string = "revert to self")]
    RevertToSelf,
    /// Applying a token to the calling thread
    #[strum(to_string = "impersonate")]
    Impersonate,
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Handle Errors
/// - [`Error::InvalidHandle`] - A sentinel value was supplied where a real handle was required
/// - [`Error::InvalidState`] - An accessor was used on a released or never-established resource
///
/// ## Resource Errors
/// - [`Error::ResourceUnavailable`] - The file could not be opened or queried
/// - [`Error::MappingFailed`] - Creating the mapping or mapping the view failed
///
/// ## Security Errors
/// - [`Error::SecurityOperationFailed`] - Reverting or applying an impersonation token failed
///
/// ## Interop Errors
/// - [`Error::NotImplemented`] - A marshaling entry point was reached that the platform never calls
/// - [`Error::Malformed`] - A marshal packet could not be decoded
/// - [`Error::OutOfBounds`] - A read or write ran past the end of a buffer
/// - [`Error::Platform`] - Any other platform failure, carrying the raw error code
///
/// # Examples
///
/// ```rust,no_run
/// use dotinterop::{Error, MappedMemoryRegion, SystemPlatform};
///
/// match MappedMemoryRegion::open(SystemPlatform::shared(), "culture.nlp") {
///     Ok(region) => println!("mapped {} bytes", region.byte_size()),
///     Err(Error::ResourceUnavailable { path, code }) => {
///         eprintln!("cannot open {}: 0x{:X}", path.display(), code);
///     }
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A sentinel value (zero or all-ones) was supplied where a live handle was required,
    /// or the handle was already released.
    #[error("The handle is invalid or has already been released")]
    InvalidHandle,

    /// The backing resource could not be opened or queried.
    ///
    /// Raised when the platform denies access or the file does not exist.
    #[error("Resource {} is unavailable (error 0x{code:X})", .path.display())]
    ResourceUnavailable {
        /// The path that was requested
        path: PathBuf,
        /// The raw platform error code
        code: u32,
    },

    /// A step of the file-mapping sequence failed.
    #[error("Mapping failed during {stage} (error 0x{code:X})")]
    MappingFailed {
        /// The step that failed
        stage: MappingStage,
        /// The raw platform error code
        code: u32,
    },

    /// Reverting or re-applying an impersonation token failed.
    ///
    /// The ambient identity of the calling thread is indeterminate after this error
    /// and callers must treat it as a hard security fault.
    #[error("Security operation '{operation}' failed (error 0x{code:X})")]
    SecurityOperationFailed {
        /// The operation that failed
        operation: SecurityOperation,
        /// The raw platform error code
        code: u32,
    },

    /// An entry point was invoked in a context that never legitimately reaches it.
    #[error("'{0}' is not implemented on this object")]
    NotImplemented(&'static str),

    /// An accessor was used on a resource that is not in a usable state.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// A marshal packet or record is damaged and could not be decoded.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// An unexpected platform error, carrying the raw OS error code.
    #[error("Unexpected platform error 0x{code:X}")]
    Platform {
        /// The raw platform error code
        code: u32,
    },
}

impl From<PlatformError> for Error {
    fn from(error: PlatformError) -> Self {
        Error::Platform { code: error.code() }
    }
}

impl Error {
    /// Returns the raw platform error code carried by this error, if any.
    #[must_use]
    pub fn platform_code(&self) -> Option<u32> {
        match self {
            Error::ResourceUnavailable { code, .. }
            | Error::MappingFailed { code, .. }
            | Error::SecurityOperationFailed { code, .. }
            | Error::Platform { code } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::codes;

    #[test]
    fn platform_code_is_exposed() {
        let error = Error::MappingFailed {
            stage: MappingStage::MapView,
            code: codes::ERROR_NOT_ENOUGH_MEMORY,
        };
        assert_eq!(error.platform_code(), Some(codes::ERROR_NOT_ENOUGH_MEMORY));
        assert_eq!(Error::InvalidHandle.platform_code(), None);
    }

    #[test]
    fn display_names_the_failed_step() {
        let error = Error::SecurityOperationFailed {
            operation: SecurityOperation::RevertToSelf,
            code: 5,
        };
        assert_eq!(
            error.to_string(),
            "Security operation 'revert to self' failed (error 0x5)"
        );

        let error = Error::MappingFailed {
            stage: MappingStage::CreateMapping,
            code: 0x3EE,
        };
        assert_eq!(
            error.to_string(),
            "Mapping failed during create mapping (error 0x3EE)"
        );
    }

    #[test]
    fn platform_error_converts() {
        let error: Error = PlatformError::new(codes::E_UNEXPECTED).into();
        assert!(matches!(error, Error::Platform { code } if code == codes::E_UNEXPECTED));
    }

    #[test]
    fn malformed_macro_records_location() {
        let error = malformed_error!("bad signature {:#x}", 0x1234);
        match error {
            Error::Malformed { message, file, .. } => {
                assert_eq!(message, "bad signature 0x1234");
                assert!(file.ends_with("error.rs"));
            }
            _ => panic!("Expected Malformed"),
        }
    }
}
