//! Raw platform error codes.
//!
//! The values follow the Win32 / HRESULT numbering so that codes surfaced by
//! [`crate::Error`] mean the same thing regardless of which [`crate::Platform`]
//! produced them. I/O errors from the host are folded into this numbering by
//! [`from_io_error`].

use std::io;

/// The operation completed successfully
pub const ERROR_SUCCESS: u32 = 0;
/// The system cannot find the file specified
pub const ERROR_FILE_NOT_FOUND: u32 = 2;
/// The system cannot find the path specified
pub const ERROR_PATH_NOT_FOUND: u32 = 3;
/// Access is denied
pub const ERROR_ACCESS_DENIED: u32 = 5;
/// The handle is invalid
pub const ERROR_INVALID_HANDLE: u32 = 6;
/// Not enough memory resources are available to process this command
pub const ERROR_NOT_ENOUGH_MEMORY: u32 = 8;
/// A device attached to the system is not functioning
pub const ERROR_GEN_FAILURE: u32 = 31;
/// The parameter is incorrect
pub const ERROR_INVALID_PARAMETER: u32 = 87;
/// The volume for a file has been externally altered so that the opened file is no longer valid
pub const ERROR_FILE_INVALID: u32 = 1006;
/// An attempt was made to reference a token that does not exist
pub const ERROR_NO_TOKEN: u32 = 1008;
/// Unable to impersonate using a named pipe until data has been read from that pipe
pub const ERROR_CANNOT_IMPERSONATE: u32 = 1368;
/// Not implemented
pub const E_NOTIMPL: u32 = 0x8000_4001;
/// No such interface supported
pub const E_NOINTERFACE: u32 = 0x8000_4002;
/// Catastrophic failure
pub const E_UNEXPECTED: u32 = 0x8000_FFFF;
/// One or more arguments are invalid
pub const E_INVALIDARG: u32 = 0x8007_0057;

/// Folds a host I/O error into the platform error numbering.
///
/// Well-known error kinds map to their Win32 equivalents; anything else keeps
/// its raw OS code when one exists and falls back to [`ERROR_GEN_FAILURE`].
#[must_use]
pub fn from_io_error(error: &io::Error) -> u32 {
    match error.kind() {
        io::ErrorKind::NotFound => ERROR_FILE_NOT_FOUND,
        io::ErrorKind::PermissionDenied => ERROR_ACCESS_DENIED,
        io::ErrorKind::OutOfMemory => ERROR_NOT_ENOUGH_MEMORY,
        io::ErrorKind::InvalidInput => ERROR_INVALID_PARAMETER,
        _ => error
            .raw_os_error()
            .and_then(|code| u32::try_from(code).ok())
            .filter(|code| *code != ERROR_SUCCESS)
            .unwrap_or(ERROR_GEN_FAILURE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_to_win32_codes() {
        let missing = io::Error::new(io::ErrorKind::NotFound, "missing");
        assert_eq!(from_io_error(&missing), ERROR_FILE_NOT_FOUND);

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(from_io_error(&denied), ERROR_ACCESS_DENIED);

        let other = io::Error::other("boom");
        assert_eq!(from_io_error(&other), ERROR_GEN_FAILURE);
    }
}
