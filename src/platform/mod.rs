//! Platform primitives consumed by the handle, mapping, identity and marshaling layers.
//!
//! Every operation in this crate that touches the operating system goes through the
//! object-safe [`crate::platform::Platform`] trait. Components hold a shared
//! [`crate::platform::PlatformRef`] and never call the OS directly, which keeps the
//! release-once and restore-on-exit guarantees testable under fault injection.
//!
//! # Key Components
//!
//! - [`crate::platform::Platform`] - The primitive set (files, mappings, memory, handles, tokens, marshalers)
//! - [`crate::platform::PlatformError`] - A `Copy` error carrying a raw platform code
//! - [`crate::platform::SystemPlatform`] - The host implementation backed by `std::fs` and `memmap2`
//! - [`crate::platform::Instrumented`] - A wrapper that counts, journals and fails primitives on demand
//! - [`crate::platform::codes`] - Win32-compatible error code constants
//!
//! # Error Model
//!
//! Primitives return [`crate::platform::PlatformResult`], whose error type is a plain
//! 32-bit code. Creating or propagating it never allocates, so the same primitives are
//! usable from the non-throwing cleanup paths (see
//! [`crate::security::ImpersonationScope::undo_no_throw`]). Components translate
//! platform errors into [`crate::Error`] variants at their own boundary.
//!
//! # Thread Safety
//!
//! [`crate::platform::Platform`] requires `Send + Sync`; implementations must tolerate
//! concurrent calls from any thread. Identity primitives act on the *calling* thread.

pub mod codes;
mod instrumented;
mod system;

pub use instrumented::{CallRecord, Instrumented, Primitive};
pub use system::SystemPlatform;

use std::{fmt, path::Path, sync::Arc};

use crate::{
    handle::NativeHandle,
    interop::{Marshal, MarshalRequest, ObjectId},
    security::Principal,
};

/// A failed platform call, carrying the raw error code.
///
/// This type is `Copy` and allocation free by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformError {
    code: u32,
}

impl PlatformError {
    /// Creates a new error from a raw platform code.
    #[must_use]
    pub const fn new(code: u32) -> Self {
        PlatformError { code }
    }

    /// Returns the raw platform code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self.code
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "platform error 0x{:X}", self.code)
    }
}

impl std::error::Error for PlatformError {}

/// Result type returned by every [`Platform`] primitive.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Shared reference to a platform implementation.
pub type PlatformRef = Arc<dyn Platform>;

/// The set of operating-system primitives this crate is built on.
///
/// Handle values returned by the `open`/`create`/`map`/`allocate`/`duplicate` calls are
/// owned by the caller, who must pass each of them to exactly one matching release
/// primitive ([`Platform::close_handle`], [`Platform::unmap_view`] or
/// [`Platform::free_memory`]). [`crate::handle::HandleGuard`] does this bookkeeping.
pub trait Platform: Send + Sync + fmt::Debug {
    /// Opens an existing file for shared reading.
    fn open_file_for_read(&self, path: &Path) -> PlatformResult<NativeHandle>;

    /// Returns the size in bytes of an open file.
    fn file_size(&self, file: NativeHandle) -> PlatformResult<u64>;

    /// Creates a read-only mapping object covering the whole of `file`.
    ///
    /// `name` optionally makes the mapping visible to other processes.
    fn create_read_only_mapping(
        &self,
        file: NativeHandle,
        name: Option<&str>,
    ) -> PlatformResult<NativeHandle>;

    /// Maps `len` bytes of a mapping object into the address space.
    ///
    /// The returned handle value is the base address of the view. The view stays
    /// valid after the originating file and mapping handles are closed.
    fn map_view(&self, mapping: NativeHandle, len: usize) -> PlatformResult<NativeHandle>;

    /// Unmaps a view previously returned by [`Platform::map_view`].
    fn unmap_view(&self, view: NativeHandle) -> PlatformResult<()>;

    /// Allocates `len` zeroed bytes. The returned handle value is the block address.
    fn allocate_memory(&self, len: usize) -> PlatformResult<NativeHandle>;

    /// Frees a block previously returned by [`Platform::allocate_memory`].
    fn free_memory(&self, block: NativeHandle) -> PlatformResult<()>;

    /// Closes a kernel object handle (file, mapping, token, process, image).
    fn close_handle(&self, handle: NativeHandle) -> PlatformResult<()>;

    /// Duplicates a kernel object handle within the current process.
    ///
    /// The duplicate is a distinct owned value referring to the same object.
    fn duplicate_handle(&self, handle: NativeHandle) -> PlatformResult<NativeHandle>;

    /// Opens the calling thread's impersonation token.
    ///
    /// Returns `Ok(None)` when the thread is not impersonating; this is not an error.
    fn open_thread_token(&self) -> PlatformResult<Option<NativeHandle>>;

    /// Drops any impersonation on the calling thread.
    fn revert_to_self(&self) -> PlatformResult<()>;

    /// Makes the calling thread impersonate `token`.
    fn impersonate_token(&self, token: NativeHandle) -> PlatformResult<()>;

    /// Returns the principal a token represents.
    fn token_principal(&self, token: NativeHandle) -> PlatformResult<Arc<Principal>>;

    /// Returns the code of the last failed primitive on the calling thread.
    fn last_error_code(&self) -> u32;

    /// Obtains the platform's standard marshaler for `object` and `request`.
    ///
    /// The marshaler is released when the returned box is dropped.
    fn standard_marshaler(
        &self,
        object: ObjectId,
        request: &MarshalRequest,
    ) -> PlatformResult<Box<dyn Marshal>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_error_is_plain_code() {
        let error = PlatformError::new(codes::ERROR_ACCESS_DENIED);
        assert_eq!(error.code(), 5);
        assert_eq!(error.to_string(), "platform error 0x5");
        assert_eq!(error, PlatformError::new(5));
    }
}
