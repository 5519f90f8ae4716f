//! Native handle values and the release-once guard that owns them.
//!
//! A [`crate::handle::NativeHandle`] is an opaque pointer-sized value naming an OS
//! resource. Zero and all-ones are reserved sentinels that never name a resource and
//! are never released. Each live value is owned by exactly one
//! [`crate::handle::HandleGuard`], which releases it through the primitive that
//! matches its [`crate::handle::HandleKind`].
//!
//! # Key Components
//!
//! - [`crate::handle::NativeHandle`] - Raw handle value with sentinel checks
//! - [`crate::handle::HandleKind`] - Resource kind, selecting the release primitive
//! - [`crate::handle::HandleGuard`] - Exclusive owner with idempotent, race-safe release
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use dotinterop::{HandleGuard, HandleKind, Platform, SystemPlatform};
//! use std::path::Path;
//!
//! let platform = SystemPlatform::shared();
//! let raw = platform.open_file_for_read(Path::new("mscorlib.dll"))?;
//! let guard = HandleGuard::acquire(platform, raw, HandleKind::Image)?;
//! assert!(guard.is_valid());
//!
//! guard.release()?;
//! guard.release()?; // no-op
//! assert!(!guard.is_valid());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod guard;
mod kind;

pub use guard::HandleGuard;
pub use kind::HandleKind;

use std::fmt;

/// An opaque, pointer-sized OS resource value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NativeHandle(usize);

impl NativeHandle {
    /// The null sentinel
    pub const NULL: NativeHandle = NativeHandle(0);
    /// The all-ones sentinel (`INVALID_HANDLE_VALUE`)
    pub const INVALID: NativeHandle = NativeHandle(usize::MAX);

    /// Wraps a raw value.
    #[must_use]
    pub const fn new(raw: usize) -> Self {
        NativeHandle(raw)
    }

    /// Wraps the address of a pointer.
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        NativeHandle(ptr as usize)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(self) -> usize {
        self.0
    }

    /// Reinterprets the value as an address.
    #[must_use]
    pub fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// Returns `true` for the reserved values zero and all-ones.
    #[must_use]
    pub const fn is_sentinel(self) -> bool {
        self.0 == 0 || self.0 == usize::MAX
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}
