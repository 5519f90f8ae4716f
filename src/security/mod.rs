//! Identity switching for request-scoped work.
//!
//! Server hosts process each request under the identity of its caller. This module
//! provides the pieces that make that switch reversible:
//!
//! - [`crate::security::Principal`] - The identity a token represents
//! - [`crate::security::ambient`] - The identity published to framework code on the current thread
//! - [`crate::security::SecurityFrame`] - A frame an outstanding impersonation is attached to
//! - [`crate::security::ImpersonationScope`] - Captures and restores the thread's token
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use dotinterop::{ImpersonationScope, SystemPlatform};
//!
//! let platform = SystemPlatform::shared();
//! let mut scope = ImpersonationScope::capture(platform)?;
//!
//! let outcome: Result<(), String> = Err("request failed".into());
//! if outcome.is_err() {
//!     // keep the original failure
//!     let _ = scope.undo_no_throw();
//! }
//! scope.dispose()?;
//! # Ok::<(), dotinterop::Error>(())
//! ```

pub mod ambient;
mod frame;
mod impersonation;
mod principal;

pub use frame::SecurityFrame;
pub use impersonation::{ImpersonationScope, ImpersonationSnapshot, ScopeState};
pub use principal::Principal;
