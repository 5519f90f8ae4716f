// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
//#![deny(unsafe_code)]
// - 'platform/system.rs' maps views with memmap2 and hands out raw heap blocks
// - 'memory/region.rs' and 'memory/buffer.rs' build slices over view and block addresses

//! # dotinterop
//!
//! Native resource ownership and cross-boundary marshaling for managed-runtime hosts.
//!
//! A framework that talks to the operating system holds raw handles: open files,
//! mapping objects, mapped views, memory blocks and security tokens. `dotinterop` gives
//! each of them exactly one owner that releases it exactly once, maps data files
//! read-only without copying them, switches the calling thread's identity for the
//! duration of a request and hands object marshaling off to the platform's standard
//! marshaler.
//!
//! ## Features
//!
//! - **Release-once handles** - [`HandleGuard`] releases through the primitive matching the resource kind, race-free
//! - **Mapped data files** - [`MappedMemoryRegion`] keeps only the view alive and closes file and mapping early
//! - **Reversible impersonation** - [`ImpersonationScope`] restores the captured identity, with a no-throw variant for unwinding
//! - **Marshal delegation** - [`StandardMarshalProxy`] forwards to a fresh standard marshaler per call
//! - **Image evidence** - [`Hash`] computes cached SHA-1, MD5 and SHA-256 digests of a module image
//! - **Fault injection** - [`Instrumented`] counts, journals and fails any platform primitive
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dotinterop::prelude::*;
//!
//! let platform = SystemPlatform::shared();
//!
//! let region = MappedMemoryRegion::open(platform.clone(), "culture.nlp")?;
//! println!("mapped {} bytes", region.byte_size());
//!
//! let scope = ImpersonationScope::capture(platform)?;
//! // ... run the request ...
//! scope.dispose()?;
//! # Ok::<(), dotinterop::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`platform`] - The primitive set every component is built on, the host implementation and the instrumented wrapper
//! - [`handle`] - Handle values and their release-once guard
//! - [`memory`] - Mapped regions and platform memory blocks
//! - [`security`] - Principals, the ambient identity and impersonation scopes
//! - [`interop`] - Marshal requests, OBJREF packets, the standard marshaler and its proxy
//! - [`evidence`] - Hash evidence for module images
//! - [`io`] - Endian-aware reads and the [`Parser`] cursor
//! - [`config`] - [`InteropConfig`] presets
//! - [`Error`] and [`Result`] - Error handling
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`Result`]. Errors raised by the platform carry the
//! raw platform code, see [`Error::platform_code`]. Cleanup paths (drops and the
//! `*_no_throw` methods) never construct errors; they report failures as `false` and
//! through the `log` facade.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

#[cfg(test)]
pub(crate) mod test;

pub mod prelude;

pub mod config;
pub mod evidence;
pub mod handle;
pub mod interop;
pub mod io;
pub mod memory;
pub mod platform;
pub mod security;

/// `dotinterop` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotinterop` Error type
///
/// The main error type for all operations in this crate. Platform failures carry the raw
/// platform code.
pub use error::{Error, MappingStage, SecurityOperation};

pub use config::InteropConfig;
pub use evidence::Hash;
pub use handle::{HandleGuard, HandleKind, NativeHandle};
pub use interop::{MarshalRequest, StandardMarshalProxy};
pub use io::Parser;
pub use memory::{MappedMemoryRegion, NativeBuffer};
pub use platform::{
    Instrumented, Platform, PlatformError, PlatformRef, PlatformResult, Primitive, SystemPlatform,
};
pub use security::{ImpersonationScope, Principal, SecurityFrame};
