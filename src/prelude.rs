//! # dotinterop Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the dotinterop library. Import it to get the handle, mapping, identity and
//! marshaling entry points in one line.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotinterop operations
pub use crate::Error;

/// The result type used throughout dotinterop
pub use crate::Result;

/// Runtime configuration presets
pub use crate::InteropConfig;

// ================================================================================================
// Platform
// ================================================================================================

/// The primitive set and its implementations
pub use crate::platform::{
    Instrumented, Platform, PlatformError, PlatformRef, PlatformResult, Primitive, SystemPlatform,
};

// ================================================================================================
// Handles and Memory
// ================================================================================================

/// Handle values and their owner
pub use crate::handle::{HandleGuard, HandleKind, NativeHandle};

/// Mapped files and platform memory
pub use crate::memory::{MappedMemoryRegion, NativeBuffer};

/// Record reader over mapped bytes
pub use crate::io::Parser;

// ================================================================================================
// Identity
// ================================================================================================

/// Impersonation and the ambient identity
pub use crate::security::{ImpersonationScope, Principal, ScopeState, SecurityFrame};

// ================================================================================================
// Marshaling
// ================================================================================================

/// Marshaling contract, requests and the standard marshal proxy
pub use crate::interop::{
    DestinationContext, Marshal, MarshalFlags, MarshalRequest, MemoryStream, ObjectId,
    StandardMarshalProxy, Stream,
};

// ================================================================================================
// Evidence
// ================================================================================================

/// Module image hash evidence
pub use crate::evidence::{Hash, HashAlgorithm};
