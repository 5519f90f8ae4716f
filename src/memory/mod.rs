//! Memory owned through platform handles.
//!
//! Culture and resource data is read straight from mapped files rather than copied into
//! the heap. [`crate::memory::MappedMemoryRegion`] maps a file read-only and keeps only
//! the view alive; [`crate::memory::NativeBuffer`] owns a block of platform-allocated
//! memory. Both release through a [`crate::handle::HandleGuard`], so the view or block
//! is released exactly once no matter how the owner goes away.
//!
//! # Key Components
//!
//! - [`crate::memory::MappedMemoryRegion`] - Read-only mapped view of a whole file
//! - [`crate::memory::NativeBuffer`] - Zeroed platform memory block
//!
//! # Thread Safety
//!
//! A mapped view may be read from any number of threads. Releasing takes `&mut self`,
//! so it cannot race with borrowed readers.

mod buffer;
mod region;

pub use buffer::NativeBuffer;
pub use region::MappedMemoryRegion;
