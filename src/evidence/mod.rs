//! Evidence about loaded module images.
//!
//! The security subsystem identifies a module by the hash of its image. It passes the
//! image handle through opaquely; [`crate::evidence::Hash`] maps the image read-only and
//! computes digests on demand.

mod hash;

pub use hash::{Hash, HashAlgorithm};
