use std::sync::atomic::{AtomicUsize, Ordering};

use crate::handle::NativeHandle;

/// A security-descriptor frame that an impersonation is attached to.
///
/// Hosts attach the scope of an inbound request to the frame that dispatches it so the
/// frame can tell whether an impersonation is still outstanding when it unwinds. The
/// frame records the token value the scope will restore; undoing the scope clears it.
#[derive(Debug, Default)]
pub struct SecurityFrame {
    restore_token: AtomicUsize,
    attached: AtomicUsize,
}

impl SecurityFrame {
    /// Creates a frame with nothing attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while a scope is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire) != 0
    }

    /// The token value the attached scope restores, or `None` when it restores
    /// "no impersonation" or nothing is attached.
    #[must_use]
    pub fn restore_token(&self) -> Option<NativeHandle> {
        match self.restore_token.load(Ordering::Acquire) {
            0 => None,
            raw => Some(NativeHandle::new(raw)),
        }
    }

    pub(crate) fn attach(&self, restore: Option<NativeHandle>) {
        self.restore_token
            .store(restore.map_or(0, NativeHandle::value), Ordering::Release);
        self.attached.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn clear(&self) {
        self.restore_token.store(0, Ordering::Release);
        self.attached.store(0, Ordering::Release);
    }
}
