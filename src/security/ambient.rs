//! The ambient identity of the current execution context.
//!
//! Framework code reads the identity a request runs under from here rather than from
//! the platform token. [`crate::security::ImpersonationScope`] keeps the two in step:
//! entering a scope publishes the impersonated principal and undoing it republishes
//! the captured one.

use std::{cell::RefCell, sync::Arc};

use crate::security::Principal;

thread_local! {
    static CURRENT: RefCell<Option<Arc<Principal>>> = const { RefCell::new(None) };
}

/// Returns the principal the calling thread currently runs as, if impersonating.
#[must_use]
pub fn current_principal() -> Option<Arc<Principal>> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Returns `true` if the calling thread publishes an impersonated principal.
#[must_use]
pub fn is_impersonating() -> bool {
    CURRENT.with(|current| current.borrow().is_some())
}

/// Publishes `principal` and returns the previous value.
///
/// Only reference counts are touched, so this is usable from no-throw cleanup paths.
pub(crate) fn set_current(principal: Option<Arc<Principal>>) -> Option<Arc<Principal>> {
    CURRENT.with(|current| current.replace(principal))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_and_clear() {
        assert!(!is_impersonating());

        let alice = Arc::new(Principal::new("CONTOSO\\alice"));
        assert!(set_current(Some(alice.clone())).is_none());
        assert!(is_impersonating());
        assert!(Arc::ptr_eq(&current_principal().unwrap(), &alice));

        let previous = set_current(None).unwrap();
        assert!(Arc::ptr_eq(&previous, &alice));
        assert!(current_principal().is_none());
    }
}
