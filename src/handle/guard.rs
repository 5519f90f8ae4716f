use std::sync::atomic::{AtomicU8, Ordering};

use log::{debug, warn};

use crate::{
    config::InteropConfig,
    handle::{HandleKind, NativeHandle},
    platform::{codes, Platform, PlatformError, PlatformRef, PlatformResult},
    Error::{InvalidHandle, InvalidState},
    Result,
};

const LIVE: u8 = 0;
const RELEASING: u8 = 1;
const RELEASED: u8 = 2;

/// Exclusive owner of one native handle.
///
/// A `HandleGuard` releases its handle exactly once: through an explicit
/// [`HandleGuard::release`], through [`HandleGuard::release_no_throw`] on a cleanup
/// path, or when it is dropped. Concurrent release attempts race on an atomic state
/// word; the first caller performs the platform call and every other caller returns
/// success without touching the platform.
///
/// A failed release leaves the guard valid so the failure can be reported; it is not
/// retried by the guard itself.
///
/// # Examples
///
/// ```rust,no_run
/// use dotinterop::{HandleGuard, HandleKind, NativeHandle, SystemPlatform};
///
/// let result = HandleGuard::acquire(SystemPlatform::shared(), NativeHandle::INVALID, HandleKind::File);
/// assert!(matches!(result, Err(dotinterop::Error::InvalidHandle)));
/// ```
#[derive(Debug)]
pub struct HandleGuard {
    platform: PlatformRef,
    handle: NativeHandle,
    kind: HandleKind,
    state: AtomicU8,
    log_failures: bool,
}

impl HandleGuard {
    /// Takes ownership of `handle` using the default configuration.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidHandle`] if `handle` is a sentinel value.
    pub fn acquire(platform: PlatformRef, handle: NativeHandle, kind: HandleKind) -> Result<Self> {
        Self::acquire_with(platform, handle, kind, &InteropConfig::default())
    }

    /// Takes ownership of `handle`, honouring `config`.
    ///
    /// With [`InteropConfig::allow_invalid_handles`] set, a sentinel is accepted and the
    /// resulting guard reports itself invalid and never calls the platform.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidHandle`] if `handle` is a sentinel value and the
    /// configuration does not allow it.
    pub fn acquire_with(
        platform: PlatformRef,
        handle: NativeHandle,
        kind: HandleKind,
        config: &InteropConfig,
    ) -> Result<Self> {
        if handle.is_sentinel() && !config.allow_invalid_handles {
            return Err(InvalidHandle);
        }

        debug!("acquired {} handle {}", kind, handle);
        Ok(HandleGuard {
            platform,
            handle,
            kind,
            state: AtomicU8::new(LIVE),
            log_failures: config.log_release_failures,
        })
    }

    /// Issues a handle-producing platform call and takes ownership of its result.
    ///
    /// The returned value is wrapped before anything else can run, so a successful
    /// call can never leave an untracked handle behind. A call that reports success
    /// but yields a sentinel is treated as [`codes::ERROR_INVALID_HANDLE`].
    ///
    /// # Errors
    /// Returns the platform error of the call.
    pub fn acquire_from<F>(platform: PlatformRef, kind: HandleKind, call: F) -> PlatformResult<Self>
    where
        F: FnOnce(&dyn Platform) -> PlatformResult<NativeHandle>,
    {
        let handle = call(platform.as_ref())?;
        if handle.is_sentinel() {
            return Err(PlatformError::new(codes::ERROR_INVALID_HANDLE));
        }

        debug!("acquired {} handle {}", kind, handle);
        Ok(HandleGuard {
            platform,
            handle,
            kind,
            state: AtomicU8::new(LIVE),
            log_failures: true,
        })
    }

    /// Returns `true` if the value is not a sentinel and has not been released.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.handle.is_sentinel() && self.state.load(Ordering::Acquire) == LIVE
    }

    /// Returns the kind of resource this guard owns.
    #[must_use]
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Returns the platform this guard releases through.
    #[must_use]
    pub fn platform(&self) -> &PlatformRef {
        &self.platform
    }

    /// Returns the raw value for use in deeper platform calls.
    ///
    /// The guard keeps ownership: the caller must not release the value and must not use
    /// it after the guard has been released or dropped.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidHandle`] if the guard is no longer valid.
    pub fn dangerous_get_raw_value(&self) -> Result<NativeHandle> {
        if !self.is_valid() {
            return Err(InvalidHandle);
        }

        Ok(self.handle)
    }

    /// Raw value without the validity check, for callers that already hold the guard
    /// in a state where it cannot have been released.
    pub(crate) fn raw(&self) -> NativeHandle {
        self.handle
    }

    /// Releases the handle.
    ///
    /// The first successful call invokes the release primitive for the handle's kind and
    /// marks the guard invalid; later calls are no-ops returning `Ok(())`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Platform`] with the raw code if the release primitive fails.
    /// The guard stays valid in that case.
    pub fn release(&self) -> Result<()> {
        self.try_release().map_err(Into::into)
    }

    /// Releases the handle without constructing an error.
    ///
    /// Intended for cleanup paths that run while another failure is already propagating.
    /// Returns `false` if the release primitive failed.
    pub fn release_no_throw(&self) -> bool {
        self.try_release().is_ok()
    }

    pub(crate) fn try_release(&self) -> PlatformResult<()> {
        if self.handle.is_sentinel() {
            return Ok(());
        }

        if self
            .state
            .compare_exchange(LIVE, RELEASING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        match self.kind.release(self.platform.as_ref(), self.handle) {
            Ok(()) => {
                self.state.store(RELEASED, Ordering::Release);
                debug!("released {} handle {}", self.kind, self.handle);
                Ok(())
            }
            Err(error) => {
                self.state.store(LIVE, Ordering::Release);
                Err(error)
            }
        }
    }

    /// Marks the guard invalid without releasing the handle.
    ///
    /// Ownership of the value passes to whoever received it through
    /// [`HandleGuard::dangerous_get_raw_value`].
    pub fn set_handle_as_invalid(&self) {
        self.state.store(RELEASED, Ordering::Release);
    }

    /// Gives up ownership and returns the raw value without releasing it.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidHandle`] if the guard is no longer valid.
    pub fn into_raw(self) -> Result<NativeHandle> {
        let handle = self.dangerous_get_raw_value()?;
        self.set_handle_as_invalid();
        Ok(handle)
    }

    /// Duplicates the handle into a new, independently owned guard.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidHandle`] if the guard is no longer valid,
    /// [`crate::Error::InvalidState`] for views and memory blocks, which are not kernel
    /// objects, or [`crate::Error::Platform`] if duplication fails.
    pub fn try_clone(&self) -> Result<HandleGuard> {
        let handle = self.dangerous_get_raw_value()?;
        if !self.kind.is_kernel_object() {
            return Err(InvalidState("only kernel object handles can be duplicated"));
        }

        let kind = self.kind;
        Ok(HandleGuard::acquire_from(
            self.platform.clone(),
            kind,
            |platform| platform.duplicate_handle(handle),
        )?)
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if self.handle.is_sentinel() || self.state.load(Ordering::Acquire) != LIVE {
            return;
        }

        if let Err(error) = self.try_release() {
            if self.log_failures {
                warn!(
                    "failed to release {} handle {} on drop: {}",
                    self.kind, self.handle, error
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        platform::{Instrumented, Primitive, SystemPlatform},
        security::Principal,
    };

    fn token_platform() -> (Arc<Instrumented<SystemPlatform>>, NativeHandle) {
        crate::test::init_logging();
        let platform = Arc::new(Instrumented::new(SystemPlatform::new()));
        let token = platform.inner().issue_token(Principal::new("CONTOSO\\alice"));
        (platform, token)
    }

    #[test]
    fn release_is_idempotent() {
        let (platform, token) = token_platform();
        let guard = HandleGuard::acquire(platform.clone(), token, HandleKind::Token).unwrap();
        assert!(guard.is_valid());

        for _ in 0..5 {
            guard.release().unwrap();
        }

        assert!(!guard.is_valid());
        assert_eq!(platform.calls(Primitive::CloseHandle), 1);
        drop(guard);
        assert_eq!(platform.calls(Primitive::CloseHandle), 1);
    }

    #[test]
    fn sentinel_is_rejected() {
        let platform = Arc::new(SystemPlatform::new());
        for sentinel in [NativeHandle::NULL, NativeHandle::INVALID] {
            let result = HandleGuard::acquire(platform.clone(), sentinel, HandleKind::File);
            assert!(matches!(result, Err(InvalidHandle)));
        }
    }

    #[test]
    fn allowed_sentinel_never_reaches_platform() {
        let platform = Arc::new(Instrumented::new(SystemPlatform::new()));
        let guard = HandleGuard::acquire_with(
            platform.clone(),
            NativeHandle::INVALID,
            HandleKind::File,
            &InteropConfig::permissive(),
        )
        .unwrap();

        assert!(!guard.is_valid());
        assert!(guard.release_no_throw());
        assert!(matches!(guard.dangerous_get_raw_value(), Err(InvalidHandle)));
        drop(guard);
        assert_eq!(platform.total_calls(), 0);
    }

    #[test]
    fn failed_release_keeps_guard_valid() {
        let (platform, token) = token_platform();
        let guard = HandleGuard::acquire(platform.clone(), token, HandleKind::Token).unwrap();

        platform.fail_next(Primitive::CloseHandle, codes::ERROR_INVALID_HANDLE);
        match guard.release() {
            Err(crate::Error::Platform { code }) => assert_eq!(code, codes::ERROR_INVALID_HANDLE),
            other => panic!("Expected platform error, got {:?}", other),
        }
        assert!(guard.is_valid());

        assert!(guard.release_no_throw());
        assert!(!guard.is_valid());
        assert_eq!(platform.calls(Primitive::CloseHandle), 2);
    }

    #[test]
    fn drop_releases_once() {
        let (platform, token) = token_platform();
        {
            let _guard = HandleGuard::acquire(platform.clone(), token, HandleKind::Token).unwrap();
        }
        assert_eq!(platform.calls(Primitive::CloseHandle), 1);
        assert_eq!(platform.inner().live_handles(), 0);
    }

    #[test]
    fn set_handle_as_invalid_skips_release() {
        let (platform, token) = token_platform();
        let guard = HandleGuard::acquire(platform.clone(), token, HandleKind::Token).unwrap();
        let raw = guard.into_raw().unwrap();
        assert_eq!(raw, token);
        assert_eq!(platform.calls(Primitive::CloseHandle), 0);
        assert_eq!(platform.inner().live_handles(), 1);

        platform.close_handle(raw).unwrap();
    }

    #[test]
    fn try_clone_produces_distinct_owned_value() {
        let (platform, token) = token_platform();
        let guard = HandleGuard::acquire(platform.clone(), token, HandleKind::Token).unwrap();
        let clone = guard.try_clone().unwrap();

        assert_ne!(
            clone.dangerous_get_raw_value().unwrap(),
            guard.dangerous_get_raw_value().unwrap()
        );
        assert_eq!(platform.calls(Primitive::DuplicateHandle), 1);

        guard.release().unwrap();
        assert!(clone.is_valid());
        assert_eq!(
            platform.token_principal(clone.raw()).unwrap().name(),
            "CONTOSO\\alice"
        );
    }

    #[test]
    fn acquire_from_rejects_sentinel_results() {
        let platform = Arc::new(SystemPlatform::new());
        let result = HandleGuard::acquire_from(platform, HandleKind::File, |_| Ok(NativeHandle::NULL));
        assert_eq!(
            result.unwrap_err(),
            PlatformError::new(codes::ERROR_INVALID_HANDLE)
        );
    }

    #[test]
    fn concurrent_release_calls_platform_once() {
        let (platform, token) = token_platform();
        let guard = Arc::new(HandleGuard::acquire(platform.clone(), token, HandleKind::Token).unwrap());

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                std::thread::spawn(move || guard.release().is_ok())
            })
            .collect();

        for worker in workers {
            assert!(worker.join().unwrap());
        }

        assert!(!guard.is_valid());
        assert_eq!(platform.calls(Primitive::CloseHandle), 1);
    }
}
