use std::sync::Arc;

use log::{debug, error, warn};
use strum::Display;

use crate::{
    error::SecurityOperation,
    handle::{HandleGuard, HandleKind, NativeHandle},
    platform::{PlatformError, PlatformRef},
    security::{ambient, Principal, SecurityFrame},
    Error::{InvalidState, SecurityOperationFailed},
    Result,
};

/// Lifecycle state of an [`ImpersonationScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ScopeState {
    /// The prior identity has been captured and not yet restored
    Captured,
    /// The prior identity has been restored; terminal
    Reverted,
    /// Restoring the prior identity failed; the thread identity is indeterminate
    Faulted,
}

/// What the calling thread was running as when a scope was entered.
#[derive(Debug)]
pub struct ImpersonationSnapshot {
    token: Option<HandleGuard>,
    principal: Option<Arc<Principal>>,
    frame: Option<Arc<SecurityFrame>>,
}

impl ImpersonationSnapshot {
    /// The owned token handle, or `None` if the thread was not impersonating
    #[must_use]
    pub fn token(&self) -> Option<&HandleGuard> {
        self.token.as_ref()
    }

    /// The principal that will be restored
    #[must_use]
    pub fn principal(&self) -> Option<&Arc<Principal>> {
        self.principal.as_ref()
    }

    /// The security frame this snapshot is attached to
    #[must_use]
    pub fn frame(&self) -> Option<&Arc<SecurityFrame>> {
        self.frame.as_ref()
    }
}

/// Restores the calling thread's identity when a unit of work ends.
///
/// A scope captures the thread's current impersonation token (or the fact that there is
/// none), optionally switches identity, and puts the captured state back on
/// [`ImpersonationScope::undo`], [`ImpersonationScope::undo_no_throw`],
/// [`ImpersonationScope::dispose`] or drop, whichever comes first. Restoration happens at
/// most once: a reverted scope ignores further undo calls.
///
/// A failed restoration is a security fault. The scope moves to
/// [`ScopeState::Faulted`] and never retries.
///
/// Scopes act on the calling thread and are not meant to be shared between threads.
///
/// # Examples
///
/// ```rust,no_run
/// use dotinterop::{HandleGuard, HandleKind, ImpersonationScope, Principal, SystemPlatform};
/// use std::sync::Arc;
///
/// let system = Arc::new(SystemPlatform::new());
/// let raw = system.issue_token(Principal::new("CONTOSO\\svc-web"));
/// let token = HandleGuard::acquire(system.clone(), raw, HandleKind::Token)?;
///
/// let scope = ImpersonationScope::impersonate(system.clone(), &token)?;
/// // ... serve the request as CONTOSO\svc-web ...
/// scope.dispose()?;
/// # Ok::<(), dotinterop::Error>(())
/// ```
#[derive(Debug)]
pub struct ImpersonationScope {
    platform: PlatformRef,
    snapshot: ImpersonationSnapshot,
    state: ScopeState,
}

impl ImpersonationScope {
    /// Captures the calling thread's current impersonation state.
    ///
    /// A thread that is not impersonating yields a scope without a token; undoing it
    /// leaves the thread not impersonating.
    ///
    /// # Errors
    /// Returns [`crate::Error::SecurityOperationFailed`] if the token cannot be read.
    pub fn capture(platform: PlatformRef) -> Result<Self> {
        let token = match platform.open_thread_token() {
            Ok(Some(raw)) => Some(HandleGuard::acquire(platform.clone(), raw, HandleKind::Token)?),
            Ok(None) => None,
            Err(error) => return Err(failure(SecurityOperation::CaptureToken, error)),
        };

        Self::from_captured(platform, token)
    }

    /// Creates a scope that restores `token` on exit.
    ///
    /// The token is duplicated; the scope owns the duplicate and the caller keeps `token`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidHandle`] if `token` is not valid, or
    /// [`crate::Error::SecurityOperationFailed`] if duplication fails.
    pub fn from_token(platform: PlatformRef, token: &HandleGuard) -> Result<Self> {
        let raw = token.dangerous_get_raw_value()?;
        let duplicate = HandleGuard::acquire_from(platform.clone(), HandleKind::Token, |p| {
            p.duplicate_handle(raw)
        })
        .map_err(|error| failure(SecurityOperation::DuplicateToken, error))?;

        Self::from_captured(platform, Some(duplicate))
    }

    /// Captures the current state, then makes the calling thread impersonate `token`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidHandle`] if `token` is not valid, or
    /// [`crate::Error::SecurityOperationFailed`] if capturing or impersonating fails. On
    /// failure the captured state is restored before returning.
    pub fn impersonate(platform: PlatformRef, token: &HandleGuard) -> Result<Self> {
        let raw = token.dangerous_get_raw_value()?;
        let principal = platform
            .token_principal(raw)
            .map_err(|error| failure(SecurityOperation::Impersonate, error))?;

        let scope = Self::capture(platform.clone())?;
        platform
            .impersonate_token(raw)
            .map_err(|error| failure(SecurityOperation::Impersonate, error))?;

        debug!("impersonating {}", principal);
        ambient::set_current(Some(principal));
        Ok(scope)
    }

    /// Captures the current state, then drops to the process identity.
    ///
    /// # Errors
    /// Returns [`crate::Error::SecurityOperationFailed`] if capturing or reverting fails.
    pub fn revert_to_self(platform: PlatformRef) -> Result<Self> {
        let scope = Self::capture(platform.clone())?;
        platform
            .revert_to_self()
            .map_err(|error| failure(SecurityOperation::RevertToSelf, error))?;

        ambient::set_current(None);
        Ok(scope)
    }

    fn from_captured(platform: PlatformRef, token: Option<HandleGuard>) -> Result<Self> {
        let principal = match &token {
            Some(token) => Some(
                platform
                    .token_principal(token.raw())
                    .map_err(|error| failure(SecurityOperation::CaptureToken, error))?,
            ),
            None => None,
        };

        Ok(ImpersonationScope {
            platform,
            snapshot: ImpersonationSnapshot {
                token,
                principal,
                frame: None,
            },
            state: ScopeState::Captured,
        })
    }

    /// Attaches the scope to a security frame until it is undone.
    pub fn attach_frame(&mut self, frame: Arc<SecurityFrame>) {
        frame.attach(self.snapshot.token.as_ref().map(HandleGuard::raw));
        if let Some(previous) = self.snapshot.frame.replace(frame) {
            previous.clear();
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ScopeState {
        self.state
    }

    /// The captured state this scope restores
    #[must_use]
    pub fn snapshot(&self) -> &ImpersonationSnapshot {
        &self.snapshot
    }

    /// The raw value of the captured token, if the thread was impersonating
    #[must_use]
    pub fn captured_token(&self) -> Option<NativeHandle> {
        self.snapshot.token.as_ref().map(HandleGuard::raw)
    }

    /// Restores the captured identity.
    ///
    /// Reverts the thread to itself, re-applies the captured token if there was one,
    /// republishes the captured principal and detaches the security frame. Calling it on
    /// a reverted scope does nothing.
    ///
    /// # Errors
    /// Returns [`crate::Error::SecurityOperationFailed`] if either platform step fails;
    /// the scope is then [`ScopeState::Faulted`]. On a faulted scope returns
    /// [`crate::Error::InvalidState`].
    pub fn undo(&mut self) -> Result<()> {
        match self.state {
            ScopeState::Reverted => return Ok(()),
            ScopeState::Faulted => {
                return Err(InvalidState(
                    "impersonation state is indeterminate after a failed undo",
                ))
            }
            ScopeState::Captured => {}
        }

        match self.restore() {
            Ok(()) => {
                debug!(
                    "restored identity {}",
                    self.snapshot
                        .principal
                        .as_ref()
                        .map_or("<process>", |principal| principal.name())
                );
                Ok(())
            }
            Err((operation, error)) => {
                error!(
                    "failed to restore identity during {}: {}",
                    operation, error
                );
                Err(failure(operation, error))
            }
        }
    }

    /// Restores the captured identity without constructing an error.
    ///
    /// Same effect as [`ImpersonationScope::undo`], for cleanup code that runs while
    /// another failure is propagating. Returns `false` if a platform step failed or the
    /// scope was already faulted.
    pub fn undo_no_throw(&mut self) -> bool {
        match self.state {
            ScopeState::Reverted => true,
            ScopeState::Faulted => false,
            ScopeState::Captured => self.restore().is_ok(),
        }
    }

    fn restore(&mut self) -> std::result::Result<(), (SecurityOperation, PlatformError)> {
        let outcome = self.restore_token();
        if outcome.is_err() {
            self.state = ScopeState::Faulted;
            return outcome;
        }

        ambient::set_current(self.snapshot.principal.clone());
        if let Some(frame) = self.snapshot.frame.take() {
            frame.clear();
        }

        self.state = ScopeState::Reverted;
        Ok(())
    }

    fn restore_token(&self) -> std::result::Result<(), (SecurityOperation, PlatformError)> {
        self.platform
            .revert_to_self()
            .map_err(|error| (SecurityOperation::RevertToSelf, error))?;

        if let Some(token) = &self.snapshot.token {
            self.platform
                .impersonate_token(token.raw())
                .map_err(|error| (SecurityOperation::Impersonate, error))?;
        }

        Ok(())
    }

    /// Ends the scope: undoes it if still captured, then releases the captured token.
    ///
    /// # Errors
    /// Returns the error of [`ImpersonationScope::undo`]. The token is released either way.
    pub fn dispose(mut self) -> Result<()> {
        let result = match self.state {
            ScopeState::Captured => self.undo(),
            ScopeState::Reverted | ScopeState::Faulted => Ok(()),
        };

        if let Some(token) = self.snapshot.token.take() {
            if let Err(error) = token.release() {
                warn!("failed to release captured token: {}", error);
            }
        }

        result
    }
}

impl Drop for ImpersonationScope {
    fn drop(&mut self) {
        match self.state {
            ScopeState::Captured => {
                if !self.undo_no_throw() {
                    error!("failed to restore identity while dropping impersonation scope");
                }
            }
            ScopeState::Faulted => {
                error!("dropping impersonation scope with indeterminate identity");
            }
            ScopeState::Reverted => {}
        }
    }
}

fn failure(operation: SecurityOperation, error: PlatformError) -> crate::Error {
    SecurityOperationFailed {
        operation,
        code: error.code(),
    }
}
