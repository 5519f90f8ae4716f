use std::{
    fmt,
    path::Path,
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use strum::{Display, EnumCount, EnumIter};

use crate::{
    handle::NativeHandle,
    interop::{Clsid, Iid, Marshal, MarshalRequest, ObjectId, ObjectRef, Stream},
    platform::{codes, Platform, PlatformError, PlatformResult},
    security::Principal,
    Result,
};

/// A platform primitive, as counted and faulted by [`Instrumented`].
///
/// The marshaler operations are reported for marshalers handed out by
/// [`Platform::standard_marshaler`]; `ReleaseMarshaler` is reported when such a
/// marshaler is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount)]
#[repr(usize)]
pub enum Primitive {
    /// Opening a file for reading
    OpenFileForRead,
    /// Querying a file size
    GetFileSize,
    /// Creating a read-only mapping object
    CreateReadOnlyMapping,
    /// Mapping a view
    MapView,
    /// Unmapping a view
    UnmapView,
    /// Allocating a memory block
    AllocateMemory,
    /// Freeing a memory block
    FreeMemory,
    /// Closing a kernel object handle
    CloseHandle,
    /// Duplicating a kernel object handle
    DuplicateHandle,
    /// Opening the calling thread's token
    OpenThreadToken,
    /// Dropping the calling thread's impersonation
    RevertToSelf,
    /// Impersonating a token
    ImpersonateToken,
    /// Resolving a token's principal
    TokenPrincipal,
    /// Reading the last error code
    GetLastErrorCode,
    /// Obtaining a standard marshaler
    GetStandardMarshaler,
    /// Releasing a standard marshaler
    ReleaseMarshaler,
    /// Computing the maximum marshal size
    ComputeMarshalSize,
    /// Writing a marshal packet
    MarshalInterface,
    /// Reading a marshal packet
    UnmarshalInterface,
    /// Releasing marshal data
    ReleaseMarshalData,
    /// Disconnecting remote references
    DisconnectObject,
}

/// One journaled primitive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// The primitive that was called
    pub primitive: Primitive,
    /// The handle the call operated on, if any
    pub handle: Option<NativeHandle>,
    /// The error code the call failed with, if it failed
    pub error: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Once(u32),
    Always(u32),
}

struct Tracker {
    counters: [AtomicUsize; Primitive::COUNT],
    journal: boxcar::Vec<CallRecord>,
    faults: DashMap<Primitive, Fault>,
    last_error: AtomicU32,
}

impl Tracker {
    fn new() -> Self {
        Tracker {
            counters: std::array::from_fn(|_| AtomicUsize::new(0)),
            journal: boxcar::Vec::new(),
            faults: DashMap::new(),
            last_error: AtomicU32::new(codes::ERROR_SUCCESS),
        }
    }

    fn injected(&self, primitive: Primitive) -> Option<u32> {
        let fault = *self.faults.get(&primitive)?;
        match fault {
            Fault::Once(code) => {
                self.faults.remove(&primitive);
                Some(code)
            }
            Fault::Always(code) => Some(code),
        }
    }

    /// Counts the call, applies any injected fault, otherwise forwards to `call`.
    fn invoke<T>(
        &self,
        primitive: Primitive,
        handle: Option<NativeHandle>,
        call: impl FnOnce() -> PlatformResult<T>,
    ) -> PlatformResult<T> {
        self.counters[primitive as usize].fetch_add(1, Ordering::Relaxed);

        let result = match self.injected(primitive) {
            Some(code) => Err(PlatformError::new(code)),
            None => call(),
        };

        let error = result.as_ref().err().map(|error| error.code());
        if let Some(code) = error {
            self.last_error.store(code, Ordering::Relaxed);
        }

        self.journal.push(CallRecord {
            primitive,
            handle,
            error,
        });
        result
    }

    /// Same as [`Tracker::invoke`] for marshaler operations, which report crate errors.
    fn invoke_marshal<T>(&self, primitive: Primitive, call: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut inner = None;
        let outcome = self.invoke(primitive, None, || match call() {
            Ok(value) => {
                inner = Some(Ok(value));
                Ok(())
            }
            Err(error) => {
                let code = error.platform_code().unwrap_or(codes::E_UNEXPECTED);
                inner = Some(Err(error));
                Err(PlatformError::new(code))
            }
        });

        match (outcome, inner) {
            (_, Some(result)) => result,
            (Err(error), None) => Err(error.into()),
            (Ok(()), None) => Err(crate::Error::Platform {
                code: codes::E_UNEXPECTED,
            }),
        }
    }
}

/// A platform wrapper that counts, journals and fails primitives on demand.
///
/// `Instrumented` forwards every call to the wrapped platform unless a fault was
/// injected for that primitive, in which case the call fails with the injected code
/// without reaching the inner platform. It makes the release-once, restore-on-exit
/// and release-on-all-paths guarantees observable.
///
/// # Examples
///
/// ```rust
/// use dotinterop::{HandleGuard, HandleKind, Instrumented, Primitive, Principal, SystemPlatform};
/// use std::sync::Arc;
///
/// let platform = Arc::new(Instrumented::new(SystemPlatform::new()));
/// let raw = platform.inner().issue_token(Principal::new("CONTOSO\\alice"));
/// let guard = HandleGuard::acquire(platform.clone(), raw, HandleKind::Token)?;
///
/// guard.release()?;
/// guard.release()?;
/// assert_eq!(platform.calls(Primitive::CloseHandle), 1);
/// # Ok::<(), dotinterop::Error>(())
/// ```
pub struct Instrumented<P> {
    inner: P,
    tracker: Arc<Tracker>,
}

impl<P: Platform> Instrumented<P> {
    /// Wraps `inner` with all counters at zero and no faults.
    pub fn new(inner: P) -> Self {
        Instrumented {
            inner,
            tracker: Arc::new(Tracker::new()),
        }
    }

    /// The wrapped platform
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Number of times `primitive` was called, including faulted calls.
    pub fn calls(&self, primitive: Primitive) -> usize {
        self.tracker.counters[primitive as usize].load(Ordering::Relaxed)
    }

    /// Number of calls across all primitives.
    pub fn total_calls(&self) -> usize {
        self.tracker
            .counters
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .sum()
    }

    /// Every call made so far, in order.
    pub fn journal(&self) -> Vec<CallRecord> {
        self.tracker.journal.iter().map(|(_, record)| record.clone()).collect()
    }

    /// Fails the next call of `primitive` with `code`.
    pub fn fail_next(&self, primitive: Primitive, code: u32) {
        self.tracker.faults.insert(primitive, Fault::Once(code));
    }

    /// Fails every call of `primitive` with `code` until [`Instrumented::clear_faults`].
    pub fn fail_always(&self, primitive: Primitive, code: u32) {
        self.tracker.faults.insert(primitive, Fault::Always(code));
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        self.tracker.faults.clear();
    }
}

impl<P> fmt::Debug for Instrumented<P>
where
    P: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumented")
            .field("inner", &self.inner)
            .field("faults", &self.tracker.faults.len())
            .field("calls", &self.tracker.journal.count())
            .finish()
    }
}

impl<P: Platform> Platform for Instrumented<P> {
    fn open_file_for_read(&self, path: &Path) -> PlatformResult<NativeHandle> {
        self.tracker
            .invoke(Primitive::OpenFileForRead, None, || self.inner.open_file_for_read(path))
    }

    fn file_size(&self, file: NativeHandle) -> PlatformResult<u64> {
        self.tracker
            .invoke(Primitive::GetFileSize, Some(file), || self.inner.file_size(file))
    }

    fn create_read_only_mapping(
        &self,
        file: NativeHandle,
        name: Option<&str>,
    ) -> PlatformResult<NativeHandle> {
        self.tracker
            .invoke(Primitive::CreateReadOnlyMapping, Some(file), || {
                self.inner.create_read_only_mapping(file, name)
            })
    }

    fn map_view(&self, mapping: NativeHandle, len: usize) -> PlatformResult<NativeHandle> {
        self.tracker
            .invoke(Primitive::MapView, Some(mapping), || self.inner.map_view(mapping, len))
    }

    fn unmap_view(&self, view: NativeHandle) -> PlatformResult<()> {
        self.tracker
            .invoke(Primitive::UnmapView, Some(view), || self.inner.unmap_view(view))
    }

    fn allocate_memory(&self, len: usize) -> PlatformResult<NativeHandle> {
        self.tracker
            .invoke(Primitive::AllocateMemory, None, || self.inner.allocate_memory(len))
    }

    fn free_memory(&self, block: NativeHandle) -> PlatformResult<()> {
        self.tracker
            .invoke(Primitive::FreeMemory, Some(block), || self.inner.free_memory(block))
    }

    fn close_handle(&self, handle: NativeHandle) -> PlatformResult<()> {
        self.tracker
            .invoke(Primitive::CloseHandle, Some(handle), || self.inner.close_handle(handle))
    }

    fn duplicate_handle(&self, handle: NativeHandle) -> PlatformResult<NativeHandle> {
        self.tracker.invoke(Primitive::DuplicateHandle, Some(handle), || {
            self.inner.duplicate_handle(handle)
        })
    }

    fn open_thread_token(&self) -> PlatformResult<Option<NativeHandle>> {
        self.tracker
            .invoke(Primitive::OpenThreadToken, None, || self.inner.open_thread_token())
    }

    fn revert_to_self(&self) -> PlatformResult<()> {
        self.tracker
            .invoke(Primitive::RevertToSelf, None, || self.inner.revert_to_self())
    }

    fn impersonate_token(&self, token: NativeHandle) -> PlatformResult<()> {
        self.tracker.invoke(Primitive::ImpersonateToken, Some(token), || {
            self.inner.impersonate_token(token)
        })
    }

    fn token_principal(&self, token: NativeHandle) -> PlatformResult<Arc<Principal>> {
        self.tracker
            .invoke(Primitive::TokenPrincipal, Some(token), || self.inner.token_principal(token))
    }

    fn last_error_code(&self) -> u32 {
        self.tracker.counters[Primitive::GetLastErrorCode as usize].fetch_add(1, Ordering::Relaxed);
        match self.tracker.last_error.load(Ordering::Relaxed) {
            codes::ERROR_SUCCESS => self.inner.last_error_code(),
            code => code,
        }
    }

    fn standard_marshaler(
        &self,
        object: ObjectId,
        request: &MarshalRequest,
    ) -> PlatformResult<Box<dyn Marshal>> {
        let inner = self.tracker.invoke(Primitive::GetStandardMarshaler, None, || {
            self.inner.standard_marshaler(object, request)
        })?;

        Ok(Box::new(TrackedMarshaler {
            inner,
            tracker: self.tracker.clone(),
        }))
    }
}

/// A marshaler handed out by [`Instrumented`]; reports its operations and its release.
struct TrackedMarshaler {
    inner: Box<dyn Marshal>,
    tracker: Arc<Tracker>,
}

impl Marshal for TrackedMarshaler {
    fn unmarshal_class(&self, request: &MarshalRequest) -> Result<Clsid> {
        self.inner.unmarshal_class(request)
    }

    fn marshal_size_max(&self, request: &MarshalRequest) -> Result<u32> {
        self.tracker
            .invoke_marshal(Primitive::ComputeMarshalSize, || self.inner.marshal_size_max(request))
    }

    fn marshal_interface(&self, stream: &mut dyn Stream, request: &MarshalRequest) -> Result<()> {
        self.tracker.invoke_marshal(Primitive::MarshalInterface, || {
            self.inner.marshal_interface(stream, request)
        })
    }

    fn unmarshal_interface(&self, stream: &mut dyn Stream, iid: &Iid) -> Result<ObjectRef> {
        self.tracker.invoke_marshal(Primitive::UnmarshalInterface, || {
            self.inner.unmarshal_interface(stream, iid)
        })
    }

    fn release_marshal_data(&self, stream: &mut dyn Stream) -> Result<()> {
        self.tracker.invoke_marshal(Primitive::ReleaseMarshalData, || {
            self.inner.release_marshal_data(stream)
        })
    }

    fn disconnect_object(&self, reserved: u32) -> Result<()> {
        self.tracker.invoke_marshal(Primitive::DisconnectObject, || {
            self.inner.disconnect_object(reserved)
        })
    }
}

impl Drop for TrackedMarshaler {
    fn drop(&mut self) {
        let _ = self
            .tracker
            .invoke(Primitive::ReleaseMarshaler, None, || Ok(()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SystemPlatform;
    use strum::IntoEnumIterator;

    #[test]
    fn counts_every_primitive_separately() {
        let platform = Instrumented::new(SystemPlatform::new());
        let token = platform.inner().issue_token(Principal::new("CONTOSO\\alice"));

        platform.token_principal(token).unwrap();
        platform.token_principal(token).unwrap();
        platform.close_handle(token).unwrap();

        assert_eq!(platform.calls(Primitive::TokenPrincipal), 2);
        assert_eq!(platform.calls(Primitive::CloseHandle), 1);
        assert_eq!(platform.total_calls(), 3);
        assert_eq!(Primitive::iter().count(), Primitive::COUNT);
    }

    #[test]
    fn fail_next_fires_once_and_skips_inner() {
        let platform = Instrumented::new(SystemPlatform::new());
        let token = platform.inner().issue_token(Principal::new("CONTOSO\\alice"));

        platform.fail_next(Primitive::CloseHandle, codes::ERROR_ACCESS_DENIED);
        assert_eq!(
            platform.close_handle(token).unwrap_err().code(),
            codes::ERROR_ACCESS_DENIED
        );
        assert_eq!(platform.inner().live_handles(), 1);
        assert_eq!(platform.last_error_code(), codes::ERROR_ACCESS_DENIED);

        platform.close_handle(token).unwrap();
        assert_eq!(platform.inner().live_handles(), 0);
    }

    #[test]
    fn fail_always_until_cleared() {
        let platform = Instrumented::new(SystemPlatform::new());
        platform.fail_always(Primitive::AllocateMemory, codes::ERROR_NOT_ENOUGH_MEMORY);

        for _ in 0..3 {
            assert!(platform.allocate_memory(8).is_err());
        }

        platform.clear_faults();
        let block = platform.allocate_memory(8).unwrap();
        platform.free_memory(block).unwrap();
        assert_eq!(platform.calls(Primitive::AllocateMemory), 4);
    }

    #[test]
    fn journal_records_handles_and_errors() {
        let platform = Instrumented::new(SystemPlatform::new());
        let bogus = NativeHandle::new(0x4242);
        assert!(platform.close_handle(bogus).is_err());

        let journal = platform.journal();
        assert_eq!(
            journal,
            vec![CallRecord {
                primitive: Primitive::CloseHandle,
                handle: Some(bogus),
                error: Some(codes::ERROR_INVALID_HANDLE),
            }]
        );
    }
}
