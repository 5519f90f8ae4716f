use std::{
    cell::{Cell, RefCell},
    fs,
    path::Path,
    ptr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock,
    },
};

use dashmap::DashMap;
use log::debug;
use memmap2::{Mmap, MmapOptions};

use crate::{
    handle::NativeHandle,
    interop::{Marshal, MarshalRequest, ObjectId, StandardMarshaler},
    platform::{codes, Platform, PlatformError, PlatformRef, PlatformResult},
    security::Principal,
};

thread_local! {
    static THREAD_TOKEN: RefCell<Option<Arc<Principal>>> = const { RefCell::new(None) };
    static LAST_ERROR: Cell<u32> = const { Cell::new(codes::ERROR_SUCCESS) };
}

const FIRST_HANDLE: usize = 0x100;
const HANDLE_STEP: usize = 4;

static SHARED: OnceLock<Arc<SystemPlatform>> = OnceLock::new();

/// A zeroed heap block handed out by [`SystemPlatform::allocate_memory`].
struct Block {
    addr: usize,
    len: usize,
}

impl Block {
    fn allocate(len: usize) -> Self {
        let boxed = vec![0u8; len].into_boxed_slice();
        let addr = Box::into_raw(boxed).cast::<u8>() as usize;
        Block { addr, len }
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // SAFETY: addr/len came from Box::into_raw of a boxed slice of exactly len bytes
        // and the block is dropped once, when its table entry is removed.
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.addr as *mut u8,
                self.len,
            )));
        }
    }
}

enum Resource {
    File(fs::File),
    Mapping { file: fs::File, len: u64 },
    View(Mmap),
    Memory(Block),
    Token(Arc<Principal>),
}

impl Resource {
    fn is_kernel_object(&self) -> bool {
        matches!(
            self,
            Resource::File(_) | Resource::Mapping { .. } | Resource::Token(_)
        )
    }

    fn duplicate(&self) -> PlatformResult<Resource> {
        match self {
            Resource::File(file) => Ok(Resource::File(file.try_clone().map_err(io_failure)?)),
            Resource::Mapping { file, len } => Ok(Resource::Mapping {
                file: file.try_clone().map_err(io_failure)?,
                len: *len,
            }),
            Resource::Token(principal) => Ok(Resource::Token(principal.clone())),
            Resource::View(_) | Resource::Memory(_) => fail(codes::ERROR_INVALID_HANDLE),
        }
    }
}

/// The host platform.
///
/// Files are opened with `std::fs` and views are real `memmap2` mappings, so the
/// mapping sequence behaves exactly as it does for a native caller: a view stays
/// readable after its file and mapping handles are closed.
///
/// Every live resource is tracked in a concurrent handle table. Kernel objects
/// receive values from a counter; views and memory blocks are keyed by their base
/// address, which is also the value handed back to the caller.
///
/// Security tokens are issued with [`SystemPlatform::issue_token`]. The identity a
/// thread runs as lives in a per-thread slot that [`Platform::impersonate_token`] and
/// [`Platform::revert_to_self`] update, mirroring a thread token.
#[derive(Debug)]
pub struct SystemPlatform {
    table: DashMap<usize, Resource>,
    next_handle: AtomicUsize,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::File(_) => write!(f, "File"),
            Resource::Mapping { len, .. } => write!(f, "Mapping({len})"),
            Resource::View(view) => write!(f, "View({})", view.len()),
            Resource::Memory(block) => write!(f, "Memory({})", block.len),
            Resource::Token(principal) => write!(f, "Token({principal})"),
        }
    }
}

impl Default for SystemPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemPlatform {
    /// Creates a platform with an empty handle table.
    #[must_use]
    pub fn new() -> Self {
        SystemPlatform {
            table: DashMap::new(),
            next_handle: AtomicUsize::new(FIRST_HANDLE),
        }
    }

    /// Returns the process-wide platform instance.
    #[must_use]
    pub fn shared() -> PlatformRef {
        SHARED.get_or_init(|| Arc::new(SystemPlatform::new())).clone()
    }

    /// Issues a new token handle for `principal`, owned by the caller.
    pub fn issue_token(&self, principal: Principal) -> NativeHandle {
        self.insert(Resource::Token(Arc::new(principal)))
    }

    /// The principal the calling thread is impersonating, if any.
    #[must_use]
    pub fn thread_principal(&self) -> Option<Arc<Principal>> {
        THREAD_TOKEN.with(|slot| slot.borrow().clone())
    }

    /// Number of handles, views and memory blocks that have not been released.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.table.len()
    }

    fn insert(&self, resource: Resource) -> NativeHandle {
        let key = match &resource {
            Resource::View(view) => view.as_ptr() as usize,
            Resource::Memory(block) => block.addr,
            _ => self.next_handle.fetch_add(HANDLE_STEP, Ordering::Relaxed),
        };

        self.table.insert(key, resource);
        NativeHandle::new(key)
    }

    fn remove_where<F>(&self, handle: NativeHandle, matches: F) -> PlatformResult<Resource>
    where
        F: Fn(&Resource) -> bool,
    {
        match self
            .table
            .remove_if(&handle.value(), |_, resource| matches(resource))
        {
            Some((_, resource)) => Ok(resource),
            None => fail(codes::ERROR_INVALID_HANDLE),
        }
    }

    fn open_file(&self, handle: NativeHandle) -> PlatformResult<fs::File> {
        let entry = match self.table.get(&handle.value()) {
            Some(entry) => entry,
            None => return fail(codes::ERROR_INVALID_HANDLE),
        };

        match entry.value() {
            Resource::File(file) => file.try_clone().map_err(io_failure),
            _ => fail(codes::ERROR_INVALID_HANDLE),
        }
    }
}

impl Platform for SystemPlatform {
    fn open_file_for_read(&self, path: &Path) -> PlatformResult<NativeHandle> {
        let file = fs::File::open(path).map_err(io_failure)?;
        Ok(self.insert(Resource::File(file)))
    }

    fn file_size(&self, file: NativeHandle) -> PlatformResult<u64> {
        let entry = match self.table.get(&file.value()) {
            Some(entry) => entry,
            None => return fail(codes::ERROR_INVALID_HANDLE),
        };

        match entry.value() {
            Resource::File(file) => Ok(file.metadata().map_err(io_failure)?.len()),
            _ => fail(codes::ERROR_INVALID_HANDLE),
        }
    }

    fn create_read_only_mapping(
        &self,
        file: NativeHandle,
        name: Option<&str>,
    ) -> PlatformResult<NativeHandle> {
        let file = self.open_file(file)?;
        let len = file.metadata().map_err(io_failure)?.len();
        if len == 0 {
            return fail(codes::ERROR_FILE_INVALID);
        }

        let mapping = self.insert(Resource::Mapping { file, len });
        debug!(
            "created mapping {} over {} bytes ({})",
            mapping,
            len,
            name.unwrap_or("unnamed")
        );
        Ok(mapping)
    }

    fn map_view(&self, mapping: NativeHandle, len: usize) -> PlatformResult<NativeHandle> {
        let file = {
            let entry = match self.table.get(&mapping.value()) {
                Some(entry) => entry,
                None => return fail(codes::ERROR_INVALID_HANDLE),
            };

            match entry.value() {
                Resource::Mapping { file, len: mapped } => {
                    if len == 0 || len as u64 > *mapped {
                        return fail(codes::ERROR_INVALID_PARAMETER);
                    }
                    file.try_clone().map_err(io_failure)?
                }
                _ => return fail(codes::ERROR_INVALID_HANDLE),
            }
        };

        // SAFETY: the view is read-only; callers accept that concurrent truncation of
        // the backing file by another process is undefined, as with any mapped file.
        let view = unsafe { MmapOptions::new().len(len).map(&file) }.map_err(io_failure)?;
        Ok(self.insert(Resource::View(view)))
    }

    fn unmap_view(&self, view: NativeHandle) -> PlatformResult<()> {
        self.remove_where(view, |resource| matches!(resource, Resource::View(_)))
            .map(drop)
    }

    fn allocate_memory(&self, len: usize) -> PlatformResult<NativeHandle> {
        if len == 0 {
            return fail(codes::ERROR_INVALID_PARAMETER);
        }

        Ok(self.insert(Resource::Memory(Block::allocate(len))))
    }

    fn free_memory(&self, block: NativeHandle) -> PlatformResult<()> {
        self.remove_where(block, |resource| matches!(resource, Resource::Memory(_)))
            .map(drop)
    }

    fn close_handle(&self, handle: NativeHandle) -> PlatformResult<()> {
        self.remove_where(handle, Resource::is_kernel_object)
            .map(drop)
    }

    fn duplicate_handle(&self, handle: NativeHandle) -> PlatformResult<NativeHandle> {
        let duplicate = match self.table.get(&handle.value()) {
            Some(entry) => entry.value().duplicate()?,
            None => return fail(codes::ERROR_INVALID_HANDLE),
        };

        Ok(self.insert(duplicate))
    }

    fn open_thread_token(&self) -> PlatformResult<Option<NativeHandle>> {
        Ok(self
            .thread_principal()
            .map(|principal| self.insert(Resource::Token(principal))))
    }

    fn revert_to_self(&self) -> PlatformResult<()> {
        THREAD_TOKEN.with(|slot| slot.replace(None));
        Ok(())
    }

    fn impersonate_token(&self, token: NativeHandle) -> PlatformResult<()> {
        let principal = self.token_principal(token)?;
        THREAD_TOKEN.with(|slot| slot.replace(Some(principal)));
        Ok(())
    }

    fn token_principal(&self, token: NativeHandle) -> PlatformResult<Arc<Principal>> {
        match self.table.get(&token.value()) {
            Some(entry) => match entry.value() {
                Resource::Token(principal) => Ok(principal.clone()),
                _ => fail(codes::ERROR_INVALID_HANDLE),
            },
            None => fail(codes::ERROR_INVALID_HANDLE),
        }
    }

    fn last_error_code(&self) -> u32 {
        LAST_ERROR.with(Cell::get)
    }

    fn standard_marshaler(
        &self,
        object: ObjectId,
        request: &MarshalRequest,
    ) -> PlatformResult<Box<dyn Marshal>> {
        Ok(Box::new(StandardMarshaler::new(object, *request)))
    }
}

fn fail<T>(code: u32) -> PlatformResult<T> {
    LAST_ERROR.with(|last| last.set(code));
    Err(PlatformError::new(code))
}

fn io_failure(error: std::io::Error) -> PlatformError {
    let code = codes::from_io_error(&error);
    LAST_ERROR.with(|last| last.set(code));
    PlatformError::new(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TempFile;

    #[test]
    fn view_outlives_file_and_mapping() {
        let file = TempFile::with_contents(b"culture data");
        let platform = SystemPlatform::new();

        let handle = platform.open_file_for_read(file.path()).unwrap();
        assert_eq!(platform.file_size(handle).unwrap(), 12);
        let mapping = platform.create_read_only_mapping(handle, None).unwrap();
        let view = platform.map_view(mapping, 12).unwrap();

        platform.close_handle(handle).unwrap();
        platform.close_handle(mapping).unwrap();

        // SAFETY: the view is 12 bytes long and still mapped
        let bytes = unsafe { std::slice::from_raw_parts(view.as_ptr::<u8>(), 12) };
        assert_eq!(bytes, b"culture data");

        platform.unmap_view(view).unwrap();
        assert_eq!(platform.live_handles(), 0);
    }

    #[test]
    fn missing_file_sets_last_error() {
        let platform = SystemPlatform::new();
        let result = platform.open_file_for_read(Path::new("/nonexistent/dotinterop/file.nlp"));
        assert_eq!(result.unwrap_err().code(), codes::ERROR_FILE_NOT_FOUND);
        assert_eq!(platform.last_error_code(), codes::ERROR_FILE_NOT_FOUND);
    }

    #[test]
    fn empty_file_cannot_be_mapped() {
        let file = TempFile::with_contents(b"");
        let platform = SystemPlatform::new();
        let handle = platform.open_file_for_read(file.path()).unwrap();

        let result = platform.create_read_only_mapping(handle, Some("Local\\empty"));
        assert_eq!(result.unwrap_err().code(), codes::ERROR_FILE_INVALID);
        platform.close_handle(handle).unwrap();
    }

    #[test]
    fn release_primitive_must_match_kind() {
        let platform = SystemPlatform::new();
        let block = platform.allocate_memory(16).unwrap();

        assert_eq!(
            platform.close_handle(block).unwrap_err().code(),
            codes::ERROR_INVALID_HANDLE
        );
        assert_eq!(
            platform.unmap_view(block).unwrap_err().code(),
            codes::ERROR_INVALID_HANDLE
        );
        platform.free_memory(block).unwrap();
        assert_eq!(
            platform.free_memory(block).unwrap_err().code(),
            codes::ERROR_INVALID_HANDLE
        );
    }

    #[test]
    fn allocated_memory_is_zeroed() {
        let platform = SystemPlatform::new();
        assert!(platform.allocate_memory(0).is_err());

        let block = platform.allocate_memory(64).unwrap();
        // SAFETY: the block is 64 bytes long and still allocated
        let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr::<u8>(), 64) };
        assert!(bytes.iter().all(|b| *b == 0));
        platform.free_memory(block).unwrap();
    }

    #[test]
    fn thread_token_follows_impersonation() {
        let platform = SystemPlatform::new();
        assert!(platform.open_thread_token().unwrap().is_none());

        let token = platform.issue_token(Principal::new("CONTOSO\\alice"));
        platform.impersonate_token(token).unwrap();

        let opened = platform.open_thread_token().unwrap().unwrap();
        assert_ne!(opened, token);
        assert_eq!(platform.token_principal(opened).unwrap().name(), "CONTOSO\\alice");

        let other_thread = std::thread::scope(|scope| {
            scope
                .spawn(|| platform.open_thread_token().unwrap())
                .join()
                .unwrap()
        });
        assert!(other_thread.is_none());

        platform.revert_to_self().unwrap();
        assert!(platform.thread_principal().is_none());
        platform.close_handle(opened).unwrap();
        platform.close_handle(token).unwrap();
    }

    #[test]
    fn duplicate_shares_principal() {
        let platform = SystemPlatform::new();
        let token = platform.issue_token(Principal::new("CONTOSO\\bob"));
        let copy = platform.duplicate_handle(token).unwrap();

        platform.close_handle(token).unwrap();
        assert_eq!(platform.token_principal(copy).unwrap().name(), "CONTOSO\\bob");
        assert!(platform.token_principal(token).is_err());
        platform.close_handle(copy).unwrap();
    }
}
