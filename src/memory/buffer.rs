use crate::{
    handle::{HandleGuard, HandleKind, NativeHandle},
    platform::PlatformRef,
    Result,
};

/// A zeroed block of platform-allocated memory, freed exactly once.
#[derive(Debug)]
pub struct NativeBuffer {
    block: HandleGuard,
    len: usize,
}

impl NativeBuffer {
    /// Allocates `len` zeroed bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Platform`] if the allocation fails.
    pub fn new(platform: PlatformRef, len: usize) -> Result<Self> {
        let block = HandleGuard::acquire_from(platform, HandleKind::Memory, |p| p.allocate_memory(len))?;
        Ok(NativeBuffer { block, len })
    }

    /// Length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for a zero-length buffer
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of the block, for handing to deeper platform calls.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidHandle`] after the buffer was freed.
    pub fn raw_value(&self) -> Result<NativeHandle> {
        self.block.dangerous_get_raw_value()
    }

    /// The buffer contents.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidHandle`] after the buffer was freed.
    pub fn as_slice(&self) -> Result<&[u8]> {
        let base = self.raw_value()?;
        // SAFETY: the block holds `len` initialised bytes and cannot be freed while `self`
        // is borrowed.
        Ok(unsafe { std::slice::from_raw_parts(base.as_ptr::<u8>(), self.len) })
    }

    /// The buffer contents, writable.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidHandle`] after the buffer was freed.
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        let base = self.raw_value()?;
        // SAFETY: as for `as_slice`; `&mut self` makes this the only borrow of the block.
        Ok(unsafe { std::slice::from_raw_parts_mut(base.value() as *mut u8, self.len) })
    }

    /// Frees the block. Later calls do nothing.
    ///
    /// # Errors
    /// Returns [`crate::Error::Platform`] if the platform fails to free the block; the
    /// buffer stays usable in that case.
    pub fn free(&mut self) -> Result<()> {
        self.block.release()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        platform::{codes, Instrumented, Primitive, SystemPlatform},
        Error,
    };

    #[test]
    fn write_read_free() {
        let platform = Arc::new(Instrumented::new(SystemPlatform::new()));
        let mut buffer = NativeBuffer::new(platform.clone(), 8).unwrap();
        assert_eq!(buffer.as_slice().unwrap(), &[0u8; 8]);

        buffer.as_mut_slice().unwrap()[..4].copy_from_slice(b"MEOW");
        assert_eq!(&buffer.as_slice().unwrap()[..4], b"MEOW");

        buffer.free().unwrap();
        buffer.free().unwrap();
        assert!(matches!(buffer.as_slice(), Err(Error::InvalidHandle)));
        drop(buffer);
        assert_eq!(platform.calls(Primitive::FreeMemory), 1);
    }

    #[test]
    fn allocation_failure_surfaces_code() {
        let platform = Arc::new(Instrumented::new(SystemPlatform::new()));
        platform.fail_next(Primitive::AllocateMemory, codes::ERROR_NOT_ENOUGH_MEMORY);

        let result = NativeBuffer::new(platform, 1 << 20);
        assert!(matches!(
            result,
            Err(Error::Platform { code: codes::ERROR_NOT_ENOUGH_MEMORY })
        ));
    }
}
