use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::{
    config::InteropConfig,
    error::MappingStage,
    handle::{HandleGuard, HandleKind},
    io::Parser,
    platform::PlatformRef,
    Error::{InvalidState, MappingFailed, ResourceUnavailable},
    Result,
};

/// A read-only view of a whole file, mapped into the address space.
///
/// Opening a region runs the full mapping sequence: open the file, query its size,
/// create a read-only mapping object, map a view of all of it, then close the file and
/// mapping handles. Only the view survives; it is released by
/// [`MappedMemoryRegion::release`] or when the region is dropped.
///
/// An empty file yields an empty region without creating a mapping. Its
/// [`MappedMemoryRegion::raw_pointer`] fails with [`crate::Error::InvalidState`].
///
/// # Examples
///
/// ```rust,no_run
/// use dotinterop::{MappedMemoryRegion, SystemPlatform};
///
/// let region = MappedMemoryRegion::open(SystemPlatform::shared(), "sortkeys.nlp")?;
/// let mut parser = region.parser()?;
/// while parser.remaining() >= 8 {
///     let record = parser.read_record::<8>()?;
///     println!("{:02X?}", record);
/// }
/// # Ok::<(), dotinterop::Error>(())
/// ```
#[derive(Debug)]
pub struct MappedMemoryRegion {
    view: Option<HandleGuard>,
    size: u64,
    name: Option<String>,
}

impl MappedMemoryRegion {
    /// Maps the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::ResourceUnavailable`] if the file cannot be opened or
    /// queried, or [`crate::Error::MappingFailed`] if creating the mapping or the view fails.
    pub fn open(platform: PlatformRef, path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(platform, path, None, &InteropConfig::default())
    }

    /// Maps the file at `path` through a named mapping object.
    ///
    /// The name is qualified with [`InteropConfig::mapping_name_prefix`] unless it already
    /// names a namespace.
    ///
    /// # Errors
    /// Same as [`MappedMemoryRegion::open`].
    pub fn open_named(platform: PlatformRef, path: impl AsRef<Path>, name: &str) -> Result<Self> {
        Self::open_with(platform, path, Some(name), &InteropConfig::default())
    }

    /// Maps the file at `path`, honouring `config`.
    ///
    /// # Errors
    /// Same as [`MappedMemoryRegion::open`].
    pub fn open_with(
        platform: PlatformRef,
        path: impl AsRef<Path>,
        name: Option<&str>,
        config: &InteropConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = HandleGuard::acquire_from(platform.clone(), HandleKind::File, |p| {
            p.open_file_for_read(path)
        })
        .map_err(|error| ResourceUnavailable {
            path: path.to_path_buf(),
            code: error.code(),
        })?;

        let name = name.map(|name| config.qualified_mapping_name(name));
        let region = Self::map_open_file(&platform, &file, name, path)?;

        if !file.release_no_throw() && config.log_release_failures {
            warn!("failed to close {} after mapping", path.display());
        }
        Ok(region)
    }

    /// Maps a file that is already open.
    ///
    /// The caller keeps ownership of `file`; the region only owns the view.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidHandle`] if `file` was released, otherwise the
    /// errors of [`MappedMemoryRegion::open`].
    pub fn from_file_handle(platform: PlatformRef, file: &HandleGuard) -> Result<Self> {
        let raw = file.dangerous_get_raw_value()?;
        let origin = PathBuf::from(format!("<{} handle {}>", file.kind(), raw));
        Self::map_open_file(&platform, file, None, &origin)
    }

    fn map_open_file(
        platform: &PlatformRef,
        file: &HandleGuard,
        name: Option<String>,
        path: &Path,
    ) -> Result<Self> {
        let raw = file.dangerous_get_raw_value()?;
        let size = platform
            .file_size(raw)
            .map_err(|error| ResourceUnavailable {
                path: path.to_path_buf(),
                code: error.code(),
            })?;

        if size == 0 {
            debug!("{} is empty, nothing to map", path.display());
            return Ok(MappedMemoryRegion {
                view: None,
                size,
                name,
            });
        }

        let len = usize::try_from(size).map_err(|_| MappingFailed {
            stage: MappingStage::MapView,
            code: crate::platform::codes::ERROR_NOT_ENOUGH_MEMORY,
        })?;

        let mapping = HandleGuard::acquire_from(platform.clone(), HandleKind::Mapping, |p| {
            p.create_read_only_mapping(raw, name.as_deref())
        })
        .map_err(|error| MappingFailed {
            stage: MappingStage::CreateMapping,
            code: error.code(),
        })?;

        let view = HandleGuard::acquire_from(platform.clone(), HandleKind::View, |p| {
            p.map_view(mapping.raw(), len)
        })
        .map_err(|error| MappingFailed {
            stage: MappingStage::MapView,
            code: error.code(),
        })?;

        // the view keeps the mapping alive
        if !mapping.release_no_throw() {
            warn!("failed to close mapping of {}", path.display());
        }

        debug!("mapped {} bytes of {}", size, path.display());
        Ok(MappedMemoryRegion {
            view: Some(view),
            size,
            name,
        })
    }

    /// Size of the mapped file in bytes
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        self.size
    }

    /// Returns `true` while a view is mapped
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.view.as_ref().is_some_and(HandleGuard::is_valid)
    }

    /// The qualified name of the mapping object, if one was requested
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Base address of the view.
    ///
    /// The pointer is valid for [`MappedMemoryRegion::byte_size`] bytes until the region
    /// is released or dropped. Prefer [`MappedMemoryRegion::as_slice`], which ties the
    /// borrow to the region.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidState`] if the region is empty or not mapped.
    pub fn raw_pointer(&self) -> Result<*const u8> {
        if self.size == 0 {
            return Err(InvalidState("region is empty"));
        }

        match &self.view {
            Some(view) if view.is_valid() => Ok(view.raw().as_ptr()),
            _ => Err(InvalidState("region is not mapped")),
        }
    }

    /// The mapped bytes. Empty for an empty file.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidState`] if the view was released.
    pub fn as_slice(&self) -> Result<&[u8]> {
        if self.size == 0 {
            return Ok(&[]);
        }

        let base = self.raw_pointer()?;
        // SAFETY: the view covers `size` bytes (which fit usize, checked when mapping) and
        // stays mapped while `self` is borrowed, since releasing requires `&mut self`.
        Ok(unsafe { std::slice::from_raw_parts(base, self.size as usize) })
    }

    /// A [`Parser`] over the mapped bytes, for reading fixed-size records.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidState`] if the view was released.
    pub fn parser(&self) -> Result<Parser<'_>> {
        Ok(Parser::new(self.as_slice()?))
    }

    /// Unmaps the view.
    ///
    /// Releasing an empty or already released region does nothing.
    ///
    /// # Errors
    /// Returns [`crate::Error::MappingFailed`] if unmapping fails. The region stays
    /// mapped in that case and the release is not retried.
    pub fn release(&mut self) -> Result<()> {
        match &self.view {
            Some(view) => view.try_release().map_err(|error| MappingFailed {
                stage: MappingStage::UnmapView,
                code: error.code(),
            }),
            None => Ok(()),
        }
    }
}
