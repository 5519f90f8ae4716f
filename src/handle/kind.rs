use strum::{Display, EnumCount, EnumIter};

use crate::{
    handle::NativeHandle,
    platform::{Platform, PlatformResult},
};

/// The kind of resource a handle names.
///
/// The kind decides which platform primitive releases the handle: views are
/// unmapped, memory blocks are freed and every other kind is a kernel object
/// that is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount)]
pub enum HandleKind {
    /// An open file
    File,
    /// A file-mapping object
    Mapping,
    /// A mapped view; the value is the view base address
    View,
    /// A platform-allocated memory block; the value is the block address
    Memory,
    /// A security token
    Token,
    /// A process
    Process,
    /// A loaded module image
    Image,
}

impl HandleKind {
    /// Returns `true` when the handle is a kernel object that can be duplicated.
    #[must_use]
    pub fn is_kernel_object(self) -> bool {
        !matches!(self, HandleKind::View | HandleKind::Memory)
    }

    pub(crate) fn release(self, platform: &dyn Platform, handle: NativeHandle) -> PlatformResult<()> {
        match self {
            HandleKind::View => platform.unmap_view(handle),
            HandleKind::Memory => platform.free_memory(handle),
            HandleKind::File
            | HandleKind::Mapping
            | HandleKind::Token
            | HandleKind::Process
            | HandleKind::Image => platform.close_handle(handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn only_views_and_memory_are_not_kernel_objects() {
        let non_kernel: Vec<_> = HandleKind::iter().filter(|k| !k.is_kernel_object()).collect();
        assert_eq!(non_kernel, vec![HandleKind::View, HandleKind::Memory]);
        assert_eq!(HandleKind::COUNT, 7);
    }
}
